//! A user-space TCP/IP stack: stream buffering, reassembly, TCP sender/receiver
//! state machines, ARP-resolving network interfaces, and longest-prefix-match
//! routing, plus a thin blocking socket wrapper over a TUN device.

pub mod byte_stream;
pub mod error;
pub mod link;
pub mod reassembler;
pub mod router;
pub mod socket;
pub mod tcp;
pub mod wrap32;

pub use byte_stream::ByteStream;
pub use error::{ConfigError, ConnectError};
pub use link::interface::NetworkInterface;
pub use reassembler::Reassembler;
pub use router::Router;
pub use socket::{Available, TcpStream};
pub use tcp::config::TcpConfig;
pub use tcp::receiver::TcpReceiver;
pub use tcp::sender::{SenderState, TcpSender};
pub use wrap32::Wrap32;

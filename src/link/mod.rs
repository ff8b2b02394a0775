//! Ethernet/ARP framing and the ARP-resolving network interface built on it.

pub mod interface;
pub mod wire;

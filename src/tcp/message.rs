//! Messages exchanged between a [`crate::tcp::sender::TcpSender`] and a
//! [`crate::tcp::receiver::TcpReceiver`], independent of how they're carried on the wire.

use crate::wrap32::Wrap32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSenderMessage {
    pub seqno: Wrap32,
    pub syn: bool,
    pub payload: Vec<u8>,
    pub fin: bool,
    pub rst: bool,
}

impl TcpSenderMessage {
    /// How many sequence numbers this segment consumes.
    pub fn sequence_length(&self) -> u64 {
        self.syn as u64 + self.payload.len() as u64 + self.fin as u64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpReceiverMessage {
    pub ackno: Option<Wrap32>,
    pub window_size: u16,
    pub rst: bool,
}

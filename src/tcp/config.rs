//! Sender-side configuration. Generalizes the teacher's free-standing `ISS`/`WINDOW_SIZE`
//! constants into a value the caller constructs explicitly, with a random ISN by default.

use crate::wrap32::Wrap32;

pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1000;
pub const DEFAULT_INITIAL_RTO_MS: u64 = 1000;

#[derive(Debug, Clone, Copy)]
pub struct TcpConfig {
    pub isn: Wrap32,
    pub initial_rto_ms: u64,
    pub max_payload_size: usize,
}

impl TcpConfig {
    /// A config with a random ISN, suitable for a real connection.
    pub fn new() -> Self {
        TcpConfig {
            isn: Wrap32::new(rand::random()),
            initial_rto_ms: DEFAULT_INITIAL_RTO_MS,
            max_payload_size: DEFAULT_MAX_PAYLOAD_SIZE,
        }
    }

    /// A config with a caller-chosen ISN, for deterministic tests.
    pub fn with_isn(isn: Wrap32) -> Self {
        TcpConfig {
            isn,
            ..Self::new()
        }
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self::new()
    }
}

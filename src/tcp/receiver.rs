//! Translates [`TcpSenderMessage`]s into [`Reassembler`] inserts, and reports
//! ackno/window/RST back to the peer's sender.

use crate::reassembler::Reassembler;
use crate::tcp::message::{TcpReceiverMessage, TcpSenderMessage};
use crate::wrap32::Wrap32;

#[derive(Debug)]
pub struct TcpReceiver {
    reassembler: Reassembler,
    isn: Option<Wrap32>,
    checkpoint: u64,
}

impl TcpReceiver {
    pub fn new(reassembler: Reassembler) -> Self {
        TcpReceiver {
            reassembler,
            isn: None,
            checkpoint: 0,
        }
    }

    pub fn reassembler(&mut self) -> &mut Reassembler {
        &mut self.reassembler
    }

    pub fn receive(&mut self, message: TcpSenderMessage) {
        if message.rst {
            self.reassembler.output().set_error();
            return;
        }

        let isn = match self.isn {
            Some(isn) => isn,
            None => {
                if !message.syn {
                    return;
                }
                self.isn = Some(message.seqno);
                self.checkpoint = 0;
                message.seqno
            }
        };

        let abs_seqno = message.seqno.unwrap(isn, self.checkpoint);
        let stream_index = if message.syn { abs_seqno } else { abs_seqno - 1 };

        self.reassembler.insert(stream_index, &message.payload, message.fin);

        let out = self.reassembler.output();
        self.checkpoint = out.writer().bytes_pushed() + out.reader().bytes_buffered() as u64;
    }

    pub fn send(&mut self) -> TcpReceiverMessage {
        let out = self.reassembler.output();
        let contiguous = out.writer().bytes_pushed() + out.reader().bytes_buffered() as u64;
        let closed = out.writer().is_closed();

        let ackno = self.isn.map(|isn| {
            let next_expected = contiguous + 1 + closed as u64;
            Wrap32::wrap(next_expected, isn)
        });

        let available = out.writer().available_capacity() as u64;
        let window_size = available.min(u16::MAX as u64) as u16;
        let rst = out.reader().has_error();

        TcpReceiverMessage {
            ackno,
            window_size,
            rst,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::byte_stream::ByteStream;

    fn new_receiver(capacity: usize) -> TcpReceiver {
        TcpReceiver::new(Reassembler::new(ByteStream::new(capacity)))
    }

    #[test]
    fn ignores_everything_before_syn() {
        let mut r = new_receiver(8);
        r.receive(TcpSenderMessage {
            seqno: Wrap32::new(5),
            syn: false,
            payload: b"x".to_vec(),
            fin: false,
            rst: false,
        });
        assert_eq!(r.send().ackno, None);
    }

    #[test]
    fn syn_establishes_isn_and_ackno() {
        let mut r = new_receiver(8);
        r.receive(TcpSenderMessage {
            seqno: Wrap32::new(100),
            syn: true,
            payload: vec![],
            fin: false,
            rst: false,
        });
        let msg = r.send();
        assert_eq!(msg.ackno, Some(Wrap32::new(101)));
        assert_eq!(msg.window_size, 8);
    }

    #[test]
    fn data_and_fin_advance_ackno() {
        let mut r = new_receiver(8);
        r.receive(TcpSenderMessage {
            seqno: Wrap32::new(0),
            syn: true,
            payload: b"ab".to_vec(),
            fin: false,
            rst: false,
        });
        let msg = r.send();
        assert_eq!(msg.ackno, Some(Wrap32::new(3)));

        r.receive(TcpSenderMessage {
            seqno: Wrap32::new(3),
            syn: false,
            payload: vec![],
            fin: true,
            rst: false,
        });
        let msg = r.send();
        assert_eq!(msg.ackno, Some(Wrap32::new(4)));
    }

    #[test]
    fn rst_sets_error_flag() {
        let mut r = new_receiver(8);
        r.receive(TcpSenderMessage {
            seqno: Wrap32::new(0),
            syn: true,
            payload: vec![],
            fin: false,
            rst: false,
        });
        r.receive(TcpSenderMessage {
            seqno: Wrap32::new(1),
            syn: false,
            payload: vec![],
            fin: false,
            rst: true,
        });
        assert!(r.send().rst);
    }

    #[test]
    fn window_size_caps_at_65535() {
        let mut r = new_receiver(100_000);
        r.receive(TcpSenderMessage {
            seqno: Wrap32::new(0),
            syn: true,
            payload: vec![],
            fin: false,
            rst: false,
        });
        assert_eq!(r.send().window_size, u16::MAX);
    }
}

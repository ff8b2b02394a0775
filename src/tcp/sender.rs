//! Segments outbound bytes into [`TcpSenderMessage`]s, tracks what's in flight,
//! and retransmits with exponential backoff on a host-driven `tick`.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::byte_stream::ByteStream;
use crate::tcp::config::TcpConfig;
use crate::tcp::message::TcpSenderMessage;
use crate::tcp::message::TcpReceiverMessage;
use crate::wrap32::Wrap32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Closed,
    SynSent,
    Established,
    FinSent,
    Reset,
}

#[derive(Debug)]
struct Outstanding {
    message: TcpSenderMessage,
    sent_at_ms: u64,
    /// The absolute sequence number one past this segment's last byte.
    end_seqno: u64,
}

#[derive(Debug)]
pub struct TcpSender {
    config: TcpConfig,
    input: ByteStream,
    next_seqno: u64,
    last_ackno: u64,
    current_window: u16,
    is_syn_sent: bool,
    is_fin_sent: bool,
    is_rst: bool,
    outstanding: VecDeque<Outstanding>,
    current_rto_ms: u64,
    consecutive_retransmissions: u64,
    elapsed_ms: u64,
}

impl TcpSender {
    pub fn new(input: ByteStream, config: TcpConfig) -> Self {
        let current_rto_ms = config.initial_rto_ms;
        TcpSender {
            config,
            input,
            next_seqno: 0,
            last_ackno: 0,
            current_window: 1,
            is_syn_sent: false,
            is_fin_sent: false,
            is_rst: false,
            outstanding: VecDeque::new(),
            current_rto_ms,
            consecutive_retransmissions: 0,
            elapsed_ms: 0,
        }
    }

    pub fn input(&mut self) -> &mut ByteStream {
        &mut self.input
    }

    pub fn sequence_numbers_in_flight(&self) -> u64 {
        self.next_seqno - self.last_ackno
    }

    pub fn consecutive_retransmissions(&self) -> u64 {
        self.consecutive_retransmissions
    }

    pub fn current_rto_ms(&self) -> u64 {
        self.current_rto_ms
    }

    pub fn state(&self) -> SenderState {
        if self.is_rst {
            SenderState::Reset
        } else if !self.is_syn_sent {
            SenderState::Closed
        } else if self.is_fin_sent && self.outstanding.is_empty() {
            SenderState::Closed
        } else if self.is_fin_sent {
            SenderState::FinSent
        } else if self.last_ackno > 0 {
            SenderState::Established
        } else {
            SenderState::SynSent
        }
    }

    /// Segment as many outstanding bytes as the window allows, handing each
    /// segment to `transmit` as it's produced.
    pub fn push(&mut self, mut transmit: impl FnMut(TcpSenderMessage)) {
        if self.input.has_error() {
            self.is_rst = true;
        }
        if self.is_rst {
            transmit(self.make_empty_message());
            return;
        }

        loop {
            let effective_window = self.current_window.max(1) as u64;
            let in_flight = self.sequence_numbers_in_flight();
            let usable = effective_window.saturating_sub(in_flight);

            let syn = !self.is_syn_sent;
            let syn_cost = syn as u64;
            let payload_budget = usable.saturating_sub(syn_cost);
            let buffered = self.input.reader().bytes_buffered() as u64;
            let payload_len =
                (self.config.max_payload_size as u64).min(payload_budget).min(buffered) as usize;

            let all_buffered_included = payload_len as u64 == buffered;
            let remaining_after_payload = usable.saturating_sub(syn_cost + payload_len as u64);
            let fin = !self.is_fin_sent
                && self.input.writer().is_closed()
                && all_buffered_included
                && remaining_after_payload >= 1;

            if !syn && !fin && payload_len == 0 {
                break;
            }

            let payload = self.pop_payload(payload_len);
            let message = TcpSenderMessage {
                seqno: Wrap32::wrap(self.next_seqno, self.config.isn),
                syn,
                payload,
                fin,
                rst: false,
            };
            let seq_len = message.sequence_length();
            self.next_seqno += seq_len;
            if syn {
                self.is_syn_sent = true;
            }
            if fin {
                self.is_fin_sent = true;
            }
            self.outstanding.push_back(Outstanding {
                message: message.clone(),
                sent_at_ms: self.elapsed_ms,
                end_seqno: self.next_seqno,
            });
            trace!(seqno = ?message.seqno, len = seq_len, syn, fin, "segment sent");
            transmit(message);
        }
    }

    fn pop_payload(&mut self, len: usize) -> Vec<u8> {
        let mut buf = Vec::with_capacity(len);
        let mut reader = self.input.reader();
        while buf.len() < len {
            let n = reader.peek().len().min(len - buf.len());
            buf.extend_from_slice(&reader.peek()[..n]);
            reader.pop(n);
        }
        buf
    }

    /// Process an incoming ack/window update from the peer. RST is sticky but does not
    /// short-circuit: the ack/window/outstanding-queue update below still runs on a
    /// combined RST+ACK segment, matching a real TCP stack processing both fields of
    /// the same incoming segment.
    pub fn receive(&mut self, msg: &TcpReceiverMessage) {
        if self.input.has_error() {
            self.is_rst = true;
        }
        self.is_rst |= msg.rst;
        if self.is_rst {
            self.input.set_error();
        }

        let abs_ackno = msg.ackno.map(|a| a.unwrap(self.config.isn, self.last_ackno));
        if let Some(abs) = abs_ackno {
            if abs > self.next_seqno {
                trace!(abs, next = self.next_seqno, "ignoring ack for unsent bytes");
                return;
            }
        }

        self.current_window = msg.window_size;

        if let Some(abs) = abs_ackno {
            self.last_ackno = abs;
            let mut popped_any = false;
            while let Some(front) = self.outstanding.front() {
                if front.end_seqno <= self.last_ackno {
                    self.outstanding.pop_front();
                    popped_any = true;
                } else {
                    break;
                }
            }
            if popped_any {
                self.current_rto_ms = self.config.initial_rto_ms;
                self.consecutive_retransmissions = 0;
                if let Some(front) = self.outstanding.front_mut() {
                    front.sent_at_ms = self.elapsed_ms;
                }
                debug!(last_ackno = self.last_ackno, "new bytes acked, rto reset");
            }
        }
    }

    /// Advance time; retransmit the head of the outstanding queue if its RTO expired.
    pub fn tick(&mut self, ms_since_last_tick: u64, mut transmit: impl FnMut(TcpSenderMessage)) {
        self.elapsed_ms += ms_since_last_tick;
        if let Some(front) = self.outstanding.front_mut() {
            if self.elapsed_ms.saturating_sub(front.sent_at_ms) >= self.current_rto_ms {
                transmit(front.message.clone());
                self.consecutive_retransmissions += 1;
                if self.current_window > 0 {
                    self.current_rto_ms *= 2;
                }
                front.sent_at_ms = self.elapsed_ms;
                debug!(
                    rto = self.current_rto_ms,
                    retransmissions = self.consecutive_retransmissions,
                    "retransmitting"
                );
            }
        }
    }

    pub fn make_empty_message(&self) -> TcpSenderMessage {
        TcpSenderMessage {
            seqno: Wrap32::wrap(self.next_seqno, self.config.isn),
            syn: false,
            payload: vec![],
            fin: false,
            rst: self.is_rst || self.input.has_error(),
        }
    }
}

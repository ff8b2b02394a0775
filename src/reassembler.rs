//! Reassembles possibly-overlapping, out-of-order indexed byte ranges into a
//! contiguous [`ByteStream`].
//!
//! Gap tracking uses a growable bit-vector (words of `u64`) rather than the
//! teacher's `VecDeque`-of-bytes buffers, since the reassembler's acceptance
//! window can be sparsely filled: `first_unset_from` walks whole words with
//! `trailing_zeros` on an inverted word, giving amortized O(1) "where's the next
//! unassembled byte" even under adversarial, far-ahead-of-gap inserts. Dropping
//! bits that have flushed is a `VecDeque::pop_front` of whole words plus a
//! sub-word offset, not a full rebuild, so that's amortized O(1) per byte too.

use std::collections::VecDeque;

use crate::byte_stream::ByteStream;

#[derive(Debug, Default)]
struct Bitset {
    words: VecDeque<u64>,
    /// Bits `0..bit_offset` of `words[0]` belong to already-dropped indices.
    bit_offset: usize,
}

impl Bitset {
    fn ensure_capacity(&mut self, bits: usize) {
        let words_needed = (self.bit_offset + bits).div_ceil(64);
        while self.words.len() < words_needed {
            self.words.push_back(0);
        }
    }

    fn set(&mut self, index: usize) {
        let pos = self.bit_offset + index;
        self.words[pos / 64] |= 1u64 << (pos % 64);
    }

    fn get(&self, index: usize) -> bool {
        let pos = self.bit_offset + index;
        match self.words.get(pos / 64) {
            Some(word) => word & (1u64 << (pos % 64)) != 0,
            None => false,
        }
    }

    /// First index `>= start` whose bit is unset, scanning word-at-a-time.
    fn first_unset_from(&self, start: usize) -> usize {
        let pos = self.bit_offset + start;
        let mut word_idx = pos / 64;
        let bit_idx = pos % 64;
        if word_idx < self.words.len() {
            let mask = (1u64 << bit_idx) - 1;
            let candidate = !(self.words[word_idx] | mask);
            if candidate != 0 {
                return word_idx * 64 + candidate.trailing_zeros() as usize - self.bit_offset;
            }
        }
        word_idx += 1;
        while word_idx < self.words.len() {
            let candidate = !self.words[word_idx];
            if candidate != 0 {
                return word_idx * 64 + candidate.trailing_zeros() as usize - self.bit_offset;
            }
            word_idx += 1;
        }
        self.words.len() * 64 - self.bit_offset
    }

    /// Drop the first `n` indices, shifting every remaining index down by `n`.
    /// Whole words that fall entirely before the new index 0 are popped outright;
    /// only a sub-word offset is carried forward, so this costs O(n / 64), not O(capacity).
    fn drop_front(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        let total = self.bit_offset + n;
        let whole_words = (total / 64).min(self.words.len());
        for _ in 0..whole_words {
            self.words.pop_front();
        }
        self.bit_offset = total % 64;
    }
}

#[derive(Debug)]
pub struct Reassembler {
    output: ByteStream,
    eof_index: Option<u64>,
    pending_bytes: usize,
    buffer: Vec<u8>,
    present: Bitset,
    /// Absolute index that `buffer[0]` / `present` bit 0 corresponds to.
    base: u64,
}

impl Reassembler {
    pub fn new(output: ByteStream) -> Self {
        Reassembler {
            output,
            eof_index: None,
            pending_bytes: 0,
            buffer: Vec::new(),
            present: Bitset::default(),
            base: 0,
        }
    }

    pub fn output(&mut self) -> &mut ByteStream {
        &mut self.output
    }

    pub fn count_bytes_pending(&self) -> usize {
        self.pending_bytes
    }

    /// Insert `data` at absolute stream index `first_index`; `is_last` marks the
    /// substring as containing the final byte of the stream (FIN).
    pub fn insert(&mut self, first_index: u64, data: &[u8], is_last: bool) {
        if is_last {
            self.eof_index.get_or_insert(first_index + data.len() as u64);
        }

        let pushed = self.output.writer().bytes_pushed();
        debug_assert_eq!(self.base, pushed, "internal buffer base must track bytes already flushed");

        let available_capacity = self.output.writer().available_capacity() as u64;
        let first_unacceptable = pushed + available_capacity;
        let window_start = first_index.max(pushed);
        let window_end = (first_index + data.len() as u64).min(first_unacceptable);

        if window_start < window_end {
            let rel_end = (window_end - self.base) as usize;
            if self.buffer.len() < rel_end {
                self.buffer.resize(rel_end, 0);
            }
            self.present.ensure_capacity(rel_end);

            for abs in window_start..window_end {
                let rel = (abs - self.base) as usize;
                if !self.present.get(rel) {
                    self.buffer[rel] = data[(abs - first_index) as usize];
                    self.present.set(rel);
                    self.pending_bytes += 1;
                }
            }
        }

        self.flush();

        if self.eof_index == Some(self.output.writer().bytes_pushed()) {
            self.output.writer().close();
        }
    }

    /// Write out every contiguous run of present bytes starting at `base`.
    fn flush(&mut self) {
        let run_len = self.present.first_unset_from(0);
        if run_len == 0 {
            return;
        }
        let run_len = run_len.min(self.buffer.len());
        let before = self.output.writer().bytes_pushed();
        self.output.writer().push(&self.buffer[..run_len]);
        let accepted = (self.output.writer().bytes_pushed() - before) as usize;
        self.pending_bytes -= accepted;
        self.advance_base_to(self.base + accepted as u64);
    }

    fn advance_base_to(&mut self, new_base: u64) {
        let drop = (new_base - self.base) as usize;
        if drop == 0 {
            return;
        }
        let drop = drop.min(self.buffer.len());
        self.buffer.drain(..drop);
        self.present.drop_front(drop);
        self.base = new_base;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reorder_scenario_from_spec() {
        let mut r = Reassembler::new(ByteStream::new(8));
        r.insert(2, b"cd", false);
        assert_eq!(r.count_bytes_pending(), 2);
        r.insert(0, b"ab", false);
        assert_eq!(r.count_bytes_pending(), 0);
        r.insert(4, b"ef", true);
        assert_eq!(r.count_bytes_pending(), 0);

        let out = r.output();
        assert_eq!(out.reader().peek(), b"abcdef");
        assert!(out.writer().is_closed());
        assert!(out.reader().is_finished());
    }

    #[test]
    fn overlapping_insert_is_idempotent() {
        let mut r = Reassembler::new(ByteStream::new(8));
        r.insert(0, b"ab", false);
        r.insert(0, b"xy", false); // should have no effect, first write wins
        assert_eq!(r.output().reader().peek(), b"ab");
    }

    #[test]
    fn bytes_past_window_are_discarded() {
        let mut r = Reassembler::new(ByteStream::new(4));
        r.insert(0, b"abcdefgh", false);
        assert_eq!(r.output().reader().peek(), b"abcd");
        assert_eq!(r.count_bytes_pending(), 0);
    }

    #[test]
    fn gap_then_fill_flushes_full_run() {
        let mut r = Reassembler::new(ByteStream::new(10));
        r.insert(3, b"def", true);
        assert_eq!(r.count_bytes_pending(), 3);
        r.insert(0, b"abc", false);
        assert_eq!(r.output().reader().peek(), b"abcdef");
        assert!(r.output().writer().is_closed());
    }

    #[test]
    fn capacity_frees_up_as_reader_pops() {
        let mut r = Reassembler::new(ByteStream::new(2));
        r.insert(0, b"ab", false);
        r.insert(2, b"cd", false); // discarded, no capacity
        assert_eq!(r.output().reader().peek(), b"ab");
        r.output().reader().pop(2);
        r.insert(2, b"cd", false);
        assert_eq!(r.output().reader().peek(), b"cd");
    }
}

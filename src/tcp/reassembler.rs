//! Buffers out-of-order segment payloads by absolute sequence index and
//! flushes in-order prefixes into the output `ByteStream`, per spec.md's
//! "stream reassembler" collaborator contract.

use std::collections::BTreeMap;

use super::byte_stream::ByteStream;

#[derive(Debug)]
pub struct Reassembler {
    output: ByteStream,
    /// absolute index of the first byte the output stream is missing.
    first_unassembled: u64,
    /// buffered out-of-order spans, keyed by their absolute start index.
    pending: BTreeMap<u64, Vec<u8>>,
    pending_bytes: usize,
    /// absolute index one past the last byte of the stream, once known
    /// (i.e. once a segment carrying FIN has been seen).
    final_index: Option<u64>,
}

impl Reassembler {
    pub fn new(output: ByteStream) -> Self {
        Reassembler {
            output,
            first_unassembled: 0,
            pending: BTreeMap::new(),
            pending_bytes: 0,
            final_index: None,
        }
    }

    /// Accepts bytes known to start at absolute index `index`. `is_last`
    /// marks that this span's last byte is the stream's final byte.
    pub fn insert(&mut self, index: u64, data: &[u8], is_last: bool) {
        if is_last {
            self.final_index = Some(index + data.len() as u64);
        }

        let first_unacceptable = self.first_unassembled + self.output.remaining_capacity() as u64;

        let (start, trimmed) = Self::clip(index, data, self.first_unassembled, first_unacceptable);
        if !trimmed.is_empty() {
            self.buffer_span(start, trimmed);
        }

        self.flush();
    }

    fn clip(index: u64, data: &[u8], lo: u64, hi: u64) -> (u64, Vec<u8>) {
        let end = index + data.len() as u64;
        let clip_start = index.max(lo);
        let clip_end = end.min(hi);
        if clip_start >= clip_end {
            return (clip_start, Vec::new());
        }
        let rel_start = (clip_start - index) as usize;
        let rel_end = (clip_end - index) as usize;
        (clip_start, data[rel_start..rel_end].to_vec())
    }

    /// Merges a new span into `pending`, trimming against any overlapping
    /// spans already buffered rather than storing duplicate bytes.
    fn buffer_span(&mut self, mut start: u64, mut data: Vec<u8>) {
        // Trim the front against the span immediately before us, if it
        // overlaps.
        if let Some((&prev_start, prev_data)) = self.pending.range(..=start).next_back() {
            let prev_end = prev_start + prev_data.len() as u64;
            if prev_end > start {
                if prev_end >= start + data.len() as u64 {
                    // Fully covered already.
                    return;
                }
                let skip = (prev_end - start) as usize;
                data = data[skip..].to_vec();
                start = prev_end;
            }
        }

        // Absorb/trim any spans that start within our new range.
        let mut end = start + data.len() as u64;
        let overlapping: Vec<u64> = self
            .pending
            .range(start..end)
            .map(|(&k, _)| k)
            .collect();
        for key in overlapping {
            if let Some(existing) = self.pending.remove(&key) {
                self.pending_bytes -= existing.len();
                let existing_end = key + existing.len() as u64;
                if existing_end > end {
                    let keep_from = (end - key) as usize;
                    let leftover = existing[keep_from..].to_vec();
                    self.pending_bytes += leftover.len();
                    end = existing_end;
                    self.pending.insert(end - leftover.len() as u64, leftover);
                }
            }
        }

        if !data.is_empty() {
            self.pending_bytes += data.len();
            self.pending.insert(start, data);
        }
    }

    /// Moves any spans now contiguous with `first_unassembled` into the
    /// output stream.
    fn flush(&mut self) {
        while let Some((&start, _)) = self.pending.iter().next() {
            if start != self.first_unassembled {
                break;
            }
            let data = self.pending.remove(&start).unwrap();
            self.pending_bytes -= data.len();
            let written = self.output.write(&data);
            self.first_unassembled += written as u64;
            if written < data.len() {
                // Output ran out of capacity mid-span; re-buffer the rest.
                let leftover = data[written..].to_vec();
                self.pending_bytes += leftover.len();
                self.pending.insert(self.first_unassembled, leftover);
                break;
            }
        }

        if let Some(final_index) = self.final_index {
            if self.first_unassembled >= final_index {
                self.output.end_input();
            }
        }
    }

    pub fn first_unassembled(&self) -> u64 {
        self.first_unassembled
    }

    pub fn unassembled_bytes(&self) -> usize {
        self.pending_bytes
    }

    pub fn output(&self) -> &ByteStream {
        &self.output
    }

    pub fn output_mut(&mut self) -> &mut ByteStream {
        &mut self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reassembler(capacity: usize) -> Reassembler {
        Reassembler::new(ByteStream::new(capacity))
    }

    #[test]
    fn in_order_insert_flushes_immediately() {
        let mut r = reassembler(10);
        r.insert(0, b"hello", false);
        assert_eq!(r.output().buffer_size(), 5);
        assert_eq!(r.first_unassembled(), 5);
    }

    #[test]
    fn out_of_order_then_fill_gap() {
        let mut r = reassembler(10);
        r.insert(3, b"lo", false);
        assert_eq!(r.output().buffer_size(), 0);
        assert_eq!(r.unassembled_bytes(), 2);

        r.insert(0, b"hel", false);
        assert_eq!(r.output().buffer_size(), 5);
        assert_eq!(r.unassembled_bytes(), 0);
    }

    #[test]
    fn overlap_is_trimmed_not_duplicated() {
        let mut r = reassembler(10);
        r.insert(0, b"ab", false);
        r.insert(0, b"abcd", false);
        assert_eq!(r.output().buffer_size(), 4);
    }

    #[test]
    fn bytes_past_window_are_dropped() {
        let mut r = reassembler(4);
        r.insert(0, b"abcdef", false);
        assert_eq!(r.output().buffer_size(), 4);
        assert_eq!(r.unassembled_bytes(), 0);
    }

    #[test]
    fn eof_signaled_once_final_byte_assembled() {
        let mut r = reassembler(10);
        r.insert(2, b"c", true);
        assert!(!r.output().input_ended());
        r.insert(0, b"ab", false);
        assert!(r.output().input_ended());
        r.output_mut().read(3);
        assert!(r.output().eof());
    }
}

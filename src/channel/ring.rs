//! # Circular output buffer with line reassembly.
//!
//! [`OutputRing`] stores every byte a command writes, at the logical position
//! `n mod capacity` of an ever-growing byte counter `n`. A second marker,
//! `line_start`, remembers where the current (unflushed) line began. When a
//! newline arrives the line is recovered as one or two contiguous segments:
//!
//! ```text
//! no wrap:    [ .. start ......... end .. ]          one segment
//! wrapped:    [ ... end ]  [ start ....... ]         tail first, then head
//! overflow:   line longer than capacity; only the most recent `capacity`
//!             bytes (ending at the newline) are recoverable, oldest bytes
//!             are gone
//! ```
//!
//! Overflow is detected when a push makes the wrapped positions of `n` and
//! `line_start` coincide; each further full buffer without a newline counts
//! another overflow. The counters never wrap: `n` is a `u64` of total bytes.

/// Fixed-capacity circular byte buffer tracking one in-progress line.
#[derive(Debug)]
pub struct OutputRing {
    buf: Box<[u8]>,
    /// Total bytes ever written; the write position is `n % capacity`.
    n: u64,
    /// Logical position where the current line starts.
    line_start: u64,
    /// Times the current line has overflowed the buffer.
    overflows: u32,
}

impl OutputRing {
    /// Creates a ring with the given capacity in bytes.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            n: 0,
            line_start: 0,
            overflows: 0,
        }
    }

    /// Appends one byte; returns `true` if the push overflowed the buffer
    /// (the current line just grew past `capacity` unflushed bytes).
    pub fn push(&mut self, byte: u8) -> bool {
        let cap = self.buf.len() as u64;
        self.buf[(self.n % cap) as usize] = byte;
        self.n += 1;
        if self.n % cap == self.line_start % cap && self.n != self.line_start {
            self.overflows += 1;
            true
        } else {
            false
        }
    }

    /// Length in bytes of the current unflushed line.
    pub fn line_len(&self) -> u64 {
        self.n - self.line_start
    }

    /// Number of times the current line overflowed the buffer.
    pub fn overflows(&self) -> u32 {
        self.overflows
    }

    /// Total bytes ever pushed.
    pub fn total(&self) -> u64 {
        self.n
    }

    /// Returns the current line as up to two contiguous segments
    /// (first, second); the second is empty when the line did not wrap.
    ///
    /// For an overflowed line, the segments cover exactly the most recent
    /// `capacity` bytes ending at the last pushed byte; older bytes of the
    /// line are not recoverable.
    ///
    /// Call only with a non-empty line; [`consume_line`](Self::consume_line)
    /// must follow once the segments have been written out.
    pub fn line_segments(&self) -> (&[u8], &[u8]) {
        debug_assert!(self.n > self.line_start);
        let cap = self.buf.len();
        let end = ((self.n - 1) % cap as u64) as usize;

        if self.overflows == 0 {
            let start = (self.line_start % cap as u64) as usize;
            if start <= end {
                (&self.buf[start..=end], &[])
            } else {
                (&self.buf[start..], &self.buf[..=end])
            }
        } else if end + 1 < cap {
            // Only the last `cap` bytes survive: from just past the newline
            // around the wrap point, then the head up to the newline.
            (&self.buf[end + 1..], &self.buf[..=end])
        } else {
            (&self.buf[..=end], &[])
        }
    }

    /// Marks the current line flushed: the next line starts at the current
    /// write position and the overflow count resets.
    pub fn consume_line(&mut self) {
        self.line_start = self.n;
        self.overflows = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(ring: &OutputRing) -> Vec<u8> {
        let (a, b) = ring.line_segments();
        let mut v = a.to_vec();
        v.extend_from_slice(b);
        v
    }

    /// Feeds bytes, flushing at each newline, and returns the flushed lines.
    fn run_lines(ring: &mut OutputRing, bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        for &b in bytes {
            ring.push(b);
            if b == b'\n' {
                lines.push(collect(ring));
                ring.consume_line();
            }
        }
        lines
    }

    #[test]
    fn test_contiguous_line_roundtrip() {
        let mut ring = OutputRing::new(64);
        let lines = run_lines(&mut ring, b"hello\nworld\n");
        assert_eq!(lines, vec![b"hello\n".to_vec(), b"world\n".to_vec()]);
    }

    #[test]
    fn test_lines_crossing_wrap_boundary_are_reassembled() {
        let mut ring = OutputRing::new(16);
        // 3 writes of 6 bytes each: the third line spans the wrap at 16.
        let lines = run_lines(&mut ring, b"aaaaa\nbbbbb\nccccc\n");
        assert_eq!(
            lines,
            vec![b"aaaaa\n".to_vec(), b"bbbbb\n".to_vec(), b"ccccc\n".to_vec()]
        );
    }

    #[test]
    fn test_many_buffers_of_data_with_embedded_newlines() {
        let mut ring = OutputRing::new(32);
        let mut input = Vec::new();
        let mut expected = Vec::new();
        for i in 0..40 {
            let line = format!("line-{i:02}\n").into_bytes();
            input.extend_from_slice(&line);
            expected.push(line);
        }
        assert!(input.len() > 4 * 32);
        assert_eq!(run_lines(&mut ring, &input), expected);
    }

    #[test]
    fn test_overflowed_line_recovers_last_capacity_bytes() {
        let cap = 16;
        let mut ring = OutputRing::new(cap);
        // 40 payload bytes then the newline: only the final 16 bytes
        // (ending with the newline) survive.
        let mut input: Vec<u8> = (0..40u8).collect();
        input.push(b'\n');

        let mut overflowed = false;
        for &b in &input {
            overflowed |= ring.push(b);
        }
        assert!(overflowed);
        assert!(ring.overflows() >= 1);

        let got = collect(&ring);
        assert_eq!(got.len(), cap);
        assert_eq!(got, input[input.len() - cap..].to_vec());
    }

    #[test]
    fn test_overflow_exactly_at_capacity() {
        let cap = 8;
        let mut ring = OutputRing::new(cap);
        // A line of exactly `cap` bytes including the newline coincides the
        // wrapped positions, which counts as an overflow; the recovered
        // bytes are still the whole line.
        let input = b"abcdefg\n";
        let mut overflowed = false;
        for &b in input {
            overflowed |= ring.push(b);
        }
        assert!(overflowed);
        assert_eq!(collect(&ring), input.to_vec());
    }

    #[test]
    fn test_consume_resets_overflow_and_start() {
        let mut ring = OutputRing::new(8);
        for &b in b"0123456789ab\n" {
            ring.push(b);
        }
        assert!(ring.overflows() >= 1);
        ring.consume_line();
        assert_eq!(ring.overflows(), 0);
        assert_eq!(ring.line_len(), 0);

        // The ring keeps working normally after an overflow flush.
        for &b in b"ok\n" {
            ring.push(b);
        }
        assert_eq!(collect(&ring), b"ok\n".to_vec());
    }

    #[test]
    fn test_newline_only_line() {
        let mut ring = OutputRing::new(8);
        ring.push(b'\n');
        assert_eq!(collect(&ring), b"\n".to_vec());
    }
}

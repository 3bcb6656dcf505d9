//! Accumulates raw bytes from a child's stdout and yields complete
//! newline-terminated frames.
//!
//! Generalizes the reference server's chunk-based stdout reader
//! (`sessions::session::ManagedSession::spawn`'s stdout task, which pushes
//! raw 4 KiB reads straight into an `OutputBuffer`) into an owned
//! accumulator with an explicit `ingest` operation, since here each
//! complete line is itself a JSON payload that must be parsed as a unit
//! rather than streamed as opaque text.

/// Result of one [`LineFramer::ingest`] call.
#[derive(Debug, Default)]
pub struct IngestResult {
    /// Complete frames extracted from the accumulator, in stdout byte order.
    /// Frames are raw bytes, not yet trimmed or classified.
    pub frames: Vec<Vec<u8>>,
    /// Set when the retained remainder (the bytes after the last newline)
    /// would have exceeded the configured cap. Per the framing contract, no
    /// further `ingest` call is defined once this is set — the caller must
    /// tear down the session.
    pub overflow: bool,
}

/// Owned byte accumulator with a hard cap on the retained (no-newline-yet)
/// remainder.
pub struct LineFramer {
    buf: Vec<u8>,
    max_buffer: usize,
}

impl LineFramer {
    /// Build a framer with the given maximum retained-remainder size
    /// (`MAX_BUFFER` in the supervisor's terms).
    pub fn new(max_buffer: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_buffer,
        }
    }

    /// Append `chunk`, split at newline boundaries, and return complete
    /// frames in input order. Any trailing bytes without a newline are
    /// retained for the next call.
    ///
    /// No frame contains a `\n`. No byte is ever returned twice. If the
    /// retained remainder after splitting would exceed `max_buffer`, the
    /// accumulator is cleared (not grown past the cap) and `overflow` is
    /// set; the caller must treat this as terminal.
    pub fn ingest(&mut self, chunk: &[u8]) -> IngestResult {
        self.buf.extend_from_slice(chunk);

        let mut frames = Vec::new();
        let mut start = 0;
        while let Some(rel_nl) = memchr_newline(&self.buf[start..]) {
            let end = start + rel_nl;
            frames.push(self.buf[start..end].to_vec());
            start = end + 1;
        }

        let remainder_len = self.buf.len() - start;
        if remainder_len > self.max_buffer {
            self.buf.clear();
            return IngestResult {
                frames,
                overflow: true,
            };
        }

        self.buf.drain(0..start);
        IngestResult {
            frames,
            overflow: false,
        }
    }

    /// Return and clear any retained remainder. Used on child exit to
    /// surface a final partial line, if any, as diagnostic context.
    pub fn drain(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buf)
    }
}

fn memchr_newline(haystack: &[u8]) -> Option<usize> {
    haystack.iter().position(|&b| b == b'\n')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_complete_lines_and_retains_partial() {
        let mut framer = LineFramer::new(1024);
        let res = framer.ingest(b"one\ntwo\nthr");
        assert_eq!(res.frames, vec![b"one".to_vec(), b"two".to_vec()]);
        assert!(!res.overflow);

        let res = framer.ingest(b"ee\n");
        assert_eq!(res.frames, vec![b"three".to_vec()]);
    }

    #[test]
    fn split_at_arbitrary_byte_positions_yields_same_frames() {
        let input = b"alpha\nbeta\ngamma\n";
        let mut whole = LineFramer::new(1024);
        let whole_frames = whole.ingest(input).frames;

        let mut split = LineFramer::new(1024);
        let mut split_frames = Vec::new();
        for byte in input {
            split_frames.extend(split.ingest(&[*byte]).frames);
        }
        assert_eq!(whole_frames, split_frames);
    }

    #[test]
    fn successive_newlines_yield_empty_frames() {
        let mut framer = LineFramer::new(1024);
        let res = framer.ingest(b"a\n\nb\n");
        assert_eq!(res.frames, vec![b"a".to_vec(), Vec::new(), b"b".to_vec()]);
    }

    #[test]
    fn overflow_signals_and_does_not_grow_past_cap() {
        let mut framer = LineFramer::new(8);
        let res = framer.ingest(b"123456789");
        assert!(res.overflow);
        assert!(res.frames.is_empty());
    }

    #[test]
    fn no_byte_is_ever_returned_twice() {
        let mut framer = LineFramer::new(1024);
        let mut all = Vec::new();
        for chunk in [&b"ab"[..], &b"c\nde"[..], &b"f\n"[..]] {
            for f in framer.ingest(chunk).frames {
                all.extend(f);
                all.push(b'\n');
            }
        }
        assert_eq!(all, b"abc\ndef\n");
    }
}

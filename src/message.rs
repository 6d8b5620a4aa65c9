//! # Message
//!
//! Owns a caller-provided scatter/gather buffer list plus a populated
//! length (spec.md §3 "Message", §4.4). Grounded on `taps_message.c`'s
//! `tapsMessage` (a single `iovec` plus an optional list, with `truncate`
//! walking the list and shrinking the tail entry).
//!
//! Buffers are `bytes::Bytes` rather than raw pointers: cheap to clone,
//! backed by caller-provided memory, and already the idiom this corpus uses
//! for buffer ownership at transport boundaries (`shadow-shadow`, `quinn`).

use bytes::Bytes;

/// A scatter/gather message: zero or more `Bytes` segments plus the
/// currently-populated length (the sum of segment lengths up to any
/// truncation).
#[derive(Debug, Clone, Default)]
pub struct Message {
    segments: Vec<Bytes>,
}

impl Message {
    /// Wrap a single buffer (the common case — `tapsMessageNew(buf, len)`).
    pub fn new(buf: impl Into<Bytes>) -> Self {
        Message { segments: vec![buf.into()] }
    }

    /// Wrap an already-scattered buffer list.
    pub fn from_segments(segments: Vec<Bytes>) -> Self {
        Message { segments }
    }

    /// Total populated length across all segments.
    pub fn len(&self) -> usize {
        self.segments.iter().map(Bytes::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The first buffer in the scatter list (`tapsMessageGetFirstBuf`).
    pub fn first_buf(&self) -> Option<&Bytes> {
        self.segments.first()
    }

    /// The full scatter/gather list (`tapsMessageGetIovec`).
    pub fn iovec(&self) -> &[Bytes] {
        &self.segments
    }

    /// Reduce the populated length to `cap`, dropping segments beyond the
    /// cut point and shrinking the segment straddling it so the sum of
    /// remaining lengths is exactly `cap`. If `cap` exceeds the total
    /// length, nothing changes (`tapsMessageTruncate`'s behavior when
    /// `length` exceeds the buffer).
    pub fn truncate(&mut self, cap: usize) {
        let mut remaining = cap;
        let mut keep = 0;
        for segment in &mut self.segments {
            if remaining == 0 {
                break;
            }
            if segment.len() <= remaining {
                remaining -= segment.len();
                keep += 1;
            } else {
                *segment = segment.slice(0..remaining);
                remaining = 0;
                keep += 1;
            }
        }
        self.segments.truncate(keep);
    }

    /// Concatenate all segments into one contiguous buffer. Convenience for
    /// protocol modules that need a flat view (e.g. to frame a send).
    pub fn to_contiguous(&self) -> Bytes {
        if self.segments.len() == 1 {
            return self.segments[0].clone();
        }
        let mut out = Vec::with_capacity(self.len());
        for segment in &self.segments {
            out.extend_from_slice(segment);
        }
        Bytes::from(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_round_trip_within_single_segment() {
        let mut msg = Message::new(Bytes::from_static(b"hello world"));
        msg.truncate(5);
        assert_eq!(msg.len(), 5);
        assert_eq!(msg.to_contiguous(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn truncate_drops_trailing_segments_and_splits_boundary() {
        let mut msg = Message::from_segments(vec![
            Bytes::from_static(b"abc"),
            Bytes::from_static(b"defgh"),
            Bytes::from_static(b"ij"),
        ]);
        msg.truncate(5);
        assert_eq!(msg.len(), 5);
        assert_eq!(msg.to_contiguous(), Bytes::from_static(b"abcde"));
    }

    #[test]
    fn truncate_beyond_total_length_is_noop() {
        let mut msg = Message::new(Bytes::from_static(b"short"));
        msg.truncate(100);
        assert_eq!(msg.len(), 5);
    }

    #[test]
    fn first_buf_returns_first_segment() {
        let msg = Message::from_segments(vec![Bytes::from_static(b"first"), Bytes::from_static(b"second")]);
        assert_eq!(msg.first_buf().unwrap(), &Bytes::from_static(b"first"));
    }
}

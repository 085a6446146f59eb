//! Left-to-right segmentation of a byte buffer into gaps and frames.
//!
//! [`scan`] never allocates. It yields, in order:
//! - [`Segment::Gap`] for bytes that are provably outside any frame,
//! - [`Segment::Frame`] for a prefix terminated by the first following suffix,
//! - at most one trailing [`Segment::Pending`] for a tail that may still turn
//!   into a frame once more bytes arrive (an unterminated prefix, or a proper
//!   prefix of the marker sitting at the very end of the buffer).

use std::ops::Range;

use super::frame::{PREFIX, SUFFIX};

/// Byte range of a segment within the scanned buffer.
pub type Span = Range<usize>;

/// One piece of a scanned buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Bytes outside any frame, to be passed through verbatim.
    Gap(&'a [u8]),
    /// A complete frame. `body` excludes prefix and suffix.
    Frame { body: &'a [u8] },
    /// Tail that cannot be classified yet.
    Pending(&'a [u8]),
}

/// Lazy scanner over a buffer. Created by [`scan`].
#[derive(Debug, Clone)]
pub struct Scan<'a> {
    buf: &'a [u8],
    pos: usize,
    /// Start of a pending tail found while emitting the preceding gap.
    pending_at: Option<usize>,
}

/// Scan `buf` for frames.
pub fn scan(buf: &[u8]) -> Scan<'_> {
    Scan {
        buf,
        pos: 0,
        pending_at: None,
    }
}

impl<'a> Iterator for Scan<'a> {
    type Item = (Span, Segment<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.buf.len();
        if self.pos >= len {
            return None;
        }
        let start = self.pos;

        if let Some(at) = self.pending_at.take() {
            self.pos = len;
            return Some((at..len, Segment::Pending(&self.buf[at..])));
        }

        match find_prefix(&self.buf[start..]) {
            Some(0) => {
                let body_start = start + PREFIX.len();
                match self.buf[body_start..].iter().position(|&b| b == SUFFIX) {
                    Some(offset) => {
                        let suffix_at = body_start + offset;
                        self.pos = suffix_at + 1;
                        Some((
                            start..self.pos,
                            Segment::Frame {
                                body: &self.buf[body_start..suffix_at],
                            },
                        ))
                    }
                    None => {
                        self.pos = len;
                        Some((start..len, Segment::Pending(&self.buf[start..])))
                    }
                }
            }
            Some(offset) => {
                self.pos = start + offset;
                Some((start..self.pos, Segment::Gap(&self.buf[start..self.pos])))
            }
            None => match partial_prefix_at(&self.buf[start..]) {
                Some(0) => {
                    self.pos = len;
                    Some((start..len, Segment::Pending(&self.buf[start..])))
                }
                Some(offset) => {
                    let at = start + offset;
                    self.pos = at;
                    self.pending_at = Some(at);
                    Some((start..at, Segment::Gap(&self.buf[start..at])))
                }
                None => {
                    self.pos = len;
                    Some((start..len, Segment::Gap(&self.buf[start..])))
                }
            },
        }
    }
}

/// Position of the first full prefix in `haystack`.
fn find_prefix(haystack: &[u8]) -> Option<usize> {
    let first = PREFIX[0];
    let mut from = 0;
    while let Some(offset) = haystack[from..].iter().position(|&b| b == first) {
        let at = from + offset;
        if haystack[at..].starts_with(PREFIX) {
            return Some(at);
        }
        from = at + 1;
    }
    None
}

/// Position of the earliest tail of `haystack` that is a proper prefix of the marker.
fn partial_prefix_at(haystack: &[u8]) -> Option<usize> {
    let len = haystack.len();
    let earliest = len.saturating_sub(PREFIX.len() - 1);
    (earliest..len).find(|&at| PREFIX.starts_with(&haystack[at..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn framed(body: &[u8]) -> Vec<u8> {
        let mut out = PREFIX.to_vec();
        out.extend_from_slice(body);
        out.push(SUFFIX);
        out
    }

    #[test]
    fn test_scan_plain_text() {
        let segments: Vec<_> = scan(b"hello world\n").collect();
        assert_eq!(segments, vec![(0..12, Segment::Gap(b"hello world\n"))]);
    }

    #[test]
    fn test_scan_empty() {
        assert_eq!(scan(b"").count(), 0);
    }

    #[test]
    fn test_scan_gap_frame_gap() {
        let mut buf = b"hello ".to_vec();
        buf.extend(framed(b"QUJD"));
        buf.extend_from_slice(b" world");

        let segments: Vec<_> = scan(&buf).map(|(_, s)| s).collect();
        assert_eq!(
            segments,
            vec![
                Segment::Gap(b"hello "),
                Segment::Frame { body: b"QUJD" },
                Segment::Gap(b" world"),
            ]
        );
    }

    #[test]
    fn test_scan_back_to_back_frames() {
        let mut buf = framed(b"AA==");
        buf.extend(framed(b"Qg=="));

        let segments: Vec<_> = scan(&buf).map(|(_, s)| s).collect();
        assert_eq!(
            segments,
            vec![Segment::Frame { body: b"AA==" }, Segment::Frame { body: b"Qg==" }]
        );
    }

    #[test]
    fn test_scan_unterminated_prefix_is_pending() {
        let mut buf = b"abc".to_vec();
        buf.extend_from_slice(PREFIX);
        buf.extend_from_slice(b"eyJh");

        let segments: Vec<_> = scan(&buf).collect();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0], (0..3, Segment::Gap(b"abc")));
        assert_eq!(segments[1].0, 3..buf.len());
        assert!(matches!(segments[1].1, Segment::Pending(_)));
    }

    #[test]
    fn test_scan_partial_marker_at_end_is_pending() {
        let mut buf = b"prompt> ".to_vec();
        buf.extend_from_slice(&PREFIX[..5]);

        let segments: Vec<_> = scan(&buf).map(|(_, s)| s).collect();
        assert_eq!(
            segments,
            vec![Segment::Gap(b"prompt> "), Segment::Pending(&PREFIX[..5])]
        );
    }

    #[test]
    fn test_scan_other_escape_sequences_are_gaps() {
        let buf = b"\x1b[32mgreen\x1b[0m \x1b]0;title\x07done";
        let segments: Vec<_> = scan(buf).map(|(_, s)| s).collect();
        assert_eq!(segments, vec![Segment::Gap(buf)]);
    }

    #[test]
    fn test_scan_lone_escape_at_end_is_pending() {
        let segments: Vec<_> = scan(b"text\x1b").map(|(_, s)| s).collect();
        assert_eq!(segments, vec![Segment::Gap(b"text"), Segment::Pending(b"\x1b")]);
    }
}

//! Incremental re-framing of a copied byte stream.

use lspkit_jsonrpc::MAX_HEADER_BYTES;

const HEADER_END: &[u8] = b"\r\n\r\n";

/// Buffers stream bytes and yields each complete `Content-Length` framed body.
///
/// Unlike the connection's reader this never fails: bytes it cannot make
/// sense of are dropped so the copy can resynchronize on the next header.
#[derive(Debug, Default)]
pub struct FrameExtractor {
    buf: Vec<u8>,
    /// Body length of a frame whose header has already been consumed.
    body_len: Option<usize>,
}

impl FrameExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `data` and return every body it completed, in order.
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.buf.extend_from_slice(data);
        let mut bodies = Vec::new();

        loop {
            if let Some(len) = self.body_len {
                if self.buf.len() < len {
                    break;
                }
                bodies.push(self.buf.drain(..len).collect());
                self.body_len = None;
                continue;
            }

            let Some(end) = find(&self.buf, HEADER_END) else {
                if self.buf.len() > MAX_HEADER_BYTES {
                    tracing::debug!(
                        "Discarding {} bytes with no header terminator",
                        self.buf.len()
                    );
                    self.buf.clear();
                }
                break;
            };

            let len = content_length(&self.buf[..end]);
            self.buf.drain(..end + HEADER_END.len());
            match len {
                Some(len) if len > 0 => self.body_len = Some(len),
                _ => tracing::debug!("Skipping header block without a usable Content-Length"),
            }
        }

        bodies
    }

    /// Bytes held back waiting for the rest of a frame.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn content_length(headers: &[u8]) -> Option<usize> {
    let headers = std::str::from_utf8(headers).ok()?;
    headers.split("\r\n").find_map(|line| {
        let (key, value) = line.split_once(':')?;
        if key.trim().eq_ignore_ascii_case("Content-Length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(body: &str) -> Vec<u8> {
        format!("Content-Length: {}\r\n\r\n{body}", body.len()).into_bytes()
    }

    #[test]
    fn test_whole_frame_in_one_push() {
        let mut extractor = FrameExtractor::new();
        let bodies = extractor.push(&frame(r#"{"a":1}"#));
        assert_eq!(bodies, vec![br#"{"a":1}"#.to_vec()]);
        assert_eq!(extractor.buffered(), 0);
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut extractor = FrameExtractor::new();
        let input = [frame("first"), frame("second")].concat();
        let mut bodies = Vec::new();
        for byte in &input {
            bodies.extend(extractor.push(std::slice::from_ref(byte)));
        }
        assert_eq!(bodies, vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn test_several_frames_in_one_push() {
        let mut extractor = FrameExtractor::new();
        let input = [frame("one"), frame("two"), frame("thr")].concat();
        let (complete, partial) = input.split_at(input.len() - 2);
        assert_eq!(extractor.push(complete).len(), 2);
        assert_eq!(extractor.push(partial), vec![b"thr".to_vec()]);
    }

    #[test]
    fn test_extra_headers_and_case() {
        let mut extractor = FrameExtractor::new();
        let input = b"Content-Type: application/json\r\ncontent-length: 2\r\n\r\n{}";
        assert_eq!(extractor.push(input), vec![b"{}".to_vec()]);
    }

    #[test]
    fn test_unusable_header_is_skipped() {
        let mut extractor = FrameExtractor::new();
        let mut input = b"Content-Length: nope\r\n\r\n".to_vec();
        input.extend(frame("ok"));
        assert_eq!(extractor.push(&input), vec![b"ok".to_vec()]);
    }

    #[test]
    fn test_runaway_header_is_dropped() {
        let mut extractor = FrameExtractor::new();
        extractor.push(&vec![b'x'; MAX_HEADER_BYTES + 1]);
        assert_eq!(extractor.buffered(), 0);
        assert_eq!(extractor.push(&frame("after")), vec![b"after".to_vec()]);
    }
}

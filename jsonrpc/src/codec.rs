//! Content-Length framing codec.
//!
//! LSP uses `Content-Length: N\r\n\r\n{json}` framing over a byte stream.
//! [`FrameReader`] and [`FrameWriter`] read and write framed bodies, and
//! decode/encode them as [`Message`]s.

use std::io;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::message::{DecodeError, Message};

/// Default ceiling on a declared `Content-Length` (64 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Ceiling on the header section of one frame, separator included.
pub const MAX_HEADER_BYTES: usize = 8 * 1024;

/// The stream no longer yields well-formed frames.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error while reading frame: {0}")]
    Io(#[from] io::Error),
    #[error("unexpected EOF while reading headers")]
    UnexpectedEof,
    #[error("missing Content-Length header")]
    MissingContentLength,
    #[error("invalid Content-Length value: {0:?}")]
    InvalidContentLength(String),
    #[error("Content-Length {len} exceeds maximum {max}")]
    TooLarge { len: usize, max: usize },
    #[error("stream closed after {received} of {expected} body bytes")]
    Truncated { expected: usize, received: usize },
    #[error("header line is not valid UTF-8")]
    InvalidHeaderEncoding,
    #[error("frame headers exceed {max} bytes")]
    HeaderTooLarge { max: usize },
}

/// Failure of [`FrameReader::read_message`].
#[derive(Debug, thiserror::Error)]
pub enum ReadError {
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("failed to decode message: {0}")]
    Decode(#[from] DecodeError),
}

#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("failed to write frame: {0}")]
    Io(#[from] io::Error),
}

/// Reads Content-Length framed bodies from an async reader.
pub struct FrameReader<R> {
    reader: BufReader<R>,
    max_frame_bytes: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    #[must_use]
    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }

    /// Read the next frame body.
    ///
    /// Returns `Ok(None)` on EOF before any header byte (clean shutdown).
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let content_length = match self.read_headers().await? {
            Some(len) => len,
            None => return Ok(None),
        };

        if content_length > self.max_frame_bytes {
            return Err(FrameError::TooLarge {
                len: content_length,
                max: self.max_frame_bytes,
            });
        }

        let mut body = vec![0u8; content_length];
        let mut received = 0;
        while received < content_length {
            let n = self.reader.read(&mut body[received..]).await?;
            if n == 0 {
                return Err(FrameError::Truncated {
                    expected: content_length,
                    received,
                });
            }
            received += n;
        }
        Ok(Some(body))
    }

    /// Read and classify the next message.
    ///
    /// Returns `Ok(None)` on clean EOF.
    pub async fn read_message(&mut self) -> Result<Option<Message>, ReadError> {
        match self.read_frame().await? {
            Some(body) => Ok(Some(Message::decode(&body)?)),
            None => Ok(None),
        }
    }

    /// Parse headers until the empty line separator.
    ///
    /// Returns the `Content-Length` value, or `None` on EOF.
    async fn read_headers(&mut self) -> Result<Option<usize>, FrameError> {
        let mut content_length: Option<usize> = None;
        let mut line = Vec::new();
        let mut saw_any_header_bytes = false;
        let mut remaining = MAX_HEADER_BYTES;

        loop {
            line.clear();
            if remaining == 0 {
                return Err(FrameError::HeaderTooLarge {
                    max: MAX_HEADER_BYTES,
                });
            }
            let limit = u64::try_from(remaining).unwrap_or(u64::MAX);
            let bytes_read = (&mut self.reader)
                .take(limit)
                .read_until(b'\n', &mut line)
                .await?;

            if bytes_read == 0 {
                // EOF is only clean before the first header byte; EOF after a
                // Content-Type line alone is still a torn frame.
                if !saw_any_header_bytes {
                    return Ok(None);
                }
                return Err(FrameError::UnexpectedEof);
            }
            saw_any_header_bytes = true;
            if bytes_read == remaining && line.last() != Some(&b'\n') {
                return Err(FrameError::HeaderTooLarge {
                    max: MAX_HEADER_BYTES,
                });
            }
            remaining -= bytes_read;

            let text =
                std::str::from_utf8(&line).map_err(|_| FrameError::InvalidHeaderEncoding)?;
            let trimmed = text.trim();
            if trimmed.is_empty() {
                break;
            }

            if let Some((key, value)) = trimmed.split_once(':') {
                if key.trim().eq_ignore_ascii_case("Content-Length") {
                    let value = value.trim();
                    let len = value
                        .parse::<usize>()
                        .map_err(|_| FrameError::InvalidContentLength(value.to_string()))?;
                    content_length = Some(len);
                }
            }
            // Other headers (e.g. Content-Type) carry no meaning here.
        }

        match content_length {
            Some(len) => Ok(Some(len)),
            None => Err(FrameError::MissingContentLength),
        }
    }
}

/// Writes Content-Length framed bodies to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write one frame. Header and body go out in a single `write_all`.
    pub async fn write_frame(&mut self, body: &[u8]) -> io::Result<()> {
        let mut frame = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
        frame.extend_from_slice(body);
        self.writer.write_all(&frame).await?;
        self.writer.flush().await
    }

    pub async fn write_message(&mut self, msg: &Message) -> Result<(), WriteError> {
        let body = msg.encode()?;
        self.write_frame(&body).await?;
        Ok(())
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::id::RequestId;
    use crate::message::{Notification, Request, Response};

    async fn frames_of(messages: &[Message]) -> Vec<u8> {
        let mut writer = FrameWriter::new(Vec::new());
        for msg in messages {
            writer.write_message(msg).await.unwrap();
        }
        writer.into_inner()
    }

    #[tokio::test]
    async fn test_roundtrip_each_message_kind() {
        let messages = vec![
            Message::Request(Request::new(1, "initialize", Some(json!({"rootUri": null})))),
            Message::Response(Response::ok(RequestId::from("x"), json!({"capabilities": {}}))),
            Message::Notification(Notification::new(
                "textDocument/publishDiagnostics",
                Some(json!({"uri": "file:///test.rs", "diagnostics": []})),
            )),
        ];
        let buf = frames_of(&messages).await;

        let mut reader = FrameReader::new(buf.as_slice());
        for expected in &messages {
            assert_eq!(&reader.read_message().await.unwrap().unwrap(), expected);
        }
        assert!(reader.read_message().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_eof_returns_none() {
        let buf: &[u8] = b"";
        let mut reader = FrameReader::new(buf);
        assert!(reader.read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_content_length() {
        let buf: &[u8] = b"Content-Type: application/json\r\n\r\n{}";
        let mut reader = FrameReader::new(buf);
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::MissingContentLength)
        ));
    }

    #[tokio::test]
    async fn test_eof_mid_headers_is_error() {
        let buf: &[u8] = b"Content-Length: 10\r\n";
        let mut reader = FrameReader::new(buf);
        assert!(matches!(reader.read_frame().await, Err(FrameError::UnexpectedEof)));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let buf: &[u8] = b"Content-Length: 1025\r\n\r\n";
        let mut reader = FrameReader::new(buf).with_max_frame_bytes(1024);
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::TooLarge {
                len: 1025,
                max: 1024
            })
        ));
    }

    #[tokio::test]
    async fn test_header_line_without_newline_is_capped() {
        let buf = vec![b'x'; MAX_HEADER_BYTES * 4];
        let mut reader = FrameReader::new(buf.as_slice());
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::HeaderTooLarge {
                max: MAX_HEADER_BYTES
            })
        ));
    }

    #[tokio::test]
    async fn test_many_short_header_lines_are_capped() {
        let buf = "X-Filler: y\r\n".repeat(MAX_HEADER_BYTES);
        let mut reader = FrameReader::new(buf.as_bytes());
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::HeaderTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_headers_filling_the_cap_are_read() {
        let body = "{}";
        let prefix = format!("Content-Length: {}\r\n", body.len());
        let filler = "X".repeat(MAX_HEADER_BYTES - prefix.len() - "\r\n\r\n".len() - 3);
        let frame = format!("{prefix}X: {filler}\r\n\r\n{body}");

        let mut reader = FrameReader::new(frame.as_bytes());
        assert_eq!(reader.read_frame().await.unwrap().unwrap(), b"{}");
    }

    #[tokio::test]
    async fn test_case_insensitive_content_length() {
        let body = r#"{"jsonrpc":"2.0","id":1,"result":null}"#;
        let frame = format!("content-length: {}\r\n\r\n{body}", body.len());

        let mut reader = FrameReader::new(frame.as_bytes());
        let msg = reader.read_message().await.unwrap().unwrap();
        assert_eq!(msg.id(), Some(&RequestId::Number(1)));
    }

    #[tokio::test]
    async fn test_ignores_extra_headers() {
        let body = r#"{"jsonrpc":"2.0","method":"initialized","params":{}}"#;
        let frame = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\nContent-Length: {}\r\n\r\n{body}",
            body.len(),
        );

        let mut reader = FrameReader::new(frame.as_bytes());
        let msg = reader.read_message().await.unwrap().unwrap();
        assert_eq!(msg.method(), Some("initialized"));
    }

    #[tokio::test]
    async fn test_eof_mid_body() {
        let buf: &[u8] = b"Content-Length: 100\r\n\r\nhello";
        let mut reader = FrameReader::new(buf);
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::Truncated {
                expected: 100,
                received: 5
            })
        ));
    }

    #[tokio::test]
    async fn test_invalid_json_body_is_decode_error() {
        let body = b"not valid json!!!";
        let mut buf = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
        buf.extend_from_slice(body);

        let mut reader = FrameReader::new(buf.as_slice());
        assert!(matches!(reader.read_message().await, Err(ReadError::Decode(_))));
    }

    #[tokio::test]
    async fn test_invalid_content_length_value() {
        let buf: &[u8] = b"Content-Length: not_a_number\r\n\r\n";
        let mut reader = FrameReader::new(buf);
        assert!(matches!(
            reader.read_frame().await,
            Err(FrameError::InvalidContentLength(_))
        ));
    }

    #[tokio::test]
    async fn test_multibyte_utf8_content_length_counts_bytes() {
        // "é" is 2 bytes in UTF-8.
        let body = r#"{"method":"é"}"#;
        let frame = format!("Content-Length: {}\r\n\r\n{body}", body.len());

        let mut reader = FrameReader::new(frame.as_bytes());
        let msg = reader.read_message().await.unwrap().unwrap();
        assert_eq!(msg.method(), Some("é"));
    }

    #[tokio::test]
    async fn test_write_content_length_is_byte_count() {
        let msg = Message::Notification(Notification::new("k", Some(json!("é"))));
        let output = frames_of(&[msg.clone()]).await;
        let output = String::from_utf8(output).unwrap();

        let body = String::from_utf8(msg.encode().unwrap()).unwrap();
        let expected = format!("Content-Length: {}\r\n\r\n{body}", body.len());
        assert_eq!(output, expected);
    }
}

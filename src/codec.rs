//! Content-Length frame codec for the gopls stdio connection.
//!
//! A frame is `Content-Length: N\r\n\r\n` followed by exactly N bytes
//! of JSON. The codec does not care whether a payload is a request, a
//! response, or a notification; it moves [`serde_json::Value`]s.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::Error;

/// Ceiling on a single message body. Guards against a hostile or
/// corrupt `Content-Length` allocating unbounded memory.
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// Decodes frames from the child's stdout.
pub struct FrameReader<R> {
    inner: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            inner: BufReader::new(reader),
        }
    }

    /// Read one frame. Returns `Ok(None)` on a clean end of stream
    /// (EOF before any header byte of the next frame).
    ///
    /// # Errors
    ///
    /// [`Error::Framing`] on a missing or unparseable `Content-Length`
    /// header, a truncated body, an oversized body, an invalid JSON
    /// payload, or a read failure mid-frame.
    pub async fn read_frame(&mut self) -> Result<Option<Value>, Error> {
        let mut content_length: Option<usize> = None;
        let mut saw_header = false;

        loop {
            let mut line = String::new();
            let n = self
                .inner
                .read_line(&mut line)
                .await
                .map_err(|e| Error::Framing(format!("header read failed: {e}")))?;
            if n == 0 {
                if saw_header {
                    return Err(Error::Framing("stream ended inside a header block".into()));
                }
                return Ok(None);
            }
            saw_header = true;

            // Header lines are \r\n terminated; strip both before parsing.
            let line = line.trim_end_matches('\n').trim_end_matches('\r');
            if line.is_empty() {
                break;
            }
            if let Some(value) = line.strip_prefix("Content-Length:") {
                let parsed = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| Error::Framing(format!("bad Content-Length value {value:?}")))?;
                content_length = Some(parsed);
            }
            // Any other header (Content-Type etc.) is discarded.
        }

        let length =
            content_length.ok_or_else(|| Error::Framing("missing Content-Length header".into()))?;
        if length > MAX_FRAME_SIZE {
            return Err(Error::Framing(format!(
                "body of {length} bytes exceeds the {MAX_FRAME_SIZE} byte ceiling"
            )));
        }

        let mut body = vec![0u8; length];
        self.inner
            .read_exact(&mut body)
            .await
            .map_err(|e| Error::Framing(format!("body shorter than Content-Length: {e}")))?;

        let msg = serde_json::from_slice(&body)
            .map_err(|e| Error::Framing(format!("invalid JSON payload: {e}")))?;
        Ok(Some(msg))
    }
}

/// Encodes frames onto the child's stdin.
///
/// Header and payload are assembled into one buffer and written with a
/// single `write_all`, so a frame hits the pipe contiguously as long as
/// callers serialize access to the writer.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { inner: writer }
    }

    /// Serialize `msg` and write it as one frame, then flush.
    ///
    /// # Errors
    ///
    /// Returns the underlying write or flush error.
    pub async fn write_frame(&mut self, msg: &Value) -> std::io::Result<()> {
        let body = serde_json::to_vec(msg)?;
        let mut frame = Vec::with_capacity(body.len() + 32);
        frame.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
        frame.extend_from_slice(&body);
        self.inner.write_all(&frame).await?;
        self.inner.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn decode(bytes: &[u8]) -> Result<Option<Value>, Error> {
        FrameReader::new(bytes).read_frame().await
    }

    #[tokio::test]
    async fn decodes_minimal_frame() {
        let msg = decode(b"Content-Length: 2\r\n\r\n{}").await.unwrap();
        assert_eq!(msg, Some(json!({})));
    }

    #[tokio::test]
    async fn strips_trailing_cr_and_skips_unknown_headers() {
        let bytes = b"Content-Type: application/vscode-jsonrpc\r\nContent-Length: 13\r\n\r\n{\"id\":1234.0}";
        let msg = decode(bytes).await.unwrap().unwrap();
        assert_eq!(msg["id"], json!(1234.0));
    }

    #[tokio::test]
    async fn missing_content_length_is_a_framing_error() {
        let err = decode(b"Content-Type: foo\r\n\r\n{}").await.unwrap_err();
        assert!(matches!(err, Error::Framing(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn unparseable_content_length_is_a_framing_error() {
        let err = decode(b"Content-Length: many\r\n\r\n{}").await.unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
    }

    #[tokio::test]
    async fn truncated_body_is_a_framing_error() {
        let err = decode(b"Content-Length: 10\r\n\r\n{}").await.unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
    }

    #[tokio::test]
    async fn non_json_body_is_a_framing_error() {
        let err = decode(b"Content-Length: 3\r\n\r\nabc").await.unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
    }

    #[tokio::test]
    async fn clean_eof_yields_none() {
        assert!(decode(b"").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn eof_inside_header_block_is_a_framing_error() {
        let err = decode(b"Content-Length: 2\r\n").await.unwrap_err();
        assert!(matches!(err, Error::Framing(_)));
    }

    #[tokio::test]
    async fn frames_round_trip() {
        let original = json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "textDocument/hover",
            "params": { "position": { "line": 3, "character": 9 } },
        });

        let mut buf = Vec::new();
        FrameWriter::new(&mut buf)
            .write_frame(&original)
            .await
            .unwrap();
        let decoded = decode(&buf).await.unwrap().unwrap();
        assert_eq!(decoded, original);
    }

    #[tokio::test]
    async fn consecutive_frames_decode_in_order() {
        let mut buf = Vec::new();
        {
            let mut w = FrameWriter::new(&mut buf);
            w.write_frame(&json!({"id": 1})).await.unwrap();
            w.write_frame(&json!({"id": 2})).await.unwrap();
        }
        let mut reader = FrameReader::new(buf.as_slice());
        assert_eq!(reader.read_frame().await.unwrap(), Some(json!({"id": 1})));
        assert_eq!(reader.read_frame().await.unwrap(), Some(json!({"id": 2})));
        assert_eq!(reader.read_frame().await.unwrap(), None);
    }
}

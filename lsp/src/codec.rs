//! `Content-Length` framing for the client connection.
//!
//! The editor speaks `Content-Length: N\r\n\r\n{json}` over our stdin/stdout.
//! [`FrameReader`] yields decoded JSON bodies; [`FrameWriter`] frames any
//! serializable message.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

/// Maximum frame size (16 MiB). Whole documents travel in `didOpen`/`didChange`.
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Reads framed JSON bodies from an async reader.
pub struct FrameReader<R> {
    reader: BufReader<R>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
        }
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on EOF between frames (the client went away).
    /// Returns `Err` on malformed headers, oversized frames or invalid JSON.
    pub async fn read_frame(&mut self) -> Result<Option<serde_json::Value>> {
        let Some(content_length) = self.read_headers().await? else {
            return Ok(None);
        };

        if content_length > MAX_FRAME_BYTES {
            bail!("Content-Length {content_length} exceeds maximum {MAX_FRAME_BYTES}");
        }

        let mut body = vec![0u8; content_length];
        self.reader
            .read_exact(&mut body)
            .await
            .context("reading frame body")?;

        let value = serde_json::from_slice(&body).context("parsing JSON-RPC frame")?;
        Ok(Some(value))
    }

    async fn read_headers(&mut self) -> Result<Option<usize>> {
        let mut content_length: Option<usize> = None;
        let mut line = String::new();
        let mut saw_any_header_bytes = false;
        let mut saw_header_line = false;

        loop {
            line.clear();
            let bytes_read = self
                .reader
                .read_line(&mut line)
                .await
                .context("reading header line")?;

            if bytes_read == 0 {
                // EOF is clean only before the first header byte of a frame.
                if !saw_any_header_bytes {
                    return Ok(None);
                }
                bail!("unexpected EOF while reading headers");
            }
            saw_any_header_bytes = true;

            let trimmed = line.trim();
            if trimmed.is_empty() {
                if !saw_header_line {
                    // Tolerate stray blank lines between frames.
                    saw_any_header_bytes = false;
                    continue;
                }
                if content_length.is_none() {
                    bail!("missing Content-Length header");
                }
                break;
            }
            saw_header_line = true;

            if let Some((key, value)) = trimmed.split_once(':')
                && key.trim().eq_ignore_ascii_case("Content-Length")
            {
                let len: usize = value
                    .trim()
                    .parse()
                    .context("invalid Content-Length value")?;
                content_length = Some(len);
            }
        }

        Ok(content_length)
    }
}

/// Writes framed JSON messages to an async writer.
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Serialize `msg`, prepend the `Content-Length` header and flush.
    pub async fn write_frame<T: Serialize + ?Sized>(&mut self, msg: &T) -> Result<()> {
        let body = serde_json::to_vec(msg).context("serializing JSON-RPC frame")?;
        let header = format!("Content-Length: {}\r\n\r\n", body.len());

        self.writer
            .write_all(header.as_bytes())
            .await
            .context("writing frame header")?;
        self.writer
            .write_all(&body)
            .await
            .context("writing frame body")?;
        self.writer.flush().await.context("flushing frame")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Notification, RequestError, RequestId, Response};

    #[tokio::test]
    async fn test_written_frames_read_back_in_order() {
        let publish = Notification::new(
            "textDocument/publishDiagnostics",
            Some(serde_json::json!({ "uri": "file:///p/a.ex", "diagnostics": [] })),
        );
        let cancelled = Response::new(RequestId::Number(7), Err(RequestError::cancelled()));

        let mut buf = Vec::new();
        let mut writer = FrameWriter::new(&mut buf);
        writer.write_frame(&publish).await.unwrap();
        writer.write_frame(&cancelled).await.unwrap();

        let mut reader = FrameReader::new(buf.as_slice());
        let first = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(first["method"], "textDocument/publishDiagnostics");
        let second = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(second["id"], 7);
        assert_eq!(second["error"]["code"], -32800);
        assert!(reader.read_frame().await.unwrap().is_none());
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
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_headers_without_content_length_do_not_swallow_the_body() {
        let body = r#"{"jsonrpc":"2.0","method":"exit"}"#;
        let frame = format!("Content-Type: application/json\r\n\r\n{body}\r\n\r\n");
        let mut reader = FrameReader::new(frame.as_bytes());
        let err = reader.read_frame().await.unwrap_err();
        assert!(err.to_string().contains("missing Content-Length"), "{err:#}");
    }

    #[tokio::test]
    async fn test_eof_mid_headers_is_error() {
        let buf: &[u8] = b"Content-Length: 10\r\n";
        let mut reader = FrameReader::new(buf);
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let header = format!("Content-Length: {}\r\n\r\n", MAX_FRAME_BYTES + 1);
        let mut reader = FrameReader::new(header.as_bytes());
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_case_insensitive_header_and_extra_headers() {
        let body = r#"{"jsonrpc":"2.0","id":1,"method":"shutdown"}"#;
        let frame = format!(
            "Content-Type: application/vscode-jsonrpc; charset=utf-8\r\ncontent-length: {}\r\n\r\n{body}",
            body.len(),
        );
        let mut reader = FrameReader::new(frame.as_bytes());
        let result = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(result["method"], "shutdown");
    }

    #[tokio::test]
    async fn test_blank_lines_between_frames_are_skipped() {
        let body = r#"{"jsonrpc":"2.0","method":"exit"}"#;
        let frame = format!("\r\nContent-Length: {}\r\n\r\n{body}", body.len());
        let mut reader = FrameReader::new(frame.as_bytes());
        let result = reader.read_frame().await.unwrap().unwrap();
        assert_eq!(result["method"], "exit");
    }

    #[tokio::test]
    async fn test_eof_mid_body() {
        let buf: &[u8] = b"Content-Length: 100\r\n\r\nhello";
        let mut reader = FrameReader::new(buf);
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_json_body() {
        let body = b"not valid json!!!";
        let mut buf = format!("Content-Length: {}\r\n\r\n", body.len()).into_bytes();
        buf.extend_from_slice(body);
        let mut reader = FrameReader::new(buf.as_slice());
        assert!(reader.read_frame().await.is_err());
    }

    #[tokio::test]
    async fn test_content_length_counts_bytes() {
        // "é" is 2 bytes in UTF-8.
        let msg = serde_json::json!({"text": "é"});
        let mut buf = Vec::new();
        FrameWriter::new(&mut buf).write_frame(&msg).await.unwrap();

        let output = String::from_utf8(buf.clone()).unwrap();
        let body = serde_json::to_string(&msg).unwrap();
        assert!(output.starts_with(&format!("Content-Length: {}\r\n\r\n", body.len())));

        let mut reader = FrameReader::new(buf.as_slice());
        assert_eq!(reader.read_frame().await.unwrap().unwrap()["text"], "é");
    }
}

//! LSP Transport Layer
//!
//! Handles LSP message framing with Content-Length headers:
//!
//! ```text
//! Content-Length: 123\r\n
//! \r\n
//! {"jsonrpc":"2.0",...}
//! ```
//!
//! [`FrameDecoder`] accumulates raw bytes and yields complete frame bodies.
//! It does no I/O, so the async [`Transport`] and the blocking stub server
//! share it.

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::protocol::Message;
use crate::error::LspError;

/// Frames larger than this are skipped rather than buffered.
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// A header block that has not terminated after this many bytes is garbage.
const MAX_HEADER_BYTES: usize = 8 * 1024;

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";

const READ_CHUNK_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    MissingContentLength,
    InvalidContentLength(String),
    InvalidHeader(String),
    HeaderTooLong,
    TooLarge(usize),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingContentLength => write!(f, "missing Content-Length header"),
            Self::InvalidContentLength(v) => write!(f, "invalid Content-Length value '{}'", v),
            Self::InvalidHeader(line) => write!(f, "invalid header line '{}'", line),
            Self::HeaderTooLong => write!(f, "header exceeds {} bytes", MAX_HEADER_BYTES),
            Self::TooLarge(len) => {
                write!(f, "Content-Length {} exceeds maximum {}", len, MAX_FRAME_BYTES)
            }
        }
    }
}

impl From<FrameError> for LspError {
    fn from(err: FrameError) -> Self {
        LspError::MalformedFrame(err.to_string())
    }
}

/// Incremental Content-Length deframer.
///
/// A malformed header block is discarded up to its terminator so the
/// stream resynchronises on the next frame.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    /// Body bytes of an oversized frame still to be thrown away
    skip: usize,
    max_frame: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::with_max_frame(MAX_FRAME_BYTES)
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buf: Vec::new(),
            skip: 0,
            max_frame,
        }
    }

    pub fn extend(&mut self, mut bytes: &[u8]) {
        if self.skip > 0 {
            let n = self.skip.min(bytes.len());
            self.skip -= n;
            bytes = &bytes[n..];
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes held that do not yet form a complete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pop the next complete frame body, if one is available.
    pub fn decode(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let Some(header_end) = find(&self.buf, HEADER_TERMINATOR) else {
            if self.buf.len() > MAX_HEADER_BYTES {
                self.buf.clear();
                return Err(FrameError::HeaderTooLong);
            }
            return Ok(None);
        };
        let body_start = header_end + HEADER_TERMINATOR.len();

        let content_length = match parse_content_length(&self.buf[..header_end]) {
            Ok(len) => len,
            Err(e) => {
                self.buf.drain(..body_start);
                return Err(e);
            }
        };

        if content_length > self.max_frame {
            let available = (self.buf.len() - body_start).min(content_length);
            self.skip = content_length - available;
            self.buf.drain(..body_start + available);
            return Err(FrameError::TooLarge(content_length));
        }

        let frame_end = body_start + content_length;
        if self.buf.len() < frame_end {
            return Ok(None);
        }

        let body = self.buf[body_start..frame_end].to_vec();
        self.buf.drain(..frame_end);
        Ok(Some(body))
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn parse_content_length(header: &[u8]) -> Result<usize, FrameError> {
    let header = std::str::from_utf8(header)
        .map_err(|_| FrameError::InvalidHeader("<non-utf8>".to_string()))?;

    let mut content_length = None;
    for line in header.split("\r\n") {
        // stray CRLF between frames
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            return Err(FrameError::InvalidHeader(line.to_string()));
        };
        // LSP uses "Content-Length" but parse case-insensitively; other headers are ignored
        if key.trim().eq_ignore_ascii_case("Content-Length") {
            let value = value.trim();
            content_length = Some(
                value
                    .parse::<usize>()
                    .map_err(|_| FrameError::InvalidContentLength(value.to_string()))?,
            );
        }
    }

    content_length.ok_or(FrameError::MissingContentLength)
}

/// Prefix a serialized body with its header.
pub fn encode_frame(json: &str) -> Vec<u8> {
    let mut frame = format!("Content-Length: {}\r\n\r\n", json.len()).into_bytes();
    frame.extend_from_slice(json.as_bytes());
    frame
}

/// Serialize a message and wrap it in LSP framing.
pub fn frame_message<T: Serialize>(message: &T) -> Result<Vec<u8>, LspError> {
    let json = serde_json::to_string(message)?;
    tracing::trace!("LSP -> {}", json);
    Ok(encode_frame(&json))
}

/// Write a pre-framed message and flush.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &[u8],
) -> Result<(), LspError> {
    writer.write_all(frame).await.map_err(LspError::StreamBroken)?;
    writer.flush().await.map_err(LspError::StreamBroken)
}

/// Inbound half of the transport: reads a byte stream and yields messages.
pub struct Transport<R> {
    reader: R,
    decoder: FrameDecoder,
    chunk: Box<[u8]>,
}

impl<R: AsyncRead + Unpin> Transport<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            decoder: FrameDecoder::new(),
            chunk: vec![0u8; READ_CHUNK_BYTES].into_boxed_slice(),
        }
    }

    /// Read the next message from the server.
    ///
    /// Returns `Ok(None)` on EOF, `Err(MalformedFrame)` for a frame that was
    /// dropped (the stream is still usable) and `Err(StreamBroken)` when the
    /// underlying pipe failed.
    pub async fn read_message(&mut self) -> Result<Option<Message>, LspError> {
        loop {
            if let Some(body) = self.decoder.decode()? {
                let json = String::from_utf8(body)
                    .map_err(|e| LspError::MalformedFrame(format!("body is not UTF-8: {}", e)))?;
                tracing::trace!("LSP <- {}", json);
                return Message::parse(&json)
                    .map(Some)
                    .map_err(|e| LspError::MalformedFrame(e.to_string()));
            }

            let n = self
                .reader
                .read(&mut self.chunk)
                .await
                .map_err(LspError::StreamBroken)?;
            if n == 0 {
                if self.decoder.buffered() > 0 {
                    tracing::debug!(
                        "LSP stream closed with {} bytes of incomplete frame",
                        self.decoder.buffered()
                    );
                }
                return Ok(None);
            }
            self.decoder.extend(&self.chunk[..n]);
        }
    }
}

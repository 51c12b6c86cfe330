//! Framing for one command exchange.
//!
//! A frame is a single UTF-8 JSON document with no length prefix and no
//! terminator. The reader accumulates chunks and retries a full parse after
//! each one; the first buffer that parses completely is the frame.
//!
//! Known limitation of the wire format: anything the peer writes after a
//! complete document is never read. If a document and stray trailing bytes
//! arrive in separate reads, the document wins and the rest is dropped. If
//! they arrive in the same read the buffer no longer parses and the reader
//! keeps waiting until the peer closes.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::protocol::READ_CHUNK_SIZE;

/// Requests larger than this are refused
pub const DEFAULT_FRAME_LIMIT: usize = 64 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FramingError {
    /// Peer closed before sending anything
    #[error("connection closed before any data was received")]
    Closed,

    /// Peer closed after sending bytes that never formed a JSON document
    #[error("connection closed without a complete JSON document ({0} bytes received)")]
    Malformed(usize),

    #[error("frame exceeds {0} bytes")]
    TooLarge(usize),

    #[error("read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// What a peer left on the wire for one exchange
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Json(Value),
    /// The peer closed with a non-empty buffer that is not a JSON document
    Raw(Vec<u8>),
}

impl Frame {
    /// Requests must be JSON; raw bytes are a framing failure
    pub fn into_document(self) -> Result<Value, FramingError> {
        match self {
            Frame::Json(value) => Ok(value),
            Frame::Raw(bytes) => Err(FramingError::Malformed(bytes.len())),
        }
    }
}

/// Encode a value as one frame
pub fn encode<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<Vec<u8>> {
    serde_json::to_vec(value)
}

/// Incremental decoder. Feed chunks with `push` until it yields a document,
/// or call `finish` once the peer has closed.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    limit: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::with_limit(DEFAULT_FRAME_LIMIT)
    }
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(limit: usize) -> Self {
        Self {
            buf: Vec::with_capacity(READ_CHUNK_SIZE),
            limit,
        }
    }

    /// Append a chunk and try to parse the whole buffer.
    /// Incomplete JSON and split UTF-8 sequences both read as "need more".
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Value>, FramingError> {
        if self.buf.len() + chunk.len() > self.limit {
            return Err(FramingError::TooLarge(self.limit));
        }
        self.buf.extend_from_slice(chunk);

        match serde_json::from_slice::<Value>(&self.buf) {
            Ok(value) => {
                self.buf.clear();
                Ok(Some(value))
            }
            Err(_) => Ok(None),
        }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// The peer closed. An empty buffer means nothing was sent at all.
    pub fn finish(self) -> Result<Frame, FramingError> {
        if self.buf.is_empty() {
            Err(FramingError::Closed)
        } else {
            Ok(Frame::Raw(self.buf))
        }
    }
}

/// Read one frame from `reader`, in chunks of `READ_CHUNK_SIZE`
pub async fn read_frame<R>(reader: &mut R, limit: usize) -> Result<Frame, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut decoder = FrameDecoder::with_limit(limit);
    let mut chunk = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return decoder.finish();
        }
        if let Some(value) = decoder.push(&chunk[..n])? {
            return Ok(Frame::Json(value));
        }
    }
}

/// A service reply. Text replies go out raw, not JSON-quoted, because
/// deployed workstations print them verbatim.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Text(String),
    Json(Value),
}

impl Reply {
    pub fn text(s: impl Into<String>) -> Self {
        Reply::Text(s.into())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Reply::Text(s) => s.as_bytes().to_vec(),
            Reply::Json(value) => value.to_string().into_bytes(),
        }
    }

    /// Interpret whatever the service left on the wire
    pub fn from_frame(frame: Frame) -> Self {
        match frame {
            Frame::Json(value) => Reply::Json(value),
            Frame::Raw(bytes) => Reply::Text(String::from_utf8_lossy(&bytes).into_owned()),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Reply::Json(value) => Some(value),
            Reply::Text(_) => None,
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Text(s) => f.write_str(s),
            Reply::Json(Value::String(s)) => f.write_str(s),
            Reply::Json(value) => write!(f, "{}", value),
        }
    }
}

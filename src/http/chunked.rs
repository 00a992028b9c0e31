//! # Chunk Codec
//!
//! HTTP/1.1 chunked transfer-encoding framing. Each frame is
//!
//! ```text
//! <hex length>\r\n<payload>\r\n
//! ```
//!
//! and the body ends with the zero-length frame `0\r\n\r\n`. The codec never
//! looks inside a payload; text and binary spans are framed the same way.

use crate::error::{NodeError, NodeResult};
use tokio::io::{self, AsyncWrite, AsyncWriteExt};

pub const CRLF: &[u8] = b"\r\n";

/// Zero-length frame plus the empty trailer section.
pub const TERMINATOR: &[u8] = b"0\r\n\r\n";

/// Write one frame around `bytes`.
///
/// An empty span writes nothing at all: framed, it would be
/// indistinguishable from the terminator.
pub async fn emit<W>(sink: &mut W, bytes: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if bytes.is_empty() {
        return Ok(());
    }
    let prefix = format!("{:X}\r\n", bytes.len());
    sink.write_all(prefix.as_bytes()).await?;
    sink.write_all(bytes).await?;
    sink.write_all(CRLF).await
}

/// Write the end-of-body marker.
pub async fn emit_terminator<W>(sink: &mut W) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    sink.write_all(TERMINATOR).await
}

/// Totals for a finished chunked body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkedStats {
    /// Non-empty frames written
    pub frames: u64,
    /// Payload bytes, framing excluded
    pub payload_bytes: u64,
}

/// A chunked body being written to `sink`.
///
/// [`ChunkedBody::finish`] consumes the body, so the terminator can be sent
/// once and only once. Dropping the body without finishing leaves the peer
/// with a truncated message, which is how an aborted upload looks on the wire.
pub struct ChunkedBody<W> {
    sink: W,
    stats: ChunkedStats,
}

impl<W: AsyncWrite + Unpin> ChunkedBody<W> {
    pub fn new(sink: W) -> Self {
        Self {
            sink,
            stats: ChunkedStats::default(),
        }
    }

    /// Frame and send one span.
    pub async fn send(&mut self, bytes: &[u8]) -> NodeResult<()> {
        emit(&mut self.sink, bytes)
            .await
            .map_err(|e| NodeError::transport("write chunk", e))?;
        if !bytes.is_empty() {
            self.stats.frames += 1;
            self.stats.payload_bytes += bytes.len() as u64;
        }
        Ok(())
    }

    /// Send the terminator and flush.
    pub async fn finish(mut self) -> NodeResult<ChunkedStats> {
        emit_terminator(&mut self.sink)
            .await
            .map_err(|e| NodeError::transport("write terminator", e))?;
        self.sink
            .flush()
            .await
            .map_err(|e| NodeError::transport("flush body", e))?;
        Ok(self.stats)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Reassemble a chunked body. Fails on malformed framing or a missing
    /// terminator.
    pub(crate) fn decode_chunked(mut wire: &[u8]) -> Result<Vec<u8>, String> {
        let mut body = Vec::new();
        loop {
            let line_end = wire
                .windows(2)
                .position(|w| w == CRLF)
                .ok_or("missing size line")?;
            let size_text = std::str::from_utf8(&wire[..line_end]).map_err(|e| e.to_string())?;
            let size = usize::from_str_radix(size_text.split(';').next().unwrap_or("").trim(), 16)
                .map_err(|e| format!("bad size {:?}: {}", size_text, e))?;
            wire = &wire[line_end + 2..];

            if size == 0 {
                return if wire == CRLF {
                    Ok(body)
                } else {
                    Err(format!("{} bytes after terminator", wire.len()))
                };
            }
            if wire.len() < size + 2 {
                return Err("truncated chunk".to_string());
            }
            body.extend_from_slice(&wire[..size]);
            if &wire[size..size + 2] != CRLF {
                return Err("chunk not followed by CRLF".to_string());
            }
            wire = &wire[size + 2..];
        }
    }

    #[tokio::test]
    async fn test_emit_frame_layout() {
        let mut wire = Vec::new();
        emit(&mut wire, b"hello world, this is 25 b").await.unwrap();
        assert_eq!(wire, b"19\r\nhello world, this is 25 b\r\n".to_vec());

        let mut wire = Vec::new();
        emit(&mut wire, &[0u8; 1024]).await.unwrap();
        assert!(wire.starts_with(b"400\r\n"));
        assert!(wire.ends_with(b"\r\n"));
        assert_eq!(wire.len(), 5 + 1024 + 2);
    }

    #[tokio::test]
    async fn test_terminator_bytes() {
        let mut wire = Vec::new();
        emit_terminator(&mut wire).await.unwrap();
        assert_eq!(wire, b"0\r\n\r\n".to_vec());
    }

    #[tokio::test]
    async fn test_empty_span_writes_nothing() {
        let mut wire = Vec::new();
        emit(&mut wire, b"").await.unwrap();
        assert!(wire.is_empty());
    }

    #[tokio::test]
    async fn test_round_trip_mixed_spans() {
        let big: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        let spans: Vec<&[u8]> = vec![
            &b"text part\r\n"[..],
            &b""[..],
            &big[..],
            &b"\x00\xff\r\n0\r\n\r\n"[..],
            &b""[..],
            &b"z"[..],
        ];

        let mut wire = Vec::new();
        let mut body = ChunkedBody::new(&mut wire);
        for span in &spans {
            body.send(span).await.unwrap();
        }
        let stats = body.finish().await.unwrap();

        let expected: Vec<u8> = spans.concat();
        assert_eq!(stats.frames, 4);
        assert_eq!(stats.payload_bytes, expected.len() as u64);
        assert_eq!(decode_chunked(&wire).unwrap(), expected);
        assert!(wire.ends_with(TERMINATOR));
    }

    #[tokio::test]
    async fn test_unfinished_body_does_not_decode() {
        let mut wire = Vec::new();
        let mut body = ChunkedBody::new(&mut wire);
        body.send(b"partial").await.unwrap();
        drop(body);
        assert!(decode_chunked(&wire).is_err());
    }
}

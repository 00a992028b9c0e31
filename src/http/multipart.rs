//! # Multipart Assembler
//!
//! Streams a `multipart/form-data` body through a [`ChunkedBody`] without ever
//! holding the whole body, or the whole file, in memory.
//!
//! ## Wire Order (one chunked frame per line below):
//! 1. `--B` + file part headers + blank line
//! 2. file bytes, one frame per fixed-size window
//! 3. `\r\n` closing the file part + first field part (headers and value)
//! 4. each further field part
//! 5. `--B--\r\n` (prefixed by the file part's `\r\n` when there are no fields)
//! 6. the chunked terminator
//!
//! Concatenating the frame payloads gives exactly the body a fully buffered
//! encoder would produce for the same envelope; the window size only changes
//! how the bytes are framed.

use crate::error::{NodeError, NodeResult};
use crate::http::chunked::{ChunkedBody, ChunkedStats};
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::debug;

/// A text form field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPart {
    pub name: String,
    pub value: String,
}

/// The single file part and the byte source its content is read from.
///
/// Any `AsyncRead` works: a storage file in production, a byte slice for an
/// in-memory payload.
pub struct FilePart<R> {
    pub field_name: String,
    pub filename: String,
    pub content_type: String,
    pub source: R,
}

/// Totals for one streamed envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultipartStats {
    /// Bytes read from the file part's source
    pub file_bytes: u64,
    pub chunked: ChunkedStats,
}

/// One file part followed by zero or more field parts, in declaration order.
pub struct MultipartEnvelope<R> {
    boundary: String,
    file: FilePart<R>,
    fields: Vec<FieldPart>,
}

impl<R> MultipartEnvelope<R> {
    pub fn new(boundary: impl Into<String>, file: FilePart<R>) -> Self {
        Self {
            boundary: boundary.into(),
            file,
            fields: Vec::new(),
        }
    }

    /// Append a field part after the ones already added.
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push(FieldPart {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    pub fn fields(&self) -> &[FieldPart] {
        &self.fields
    }

    /// Value for the request's `Content-Type` header.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }

    fn file_header(&self) -> String {
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
            self.boundary,
            quote_param(&self.file.field_name),
            quote_param(&self.file.filename),
            self.file.content_type
        )
    }

    fn field_block(&self, field: &FieldPart) -> String {
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
            self.boundary,
            quote_param(&field.name),
            field.value
        )
    }

    fn closing_delimiter(&self) -> String {
        format!("--{}--\r\n", self.boundary)
    }
}

impl<R: AsyncRead + Unpin> MultipartEnvelope<R> {
    /// Stream the whole envelope into `body` and finish it.
    ///
    /// If the file source fails, the error is returned as
    /// [`NodeError::StreamRead`] and `body` is dropped unfinished: the peer
    /// never sees a terminator and must reject the truncated request.
    pub async fn stream_to<W>(mut self, mut body: ChunkedBody<W>, window: usize) -> NodeResult<MultipartStats>
    where
        W: AsyncWrite + Unpin,
    {
        body.send(self.file_header().as_bytes()).await?;

        let mut buf = vec![0u8; window.max(1)];
        let mut file_bytes = 0u64;
        loop {
            let n = fill_window(&mut self.file.source, &mut buf)
                .await
                .map_err(|e| NodeError::StreamRead(format!("{} after {} bytes", e, file_bytes)))?;
            if n == 0 {
                break;
            }
            body.send(&buf[..n]).await?;
            file_bytes += n as u64;
        }
        debug!(file_bytes, window = buf.len(), "File part streamed");

        let mut pending = String::from("\r\n");
        for field in &self.fields {
            pending.push_str(&self.field_block(field));
            body.send(pending.as_bytes()).await?;
            pending.clear();
        }
        pending.push_str(&self.closing_delimiter());
        body.send(pending.as_bytes()).await?;

        let chunked = body.finish().await?;
        Ok(MultipartStats { file_bytes, chunked })
    }
}

/// Read until `buf` is full or the source is exhausted.
async fn fill_window<R: AsyncRead + Unpin>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = source.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Percent-encode the double quote so a name cannot terminate its parameter.
fn quote_param(value: &str) -> String {
    value.replace('"', "%22")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::chunked::tests::decode_chunked;
    use crate::http::chunked::{CRLF, TERMINATOR};
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    const BOUNDARY: &str = "----EdgeNodeBoundary12345";

    /// Fully buffered rendering of the same body, built part by part.
    fn buffered_body(file: &[u8], fields: &[(&str, &str)]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        body.extend_from_slice(b"Content-Disposition: form-data; name=\"file\"; filename=\"audio.wav\"\r\n");
        body.extend_from_slice(b"Content-Type: audio/wav\r\n\r\n");
        body.extend_from_slice(file);
        body.extend_from_slice(b"\r\n");
        for (name, value) in fields {
            body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
            body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
            );
            body.extend_from_slice(value.as_bytes());
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
        body
    }

    fn envelope<'a>(file: &'a [u8], fields: &[(&str, &str)]) -> MultipartEnvelope<&'a [u8]> {
        let part = FilePart {
            field_name: "file".to_string(),
            filename: "audio.wav".to_string(),
            content_type: "audio/wav".to_string(),
            source: file,
        };
        fields
            .iter()
            .fold(MultipartEnvelope::new(BOUNDARY, part), |env, (name, value)| env.field(*name, *value))
    }

    async fn stream(file: &[u8], fields: &[(&str, &str)], window: usize) -> (Vec<u8>, MultipartStats) {
        let mut wire = Vec::new();
        let stats = envelope(file, fields)
            .stream_to(ChunkedBody::new(&mut wire), window)
            .await
            .unwrap();
        (wire, stats)
    }

    /// Split a chunked body into its frame payloads.
    fn frames(mut wire: &[u8]) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        loop {
            let line_end = wire.windows(2).position(|w| w == CRLF).unwrap();
            let size = usize::from_str_radix(std::str::from_utf8(&wire[..line_end]).unwrap(), 16).unwrap();
            wire = &wire[line_end + 2..];
            if size == 0 {
                return out;
            }
            out.push(wire[..size].to_vec());
            wire = &wire[size + 2..];
        }
    }

    #[tokio::test]
    async fn test_ten_byte_file_with_device_id_matches_buffered_body() {
        let file = b"0123456789";
        let (wire, stats) = stream(file, &[("device_id", "abc")], 1024).await;

        assert_eq!(decode_chunked(&wire).unwrap(), buffered_body(file, &[("device_id", "abc")]));
        assert_eq!(stats.file_bytes, 10);
        assert!(wire.ends_with(TERMINATOR));
    }

    #[tokio::test]
    async fn test_frame_sequence() {
        let (wire, _) = stream(b"0123456789", &[("device_id", "abc"), ("latitude", "55.6")], 4).await;
        let frames = frames(&wire);

        assert_eq!(frames.len(), 7);
        assert!(frames[0].starts_with(format!("--{}\r\n", BOUNDARY).as_bytes()));
        assert!(frames[0].ends_with(b"Content-Type: audio/wav\r\n\r\n"));
        assert_eq!(frames[1], b"0123");
        assert_eq!(frames[2], b"4567");
        assert_eq!(frames[3], b"89");
        assert_eq!(
            frames[4],
            format!(
                "\r\n--{}\r\nContent-Disposition: form-data; name=\"device_id\"\r\n\r\nabc\r\n",
                BOUNDARY
            )
            .into_bytes()
        );
        assert_eq!(
            frames[5],
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"latitude\"\r\n\r\n55.6\r\n",
                BOUNDARY
            )
            .into_bytes()
        );
        assert_eq!(frames[6], format!("--{}--\r\n", BOUNDARY).into_bytes());
    }

    #[tokio::test]
    async fn test_window_size_does_not_change_body() {
        let file: Vec<u8> = (0..10_000u32).map(|i| (i * 7 % 256) as u8).collect();
        let fields = [("device_id", "edge_01"), ("latitude", "55.616158"), ("longitude", "12.978885")];

        let (tiny, tiny_stats) = stream(&file, &fields, 1).await;
        let (wide, wide_stats) = stream(&file, &fields, 4096).await;

        assert_ne!(tiny, wide);
        assert!(tiny_stats.chunked.frames > wide_stats.chunked.frames);
        assert_eq!(decode_chunked(&tiny).unwrap(), decode_chunked(&wide).unwrap());
        assert_eq!(decode_chunked(&wide).unwrap(), buffered_body(&file, &fields));
    }

    #[tokio::test]
    async fn test_no_fields_closes_file_part_before_final_boundary() {
        let (wire, _) = stream(b"abc", &[], 1024).await;
        let frames = frames(&wire);
        assert_eq!(frames.last().unwrap(), &format!("\r\n--{}--\r\n", BOUNDARY).into_bytes());
        assert_eq!(decode_chunked(&wire).unwrap(), buffered_body(b"abc", &[]));
    }

    #[tokio::test]
    async fn test_empty_file() {
        let (wire, stats) = stream(b"", &[("device_id", "abc")], 1024).await;
        assert_eq!(stats.file_bytes, 0);
        assert_eq!(frames(&wire).len(), 3);
        assert_eq!(decode_chunked(&wire).unwrap(), buffered_body(b"", &[("device_id", "abc")]));
    }

    #[test]
    fn test_content_type_and_quoting() {
        let env = envelope(b"", &[]).field("na\"me", "v");
        assert_eq!(env.content_type(), format!("multipart/form-data; boundary={}", BOUNDARY));
        assert!(env.field_block(&env.fields()[0]).contains("name=\"na%22me\""));
    }

    /// Source that yields `remaining` bytes and then fails.
    struct FailingSource {
        remaining: usize,
    }

    impl AsyncRead for FailingSource {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.remaining == 0 {
                return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, "flash read error")));
            }
            let n = self.remaining.min(buf.remaining());
            buf.put_slice(&vec![0xAB; n]);
            self.remaining -= n;
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn test_source_failure_aborts_without_terminator() {
        let part = FilePart {
            field_name: "file".to_string(),
            filename: "audio.wav".to_string(),
            content_type: "audio/wav".to_string(),
            source: FailingSource { remaining: 2500 },
        };
        let mut wire = Vec::new();
        let result = MultipartEnvelope::new(BOUNDARY, part)
            .field("device_id", "abc")
            .stream_to(ChunkedBody::new(&mut wire), 1024)
            .await;

        assert!(matches!(result, Err(NodeError::StreamRead(_))));
        assert!(!wire.ends_with(TERMINATOR));
        assert!(decode_chunked(&wire).is_err());
        // two full windows made it out before the failure
        assert_eq!(frames_before_failure(&wire), 3);
    }

    fn frames_before_failure(mut wire: &[u8]) -> usize {
        let mut count = 0;
        while let Some(line_end) = wire.windows(2).position(|w| w == CRLF) {
            let size = usize::from_str_radix(std::str::from_utf8(&wire[..line_end]).unwrap(), 16).unwrap();
            wire = &wire[line_end + 2 + size + 2..];
            count += 1;
        }
        count
    }
}

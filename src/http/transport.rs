//! # Transport Session
//!
//! One outbound HTTP/1.1 connection, plain TCP or TLS, owned for the length
//! of a single upload and never reused.
//!
//! ## Request Lifecycle:
//! 1. **open**: TCP connect, optional TLS handshake
//! 2. **send_request_line** / **send_header** / **end_headers**: request head;
//!    `end_headers` always adds `Transfer-Encoding: chunked` and
//!    `Connection: close`, and `Content-Length` is never allowed
//! 3. **body**: a [`ChunkedBody`] writing straight into the socket
//! 4. **read_response**: raw response lines until the peer closes
//! 5. **close**: idempotent socket release
//!
//! No timeouts are applied here; callers wanting a bounded upload wrap the
//! whole exchange in `tokio::time::timeout`.

use crate::error::{NodeError, NodeResult};
use crate::http::chunked::ChunkedBody;
use futures_util::{Stream, StreamExt};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{self, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_stream::wrappers::SplitStream;
use tracing::{debug, info, warn};

/// Anything a session can run over: a TCP socket, a TLS stream, or an
/// in-memory pipe in tests.
pub trait ByteStream: AsyncRead + AsyncWrite {}

impl<T: AsyncRead + AsyncWrite> ByteStream for T {}

pub type BoxedStream = Box<dyn ByteStream + Unpin + Send>;

/// Headers the session writes itself and callers may not send.
const MANAGED_HEADERS: [&str; 3] = ["content-length", "transfer-encoding", "connection"];

/// Certificate validation policy for TLS sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TlsPolicy {
    /// Validate the chain against the bundled web PKI roots and check the host name
    VerifyChain,
    /// Accept any certificate; only for explicitly configured insecure deployments
    AcceptAny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    RequestLine,
    Headers,
    Body,
    Response,
    Closed,
}

/// An exclusively owned outbound connection.
pub struct TransportSession {
    stream: Option<BoxedStream>,
    peer: String,
    phase: Phase,
}

impl TransportSession {
    /// Connect to `host:port`, wrapping the socket in TLS when `tls` is set.
    ///
    /// Any failure here is a [`NodeError::Connection`]: nothing has been sent.
    pub async fn open(host: &str, port: u16, tls: Option<TlsPolicy>) -> NodeResult<Self> {
        let peer = format!("{}:{}", host, port);
        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| NodeError::Connection(format!("{}: {}", peer, e)))?;
        if let Err(e) = tcp.set_nodelay(true) {
            debug!(peer = %peer, error = %e, "Could not disable Nagle");
        }

        let stream: BoxedStream = match tls {
            None => Box::new(tcp),
            Some(policy) => {
                let server_name = ServerName::try_from(host)
                    .map_err(|e| NodeError::Connection(format!("invalid TLS server name {}: {}", host, e)))?
                    .to_owned();
                let connector = TlsConnector::from(Arc::new(tls_config(policy)?));
                let tls_stream = connector
                    .connect(server_name, tcp)
                    .await
                    .map_err(|e| NodeError::Connection(format!("TLS handshake with {}: {}", peer, e)))?;
                Box::new(tls_stream)
            }
        };

        info!(peer = %peer, tls = ?tls, "Session connected");
        Ok(Self::from_stream(stream, peer))
    }

    /// Run a session over an already established stream.
    pub fn from_stream(stream: BoxedStream, peer: impl Into<String>) -> Self {
        Self {
            stream: Some(stream),
            peer: peer.into(),
            phase: Phase::RequestLine,
        }
    }

    pub async fn send_request_line(&mut self, method: &str, path: &str) -> NodeResult<()> {
        self.expect_phase(Phase::RequestLine, "request line")?;
        if method.is_empty() || !method.bytes().all(|b| b.is_ascii_uppercase()) {
            return Err(NodeError::Protocol(format!("invalid method {:?}", method)));
        }
        if !path.starts_with('/') || path.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control()) {
            return Err(NodeError::Protocol(format!("invalid request path {:?}", path)));
        }
        self.write_raw(format!("{} {} HTTP/1.1\r\n", method, path).as_bytes()).await?;
        self.phase = Phase::Headers;
        Ok(())
    }

    /// Send one header. Repeatable; order is preserved on the wire.
    pub async fn send_header(&mut self, name: &str, value: &str) -> NodeResult<()> {
        self.expect_phase(Phase::Headers, "header")?;
        if MANAGED_HEADERS.contains(&name.to_ascii_lowercase().as_str()) {
            return Err(NodeError::Protocol(format!("{} is managed by the session", name)));
        }
        if name.is_empty()
            || name.bytes().any(|b| b == b':' || b.is_ascii_whitespace() || b.is_ascii_control())
            || value.bytes().any(|b| b == b'\r' || b == b'\n')
        {
            return Err(NodeError::Protocol(format!("malformed header {:?}", name)));
        }
        self.write_raw(format!("{}: {}\r\n", name, value).as_bytes()).await
    }

    /// Close the header block with the streaming headers.
    pub async fn end_headers(&mut self) -> NodeResult<()> {
        self.expect_phase(Phase::Headers, "end of headers")?;
        self.write_raw(b"Transfer-Encoding: chunked\r\nConnection: close\r\n\r\n").await?;
        self.phase = Phase::Body;
        Ok(())
    }

    /// Chunked body writer over this session's socket.
    pub fn body(&mut self) -> NodeResult<ChunkedBody<&mut BoxedStream>> {
        self.expect_phase(Phase::Body, "body")?;
        let stream = self.stream_mut()?;
        Ok(ChunkedBody::new(stream))
    }

    /// Lazily read the response as raw text lines, CRLF stripped.
    ///
    /// Lines are for logging only, so bytes that are not UTF-8 are replaced
    /// rather than failing an upload whose body already went out. The stream
    /// ends when the peer closes the connection.
    pub fn read_response(&mut self) -> NodeResult<impl Stream<Item = NodeResult<String>> + '_> {
        self.expect_phase(Phase::Body, "response")?;
        self.phase = Phase::Response;
        let stream = self.stream_mut()?;
        let lines = SplitStream::new(BufReader::new(stream).split(b'\n'));
        Ok(lines.map(|line| {
            line.map(decode_line)
                .map_err(|e| NodeError::transport("read response", e))
        }))
    }

    /// Release the socket. Safe to call any number of times.
    pub async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.shutdown().await {
                debug!(peer = %self.peer, error = %e, "Shutdown on close failed");
            }
            debug!(peer = %self.peer, "Session closed");
        }
        self.phase = Phase::Closed;
    }

    fn expect_phase(&self, expected: Phase, step: &str) -> NodeResult<()> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(NodeError::Protocol(format!(
                "cannot send {} while session is in {:?} phase",
                step, self.phase
            )))
        }
    }

    fn stream_mut(&mut self) -> NodeResult<&mut BoxedStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| NodeError::Protocol("session is closed".to_string()))
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> NodeResult<()> {
        self.stream_mut()?
            .write_all(bytes)
            .await
            .map_err(|e| NodeError::transport("write request head", e))
    }
}

/// One response line without its CR, decoded lossily.
fn decode_line(mut raw: Vec<u8>) -> String {
    if raw.last() == Some(&b'\r') {
        raw.pop();
    }
    String::from_utf8_lossy(&raw).into_owned()
}

/// Parse the status code out of an HTTP status line.
pub fn parse_status_line(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

/// Build the rustls client configuration for `policy`.
pub fn tls_config(policy: TlsPolicy) -> NodeResult<ClientConfig> {
    let provider = Arc::new(crypto::ring::default_provider());
    let builder = ClientConfig::builder_with_provider(provider.clone())
        .with_safe_default_protocol_versions()
        .map_err(|e| NodeError::Connection(format!("TLS setup: {}", e)))?;

    let config = match policy {
        TlsPolicy::VerifyChain => {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            builder.with_root_certificates(roots).with_no_client_auth()
        }
        TlsPolicy::AcceptAny => {
            warn!("TLS certificate validation is disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate(provider)))
                .with_no_client_auth()
        }
    };
    Ok(config)
}

/// Verifier that trusts every certificate but still checks handshake
/// signatures, so the session is encrypted but unauthenticated.
#[derive(Debug)]
struct AcceptAnyCertificate(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCertificate {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        crypto::verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

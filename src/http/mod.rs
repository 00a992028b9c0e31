//! # HTTP Upload Module
//!
//! Streams one recording to the collection server as a single
//! `multipart/form-data` POST with chunked transfer encoding, so the body is
//! never held in memory as a whole.
//!
//! ## Key Components:
//! - **Chunk Codec**: `<hex>\r\n<bytes>\r\n` framing and the terminator
//! - **Multipart Assembler**: boundary-delimited file and field parts
//! - **Transport Session**: plain or TLS socket and the request head

pub mod chunked;    // Chunked transfer-encoding frames
pub mod multipart;  // multipart/form-data envelope streaming
pub mod transport;  // Outbound HTTP/1.1 session over TCP or TLS

//! AWS chunked transfer encoding decoder
//!
//! When an SDK signs with STREAMING-AWS4-HMAC-SHA256-PAYLOAD, the body is
//! framed in chunks:
//!
//! ```text
//! <hex-chunk-size>;chunk-signature=<signature>\r\n
//! <chunk-data>\r\n
//! ...
//! 0;chunk-signature=<signature>\r\n
//! ```
//!
//! The per-chunk signatures are not verified (the payload hash is accepted
//! as a placeholder at the protocol level); this module only strips the
//! framing so the stored bytes are the actual payload. The decoder is
//! incremental, so it plugs into the streaming write path without ever
//! buffering the whole body.

use axum::http::HeaderMap;
use std::fmt;

/// Upper bound on one `<size>;chunk-signature=...` header line.
const MAX_CHUNK_HEADER: usize = 4096;

/// Check if the request body uses AWS chunked encoding.
pub fn is_aws_chunked(headers: &HeaderMap) -> bool {
    headers
        .get("x-amz-content-sha256")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "STREAMING-AWS4-HMAC-SHA256-PAYLOAD")
        .unwrap_or(false)
}

/// Malformed chunk framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError(String);

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for DecodeError {}

#[derive(Debug)]
enum State {
    /// Accumulating a chunk header line up to its CRLF.
    Header(Vec<u8>),
    /// Passing through chunk payload bytes.
    Data(usize),
    /// Skipping the CRLF that trails each chunk's payload.
    DataCrlf(usize),
    /// Final chunk seen; everything after (trailers) is discarded.
    Done,
}

/// Incremental aws-chunked deframer. Feed it body frames in order; it
/// appends decoded payload bytes to the caller's buffer.
#[derive(Debug)]
pub struct ChunkDecoder {
    state: State,
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkDecoder {
    pub fn new() -> Self {
        Self {
            state: State::Header(Vec::new()),
        }
    }

    /// Consume one input frame, appending decoded bytes to `out`.
    pub fn feed(&mut self, mut input: &[u8], out: &mut Vec<u8>) -> Result<(), DecodeError> {
        while !input.is_empty() {
            match &mut self.state {
                State::Header(line) => {
                    // Accumulate until the CRLF that ends the header line.
                    while let Some((&byte, rest)) = input.split_first() {
                        input = rest;
                        if byte == b'\n' && line.last() == Some(&b'\r') {
                            line.pop();
                            let size = parse_chunk_header(line)?;
                            self.state = if size == 0 {
                                State::Done
                            } else {
                                State::Data(size)
                            };
                            break;
                        }
                        if line.len() >= MAX_CHUNK_HEADER {
                            return Err(DecodeError("Chunk header too long".to_string()));
                        }
                        line.push(byte);
                    }
                }
                State::Data(remaining) => {
                    let take = (*remaining).min(input.len());
                    out.extend_from_slice(&input[..take]);
                    input = &input[take..];
                    *remaining -= take;
                    if *remaining == 0 {
                        self.state = State::DataCrlf(2);
                    }
                }
                State::DataCrlf(remaining) => {
                    let take = (*remaining).min(input.len());
                    input = &input[take..];
                    *remaining -= take;
                    if *remaining == 0 {
                        self.state = State::Header(Vec::new());
                    }
                }
                State::Done => return Ok(()),
            }
        }
        Ok(())
    }

    /// Decode a fully-buffered body in one call.
    pub fn decode_all(body: &[u8]) -> Result<Vec<u8>, DecodeError> {
        let mut decoder = Self::new();
        let mut out = Vec::with_capacity(body.len());
        decoder.feed(body, &mut out)?;
        Ok(out)
    }
}

fn parse_chunk_header(line: &[u8]) -> Result<usize, DecodeError> {
    let text = std::str::from_utf8(line)
        .map_err(|_| DecodeError("Chunk header is not UTF-8".to_string()))?;
    let size_hex = text.split(';').next().unwrap_or("").trim();
    usize::from_str_radix(size_hex, 16)
        .map_err(|_| DecodeError(format!("Invalid chunk size: {size_hex}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &[u8] =
        b"2a;chunk-signature=abc123\r\ntest content Wed Dec 17 16:48:05 UTC 2025\n\r\n0;chunk-signature=def456\r\n";

    #[test]
    fn test_decode_single_chunk() {
        let decoded = ChunkDecoder::decode_all(SAMPLE).unwrap();
        assert_eq!(decoded.len(), 0x2a);
        assert!(decoded.starts_with(b"test content"));
    }

    #[test]
    fn test_decode_multiple_chunks() {
        let body = b"5;chunk-signature=a\r\nhello\r\n6;chunk-signature=b\r\n world!\r\n0;chunk-signature=c\r\n";
        let decoded = ChunkDecoder::decode_all(body).unwrap();
        assert_eq!(decoded, b"hello world!");
    }

    #[test]
    fn test_decode_incremental_across_frames() {
        // Split the sample at awkward positions; the decoder must not care.
        for split in [1, 5, 27, 30, SAMPLE.len() - 3] {
            let mut decoder = ChunkDecoder::new();
            let mut out = Vec::new();
            decoder.feed(&SAMPLE[..split], &mut out).unwrap();
            decoder.feed(&SAMPLE[split..], &mut out).unwrap();
            assert_eq!(out.len(), 0x2a, "split at {split}");
            assert!(out.starts_with(b"test content"));
        }
    }

    #[test]
    fn test_trailers_after_final_chunk_ignored() {
        let body = b"3;chunk-signature=a\r\nabc\r\n0;chunk-signature=b\r\nx-amz-checksum-crc32:AAAA\r\n\r\n";
        let decoded = ChunkDecoder::decode_all(body).unwrap();
        assert_eq!(decoded, b"abc");
    }

    #[test]
    fn test_garbage_header_rejected() {
        assert!(ChunkDecoder::decode_all(b"zz;sig=a\r\ndata\r\n").is_err());
    }

    #[test]
    fn test_oversized_header_rejected() {
        let mut body = vec![b'f'; MAX_CHUNK_HEADER + 10];
        body.extend_from_slice(b"\r\n");
        assert!(ChunkDecoder::decode_all(&body).is_err());
    }

    #[test]
    fn test_is_aws_chunked() {
        let mut headers = HeaderMap::new();
        assert!(!is_aws_chunked(&headers));

        headers.insert(
            "x-amz-content-sha256",
            "STREAMING-AWS4-HMAC-SHA256-PAYLOAD".parse().unwrap(),
        );
        assert!(is_aws_chunked(&headers));
    }
}

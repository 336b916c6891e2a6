//! Request-path codec understood by the PlantUML server.
//!
//! The server expects the diagram source compressed with raw DEFLATE and
//! re-encoded with a 6-bit alphabet. The alphabet is NOT RFC 4648 base64:
//! digits come first, then upper case, then lower case, then `-` and `_`.

use std::io::Write;

use flate2::write::DeflateEncoder;
use flate2::Compression;

use super::DiagramError;

/// Compress and encode diagram source into the URL path segment.
///
/// The result is a pure function of the input bytes.
pub fn encode_request(v: &[u8]) -> Result<String, DiagramError> {
    Ok(encode64(&compress(v)?))
}

/// Raw DEFLATE, default level. No zlib header, no gzip framing.
pub fn compress(v: &[u8]) -> Result<Vec<u8>, DiagramError> {
    if v.is_empty() {
        return Err(DiagramError::Codec("nothing to compress".to_string()));
    }
    let mut enc = DeflateEncoder::new(Vec::new(), Compression::default());
    enc.write_all(v)
        .map_err(|e| DiagramError::Codec(e.to_string()))?;
    enc.finish().map_err(|e| DiagramError::Codec(e.to_string()))
}

/// Re-encode bytes with the PlantUML 6-bit alphabet.
///
/// Input is consumed 3 bytes at a time yielding 4 characters; a short final
/// chunk is zero-padded, so the output length is always a multiple of 4.
pub fn encode64(e: &[u8]) -> String {
    let mut r = String::with_capacity(e.len().div_ceil(3) * 4);
    for chunk in e.chunks(3) {
        let b0 = chunk[0];
        let b1 = chunk.get(1).copied().unwrap_or(0);
        let b2 = chunk.get(2).copied().unwrap_or(0);

        r.push(encode6bit(b0 >> 2));
        r.push(encode6bit(((3 & b0) << 4 | b1 >> 4) & 63));
        r.push(encode6bit(((15 & b1) << 2 | b2 >> 6) & 63));
        r.push(encode6bit(63 & b2));
    }
    r
}

fn encode6bit(e: u8) -> char {
    match e {
        0..=9 => (b'0' + e) as char,
        10..=35 => (b'A' + (e - 10)) as char,
        36..=61 => (b'a' + (e - 36)) as char,
        62 => '-',
        63 => '_',
        _ => '?',
    }
}

//! Storage-side value transforms
//!
//! The configured provider runs inside the store boundary: values are
//! transformed on the way in and restored on the way out, and everything
//! above the store keeps seeing opaque byte strings.

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::{Read, Write};
use thiserror::Error;

#[derive(Debug, Error)]
#[error("value transform failed: {0}")]
pub struct CodecError(String);

/// Transform applied to values crossing the store boundary.
pub trait ValueCodec: Send + Sync {
    fn name(&self) -> &'static str;
    fn encode(&self, value: &[u8]) -> Result<Vec<u8>, CodecError>;
    fn decode(&self, stored: &[u8]) -> Result<Vec<u8>, CodecError>;
}

/// Identity transform.
pub struct PlainCodec;

impl ValueCodec for PlainCodec {
    fn name(&self) -> &'static str {
        "plain"
    }

    fn encode(&self, value: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(value.to_vec())
    }

    fn decode(&self, stored: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(stored.to_vec())
    }
}

/// Gzip transform. Trades CPU on every get/set for resident memory.
pub struct GzipCodec;

impl ValueCodec for GzipCodec {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn encode(&self, value: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(value).map_err(|e| CodecError(e.to_string()))?;
        enc.finish().map_err(|e| CodecError(e.to_string()))
    }

    fn decode(&self, stored: &[u8]) -> Result<Vec<u8>, CodecError> {
        let mut out = Vec::new();
        GzDecoder::new(stored)
            .read_to_end(&mut out)
            .map_err(|e| CodecError(e.to_string()))?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_is_identity() {
        let c = PlainCodec;
        assert_eq!(c.decode(&c.encode(b"abc").unwrap()).unwrap(), b"abc");
    }

    #[test]
    fn test_gzip_round_trip() {
        let c = GzipCodec;
        let value = vec![7u8; 4096];
        let stored = c.encode(&value).unwrap();
        assert!(stored.len() < value.len());
        assert_eq!(c.decode(&stored).unwrap(), value);
    }

    #[test]
    fn test_gzip_rejects_garbage() {
        let c = GzipCodec;
        assert!(c.decode(b"definitely not gzip").is_err());
    }

    #[test]
    fn test_gzip_empty_value() {
        let c = GzipCodec;
        let stored = c.encode(b"").unwrap();
        assert_eq!(c.decode(&stored).unwrap(), b"");
    }
}

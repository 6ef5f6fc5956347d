//! Stored payload envelope and gzip compression.

use crate::error::StoreResult;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// What is actually written under a cache key.
///
/// `payload` holds the value's JSON text, or the base64 of its gzip when
/// `compressed` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub compressed: bool,
    pub payload: String,
    /// Unix milliseconds at write time.
    pub stored_at: i64,
}

impl Envelope {
    /// Wrap a value's JSON text, compressing it if asked to.
    pub fn seal(json: String, compress: bool) -> StoreResult<Self> {
        let payload = if compress {
            STANDARD.encode(gzip(json.as_bytes())?)
        } else {
            json
        };
        Ok(Self {
            compressed: compress,
            payload,
            stored_at: chrono::Utc::now().timestamp_millis(),
        })
    }

    /// Recover the value's JSON text.
    pub fn open(self) -> StoreResult<String> {
        if !self.compressed {
            return Ok(self.payload);
        }
        let bytes = gunzip(&STANDARD.decode(self.payload.as_bytes())?)?;
        String::from_utf8(bytes)
            .map_err(|e| crate::error::StoreError::Compression(e.to_string()))
    }

    pub fn to_json(&self) -> StoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> StoreResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

pub fn gzip(bytes: &[u8]) -> StoreResult<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(bytes)?;
    Ok(encoder.finish()?)
}

pub fn gunzip(bytes: &[u8]) -> StoreResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn test_compressed_envelope_opens() {
        let json = format!("{{\"text\":\"{}\"}}", "note ".repeat(500));
        let envelope = Envelope::seal(json.clone(), true).unwrap();

        assert!(envelope.compressed);
        assert!(envelope.payload.len() < json.len());

        let raw = envelope.to_json().unwrap();
        assert_eq!(Envelope::from_json(&raw).unwrap().open().unwrap(), json);
    }

    #[test]
    fn test_plain_envelope_is_verbatim() {
        let envelope = Envelope::seal("[1,2,3]".into(), false).unwrap();
        assert_eq!(envelope.payload, "[1,2,3]");
    }

    #[test]
    fn test_corrupt_payload_is_an_error() {
        let envelope = Envelope {
            compressed: true,
            payload: "not base64 !!".into(),
            stored_at: 0,
        };
        assert!(matches!(envelope.open(), Err(StoreError::Compression(_))));
        assert!(Envelope::from_json("{\"garbage\":1}").is_err());
    }
}

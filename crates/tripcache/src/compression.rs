//! Gzip compression of cached payloads

use std::io::{Read, Write};

use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use serde_json::Value;
use tracing::warn;

use crate::entry::Payload;
use crate::error::{CacheError, Result};

/// Compress a JSON value into a [`Payload`].
///
/// The value is encoded as JSON and gzipped. When the compressed form is not
/// smaller than the JSON encoding, or encoding fails, the value is kept as
/// [`Payload::Raw`].
pub fn compress(value: Value) -> Payload {
    match gzip(&value) {
        Ok((bytes, original_size)) if bytes.len() < original_size => Payload::Compressed {
            bytes,
            original_size,
        },
        Ok(_) => Payload::Raw(value),
        Err(e) => {
            warn!("Storing value uncompressed: {}", e);
            Payload::Raw(value)
        }
    }
}

fn gzip(value: &Value) -> Result<(Vec<u8>, usize)> {
    let encoded = serde_json::to_vec(value).map_err(|e| CacheError::Serialization {
        message: e.to_string(),
    })?;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&encoded).map_err(compression_error)?;
    let bytes = encoder.finish().map_err(compression_error)?;
    Ok((bytes, encoded.len()))
}

fn compression_error(e: std::io::Error) -> CacheError {
    CacheError::Compression {
        message: e.to_string(),
    }
}

/// Inflate bytes produced by [`compress`] back into a JSON value
pub fn decompress(bytes: &[u8]) -> Result<Value> {
    let mut decoder = GzDecoder::new(bytes);
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf).map_err(compression_error)?;

    serde_json::from_slice(&buf).map_err(|e| CacheError::Deserialization {
        message: e.to_string(),
    })
}

//! Canonical JSON serialization for deterministic cache identity.
//!
//! Two logically identical values must always encode to the same bytes so that
//! their SHA-256 digests agree. Canonical JSON here means:
//! - Object keys sorted lexicographically (UTF-8 byte order)
//! - No whitespace
//! - UTF-8 output
//! - Integers only (floats rejected)
//!
//! # Example
//!
//! ```rust
//! use quarry_core::canonical_json::{to_canonical_string, canonical_sha256};
//! use serde_json::json;
//!
//! let a = json!({"space": 4, "customer": 42});
//! let b = json!({"customer": 42, "space": 4});
//! assert_eq!(to_canonical_string(&a).unwrap(), r#"{"customer":42,"space":4}"#);
//! assert_eq!(canonical_sha256(&a).unwrap(), canonical_sha256(&b).unwrap());
//! ```

use serde::Serialize;
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors that can occur during canonical JSON serialization.
#[derive(Debug, Error)]
pub enum CanonicalJsonError {
    /// Serde JSON conversion failed.
    #[error("serde_json error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Float values are not allowed; their textual form is not stable.
    #[error("float values are not allowed in canonical JSON (use integers)")]
    FloatNotAllowed,
}

/// Serialize `value` into canonical JSON bytes.
///
/// # Errors
///
/// Returns `CanonicalJsonError::Serde` if serialization fails, or
/// `CanonicalJsonError::FloatNotAllowed` if the value contains floats.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, CanonicalJsonError> {
    let v = serde_json::to_value(value)?;
    let mut out = Vec::<u8>::new();
    write_value(&v, &mut out)?;
    Ok(out)
}

/// Same as [`to_canonical_bytes`], but returns a `String`.
///
/// # Errors
///
/// See [`to_canonical_bytes`].
pub fn to_canonical_string<T: Serialize>(value: &T) -> Result<String, CanonicalJsonError> {
    let bytes = to_canonical_bytes(value)?;
    // write_value only emits serde_json-escaped strings and ASCII punctuation.
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Lowercase hex SHA-256 of the canonical encoding of `value`.
///
/// # Errors
///
/// See [`to_canonical_bytes`].
pub fn canonical_sha256<T: Serialize>(value: &T) -> Result<String, CanonicalJsonError> {
    let bytes = to_canonical_bytes(value)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

fn write_value(v: &Value, out: &mut Vec<u8>) -> Result<(), CanonicalJsonError> {
    match v {
        Value::Null => out.extend_from_slice(b"null"),
        Value::Bool(true) => out.extend_from_slice(b"true"),
        Value::Bool(false) => out.extend_from_slice(b"false"),
        Value::Number(n) => write_number(n, out)?,
        Value::String(s) => serde_json::to_writer(&mut *out, s)?,
        Value::Array(arr) => {
            out.push(b'[');
            for (i, item) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_value(item, out)?;
            }
            out.push(b']');
        }
        Value::Object(map) => write_object(map, out)?,
    }
    Ok(())
}

fn write_object(map: &Map<String, Value>, out: &mut Vec<u8>) -> Result<(), CanonicalJsonError> {
    out.push(b'{');

    let mut keys: Vec<&String> = map.keys().collect();
    keys.sort();

    for (i, k) in keys.iter().enumerate() {
        if i > 0 {
            out.push(b',');
        }
        serde_json::to_writer(&mut *out, k)?;
        out.push(b':');
        if let Some(value) = map.get(*k) {
            write_value(value, out)?;
        }
    }

    out.push(b'}');
    Ok(())
}

fn write_number(n: &Number, out: &mut Vec<u8>) -> Result<(), CanonicalJsonError> {
    if let Some(i) = n.as_i64() {
        out.extend_from_slice(i.to_string().as_bytes());
    } else if let Some(u) = n.as_u64() {
        out.extend_from_slice(u.to_string().as_bytes());
    } else {
        return Err(CanonicalJsonError::FloatNotAllowed);
    }
    Ok(())
}

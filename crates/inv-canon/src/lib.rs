// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
#![warn(missing_docs)]
//! inv-canon
//!
//! Canonical encoding and digesting for everything that feeds a proof.
//!
//! Proofs must be bit-identical across hosts, so hashing never goes through
//! a serializer's defaults. [`canonical_bytes`] emits a whitespace-free
//! JSON-subset byte string with object keys sorted by UTF-8 bytes, and
//! [`digest_value`] / [`digest_file`] wrap it in SHA-256.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Errors from canonical encoding or file digesting.
#[derive(Debug, thiserror::Error)]
pub enum CanonError {
    /// A non-integer number reached a hash input. Floats are forbidden in
    /// proof material because their textual rendering is not portable.
    #[error("float value at '{pointer}' is not permitted in canonical encodings")]
    FloatRejected {
        /// JSON-pointer-ish location of the offending value.
        pointer: String,
    },

    /// The file to digest could not be read.
    #[error("failed to read '{path}' for digesting")]
    Io {
        /// Path that was being digested.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Produce the canonical byte encoding of a structured value.
///
/// Rules:
/// - objects: keys sorted lexicographically on UTF-8 bytes, emitted as
///   `{"k":v,…}` with no whitespace
/// - arrays: emitted in the order given (callers canonicalise order-free
///   sequences *before* encoding)
/// - strings: minimal JSON escaping
/// - numbers: integers only; any float is rejected
///
/// # Errors
///
/// Returns [`CanonError::FloatRejected`] if any number in the tree is not
/// representable as `i64`/`u64`.
pub fn canonical_bytes(value: &Value) -> Result<Vec<u8>, CanonError> {
    let mut out = String::new();
    write_canonical(&mut out, value, &mut String::new())?;
    Ok(out.into_bytes())
}

fn write_canonical(out: &mut String, value: &Value, pointer: &mut String) -> Result<(), CanonError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(true) => out.push_str("true"),
        Value::Bool(false) => out.push_str("false"),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                out.push_str(&i.to_string());
            } else if let Some(u) = n.as_u64() {
                out.push_str(&u.to_string());
            } else {
                return Err(CanonError::FloatRejected {
                    pointer: pointer.clone(),
                });
            }
        }
        Value::String(s) => out.push_str(&escape_string(s)),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                let len = pointer.len();
                pointer.push('/');
                pointer.push_str(&i.to_string());
                write_canonical(out, item, pointer)?;
                pointer.truncate(len);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&escape_string(key));
                out.push(':');
                let len = pointer.len();
                pointer.push('/');
                pointer.push_str(key);
                write_canonical(out, &map[key.as_str()], pointer)?;
                pointer.truncate(len);
            }
            out.push('}');
        }
    }
    Ok(())
}

/// Minimal JSON string escaping: quotes, backslash, and control characters.
///
/// Non-ASCII passes through unescaped; canonical bytes are UTF-8.
fn escape_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// SHA-256 digest of a structured value's canonical encoding.
///
/// # Errors
///
/// Returns [`CanonError::FloatRejected`] for non-integer numbers.
pub fn digest_value(value: &Value) -> Result<[u8; 32], CanonError> {
    let bytes = canonical_bytes(value)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hasher.finalize().into())
}

/// Lower-case hex form of [`digest_value`].
///
/// # Errors
///
/// Returns [`CanonError::FloatRejected`] for non-integer numbers.
pub fn digest_value_hex(value: &Value) -> Result<String, CanonError> {
    Ok(hex::encode(digest_value(value)?))
}

/// SHA-256 digest of a file's bytes, via a buffered streaming read.
///
/// # Errors
///
/// Returns [`CanonError::Io`] if the file cannot be opened or read.
pub fn digest_file(path: &Path) -> Result<[u8; 32], CanonError> {
    let io_err = |source| CanonError::Io {
        path: path.display().to_string(),
        source,
    };

    let file = File::open(path).map_err(io_err)?;
    let mut reader = BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().into())
}

/// Lower-case hex form of [`digest_file`].
///
/// # Errors
///
/// Returns [`CanonError::Io`] if the file cannot be opened or read.
pub fn digest_file_hex(path: &Path) -> Result<String, CanonError> {
    Ok(hex::encode(digest_file(path)?))
}

/// Hex-encoded SHA-256 of raw bytes.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn object_keys_are_sorted() {
        let v = json!({"zulu": 1, "alpha": 2, "mike": 3});
        let bytes = canonical_bytes(&v).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"alpha":2,"mike":3,"zulu":1}"#
        );
    }

    #[test]
    fn nested_objects_sort_at_every_level() {
        let v = json!({"b": {"y": 1, "x": 2}, "a": [{"q": 0, "p": 1}]});
        let bytes = canonical_bytes(&v).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"a":[{"p":1,"q":0}],"b":{"x":2,"y":1}}"#
        );
    }

    #[test]
    fn arrays_preserve_order() {
        let v = json!(["c", "a", "b"]);
        let bytes = canonical_bytes(&v).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"["c","a","b"]"#);
    }

    #[test]
    fn floats_are_rejected_with_location() {
        let v = json!({"model": {"temperature": 0.7}});
        let err = canonical_bytes(&v).unwrap_err();
        match err {
            CanonError::FloatRejected { pointer } => {
                assert_eq!(pointer, "/model/temperature");
            }
            other => panic!("expected FloatRejected, got {other:?}"),
        }
    }

    #[test]
    fn integers_and_bools_encode_plainly() {
        let v = json!({"n": -42, "u": 18446744073709551615u64, "t": true, "f": false, "z": null});
        let bytes = canonical_bytes(&v).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"f":false,"n":-42,"t":true,"u":18446744073709551615,"z":null}"#
        );
    }

    #[test]
    fn string_escaping_is_minimal() {
        let v = json!("a\"b\\c\nd\te\u{1}é");
        let bytes = canonical_bytes(&v).unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "\"a\\\"b\\\\c\\nd\\te\\u0001é\""
        );
    }

    #[test]
    fn digest_is_stable_across_key_order() {
        let a = json!({"x": 1, "y": [1, 2, 3]});
        let b = json!({"y": [1, 2, 3], "x": 1});
        assert_eq!(digest_value_hex(&a).unwrap(), digest_value_hex(&b).unwrap());
    }

    #[test]
    fn digest_differs_on_any_change() {
        let a = json!({"x": 1});
        let b = json!({"x": 2});
        assert_ne!(digest_value_hex(&a).unwrap(), digest_value_hex(&b).unwrap());
    }

    #[test]
    fn sha256_hex_known_vector() {
        // SHA-256 of the empty input.
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn digest_file_matches_byte_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ctx.txt");
        std::fs::write(&path, b"v1").unwrap();
        assert_eq!(digest_file_hex(&path).unwrap(), sha256_hex(b"v1"));
    }

    #[test]
    fn digest_file_missing_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = digest_file(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, CanonError::Io { .. }));
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_scalar() -> impl Strategy<Value = Value> {
            prop_oneof![
                any::<i64>().prop_map(|i| json!(i)),
                any::<bool>().prop_map(|b| json!(b)),
                "[a-z0-9 ]{0,12}".prop_map(|s| json!(s)),
            ]
        }

        proptest! {
            #[test]
            fn encoding_is_deterministic(pairs in proptest::collection::vec(("[a-z]{1,6}", arb_scalar()), 0..8)) {
                let map: serde_json::Map<String, Value> = pairs.into_iter().collect();
                let v = Value::Object(map);
                prop_assert_eq!(canonical_bytes(&v).unwrap(), canonical_bytes(&v).unwrap());
            }

            #[test]
            fn encoding_ignores_insertion_order(pairs in proptest::collection::vec(("[a-z]{1,6}", arb_scalar()), 0..8)) {
                let forward: serde_json::Map<String, Value> = pairs.clone().into_iter().collect();
                let reversed: serde_json::Map<String, Value> = pairs.into_iter().rev().collect();
                prop_assert_eq!(
                    canonical_bytes(&Value::Object(forward)).unwrap(),
                    canonical_bytes(&Value::Object(reversed)).unwrap()
                );
            }
        }
    }
}

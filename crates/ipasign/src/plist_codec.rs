//! Property list encoding and decoding.
//!
//! Thin layer over the [`plist`] crate used by everything that touches
//! `Info.plist`, entitlements, provisioning profiles, or install manifests.
//! Values are [`plist::Value`] trees; dictionaries keep insertion order, so
//! a decoded document re-encodes with its keys in the original order.
//!
//! # Examples
//!
//! ```
//! use ipasign::plist_codec::{self, PlistFormat};
//! use plist::{Dictionary, Value};
//!
//! let mut dict = Dictionary::new();
//! dict.insert("CFBundleVersion".into(), Value::String("1.0".into()));
//! let tree = Value::Dictionary(dict);
//!
//! let bytes = plist_codec::serialize(&tree, PlistFormat::Xml)?;
//! assert_eq!(plist_codec::parse(&bytes)?, tree);
//! # Ok::<(), ipasign::Error>(())
//! ```

use crate::{Error, Result};
use plist::{Dictionary, Value};
use std::io::Cursor;

/// Magic prefix of binary property lists.
const BPLIST_MAGIC: &[u8] = b"bplist00";

/// On-disk encoding of a property list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlistFormat {
    /// XML 1.0 plist (`<?xml ...><plist>`).
    Xml,
    /// Binary plist (`bplist00`).
    Binary,
}

impl PlistFormat {
    /// Detect the encoding of `data` from its header.
    pub fn detect(data: &[u8]) -> Self {
        if data.starts_with(BPLIST_MAGIC) {
            PlistFormat::Binary
        } else {
            PlistFormat::Xml
        }
    }
}

/// Decode a property list, binary or XML.
///
/// # Errors
///
/// Returns [`Error::Format`] if `data` is not a well-formed plist.
pub fn parse(data: &[u8]) -> Result<Value> {
    Value::from_reader(Cursor::new(data)).map_err(|e| Error::Format(format!("Failed to parse plist: {}", e)))
}

/// Decode a property list whose root must be a dictionary.
pub fn parse_dictionary(data: &[u8]) -> Result<Dictionary> {
    match parse(data)? {
        Value::Dictionary(dict) => Ok(dict),
        _ => Err(Error::Format("plist root is not a dictionary".into())),
    }
}

/// Encode a value tree in the requested format.
///
/// Every tree built from strings, integers, reals, booleans, dates, data,
/// arrays and dictionaries is encodable; the only failure source is the
/// underlying writer.
pub fn serialize(value: &Value, format: PlistFormat) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    match format {
        PlistFormat::Xml => value.to_writer_xml(&mut buf)?,
        PlistFormat::Binary => value.to_writer_binary(&mut buf)?,
    }
    Ok(buf)
}

/// Encode a value tree as XML.
pub fn to_xml(value: &Value) -> Result<Vec<u8>> {
    serialize(value, PlistFormat::Xml)
}

/// Convert a JSON document into a plist tree.
///
/// Used for entitlements submitted as JSON text. `null` has no plist
/// counterpart and is rejected, as are integers outside the `i64`/`u64`
/// range.
pub fn from_json(json: &serde_json::Value) -> Result<Value> {
    Ok(match json {
        serde_json::Value::Null => {
            return Err(Error::Format("null is not representable in a plist".into()))
        }
        serde_json::Value::Bool(b) => Value::Boolean(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Integer(i.into())
            } else if let Some(u) = n.as_u64() {
                Value::Integer(u.into())
            } else if let Some(f) = n.as_f64() {
                Value::Real(f)
            } else {
                return Err(Error::Format(format!("unsupported number: {}", n)));
            }
        }
        serde_json::Value::String(s) => Value::String(s.clone()),
        serde_json::Value::Array(items) => {
            Value::Array(items.iter().map(from_json).collect::<Result<Vec<_>>>()?)
        }
        serde_json::Value::Object(map) => {
            let mut dict = Dictionary::new();
            for (key, value) in map {
                dict.insert(key.clone(), from_json(value)?);
            }
            Value::Dictionary(dict)
        }
    })
}

/// Read a string value from a dictionary.
pub fn get_string<'a>(dict: &'a Dictionary, key: &str) -> Option<&'a str> {
    dict.get(key).and_then(Value::as_string)
}

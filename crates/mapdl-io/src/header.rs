//! Key/value decoding of integer header records.
//!
//! MAPDL headers are flat integer records whose layout is documented as an
//! ordered list of symbolic names. Two conventions need care:
//!
//! - a name that occurs more than once (e.g. `DOFS`, `title`) collects the
//!   nonzero values of all its slots into a list;
//! - 64-bit file pointers are split into a low and a high 32-bit word. The
//!   pairs are listed per file type as [`PointerPair`] tables and recombined
//!   after the generic pass.
//!
//! Slots named `0` or `_` are unused positions and never appear in the
//! decoded header.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::error::{MapdlError, Result};

/// One decoded header entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum HeaderValue {
    Int(i64),
    List(Vec<i64>),
}

/// Low/high word names that combine into a 64-bit field `name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerPair {
    pub name: &'static str,
    pub low: &'static str,
    pub high: &'static str,
}

impl PointerPair {
    pub const fn new(name: &'static str, low: &'static str, high: &'static str) -> Self {
        Self { name, low, high }
    }
}

const PLACEHOLDERS: [&str; 2] = ["0", "_"];

/// Combine the two 32-bit halves of a file pointer.
///
/// Both halves are packed big-endian, high word first, and the eight bytes
/// are read back as a signed 64-bit integer.
pub fn two_ints_to_long(low: i32, high: i32) -> i64 {
    let mut bytes = [0u8; 8];
    bytes[..4].copy_from_slice(&(high as u32).to_be_bytes());
    bytes[4..].copy_from_slice(&(low as u32).to_be_bytes());
    i64::from_be_bytes(bytes)
}

/// Split a 64-bit pointer into its `(low, high)` words.
pub fn long_to_two_ints(value: i64) -> (i32, i32) {
    let bytes = value.to_be_bytes();
    let high = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i32;
    let low = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as i32;
    (low, high)
}

/// Decoded header record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Header {
    fields: BTreeMap<String, HeaderValue>,
}

impl Header {
    /// Map `values` onto `keys`. Keys beyond the end of `values` resolve to 0
    /// (older file revisions write shorter headers).
    pub fn parse(values: &[i32], keys: &[&str], pointers: &[PointerPair]) -> Self {
        let mut occurrences: HashMap<&str, usize> = HashMap::new();
        for key in keys {
            *occurrences.entry(*key).or_insert(0) += 1;
        }

        let mut fields = BTreeMap::new();
        for (i, key) in keys.iter().enumerate() {
            let value = values.get(i).copied().map(i64::from).unwrap_or(0);
            let repeated = *key != "0" && occurrences[key] > 1;
            if repeated {
                let entry = fields
                    .entry(key.to_string())
                    .or_insert_with(|| HeaderValue::List(Vec::new()));
                if let HeaderValue::List(list) = entry
                    && value != 0
                {
                    list.push(value);
                }
            } else {
                fields.insert(key.to_string(), HeaderValue::Int(value));
            }
        }

        let mut header = Self { fields };
        for pair in pointers {
            if let (Some(low), Some(high)) = (header.int(pair.low), header.int(pair.high)) {
                let combined = two_ints_to_long(low as i32, high as i32);
                header
                    .fields
                    .insert(pair.name.to_string(), HeaderValue::Int(combined));
            }
        }

        for placeholder in PLACEHOLDERS {
            header.fields.remove(placeholder);
        }
        header
    }

    pub fn get(&self, key: &str) -> Option<&HeaderValue> {
        self.fields.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// Scalar value of `key`, `None` if absent or a list.
    pub fn int(&self, key: &str) -> Option<i64> {
        match self.fields.get(key) {
            Some(HeaderValue::Int(v)) => Some(*v),
            _ => None,
        }
    }

    /// Scalar value of `key`, failing when the layout does not define it.
    pub fn require(&self, key: &str) -> Result<i64> {
        self.int(key)
            .ok_or_else(|| MapdlError::invalid(format!("header field '{key}' is missing")))
    }

    /// Collected values of a repeated key.
    pub fn list(&self, key: &str) -> Option<&[i64]> {
        match self.fields.get(key) {
            Some(HeaderValue::List(v)) => Some(v),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &HeaderValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }
}

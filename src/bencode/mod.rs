//! Bencoding module
//!
//! Implements the bencoding serialization format used by torrent metainfo
//! files and tracker responses: byte strings, integers, lists and
//! dictionaries.

pub mod decoder;
pub mod encoder;

// Re-export main types
pub use decoder::Decoder;
pub use encoder::encode;

use std::collections::BTreeMap;

/// A decoded bencoded value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Byte string (`<len>:<bytes>`)
    Bytes(Vec<u8>),
    /// Integer (`i<decimal>e`)
    Int(i64),
    /// List (`l<items>e`)
    List(Vec<Value>),
    /// Dictionary (`d<key><value>...e`); keys sort lexicographically on encode
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    /// Get the value as an integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get the value as raw bytes
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get the value as a UTF-8 string, if it is one
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// Get the value as a list
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    /// Get the value as a dictionary
    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Look up a dictionary entry by key
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict().and_then(|d| d.get(key))
    }
}

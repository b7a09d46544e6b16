//! Bencode decoder
//!
//! A cursor-based decoder over a byte slice. The cursor position is
//! exposed so callers can note the byte range a value was decoded from,
//! which the metainfo parser needs to hash the `info` dictionary exactly
//! as it appeared on the wire.

use std::collections::BTreeMap;
use std::ops::Range;

use anyhow::Result;
use tracing::trace;

use crate::bencode::Value;
use crate::error::TorrentError;

/// Decoder for bencoded data
pub struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    /// Create a decoder over the given bytes
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current cursor position (bytes consumed so far)
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of bytes left after the cursor
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Decode a single value starting at the cursor
    ///
    /// Trailing bytes beyond the value are left unconsumed; callers that
    /// care can inspect `remaining()` afterwards.
    pub fn decode(&mut self) -> Result<Value> {
        trace!("Decoding bencode value at byte {}", self.pos);
        self.parse_value()
    }

    /// Decode a top-level dictionary, yielding each key together with the
    /// byte range its raw encoded value occupies in the input
    ///
    /// The ranges make it possible to recover the original encoding of a
    /// sub-value byte for byte, without re-encoding.
    pub fn decode_dict_spans(&mut self) -> Result<Vec<(Vec<u8>, Range<usize>)>> {
        if self.peek() != Some(b'd') {
            return Err(TorrentError::bencode_error_at("expected dictionary", self.pos).into());
        }
        self.pos += 1;

        let mut entries = Vec::new();
        loop {
            match self.peek() {
                Some(b'e') => {
                    self.pos += 1;
                    return Ok(entries);
                }
                Some(_) => {
                    let key = self.parse_string()?;
                    let start = self.pos;
                    self.parse_value()?;
                    entries.push((key, start..self.pos));
                }
                None => {
                    return Err(TorrentError::bencode_error_at(
                        "unterminated dictionary",
                        self.pos,
                    )
                    .into())
                }
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.data.get(self.pos).copied()
    }

    fn parse_value(&mut self) -> Result<Value> {
        match self.peek() {
            Some(b'i') => self.parse_int(),
            Some(b'l') => self.parse_list(),
            Some(b'd') => self.parse_dict(),
            Some(b'0'..=b'9') => Ok(Value::Bytes(self.parse_string()?)),
            Some(byte) => Err(TorrentError::bencode_error_at(
                format!("unknown type marker 0x{:02x}", byte),
                self.pos,
            )
            .into()),
            None => Err(TorrentError::bencode_error_at("unexpected end of data", self.pos).into()),
        }
    }

    fn parse_int(&mut self) -> Result<Value> {
        let start = self.pos;
        self.pos += 1; // skip 'i'

        let end = self.data[self.pos..]
            .iter()
            .position(|&b| b == b'e')
            .map(|p| self.pos + p)
            .ok_or_else(|| TorrentError::bencode_error_at("unterminated integer", start))?;

        let digits = &self.data[self.pos..end];
        Self::check_int_digits(digits, start)?;

        let text = std::str::from_utf8(digits)
            .map_err(|_| TorrentError::bencode_error_at("non-ASCII integer", start))?;
        let value: i64 = text
            .parse()
            .map_err(|_| TorrentError::bencode_error_at("integer out of range", start))?;

        self.pos = end + 1;
        Ok(Value::Int(value))
    }

    /// Reject `ie`, `i-e`, `i-0e`, leading zeros and embedded signs
    fn check_int_digits(digits: &[u8], at: usize) -> Result<()> {
        let unsigned = match digits.first() {
            None => return Err(TorrentError::bencode_error_at("empty integer", at).into()),
            Some(b'-') => &digits[1..],
            Some(_) => digits,
        };
        if unsigned.is_empty() {
            return Err(TorrentError::bencode_error_at("sign without digits", at).into());
        }
        if unsigned.iter().any(|b| !b.is_ascii_digit()) {
            return Err(TorrentError::bencode_error_at("non-digit in integer", at).into());
        }
        if unsigned.len() > 1 && unsigned[0] == b'0' {
            return Err(TorrentError::bencode_error_at("leading zero in integer", at).into());
        }
        if digits == b"-0" {
            return Err(TorrentError::bencode_error_at("negative zero", at).into());
        }
        Ok(())
    }

    fn parse_string(&mut self) -> Result<Vec<u8>> {
        let start = self.pos;

        let colon = self.data[self.pos..]
            .iter()
            .position(|&b| b == b':')
            .map(|p| self.pos + p)
            .ok_or_else(|| TorrentError::bencode_error_at("missing colon in string", start))?;

        let len_digits = &self.data[self.pos..colon];
        if len_digits.is_empty() || len_digits.iter().any(|b| !b.is_ascii_digit()) {
            return Err(
                TorrentError::bencode_error_at("non-digit in string length", start).into(),
            );
        }
        let mut length: usize = 0;
        for &digit in len_digits {
            length = length
                .checked_mul(10)
                .and_then(|l| l.checked_add((digit - b'0') as usize))
                .ok_or_else(|| {
                    TorrentError::bencode_error_at("string length out of range", start)
                })?;
        }

        let body = colon + 1;
        if body + length > self.data.len() {
            return Err(TorrentError::bencode_error_at(
                format!("string of {} bytes runs past end of input", length),
                start,
            )
            .into());
        }

        self.pos = body + length;
        Ok(self.data[body..body + length].to_vec())
    }

    fn parse_list(&mut self) -> Result<Value> {
        let start = self.pos;
        self.pos += 1; // skip 'l'

        let mut items = Vec::new();
        loop {
            match self.peek() {
                Some(b'e') => {
                    self.pos += 1;
                    return Ok(Value::List(items));
                }
                Some(_) => items.push(self.parse_value()?),
                None => {
                    return Err(TorrentError::bencode_error_at("unterminated list", start).into())
                }
            }
        }
    }

    fn parse_dict(&mut self) -> Result<Value> {
        let start = self.pos;
        self.pos += 1; // skip 'd'

        let mut dict = BTreeMap::new();
        loop {
            match self.peek() {
                Some(b'e') => {
                    self.pos += 1;
                    return Ok(Value::Dict(dict));
                }
                Some(b'0'..=b'9') => {
                    let key = self.parse_string()?;
                    let value = self.parse_value()?;
                    dict.insert(key, value);
                }
                Some(_) => {
                    return Err(TorrentError::bencode_error_at(
                        "dictionary key must be a string",
                        self.pos,
                    )
                    .into())
                }
                None => {
                    return Err(
                        TorrentError::bencode_error_at("unterminated dictionary", start).into()
                    )
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(data: &[u8]) -> Result<Value> {
        Decoder::new(data).decode()
    }

    #[test]
    fn test_decode_int() {
        assert_eq!(decode(b"i42e").unwrap(), Value::Int(42));
        assert_eq!(decode(b"i0e").unwrap(), Value::Int(0));
        assert_eq!(decode(b"i-17e").unwrap(), Value::Int(-17));
    }

    #[test]
    fn test_decode_int_invalid() {
        assert!(decode(b"ie").is_err());
        assert!(decode(b"i-0e").is_err());
        assert!(decode(b"i03e").is_err());
        assert!(decode(b"i4-2e").is_err());
        assert!(decode(b"i42").is_err());
    }

    #[test]
    fn test_decode_string() {
        assert_eq!(decode(b"4:spam").unwrap(), Value::Bytes(b"spam".to_vec()));
        assert_eq!(decode(b"0:").unwrap(), Value::Bytes(Vec::new()));
    }

    #[test]
    fn test_decode_string_invalid() {
        // Missing colon
        assert!(decode(b"4spam").is_err());
        // Length runs past the input
        assert!(decode(b"9:spam").is_err());
        // Non-digit in length prefix
        assert!(decode(b"4x:spam").is_err());
    }

    #[test]
    fn test_decode_list() {
        let v = decode(b"l4:spam4:eggse").unwrap();
        assert_eq!(
            v,
            Value::List(vec![
                Value::Bytes(b"spam".to_vec()),
                Value::Bytes(b"eggs".to_vec()),
            ])
        );
    }

    #[test]
    fn test_decode_unterminated_containers() {
        assert!(decode(b"l4:spam").is_err());
        assert!(decode(b"d3:cow3:moo").is_err());
    }

    #[test]
    fn test_decode_dict() {
        let v = decode(b"d3:cow3:moo4:spam4:eggse").unwrap();
        assert_eq!(v.get(b"cow").and_then(|e| e.as_str()), Some("moo"));
        assert_eq!(v.get(b"spam").and_then(|e| e.as_str()), Some("eggs"));
    }

    #[test]
    fn test_decode_dict_non_string_key() {
        assert!(decode(b"di1e3:mooe").is_err());
    }

    #[test]
    fn test_decode_nested() {
        let v = decode(b"d3:cow3:moo4:spaml1:a1:bee").unwrap();
        assert_eq!(v.get(b"cow").and_then(|e| e.as_str()), Some("moo"));
        let spam = v.get(b"spam").and_then(|e| e.as_list()).unwrap();
        assert_eq!(spam.len(), 2);
        assert_eq!(spam[0].as_str(), Some("a"));
        assert_eq!(spam[1].as_str(), Some("b"));
    }

    #[test]
    fn test_trailing_bytes_reported() {
        let mut decoder = Decoder::new(b"i42extra");
        decoder.decode().unwrap();
        assert_eq!(decoder.remaining(), 5);
    }

    #[test]
    fn test_dict_spans_recover_raw_bytes() {
        let data: &[u8] = b"d8:announce3:url4:infod4:name1:x6:lengthi5eee";
        let spans = Decoder::new(data).decode_dict_spans().unwrap();

        let (key, range) = &spans[1];
        assert_eq!(key.as_slice(), b"info");
        assert_eq!(&data[range.clone()], b"d4:name1:x6:lengthi5ee");

        // The recovered slice is itself decodable
        let inner = Decoder::new(&data[range.clone()]).decode().unwrap();
        assert_eq!(inner.get(b"length").and_then(|v| v.as_int()), Some(5));
    }

    #[test]
    fn test_dict_spans_rejects_non_dict() {
        assert!(Decoder::new(b"i42e").decode_dict_spans().is_err());
        assert!(Decoder::new(b"d3:key").decode_dict_spans().is_err());
    }
}

//! Bencode encoder
//!
//! Produces canonical bencoding: dictionary keys are emitted in
//! lexicographic order (the `BTreeMap` iteration order), so encoding a
//! decoded value reproduces the bytes of any well-formed input.

use crate::bencode::Value;

/// Encode a value to its bencoded byte form
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(value, &mut out);
    out
}

fn write_value(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Bytes(bytes) => write_bytes(bytes, out),
        Value::Int(i) => {
            out.push(b'i');
            out.extend_from_slice(i.to_string().as_bytes());
            out.push(b'e');
        }
        Value::List(items) => {
            out.push(b'l');
            for item in items {
                write_value(item, out);
            }
            out.push(b'e');
        }
        Value::Dict(dict) => {
            out.push(b'd');
            for (key, item) in dict {
                write_bytes(key, out);
                write_value(item, out);
            }
            out.push(b'e');
        }
    }
}

fn write_bytes(bytes: &[u8], out: &mut Vec<u8>) {
    out.extend_from_slice(bytes.len().to_string().as_bytes());
    out.push(b':');
    out.extend_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::Decoder;

    fn round_trip(data: &[u8]) {
        let value = Decoder::new(data).decode().unwrap();
        assert_eq!(encode(&value), data);
    }

    #[test]
    fn test_encode_int() {
        assert_eq!(encode(&Value::Int(42)), b"i42e");
        assert_eq!(encode(&Value::Int(0)), b"i0e");
        assert_eq!(encode(&Value::Int(-7)), b"i-7e");
    }

    #[test]
    fn test_encode_bytes() {
        assert_eq!(encode(&Value::Bytes(b"spam".to_vec())), b"4:spam");
        assert_eq!(encode(&Value::Bytes(Vec::new())), b"0:");
    }

    #[test]
    fn test_encode_sorts_dict_keys() {
        let mut dict = std::collections::BTreeMap::new();
        dict.insert(b"zebra".to_vec(), Value::Int(1));
        dict.insert(b"apple".to_vec(), Value::Int(2));
        assert_eq!(encode(&Value::Dict(dict)), b"d5:applei2e5:zebrai1ee");
    }

    #[test]
    fn test_round_trip_sample() {
        // decode(encode(v)) == v, and re-encoding reproduces the bytes
        round_trip(b"d3:cow3:moo4:spaml1:a1:bee");
    }

    #[test]
    fn test_round_trip_nested() {
        round_trip(b"d1:ad2:idi9e4:listli1ei2eee1:z0:e");
        round_trip(b"lli1eeld1:ki0eeee");
    }
}

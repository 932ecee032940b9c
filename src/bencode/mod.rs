//! A minimal bencode codec.
//!
//! Rather than going through a serde `Deserializer`/`Serializer` (which
//! forces bencode's three-kind-of-string-key dictionaries through a
//! self-describing JSON-shaped detour), metainfo and tracker parsing walk a
//! tagged [`Value`] directly and extract the fields they need by hand. This
//! mirrors the shape of the bencode decoders found throughout the
//! BitTorrent ecosystem: a handful of recursive-descent functions over a
//! byte slice, and a value type with one variant per bencode kind.

use std::collections::BTreeMap;
use std::fmt;

/// A decoded bencode value.
///
/// Dictionary keys are bencode byte strings, so they're kept as `Vec<u8>`
/// rather than `String`: nothing in the format guarantees UTF-8 keys, even
/// though in practice torrent files only ever use ASCII ones.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    Int(i64),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    /// Returns the raw bytes if this is a `Bytes` value.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the integer if this is an `Int` value.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the list if this is a `List` value.
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    /// Returns the dict if this is a `Dict` value.
    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Self::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Looks up `key` in this value's dict, or returns `None` if this isn't
    /// a dict or the key is absent.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_dict()?.get(key.as_bytes())
    }
}

/// An error encountered while decoding a bencode byte stream.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// The input ended before a value was fully parsed.
    UnexpectedEof,
    /// A byte string's declared length was not followed by a `:`, or its
    /// length prefix wasn't a valid non-negative decimal integer.
    InvalidString,
    /// An `i...e` integer wasn't a valid decimal integer.
    InvalidInteger,
    /// A dictionary key was not a byte string.
    NonStringDictKey,
    /// Dictionary keys weren't in sorted order, as BEP 3 requires.
    UnsortedDictKeys,
    /// The leading byte didn't match any bencode value tag.
    UnknownTag(u8),
    /// The input contained trailing bytes after a single top-level value.
    TrailingData,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected end of input"),
            Self::InvalidString => write!(f, "malformed byte string"),
            Self::InvalidInteger => write!(f, "malformed integer"),
            Self::NonStringDictKey => write!(f, "dictionary key is not a string"),
            Self::UnsortedDictKeys => write!(f, "dictionary keys are not sorted"),
            Self::UnknownTag(b) => write!(f, "unknown value tag: {:#04x}", b),
            Self::TrailingData => write!(f, "trailing data after top-level value"),
        }
    }
}

impl std::error::Error for DecodeError {}

/// Decodes a single bencoded value from `data`.
///
/// Returns an error if the input contains anything other than exactly one
/// top-level value.
pub fn decode(data: &[u8]) -> Result<Value, DecodeError> {
    let (value, rest_index) = decode_value(data, 0)?;
    if rest_index != data.len() {
        return Err(DecodeError::TrailingData);
    }
    Ok(value)
}

fn decode_value(data: &[u8], index: usize) -> Result<(Value, usize), DecodeError> {
    match data.get(index).copied().ok_or(DecodeError::UnexpectedEof)? {
        b'i' => decode_int(data, index),
        b'l' => decode_list(data, index),
        b'd' => decode_dict(data, index),
        b'0'..=b'9' => decode_bytes(data, index),
        other => Err(DecodeError::UnknownTag(other)),
    }
}

fn decode_bytes(data: &[u8], index: usize) -> Result<(Value, usize), DecodeError> {
    let colon = find(data, index, b':').ok_or(DecodeError::InvalidString)?;
    let len_str =
        std::str::from_utf8(&data[index..colon]).map_err(|_| DecodeError::InvalidString)?;
    let len: usize = len_str.parse().map_err(|_| DecodeError::InvalidString)?;
    let start = colon + 1;
    let end = start.checked_add(len).ok_or(DecodeError::InvalidString)?;
    let bytes = data.get(start..end).ok_or(DecodeError::UnexpectedEof)?;
    Ok((Value::Bytes(bytes.to_vec()), end))
}

fn decode_int(data: &[u8], index: usize) -> Result<(Value, usize), DecodeError> {
    debug_assert_eq!(data[index], b'i');
    let start = index + 1;
    let end = find(data, start, b'e').ok_or(DecodeError::InvalidInteger)?;
    let num_str =
        std::str::from_utf8(&data[start..end]).map_err(|_| DecodeError::InvalidInteger)?;
    // reject leading zeroes and "-0", per BEP 3, but allow a bare "0"
    if num_str.is_empty()
        || (num_str.starts_with('0') && num_str != "0")
        || (num_str.starts_with("-0"))
    {
        return Err(DecodeError::InvalidInteger);
    }
    let num: i64 = num_str.parse().map_err(|_| DecodeError::InvalidInteger)?;
    Ok((Value::Int(num), end + 1))
}

fn decode_list(data: &[u8], index: usize) -> Result<(Value, usize), DecodeError> {
    debug_assert_eq!(data[index], b'l');
    let mut items = Vec::new();
    let mut i = index + 1;
    loop {
        match data.get(i).copied().ok_or(DecodeError::UnexpectedEof)? {
            b'e' => return Ok((Value::List(items), i + 1)),
            _ => {
                let (value, next) = decode_value(data, i)?;
                items.push(value);
                i = next;
            }
        }
    }
}

fn decode_dict(data: &[u8], index: usize) -> Result<(Value, usize), DecodeError> {
    debug_assert_eq!(data[index], b'd');
    let mut dict = BTreeMap::new();
    let mut prev_key: Option<Vec<u8>> = None;
    let mut i = index + 1;
    loop {
        match data.get(i).copied().ok_or(DecodeError::UnexpectedEof)? {
            b'e' => return Ok((Value::Dict(dict), i + 1)),
            _ => {
                let (key, next) = decode_value(data, i)?;
                let key = match key {
                    Value::Bytes(b) => b,
                    _ => return Err(DecodeError::NonStringDictKey),
                };
                if let Some(prev) = &prev_key {
                    if key <= *prev {
                        return Err(DecodeError::UnsortedDictKeys);
                    }
                }
                prev_key = Some(key.clone());
                let (value, next) = decode_value(data, next)?;
                dict.insert(key, value);
                i = next;
            }
        }
    }
}

fn find(data: &[u8], from: usize, needle: u8) -> Option<usize> {
    data[from..].iter().position(|&b| b == needle).map(|p| p + from)
}

/// Encodes `value` into its canonical bencode byte representation.
///
/// Dictionaries are backed by a `BTreeMap`, so their keys are always
/// emitted in sorted order, which is what BEP 3 requires for the `info`
/// dict's hash to be reproducible across encoders.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    encode_into(value, &mut out);
    out
}

fn encode_into(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Int(n) => {
            out.push(b'i');
            out.extend_from_slice(n.to_string().as_bytes());
            out.push(b'e');
        }
        Value::Bytes(b) => {
            out.extend_from_slice(b.len().to_string().as_bytes());
            out.push(b':');
            out.extend_from_slice(b);
        }
        Value::List(items) => {
            out.push(b'l');
            for item in items {
                encode_into(item, out);
            }
            out.push(b'e');
        }
        Value::Dict(dict) => {
            out.push(b'd');
            for (key, value) in dict {
                encode_into(&Value::Bytes(key.clone()), out);
                encode_into(value, out);
            }
            out.push(b'e');
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dict(pairs: Vec<(&str, Value)>) -> Value {
        let mut d = BTreeMap::new();
        for (k, v) in pairs {
            d.insert(k.as_bytes().to_vec(), v);
        }
        Value::Dict(d)
    }

    #[test]
    fn decodes_string() {
        assert_eq!(decode(b"4:spam").unwrap(), Value::Bytes(b"spam".to_vec()));
    }

    #[test]
    fn decodes_empty_string() {
        assert_eq!(decode(b"0:").unwrap(), Value::Bytes(Vec::new()));
    }

    #[test]
    fn decodes_positive_and_negative_integers() {
        assert_eq!(decode(b"i3e").unwrap(), Value::Int(3));
        assert_eq!(decode(b"i-3e").unwrap(), Value::Int(-3));
        assert_eq!(decode(b"i0e").unwrap(), Value::Int(0));
    }

    #[test]
    fn rejects_leading_zero_integer() {
        assert_eq!(decode(b"i03e").unwrap_err(), DecodeError::InvalidInteger);
        assert_eq!(decode(b"i-0e").unwrap_err(), DecodeError::InvalidInteger);
    }

    #[test]
    fn decodes_list() {
        assert_eq!(
            decode(b"l4:spam4:eggse").unwrap(),
            Value::List(vec![
                Value::Bytes(b"spam".to_vec()),
                Value::Bytes(b"eggs".to_vec()),
            ])
        );
    }

    #[test]
    fn decodes_dict_and_round_trips() {
        // the literal example: a dict with keys "foo" -> "bar" and "hello" -> 52
        let data: &[u8] = b"d3:foo3:bar5:helloi52ee";
        let value = decode(data).unwrap();
        assert_eq!(
            value,
            dict(vec![
                ("foo", Value::Bytes(b"bar".to_vec())),
                ("hello", Value::Int(52)),
            ])
        );
        assert_eq!(encode(&value), data);
    }

    #[test]
    fn rejects_unsorted_dict_keys() {
        // "hello" sorts after "foo"; swapping the order is invalid
        let data: &[u8] = b"d5:helloi52e3:foo3:bare";
        assert_eq!(decode(data).unwrap_err(), DecodeError::UnsortedDictKeys);
    }

    #[test]
    fn rejects_trailing_data() {
        assert_eq!(decode(b"i1ei2e").unwrap_err(), DecodeError::TrailingData);
    }

    #[test]
    fn rejects_non_string_dict_key() {
        assert_eq!(
            decode(b"di1ei2ee").unwrap_err(),
            DecodeError::NonStringDictKey
        );
    }

    #[test]
    fn get_looks_up_dict_field() {
        let value = dict(vec![("hello", Value::Int(52))]);
        assert_eq!(value.get("hello"), Some(&Value::Int(52)));
        assert_eq!(value.get("missing"), None);
    }
}

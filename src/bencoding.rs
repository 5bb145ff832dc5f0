use std::collections::HashMap;
use std::fmt;

use crate::util::force_string;

type IndexOfError = usize;

#[derive(PartialEq, Debug, Clone)]
pub enum ErrorElem {
    Unknown,
    Str,
    Int,
    List,
    Dict,
}

#[derive(PartialEq, Debug, Clone)]
pub struct ParseError {
    pub elem: ErrorElem,
    pub index: IndexOfError,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "invalid bencoded {:?} element at byte {}",
            self.elem, self.index
        )
    }
}

impl std::error::Error for ParseError {}

#[derive(PartialEq, Debug, Clone)]
pub enum Value {
    Error(ParseError),
    Str(Vec<u8>),
    Int(i64),
    List(Vec<Value>),
    Dict(HashMap<Vec<u8>, Value>, usize, usize), // dict, start idx in source, end idx in source (exclusive)
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Error(e) => write!(f, "{e}"),
            Value::Str(s) => write!(f, "\"{}\"", force_string(s)),
            Value::Int(i) => write!(f, "{i}"),
            Value::List(l) => {
                let elems = l
                    .iter()
                    .map(|v| v.to_string())
                    .collect::<Vec<String>>()
                    .join(", ");
                write!(f, "[{elems}]")
            }
            Value::Dict(d, _, _) => {
                let mut keys: Vec<&Vec<u8>> = d.keys().collect();
                keys.sort();
                let elems = keys
                    .iter()
                    .map(|k| format!("\"{}\": {}", force_string(k), d[*k]))
                    .collect::<Vec<String>>()
                    .join(", ");
                write!(f, "{{{elems}}}")
            }
        }
    }
}

impl Value {
    fn new_error(elem: ErrorElem, index: IndexOfError) -> Self {
        Value::Error(ParseError { elem, index })
    }

    // dictionary keys are written in sorted order, as the encoding requires
    #[cfg(test)]
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Value::Error(_) => b"!!!error!!!".to_vec(),
            Value::Str(s) => encode_string(s),
            Value::Int(i) => format!("i{}e", i).into_bytes(),
            Value::List(l) => {
                let mut buf = vec![b'l'];
                for v in l {
                    buf.extend(v.encode());
                }
                buf.push(b'e');
                buf
            }
            Value::Dict(d, _, _) => {
                let mut keys: Vec<&Vec<u8>> = d.keys().collect();
                keys.sort();
                let mut buf = vec![b'd'];
                for k in keys {
                    buf.extend(encode_string(k));
                    buf.extend(d[k].encode());
                }
                buf.push(b'e');
                buf
            }
        }
    }

    pub fn new(source: &[u8]) -> Self {
        let (value, next) = Self::from_bytes(source, 0);
        if let Value::Error(_) = value {
            return value;
        }
        if next != source.len() {
            return Value::new_error(ErrorElem::Unknown, next);
        }
        value
    }

    // source is the source data
    // index is where to look from the source
    // return Value, index of next byte to read
    fn from_bytes(source: &[u8], index: usize) -> (Self, usize) {
        match source.get(index) {
            Some(b'0'..=b'9') => Value::parse_str(source, index),
            Some(b'i') => Value::parse_int(source, index),
            Some(b'l') => Value::parse_list(source, index),
            Some(b'd') => Value::parse_dict(source, index),
            _ => (Value::new_error(ErrorElem::Unknown, index), index),
        }
    }

    fn parse_str(source: &[u8], index: usize) -> (Self, usize) {
        let start_len_index = index;
        let mut index = index;
        loop {
            match source.get(index) {
                Some(b'0'..=b'9') => index += 1,
                Some(b':') => break,
                _ => return (Value::new_error(ErrorElem::Str, index), index),
            }
        }
        let string_len = match std::str::from_utf8(&source[start_len_index..index])
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
        {
            Some(len) => len,
            None => return (Value::new_error(ErrorElem::Str, start_len_index), index),
        };
        let start_string_index = index + 1;
        let end_string_index = match start_string_index.checked_add(string_len) {
            Some(end) if end <= source.len() => end,
            _ => return (Value::new_error(ErrorElem::Str, start_len_index), index),
        };
        (
            Value::Str(source[start_string_index..end_string_index].to_vec()),
            end_string_index,
        )
    }

    fn parse_int(source: &[u8], index: usize) -> (Self, usize) {
        let start_int_index = index + 1;
        let mut index = start_int_index;
        loop {
            match source.get(index) {
                Some(b'0'..=b'9' | b'-') => index += 1,
                Some(b'e') => break,
                _ => return (Value::new_error(ErrorElem::Int, index), index),
            }
        }
        let int_bytes = &source[start_int_index..index];

        // check invalid
        if int_bytes == b"-0" || (int_bytes.starts_with(b"0") && int_bytes.len() > 1) {
            return (Value::new_error(ErrorElem::Int, start_int_index), index);
        }

        match std::str::from_utf8(int_bytes)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
        {
            Some(int_val) => (Value::Int(int_val), index + 1),
            None => (Value::new_error(ErrorElem::Int, start_int_index), index),
        }
    }

    fn parse_list(source: &[u8], index: usize) -> (Self, usize) {
        let mut l = Vec::new();
        let mut index = index + 1;
        loop {
            match source.get(index) {
                None => return (Value::new_error(ErrorElem::List, index), index),
                Some(b'e') => {
                    index += 1;
                    break;
                }
                _ => {
                    let (v, new_index) = Self::from_bytes(source, index);
                    if let Value::Error(_) = v {
                        return (v, index);
                    }
                    index = new_index;
                    l.push(v);
                }
            }
        }
        (Value::List(l), index)
    }

    fn parse_dict(source: &[u8], index: usize) -> (Self, usize) {
        let start_dict_index = index;
        let mut d = HashMap::new();
        let mut index = index + 1;
        loop {
            match source.get(index) {
                None => return (Value::new_error(ErrorElem::Dict, index), index),
                Some(b'e') => {
                    index += 1;
                    break;
                }
                _ => {
                    let (k, new_index) = Self::from_bytes(source, index);
                    let Value::Str(k) = k else {
                        return (Value::new_error(ErrorElem::Dict, index), index);
                    };
                    index = new_index;
                    let (v, new_index) = Self::from_bytes(source, index);
                    if let Value::Error(_) = v {
                        return (v, index);
                    }
                    index = new_index;
                    d.insert(k, v);
                }
            }
        }
        (Value::Dict(d, start_dict_index, index), index)
    }
}

#[cfg(test)]
fn encode_string(s: &[u8]) -> Vec<u8> {
    let mut buf = format!("{}:", s.len()).into_bytes();
    buf.extend_from_slice(s);
    buf
}

#[cfg(test)]
mod tests {
    use super::{ErrorElem, ParseError, Value};
    use std::collections::HashMap;

    fn dict(entries: Vec<(&[u8], Value)>, start: usize, end: usize) -> Value {
        Value::Dict(
            entries.into_iter().map(|(k, v)| (k.to_vec(), v)).collect(),
            start,
            end,
        )
    }

    #[test]
    fn encode_value() {
        let val_l = Value::List(vec![
            dict(vec![(b"k1", Value::Int(1))], 0, 0),
            Value::Int(2),
            Value::Int(3),
            Value::Str(b"bye".to_vec()),
        ]);
        assert_eq!(b"ld2:k1i1eei2ei3e3:byee".to_vec(), val_l.encode());
    }

    #[test]
    fn encode_dict_sorts_keys() {
        let val = dict(
            vec![(b"zz", Value::Int(1)), (b"aa", Value::Int(2))],
            0,
            0,
        );
        assert_eq!(b"d2:aai2e2:zzi1ee".to_vec(), val.encode());
    }

    #[test]
    fn decode_int() {
        assert_eq!(Value::new(b"i2e"), Value::Int(2));
        assert_eq!(Value::new(b"i23e"), Value::Int(23));
        assert_eq!(Value::new(b"i-2312e"), Value::Int(-2312));
        assert_eq!(Value::new(b"i0e"), Value::Int(0));
        assert_eq!(
            Value::new(b"i-0e"),
            Value::Error(ParseError {
                elem: ErrorElem::Int,
                index: 1
            })
        );
        assert_eq!(
            Value::new(b"i01e"),
            Value::Error(ParseError {
                elem: ErrorElem::Int,
                index: 1
            })
        );
        assert_matches!(Value::new(b"ie"), Value::Error(_));
    }

    #[test]
    fn decode_str() {
        assert_eq!(Value::new(b"5:hello"), Value::Str(b"hello".to_vec()));
        assert_eq!(Value::new(b"0:"), Value::Str(vec![]));
        assert_eq!(
            Value::new(b"6:hello"),
            Value::Error(ParseError {
                elem: ErrorElem::Str,
                index: 0
            })
        );
    }

    #[test]
    fn decode_binary_str() {
        assert_eq!(
            Value::new(&[b'3', b':', 0xff, 0x00, 0x13]),
            Value::Str(vec![0xff, 0x00, 0x13])
        );
    }

    #[test]
    fn decode_list() {
        let val_l = Value::List(vec![
            Value::Str(b"bye".to_vec()),
            Value::Str(b"hello".to_vec()),
        ]);
        assert_eq!(Value::new(b"l3:bye5:helloe"), val_l);
    }

    #[test]
    fn decode_nested_list() {
        let val_l = Value::List(vec![
            dict(vec![(b"k1", Value::Int(1))], 1, 10),
            Value::Int(2),
            Value::Int(3),
            Value::Str(b"bye".to_vec()),
        ]);
        assert_eq!(Value::new(b"ld2:k1i1eei2ei3e3:byee"), val_l);
    }

    #[test]
    fn decode_dict() {
        let val = dict(
            vec![
                (
                    b"k1",
                    Value::List(vec![
                        Value::Int(0),
                        Value::Str(b"hello".to_vec()),
                        Value::Str(vec![]),
                    ]),
                ),
                (b"k2", Value::Str(b"e3".to_vec())),
            ],
            0,
            28,
        );
        assert_eq!(Value::new(b"d2:k1li0e5:hello0:e2:k22:e3e"), val);
    }

    #[test]
    fn decode_dict_records_inner_span() {
        let source = b"d4:infod1:ai1eee";
        assert_matches!(Value::new(source), Value::Dict(outer, 0, 16) => {
            assert_matches!(outer.get(&b"info".to_vec()), Some(Value::Dict(inner, s, e)) => {
                assert_eq!(inner, &HashMap::from([(b"a".to_vec(), Value::Int(1))]));
                assert_eq!(&source[*s..*e], b"d1:ai1ee");
            });
        });
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        assert_matches!(Value::new(b"i1ei2e"), Value::Error(ParseError { elem: ErrorElem::Unknown, index: 3 }));
    }

    #[test]
    fn decode_rejects_unterminated() {
        assert_matches!(Value::new(b"l3:bye"), Value::Error(ParseError { elem: ErrorElem::List, .. }));
        assert_matches!(Value::new(b"d3:bye"), Value::Error(_));
        assert_matches!(Value::new(b"di1ei2ee"), Value::Error(ParseError { elem: ErrorElem::Dict, .. }));
    }
}

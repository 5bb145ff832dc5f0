use std::collections::HashMap;
use std::{fmt, str};

use anyhow::{bail, Result};
use sha1::{Digest, Sha1};
use size::{Size, Style};

use crate::{bencoding::Value, util::pretty_info_hash};

#[derive(PartialEq, Debug, Clone)]
pub struct Metainfo {
    pub announce: String,      // tracker url
    pub info_hash: [u8; 20],   // 20-byte SHA1 hash of the value of the info key from the Metainfo file
    pub pieces: Vec<[u8; 20]>, // 20-byte SHA1 of each piece
    pub piece_length: u64,     // number of bytes in each piece, the last one can be shorter
    pub length: u64,           // length of the file in bytes
    pub name: String,          // the filename, purely advisory
}

impl fmt::Display for Metainfo {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "name: {}\nannounce: {}\nlength: {}\npiece_length: {}\nn. pieces: {}\ninfo_hash: {}",
            self.name,
            self.announce,
            Size::from_bytes(self.length)
                .format()
                .with_style(Style::Abbreviated),
            Size::from_bytes(self.piece_length)
                .format()
                .with_style(Style::Abbreviated),
            self.pieces.len(),
            pretty_info_hash(self.info_hash),
        )
    }
}

impl Metainfo {
    pub fn new(source: &[u8]) -> Result<Self> {
        let torrent_map = match Value::new(source) {
            Value::Dict(m, _, _) => m,
            Value::Error(e) => bail!("The .torrent file is not valid bencode: {e}"),
            _ => bail!("The .torrent file is invalid: it does not contain a dict"),
        };

        let announce = get_announce(&torrent_map)?;

        // info dict
        let (info_dict, info_hash) = match torrent_map.get(&b"info".to_vec()) {
            Some(Value::Dict(a, s, e)) => (a, Sha1::digest(&source[*s..*e]).into()),
            _ => bail!("The .torrent file does not contain a valid \"info\""),
        };

        let name = match info_dict.get(&b"name".to_vec()) {
            Some(Value::Str(name_vec)) => match str::from_utf8(name_vec) {
                Ok(a) => a.to_string(),
                _ => bail!("The .torrent file \"info.name\" kv is not an UTF8 string"),
            },
            _ => bail!("The .torrent file does not contain a valid \"info.name\""),
        };

        let piece_length = match info_dict.get(&b"piece length".to_vec()) {
            Some(Value::Int(a)) => *a,
            _ => bail!("The .torrent file does not contain a valid \"info.piece length\""),
        };
        if piece_length <= 0 || piece_length > u32::MAX as i64 {
            bail!("The .torrent file \"info.piece length\" kv must be > 0 and fit in 32 bits");
        }
        let piece_length = piece_length as u64;

        let pieces = match info_dict.get(&b"pieces".to_vec()) {
            Some(Value::Str(pieces_byte_vec)) => {
                if pieces_byte_vec.len() % 20 != 0 {
                    bail!(
                        "The .torrent file contains \"info.pieces\" that is not a string of length divisible by 20"
                    );
                }
                pieces_byte_vec
                    .chunks_exact(20)
                    .map(|chunk| {
                        let mut piece: [u8; 20] = [0; 20];
                        piece.copy_from_slice(chunk);
                        piece
                    })
                    .collect::<Vec<[u8; 20]>>()
            }
            _ => bail!("The .torrent file does not contain a valid \"info.pieces\""),
        };

        if info_dict.contains_key(&b"files".to_vec()) {
            bail!("The .torrent file describes multiple files, only single file torrents are supported");
        }
        let length = match info_dict.get(&b"length".to_vec()) {
            Some(Value::Int(a)) if *a >= 0 => *a as u64,
            Some(Value::Int(_)) => bail!("The .torrent file \"info.length\" kv cannot be < 0"),
            _ => bail!("The .torrent file does not contain a valid \"info.length\""),
        };

        let expected_pieces = length.div_ceil(piece_length);
        if pieces.len() as u64 != expected_pieces {
            bail!(
                "The .torrent file has {} piece hashes but {} pieces are needed for {} bytes",
                pieces.len(),
                expected_pieces,
                length
            );
        }
        if pieces.len() > u32::MAX as usize {
            bail!("The .torrent file has too many pieces");
        }

        Ok(Metainfo {
            announce,
            info_hash,
            pieces,
            piece_length,
            length,
            name,
        })
    }

    // byte range [begin, end) of the piece in the file
    pub fn piece_bounds(&self, index: u32) -> (usize, usize) {
        let begin = index as u64 * self.piece_length;
        let end = (begin + self.piece_length).min(self.length);
        (begin as usize, end as usize)
    }

    pub fn piece_size(&self, index: u32) -> u32 {
        let (begin, end) = self.piece_bounds(index);
        (end - begin) as u32
    }
}

// the first url of the first announce-list tier, else announce
fn get_announce(torrent_map: &HashMap<Vec<u8>, Value>) -> Result<String> {
    if let Some(announce_list) = torrent_map.get(&b"announce-list".to_vec()) {
        let first = match announce_list {
            Value::List(tiers) => match tiers.first() {
                Some(Value::List(tier)) => tier.first(),
                Some(_) => bail!("The .torrent file \"announce-list\" does not contain a list of lists"),
                None => None,
            },
            _ => bail!("The .torrent file has a \"announce-list\" field but it does not contain a list"),
        };
        match first {
            Some(Value::Str(announce_vec)) => match str::from_utf8(announce_vec) {
                Ok(a) => return Ok(a.to_string()),
                _ => bail!("The .torrent file \"announce-list\" has an element that is not an UTF-8 string"),
            },
            Some(_) => bail!("The .torrent file \"announce-list\" has an element that is not a string"),
            None => {}
        }
    }

    match torrent_map.get(&b"announce".to_vec()) {
        Some(Value::Str(announce_vec)) => match str::from_utf8(announce_vec) {
            Ok(a) => Ok(a.to_string()),
            _ => bail!("The .torrent file \"announce\" is not an UTF8 string"),
        },
        _ => bail!("The .torrent file does not contain a tracker \"announce\" url"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Value {
        Value::Str(v.as_bytes().to_vec())
    }

    fn dict(entries: Vec<(&str, Value)>) -> Value {
        Value::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (k.as_bytes().to_vec(), v))
                .collect(),
            0,
            0,
        )
    }

    fn info(length: i64, piece_length: i64, num_hashes: usize) -> Vec<(&'static str, Value)> {
        vec![
            ("name", s("debian.iso")),
            ("length", Value::Int(length)),
            ("piece length", Value::Int(piece_length)),
            ("pieces", Value::Str(vec![0xab; 20 * num_hashes])),
        ]
    }

    fn torrent(info_entries: Vec<(&str, Value)>) -> Vec<u8> {
        dict(vec![
            ("announce", s("http://tracker.example/announce")),
            ("info", dict(info_entries)),
        ])
        .encode()
    }

    #[test]
    fn parse_single_file_torrent() {
        let info_bytes = dict(info(100, 40, 3)).encode();
        let source = torrent(info(100, 40, 3));
        let metainfo = Metainfo::new(&source).unwrap();

        let expected_hash: [u8; 20] = Sha1::digest(&info_bytes).into();
        assert_eq!(
            metainfo,
            Metainfo {
                announce: "http://tracker.example/announce".to_string(),
                info_hash: expected_hash,
                pieces: vec![[0xab; 20]; 3],
                piece_length: 40,
                length: 100,
                name: "debian.iso".to_string(),
            }
        );
    }

    #[test]
    fn info_hash_covers_original_bytes() {
        // keys out of order: re-encoding would change the bytes, the hash must not
        let info_bytes = b"d4:name1:a6:lengthi10e6:pieces20:aaaaaaaaaaaaaaaaaaaa12:piece lengthi10ee";
        let mut source = b"d8:announce3:url4:info".to_vec();
        source.extend_from_slice(info_bytes);
        source.push(b'e');

        let metainfo = Metainfo::new(&source).unwrap();
        let expected_hash: [u8; 20] = Sha1::digest(info_bytes).into();
        assert_eq!(metainfo.info_hash, expected_hash);
    }

    #[test]
    fn announce_list_has_precedence() {
        let source = dict(vec![
            ("announce", s("http://fallback/announce")),
            (
                "announce-list",
                Value::List(vec![
                    Value::List(vec![s("http://first/announce"), s("http://second/announce")]),
                    Value::List(vec![s("http://third/announce")]),
                ]),
            ),
            ("info", dict(info(10, 10, 1))),
        ])
        .encode();
        assert_eq!(
            Metainfo::new(&source).unwrap().announce,
            "http://first/announce"
        );
    }

    #[test]
    fn reject_multi_file_torrent() {
        let mut entries = info(10, 10, 1);
        entries.push(("files", Value::List(vec![])));
        assert!(Metainfo::new(&torrent(entries)).is_err());
    }

    #[test]
    fn reject_piece_count_mismatch() {
        assert!(Metainfo::new(&torrent(info(100, 40, 2))).is_err());
        assert!(Metainfo::new(&torrent(info(100, 40, 4))).is_err());
    }

    #[test]
    fn reject_invalid_piece_length() {
        assert!(Metainfo::new(&torrent(info(100, 0, 3))).is_err());
        assert!(Metainfo::new(&torrent(info(100, -40, 3))).is_err());
    }

    #[test]
    fn reject_missing_announce() {
        let source = dict(vec![("info", dict(info(10, 10, 1)))]).encode();
        assert!(Metainfo::new(&source).is_err());
    }

    #[test]
    fn reject_malformed_input() {
        assert!(Metainfo::new(b"d8:announce").is_err());
        assert!(Metainfo::new(b"i42e").is_err());
    }

    #[test]
    fn empty_file_has_no_pieces() {
        let metainfo = Metainfo::new(&torrent(info(0, 16, 0))).unwrap();
        assert!(metainfo.pieces.is_empty());
        assert_eq!(metainfo.length, 0);
    }

    #[test]
    fn piece_bounds_clamp_last_piece() {
        let metainfo = Metainfo::new(&torrent(info(100, 40, 3))).unwrap();
        assert_eq!(metainfo.piece_bounds(0), (0, 40));
        assert_eq!(metainfo.piece_bounds(1), (40, 80));
        assert_eq!(metainfo.piece_bounds(2), (80, 100));
        assert_eq!(metainfo.piece_size(1), 40);
        assert_eq!(metainfo.piece_size(2), 20);
    }
}

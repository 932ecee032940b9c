//! Parsing of `.torrent` metainfo files.
//!
//! `Metainfo::from_bytes` walks a decoded [`crate::bencode::Value`] by hand
//! instead of going through a derived `Deserialize` impl: bencode's
//! dictionaries don't map cleanly onto serde's self-describing data model
//! (see the design note on this), so extraction is just a handful of
//! `Value::get` calls, each failing with a specific `Error::Metainfo(field)`.

use std::convert::TryInto;

use sha1::{Digest, Sha1};

use crate::bencode::{self, Value};
use crate::error::{Error, Result};
use crate::Sha1Hash;

/// A parsed `.torrent` file: where to announce, and the single file this
/// engine will download.
#[derive(Debug, Clone)]
pub struct Metainfo {
    /// The tracker's announce URL.
    pub announce: String,
    pub info: Info,
}

/// The `info` dictionary of a metainfo file, restricted to the single-file
/// form (BEP 3's `length` key, not the multi-file `files` list).
#[derive(Debug, Clone)]
pub struct Info {
    /// The suggested file name.
    pub name: String,
    /// The length, in bytes, of each piece (except possibly the last).
    pub piece_length: u32,
    /// The concatenation of the SHA-1 hash of each piece, 20 bytes apiece.
    pub pieces: Vec<Sha1Hash>,
    /// The total length of the file in bytes.
    pub length: u64,
    /// The raw bencoded `info` dict, kept around so the info-hash can be
    /// recomputed without re-encoding field by field.
    raw: Vec<u8>,
}

impl Metainfo {
    /// Parses a metainfo file from its raw bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        let value = bencode::decode(buf)?;
        Self::from_value(&value)
    }

    fn from_value(value: &Value) -> Result<Self> {
        let announce = value
            .get("announce")
            .and_then(Value::as_bytes)
            .ok_or(Error::Metainfo("announce"))?;
        let announce = String::from_utf8(announce.to_vec())
            .map_err(|_| Error::Metainfo("announce"))?;

        let info_value = value.get("info").ok_or(Error::Metainfo("info"))?;
        let info = Info::from_value(info_value)?;

        Ok(Self { announce, info })
    }

    /// Computes the SHA-1 info-hash of this torrent: the hash of the
    /// canonical bencoded `info` dictionary, exactly as it appeared in the
    /// metainfo file.
    pub fn info_hash(&self) -> Sha1Hash {
        let digest = Sha1::digest(&self.info.raw);
        let mut hash = [0; 20];
        hash.copy_from_slice(&digest);
        hash
    }

    /// The number of pieces in the torrent.
    pub fn piece_count(&self) -> usize {
        self.info.pieces.len()
    }
}

impl Info {
    fn from_value(value: &Value) -> Result<Self> {
        if value.get("files").is_some() {
            return Err(Error::MultiFileUnsupported);
        }

        let name = value
            .get("name")
            .and_then(Value::as_bytes)
            .ok_or(Error::Metainfo("name"))?;
        let name =
            String::from_utf8(name.to_vec()).map_err(|_| Error::Metainfo("name"))?;

        let piece_length = value
            .get("piece length")
            .and_then(Value::as_int)
            .ok_or(Error::Metainfo("piece length"))?;
        let piece_length: u32 = piece_length
            .try_into()
            .map_err(|_| Error::Metainfo("piece length"))?;

        let pieces_bytes = value
            .get("pieces")
            .and_then(Value::as_bytes)
            .ok_or(Error::Metainfo("pieces"))?;
        if pieces_bytes.len() % 20 != 0 {
            return Err(Error::Metainfo("pieces"));
        }
        let pieces = pieces_bytes
            .chunks_exact(20)
            .map(|chunk| {
                let mut hash = [0; 20];
                hash.copy_from_slice(chunk);
                hash
            })
            .collect();

        let length = value
            .get("length")
            .and_then(Value::as_int)
            .ok_or(Error::Metainfo("length"))?;
        let length: u64 = length.try_into().map_err(|_| Error::Metainfo("length"))?;

        // keep the exact bytes of the `info` value so the hash is always
        // computed over what the metainfo file actually contained, not a
        // re-derived approximation of it
        let raw = bencode::encode(value);

        Ok(Self {
            name,
            piece_length,
            pieces,
            length,
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // a minimal single-file metainfo file with a 3-piece `pieces` field
    fn sample_metainfo_bytes() -> Vec<u8> {
        let pieces: Vec<u8> = [b'a', b'b', b'c']
            .iter()
            .flat_map(|&c| std::iter::repeat(c).take(20))
            .collect();
        assert_eq!(pieces.len(), 60);

        let mut info = Vec::new();
        info.extend_from_slice(b"d6:lengthi92063e4:name10:sample.txt12:piece lengthi32768e6:pieces60:");
        info.extend_from_slice(&pieces);
        info.push(b'e');

        let mut out = Vec::new();
        out.extend_from_slice(b"d8:announce20:http://tracker.test4:info");
        out.extend_from_slice(&info);
        out.push(b'e');
        out
    }

    #[test]
    fn parses_single_file_metainfo() {
        let bytes = sample_metainfo_bytes();
        let metainfo = Metainfo::from_bytes(&bytes).unwrap();
        assert_eq!(metainfo.announce, "http://tracker.test");
        assert_eq!(metainfo.info.name, "sample.txt");
        assert_eq!(metainfo.info.piece_length, 32768);
        assert_eq!(metainfo.info.length, 92063);
        assert_eq!(metainfo.piece_count(), 3);
    }

    #[test]
    fn info_hash_is_stable_for_identical_bytes() {
        let bytes = sample_metainfo_bytes();
        let a = Metainfo::from_bytes(&bytes).unwrap();
        let b = Metainfo::from_bytes(&bytes).unwrap();
        assert_eq!(a.info_hash(), b.info_hash());
    }

    #[test]
    fn rejects_multi_file_metainfo() {
        let data: &[u8] = b"d8:announce4:http4:infod4:name1:a12:piece lengthi1e6:pieces0:5:filesleee";
        match Metainfo::from_bytes(data) {
            Err(Error::MultiFileUnsupported) => {}
            other => panic!("expected MultiFileUnsupported, got {:?}", other),
        }
    }

    #[test]
    fn rejects_missing_announce() {
        let data: &[u8] = b"d4:infod4:name1:a12:piece lengthi1e6:pieces0:ee";
        match Metainfo::from_bytes(data) {
            Err(Error::Metainfo("announce")) => {}
            other => panic!("expected missing-announce error, got {:?}", other),
        }
    }
}

//! Information about where a torrent's single file lives on disk and how
//! its byte stream is divided into pieces.

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::metainfo::Metainfo;
use crate::PieceIndex;

/// Information about the torrent's file.
#[derive(Clone, Debug)]
pub struct FileInfo {
    /// The file's path, relative to the output directory.
    pub path: PathBuf,
    /// The file's length, in bytes.
    pub len: u64,
}

/// Information about a torrent's storage details: piece count and length,
/// and the single file the torrent's bytes are written to.
#[derive(Clone, Debug)]
pub struct StorageInfo {
    /// The number of pieces in the torrent.
    pub piece_count: usize,
    /// The nominal length of a piece.
    pub piece_len: u32,
    /// The length of the last piece, which may be shorter than `piece_len`
    /// if the file length isn't an exact multiple of it.
    pub last_piece_len: u32,
    /// The total length of the file.
    pub download_len: u64,
    /// The file this torrent's bytes are written to.
    pub file: FileInfo,
}

impl StorageInfo {
    /// Extracts storage related information from the torrent metainfo.
    ///
    /// `output_path` is the path the file will be written to; it is taken
    /// verbatim rather than derived from `metainfo.info.name`, leaving that
    /// decision up to the caller.
    pub fn new(metainfo: &Metainfo, output_path: PathBuf) -> Self {
        let piece_count = metainfo.piece_count();
        let download_len = metainfo.info.length;
        let piece_len = metainfo.info.piece_length;
        let last_piece_len =
            download_len - piece_len as u64 * (piece_count - 1) as u64;
        let last_piece_len = last_piece_len as u32;

        Self {
            piece_count,
            piece_len,
            last_piece_len,
            download_len,
            file: FileInfo {
                path: output_path,
                len: download_len,
            },
        }
    }

    /// Returns the length of the piece at the given index.
    pub fn piece_len(&self, index: PieceIndex) -> Result<u32> {
        if index == self.piece_count - 1 {
            Ok(self.last_piece_len)
        } else if index < self.piece_count - 1 {
            Ok(self.piece_len)
        } else {
            Err(Error::InvalidPieceIndex)
        }
    }

    /// Returns the byte offset of the piece at the given index within the
    /// file.
    pub fn piece_offset(&self, index: PieceIndex) -> u64 {
        index as u64 * self.piece_len as u64
    }
}

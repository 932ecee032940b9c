//! Assembly and verification of a single piece's blocks.
//!
//! A [`Piece`] accumulates blocks in a `BTreeMap` keyed by their byte offset,
//! which keeps them in offset order for free — the peer is free to deliver
//! blocks out of order, and the map sorts them back out before hashing.

use std::collections::BTreeMap;

use sha1::{Digest, Sha1};

use crate::error::{Error, Result};
use crate::{block_count, PieceIndex, Sha1Hash};

/// A piece in the process of being downloaded: its blocks, keyed by their
/// byte offset within the piece, as they arrive from a peer.
pub struct Piece {
    index: PieceIndex,
    expected_hash: Sha1Hash,
    len: u32,
    blocks: BTreeMap<u32, Vec<u8>>,
}

impl Piece {
    /// Creates an empty piece assembler for the piece at `index`, whose
    /// effective length is `len` bytes and whose verified hash must equal
    /// `expected_hash`.
    pub fn new(index: PieceIndex, expected_hash: Sha1Hash, len: u32) -> Self {
        Self {
            index,
            expected_hash,
            len,
            blocks: BTreeMap::new(),
        }
    }

    pub fn index(&self) -> PieceIndex {
        self.index
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    /// Inserts a block at `offset`, overwriting anything previously stored
    /// there (a peer sending a duplicate block is tolerated, not an error).
    pub fn push_block(&mut self, offset: u32, data: Vec<u8>) {
        self.blocks.insert(offset, data);
    }

    /// A piece is complete once it holds one block per expected block index
    /// — gaps (missing offsets) are the only thing this checks; overlap is
    /// structurally impossible since `blocks` is keyed by offset.
    pub fn is_complete(&self) -> bool {
        self.blocks.len() == block_count(self.len)
    }

    /// Consumes the piece, concatenating its blocks in offset order and
    /// verifying the result against `expected_hash`.
    ///
    /// Returns the verified bytes on success, or `Error::PieceHashMismatch`
    /// if the digest doesn't match.
    pub fn into_verified_bytes(self) -> Result<Vec<u8>> {
        debug_assert!(self.is_complete());
        let mut bytes = Vec::with_capacity(self.len as usize);
        for (_, block) in self.blocks {
            bytes.extend_from_slice(&block);
        }

        let digest = Sha1::digest(&bytes);
        if digest.as_slice() != self.expected_hash {
            return Err(Error::PieceHashMismatch);
        }
        Ok(bytes)
    }
}

// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use bytes::Bytes;
use cid::Cid;
use multihash_codetable::{Code, MultihashDigest as _};

/// Multicodec code for raw binary blocks.
pub const IPLD_RAW: u64 = 0x55;

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    #[error("data did not match given hash")]
    HashMismatch,
    #[error("unsupported multihash code {0:#x}")]
    UnsupportedHash(u64),
}

/// An immutable, content addressed unit of data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Block {
    cid: Cid,
    data: Bytes,
}

impl Block {
    /// Creates a raw block addressed by the `SHA2-256` digest of `data`.
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let cid = Cid::new_v1(IPLD_RAW, Code::Sha2_256.digest(&data));
        Self { cid, data }
    }

    /// Creates a block with a caller supplied [`Cid`]. When `verify` is set the
    /// digest is recomputed with the hash function named by the [`Cid`] and
    /// construction fails on mismatch.
    pub fn new_with_cid(cid: Cid, data: impl Into<Bytes>, verify: bool) -> Result<Self, BlockError> {
        let block = Self {
            cid,
            data: data.into(),
        };
        if verify {
            block.verify()?;
        }
        Ok(block)
    }

    pub fn verify(&self) -> Result<(), BlockError> {
        let code = self.cid.hash().code();
        let hasher = Code::try_from(code).map_err(|_| BlockError::UnsupportedHash(code))?;
        if hasher.digest(&self.data) == *self.cid.hash() {
            Ok(())
        } else {
            Err(BlockError::HashMismatch)
        }
    }

    pub fn cid(&self) -> &Cid {
        &self.cid
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
impl quickcheck::Arbitrary for Block {
    fn arbitrary(g: &mut quickcheck::Gen) -> Self {
        Block::new(Vec::<u8>::arbitrary(g))
    }
}

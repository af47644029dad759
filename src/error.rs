// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::{blocks::BlockError, scope::ScopeError};
use cid::Cid;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("bitswap is closed")]
    Closed,
    #[error(transparent)]
    Scope(#[from] ScopeError),
    #[error("promise channel was closed")]
    ChannelClosed,
    #[error("failed to store block {cid}: {source}")]
    Storage {
        cid: Cid,
        #[source]
        source: anyhow::Error,
    },
    #[error(transparent)]
    Block(#[from] BlockError),
}

impl Error {
    /// `true` for the caller's own cancellation or deadline.
    pub fn is_scope_error(&self) -> bool {
        matches!(self, Self::Scope(_))
    }
}

// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT
//! A content-addressed block exchange engine in the style of
//! the IPFS [bitswap protocol](https://github.com/ipfs/specs/blob/main/BITSWAP.md).
//!
//! ## Components
//!
//! - [`wantlist::Wantlist`]: the `(cid, priority)` set each side keeps
//! - [`notifications::PubSub`]: fans arriving blocks out to waiting callers
//! - [`decision::Engine`]: per-peer ledgers and a fair task queue deciding
//!   which block to serve to whom
//! - [`want_manager::WantManager`]: broadcasts this node's wants and cancels
//!   to connected peers
//! - [`providers::ProviderCoordinator`]: bounded pools for provider discovery
//!   and reprovide advertisements
//! - [`exchange::Bitswap`]: the public surface wiring all of the above
//!
//! ## Usage
//!
//! An exchange is built from a [`network::BitswapNetwork`] implementation and a
//! [`blockstore::Blockstore`]. The network calls back into the exchange through
//! the [`network::BitswapReceiver`] delegate it is handed on construction.
//! Every request takes a [`scope::Scope`] which is the only way to abandon it.

pub mod blocks;
pub mod blockstore;
pub mod config;
pub mod decision;
pub mod error;
pub mod exchange;
pub mod message;
pub mod metrics;
pub mod network;
pub mod notifications;
pub mod providers;
pub mod routing;
pub mod scope;
pub mod want_manager;
pub mod wantlist;

mod utils;

#[cfg(test)]
mod test_utils;

pub use blocks::Block;
pub use config::BitswapConfig;
pub use error::Error;
pub use exchange::{BlockStream, Bitswap, Stat};
pub use scope::{Scope, ScopeError};

// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

mod providers;
pub use providers::ProviderStore;

use crate::scope::Scope;
use async_trait::async_trait;
use cid::Cid;
use futures::stream::BoxStream;
use libp2p::PeerId;

/// Content routing: who holds a key, and announcing that this node does.
#[async_trait]
pub trait Routing: Send + Sync + 'static {
    /// Lazily yields up to `limit` candidate providers of `cid`, ending early
    /// when `scope` ends.
    fn find_providers_async(&self, scope: &Scope, cid: Cid, limit: usize)
    -> BoxStream<'static, PeerId>;

    /// Advertises this node as a provider of `cid`.
    async fn provide(&self, scope: &Scope, cid: Cid) -> anyhow::Result<()>;
}

// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use crate::{message::BitswapMessage, routing::Routing, scope::Scope};
use async_trait::async_trait;
use libp2p::PeerId;
use std::sync::Weak;

/// Peer transport as seen by the exchange. Routing is part of the network so
/// one implementation can answer both.
#[async_trait]
pub trait BitswapNetwork: Routing {
    async fn send_message(&self, peer: PeerId, message: BitswapMessage) -> anyhow::Result<()>;

    async fn connect_to(&self, scope: &Scope, peer: PeerId) -> anyhow::Result<()>;

    /// Installs the receiver of inbound traffic. Held weakly so the exchange
    /// owning the network is not kept alive by it.
    fn set_delegate(&self, receiver: Weak<dyn BitswapReceiver>);
}

/// Inbound events delivered by a [`BitswapNetwork`].
#[async_trait]
pub trait BitswapReceiver: Send + Sync + 'static {
    async fn receive_message(&self, scope: &Scope, peer: PeerId, message: BitswapMessage);

    fn receive_error(&self, error: anyhow::Error);

    fn peer_connected(&self, peer: PeerId);

    fn peer_disconnected(&self, peer: PeerId);
}

// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! In-memory collaborators for exercising the exchange without a transport.

use crate::{
    blocks::Block,
    blockstore::{Blockstore, MemoryBlockstore},
    config::BitswapConfig,
    exchange::Bitswap,
    message::BitswapMessage,
    network::{BitswapNetwork, BitswapReceiver},
    routing::{ProviderStore, Routing},
    scope::Scope,
};
use ahash::{HashMap, HashSet};
use anyhow::bail;
use async_trait::async_trait;
use cid::Cid;
use futures::{
    StreamExt as _,
    stream::{self, BoxStream},
};
use libp2p::PeerId;
use parking_lot::Mutex;
use std::{
    future::Future,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tracing_subscriber::EnvFilter;

type Delegate = Arc<Mutex<Option<Weak<dyn BitswapReceiver>>>>;

fn upgrade(delegate: &Delegate) -> Option<Arc<dyn BitswapReceiver>> {
    delegate.lock().as_ref().and_then(Weak::upgrade)
}

pub fn random_blocks(count: usize) -> Vec<Block> {
    (0..count)
        .map(|_| Block::new(rand::random::<[u8; 32]>().to_vec()))
        .collect()
}

/// Routes logs to the test harness output, `RUST_LOG` overrides the filter.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("forest_bitswap=debug"));
    _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Polls `condition` until it holds, panicking after a few seconds.
pub async fn eventually<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met in time"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A network that records what it is asked to do and delivers nothing.
#[derive(Default)]
pub struct RecordingNetwork {
    sent: Mutex<Vec<(PeerId, BitswapMessage)>>,
    connects: Mutex<Vec<PeerId>>,
    provided: Mutex<Vec<Cid>>,
    providers: Mutex<Vec<PeerId>>,
    fail_connects: Mutex<HashSet<PeerId>>,
    stall_provides: AtomicBool,
    delegate: Delegate,
}

impl RecordingNetwork {
    pub fn sent(&self) -> Vec<(PeerId, BitswapMessage)> {
        self.sent.lock().clone()
    }

    /// Messages carrying a WANT for `cid`.
    pub fn wants_sent(&self, cid: &Cid) -> usize {
        self.count_entries(cid, false)
    }

    pub fn cancels_sent(&self, cid: &Cid) -> usize {
        self.count_entries(cid, true)
    }

    fn count_entries(&self, cid: &Cid, cancel: bool) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|(_, m)| m.wantlist().any(|e| e.cid == *cid && e.cancel == cancel))
            .count()
    }

    pub fn connects(&self) -> Vec<PeerId> {
        self.connects.lock().clone()
    }

    pub fn provided(&self) -> Vec<Cid> {
        self.provided.lock().clone()
    }

    /// Peers every provider lookup returns.
    pub fn set_providers(&self, peers: Vec<PeerId>) {
        *self.providers.lock() = peers;
    }

    /// Makes every later `provide` call hang.
    pub fn stall_provides(&self) {
        self.stall_provides.store(true, Ordering::SeqCst);
    }

    pub fn fail_connect(&self, peer: PeerId) {
        self.fail_connects.lock().insert(peer);
    }

    pub fn delegate(&self) -> Option<Arc<dyn BitswapReceiver>> {
        upgrade(&self.delegate)
    }
}

#[async_trait]
impl Routing for RecordingNetwork {
    fn find_providers_async(
        &self,
        _scope: &Scope,
        _cid: Cid,
        limit: usize,
    ) -> BoxStream<'static, PeerId> {
        let providers: Vec<_> = self.providers.lock().iter().copied().take(limit).collect();
        stream::iter(providers).boxed()
    }

    async fn provide(&self, _scope: &Scope, cid: Cid) -> anyhow::Result<()> {
        if self.stall_provides.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.provided.lock().push(cid);
        Ok(())
    }
}

#[async_trait]
impl BitswapNetwork for RecordingNetwork {
    async fn send_message(&self, peer: PeerId, message: BitswapMessage) -> anyhow::Result<()> {
        self.sent.lock().push((peer, message));
        Ok(())
    }

    async fn connect_to(&self, _scope: &Scope, peer: PeerId) -> anyhow::Result<()> {
        self.connects.lock().push(peer);
        if self.fail_connects.lock().contains(&peer) {
            bail!("dial failure");
        }
        Ok(())
    }

    fn set_delegate(&self, receiver: Weak<dyn BitswapReceiver>) {
        *self.delegate.lock() = Some(receiver);
    }
}

/// A blockstore whose writes always fail.
#[derive(Default)]
pub struct FailingBlockstore {
    pub puts: AtomicUsize,
}

impl Blockstore for FailingBlockstore {
    fn put(&self, _block: &Block) -> anyhow::Result<()> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        bail!("disk full")
    }

    fn get(&self, _cid: &Cid) -> anyhow::Result<Option<Block>> {
        Ok(None)
    }

    fn has(&self, _cid: &Cid) -> anyhow::Result<bool> {
        Ok(false)
    }
}

struct Endpoint {
    inbox: flume::Sender<(PeerId, BitswapMessage)>,
    delegate: Delegate,
}

struct Switchboard {
    endpoints: Mutex<HashMap<PeerId, Endpoint>>,
    links: Mutex<HashSet<(PeerId, PeerId)>>,
    routing: ProviderStore,
}

/// Peers connected through memory with a shared provider table. Messages
/// between two peers arrive in the order they were sent.
#[derive(Clone)]
pub struct VirtualNetwork {
    switchboard: Arc<Switchboard>,
}

impl Default for VirtualNetwork {
    fn default() -> Self {
        Self {
            switchboard: Arc::new(Switchboard {
                endpoints: Default::default(),
                links: Default::default(),
                routing: ProviderStore::new(BitswapConfig::default().provider_retention),
            }),
        }
    }
}

impl VirtualNetwork {
    pub fn adapter(&self, local: PeerId) -> Arc<VirtualAdapter> {
        let (tx, rx) = flume::unbounded::<(PeerId, BitswapMessage)>();
        let delegate = Delegate::default();
        self.switchboard.endpoints.lock().insert(
            local,
            Endpoint {
                inbox: tx,
                delegate: delegate.clone(),
            },
        );
        tokio::spawn({
            let delegate = delegate.clone();
            async move {
                while let Ok((from, message)) = rx.recv_async().await {
                    if let Some(receiver) = upgrade(&delegate) {
                        receiver.receive_message(&Scope::new(), from, message).await;
                    }
                }
            }
        });
        Arc::new(VirtualAdapter {
            local,
            switchboard: self.switchboard.clone(),
            delegate,
        })
    }

    /// A fresh exchange with an empty in-memory store.
    pub fn instance(&self, config: BitswapConfig) -> Instance {
        let peer = PeerId::random();
        let store = Arc::new(MemoryBlockstore::new());
        let exchange = Bitswap::new(&Scope::new(), peer, self.adapter(peer), store.clone(), config);
        Instance {
            peer,
            store,
            exchange,
        }
    }

    pub fn providers(&self, cid: &Cid) -> Vec<PeerId> {
        self.switchboard.routing.get_providers(cid)
    }
}

pub struct Instance {
    pub peer: PeerId,
    pub store: Arc<MemoryBlockstore>,
    pub exchange: Arc<Bitswap<MemoryBlockstore>>,
}

pub struct VirtualAdapter {
    local: PeerId,
    switchboard: Arc<Switchboard>,
    delegate: Delegate,
}

#[async_trait]
impl Routing for VirtualAdapter {
    fn find_providers_async(
        &self,
        _scope: &Scope,
        cid: Cid,
        limit: usize,
    ) -> BoxStream<'static, PeerId> {
        let local = self.local;
        let providers: Vec<_> = self
            .switchboard
            .routing
            .get_providers(&cid)
            .into_iter()
            .filter(|p| *p != local)
            .take(limit)
            .collect();
        stream::iter(providers).boxed()
    }

    async fn provide(&self, _scope: &Scope, cid: Cid) -> anyhow::Result<()> {
        self.switchboard.routing.add_provider(cid, self.local);
        Ok(())
    }
}

#[async_trait]
impl BitswapNetwork for VirtualAdapter {
    async fn send_message(&self, peer: PeerId, message: BitswapMessage) -> anyhow::Result<()> {
        let inbox = match self.switchboard.endpoints.lock().get(&peer) {
            Some(endpoint) => endpoint.inbox.clone(),
            None => bail!("peer {peer} is not on the network"),
        };
        inbox.send_async((self.local, message)).await?;
        Ok(())
    }

    async fn connect_to(&self, _scope: &Scope, peer: PeerId) -> anyhow::Result<()> {
        if peer == self.local {
            return Ok(());
        }
        let remote = match self.switchboard.endpoints.lock().get(&peer) {
            Some(endpoint) => endpoint.delegate.clone(),
            None => bail!("peer {peer} is not on the network"),
        };
        let link = if self.local < peer {
            (self.local, peer)
        } else {
            (peer, self.local)
        };
        if self.switchboard.links.lock().insert(link) {
            if let Some(receiver) = upgrade(&self.delegate) {
                receiver.peer_connected(peer);
            }
            if let Some(receiver) = upgrade(&remote) {
                receiver.peer_connected(self.local);
            }
        }
        Ok(())
    }

    fn set_delegate(&self, receiver: Weak<dyn BitswapReceiver>) {
        *self.delegate.lock() = Some(receiver);
    }
}

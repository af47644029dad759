// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! The public face of the exchange.

mod block_stream;

pub use block_stream::BlockStream;

use crate::{
    blocks::Block,
    blockstore::Blockstore,
    config::BitswapConfig,
    decision::{Engine, LedgerReceipt},
    error::Error,
    message::BitswapMessage,
    metrics,
    network::{BitswapNetwork, BitswapReceiver},
    notifications::PubSub,
    providers::ProviderCoordinator,
    scope::Scope,
    want_manager::WantManager,
};
use ahash::HashSet;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable as _};
use cid::Cid;
use futures::{StreamExt as _, future::join_all};
use itertools::Itertools as _;
use libp2p::PeerId;
use parking_lot::Mutex;
use std::{
    sync::{Arc, Weak},
    time::Duration,
};
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument as _, Span, debug, info, info_span, warn};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Counters {
    blocks_received: u64,
    dup_blocks_received: u64,
    dup_blocks_added: u64,
}

/// Point in time view of an exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub provide_buf_len: usize,
    pub wantlist: Vec<Cid>,
    /// Partners with a ledger.
    pub peers: Vec<PeerId>,
    pub blocks_received: u64,
    /// Received blocks that were already stored.
    pub dup_blocks_received: u64,
    /// [`Bitswap::has_block`] calls for blocks that were already stored.
    pub dup_blocks_added: u64,
}

/// A bitswap exchange instance.
///
/// Owns the notification hub, decision engine, want manager and provider
/// pools, which live until [`Bitswap::close`] or until the parent scope given
/// to [`Bitswap::new`] ends.
pub struct Bitswap<S> {
    local: PeerId,
    config: BitswapConfig,
    store: Arc<S>,
    notifications: PubSub,
    engine: Engine,
    want_manager: WantManager,
    providers: ProviderCoordinator,
    lifecycle: CancellationToken,
    counters: Mutex<Counters>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    span: Span,
}

impl<S: Blockstore> Bitswap<S> {
    /// Starts an exchange for `local` and registers it as the delegate of
    /// `network`. Must be called within a tokio runtime.
    pub fn new<N: BitswapNetwork>(
        parent: &Scope,
        local: PeerId,
        network: Arc<N>,
        store: Arc<S>,
        config: BitswapConfig,
    ) -> Arc<Self> {
        let span = info_span!("bitswap", %local);
        let lifecycle = CancellationToken::new();
        let notifications = PubSub::new();

        let mut workers = vec![];
        let (engine, handle) = Engine::spawn(store.clone(), lifecycle.clone(), span.clone());
        workers.push(handle);
        workers.extend(engine.spawn_senders(
            config.task_workers,
            store.clone(),
            network.clone(),
            lifecycle.clone(),
            span.clone(),
        ));
        let (want_manager, handle) = WantManager::spawn(
            network.clone(),
            config.rebroadcast_interval,
            lifecycle.clone(),
            span.clone(),
        );
        workers.push(handle);
        let (providers, handles) =
            ProviderCoordinator::spawn(network.clone(), &config, lifecycle.clone(), span.clone());
        workers.extend(handles);
        workers.push(tokio::spawn(
            rebroadcast_provider_search(
                want_manager.clone(),
                providers.clone(),
                config.rebroadcast_interval,
                lifecycle.clone(),
            )
            .instrument(span.clone()),
        ));
        // the parent ending is just another way to request shutdown
        workers.push(tokio::spawn({
            let parent = parent.clone();
            let lifecycle = lifecycle.clone();
            let notifications = notifications.clone();
            async move {
                tokio::select! {
                    _ = parent.done() => shut_down(&lifecycle, &notifications),
                    _ = lifecycle.cancelled() => {}
                }
            }
            .instrument(span.clone())
        }));

        let bitswap = Arc::new(Self {
            local,
            config,
            store,
            notifications,
            engine,
            want_manager,
            providers,
            lifecycle,
            counters: Default::default(),
            workers: Mutex::new(workers),
            span,
        });
        let delegate: Weak<dyn BitswapReceiver> = Arc::<Self>::downgrade(&bitswap);
        network.set_delegate(delegate);
        bitswap
    }

    pub fn local_peer_id(&self) -> PeerId {
        self.local
    }

    pub fn config(&self) -> &BitswapConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_cancelled()
    }

    /// Fetches a single block, waiting until it arrives or `scope` ends.
    pub async fn get_block(&self, scope: &Scope, cid: Cid) -> Result<Block, Error> {
        let scope = scope.child();
        // stops the provider search once this call returns
        let _guard = scope.token().clone().drop_guard();
        let mut blocks = self.get_blocks(&scope, vec![cid]).await?;
        match blocks.next().await {
            Some(block) => Ok(block),
            None => Err(self.interrupted(&scope)),
        }
    }

    /// Requests `cids` from the network. Blocks are yielded as they arrive,
    /// once each, and the stream ends when all arrived, `scope` ended or the
    /// exchange closed.
    pub async fn get_blocks(&self, scope: &Scope, cids: Vec<Cid>) -> Result<BlockStream, Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let cids: Vec<Cid> = cids.into_iter().unique().collect();
        let subscription = self.notifications.subscribe(scope, &cids);
        self.want_manager.want_blocks(&cids);
        let blocks = BlockStream::new(subscription, self.want_manager.clone());
        self.providers.find_providers(scope, cids).await?;
        Ok(blocks)
    }

    /// Stores `block`, hands it to everyone waiting on it and queues it to be
    /// announced to routing.
    pub async fn has_block(&self, scope: &Scope, block: Block) -> Result<(), Error> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let cid = *block.cid();
        let duplicate = {
            let mut counters = self.counters.lock();
            let stored = self.store.has(&cid).unwrap_or_else(|e| {
                warn!("failed to look up {cid}: {e:#}");
                false
            });
            if stored {
                counters.dup_blocks_added += 1;
            }
            stored
        };
        if duplicate {
            debug!("already have block {cid}");
        } else {
            scope
                .run(self.put_with_retry(&block))
                .await?
                .map_err(|source| Error::Storage { cid, source })?;
        }
        self.notifications.publish(&block);
        // satisfied, whether it came from the network or not
        self.want_manager.cancel_wants(&[cid]);
        self.engine.blocks_available(vec![cid]);
        self.providers.provide(scope, cid).await
    }

    async fn put_with_retry(&self, block: &Block) -> anyhow::Result<()> {
        let store = &self.store;
        let backoff = ExponentialBuilder::default()
            .with_min_delay(self.config.put_backoff)
            .with_max_times(self.config.put_attempts.saturating_sub(1));
        (|| async move { store.put(block) })
            .retry(backoff)
            .notify(|e: &anyhow::Error, delay: Duration| {
                warn!("failed to store block {}, retrying in {delay:?}: {e:#}", block.cid())
            })
            .await
    }

    /// Counts a received block, `false` if it was already stored.
    fn update_receive_counters(&self, cid: &Cid) -> bool {
        let mut counters = self.counters.lock();
        counters.blocks_received += 1;
        match self.store.has(cid) {
            Ok(true) => {
                counters.dup_blocks_received += 1;
                metrics::inc(&metrics::values::INBOUND_DUPLICATE_BLOCK);
                false
            }
            Ok(false) => true,
            Err(e) => {
                warn!("failed to look up {cid}: {e:#}");
                true
            }
        }
    }

    async fn handle_message(&self, scope: &Scope, peer: PeerId, message: BitswapMessage) {
        if self.is_closed() {
            debug!("exchange closed, dropping message from {peer}");
            return;
        }
        self.engine.message_received(peer, message.clone());

        // a forged block must not touch the wantlist
        let blocks = message
            .into_blocks()
            .filter(|block| {
                metrics::inc(&metrics::values::INBOUND_BLOCK);
                if !self.config.verify_blocks {
                    return true;
                }
                match block.verify() {
                    Ok(()) => true,
                    Err(e) => {
                        metrics::inc(&metrics::values::INBOUND_INVALID_BLOCK);
                        warn!("dropping block {} from {peer}: {e}", block.cid());
                        false
                    }
                }
            })
            .collect_vec();
        if blocks.is_empty() {
            return;
        }
        let cids = blocks.iter().map(|b| *b.cid()).collect_vec();
        let wanted: HashSet<Cid> = self.want_manager.wanted(cids).await.into_iter().collect();
        for block in blocks.iter().filter(|b| !wanted.contains(b.cid())) {
            debug!("received un-asked-for block {} from {peer}", block.cid());
        }
        // stop asking everyone else
        self.want_manager
            .cancel_wants(&wanted.into_iter().collect_vec());

        join_all(blocks.into_iter().map(|block| async move {
            if !self.update_receive_counters(block.cid()) {
                debug!("already have block {}", block.cid());
                return;
            }
            let cid = *block.cid();
            let scope = scope.child_with_timeout(self.config.has_block_timeout);
            if let Err(e) = self.has_block(&scope, block).await {
                warn!("failed to process block {cid} from {peer}: {e}");
            }
        }))
        .await;
    }

    /// The keys this node is waiting for.
    pub async fn get_wantlist(&self) -> Vec<Cid> {
        self.want_manager
            .wantlist()
            .await
            .into_iter()
            .map(|e| e.cid)
            .collect()
    }

    /// The keys `peer` asked this node for.
    pub async fn wantlist_for_peer(&self, peer: PeerId) -> Vec<Cid> {
        self.engine
            .wantlist_for_peer(peer)
            .await
            .into_iter()
            .map(|e| e.cid)
            .collect()
    }

    pub async fn ledger_for_peer(&self, peer: PeerId) -> Option<LedgerReceipt> {
        self.engine.ledger_for_peer(peer).await
    }

    pub async fn stat(&self) -> Stat {
        let counters = *self.counters.lock();
        Stat {
            provide_buf_len: self.providers.provide_queue_len(),
            wantlist: self.get_wantlist().await,
            peers: self.engine.peers().await,
            blocks_received: counters.blocks_received,
            dup_blocks_received: counters.dup_blocks_received,
            dup_blocks_added: counters.dup_blocks_added,
        }
    }

    /// Stops every component and waits for their tasks. Idempotent, pending
    /// requests end with [`Error::Closed`] or their own scope's error.
    pub async fn close(&self) {
        shut_down(&self.lifecycle, &self.notifications);
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            if let Err(e) = worker.await {
                warn!("bitswap worker failed: {e}");
            }
        }
    }

    fn interrupted(&self, scope: &Scope) -> Error {
        if let Some(e) = scope.error() {
            e.into()
        } else if self.is_closed() {
            Error::Closed
        } else {
            Error::ChannelClosed
        }
    }
}

fn shut_down(lifecycle: &CancellationToken, notifications: &PubSub) {
    if !lifecycle.is_cancelled() {
        info!("shutting down");
    }
    lifecycle.cancel();
    notifications.shutdown();
}

#[async_trait]
impl<S: Blockstore> BitswapReceiver for Bitswap<S> {
    async fn receive_message(&self, scope: &Scope, peer: PeerId, message: BitswapMessage) {
        self.handle_message(scope, peer, message)
            .instrument(self.span.clone())
            .await
    }

    fn receive_error(&self, error: anyhow::Error) {
        let _entered = self.span.enter();
        warn!("bitswap network error: {error:#}");
    }

    fn peer_connected(&self, peer: PeerId) {
        if !self.is_closed() {
            self.want_manager.connected(peer);
        }
    }

    fn peer_disconnected(&self, peer: PeerId) {
        if !self.is_closed() {
            self.want_manager.disconnected(peer);
            self.engine.peer_disconnected(peer);
        }
    }
}

async fn rebroadcast_provider_search(
    want_manager: WantManager,
    providers: ProviderCoordinator,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    let root = Scope::from(shutdown.clone());
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let cids: Vec<Cid> = want_manager
            .wantlist()
            .await
            .into_iter()
            .map(|e| e.cid)
            .collect();
        if cids.is_empty() {
            continue;
        }
        debug!("searching providers again for {} wants", cids.len());
        if let Err(e) = providers.find_providers(&root, cids).await {
            debug!("provider search not queued: {e}");
        }
    }
}

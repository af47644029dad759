// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::*;
use crate::{blocks::Block, blockstore::MemoryBlockstore};
use ahash::HashSet;
use std::time::Duration;

fn blocks(range: std::ops::Range<u32>) -> Vec<Block> {
    range.map(|i| Block::new(i.to_be_bytes().to_vec())).collect()
}

fn want(blocks: &[Block]) -> BitswapMessage {
    let mut message = BitswapMessage::new(false);
    for (i, b) in blocks.iter().enumerate() {
        message.add_entry(*b.cid(), i32::MAX - i as i32);
    }
    message
}

fn engine_with(stored: &[Block]) -> (Engine, CancellationToken) {
    let store = Arc::new(MemoryBlockstore::new());
    for b in stored {
        store.put(b).unwrap();
    }
    let shutdown = CancellationToken::new();
    let (engine, _) = Engine::spawn(store, shutdown.clone(), Span::none());
    (engine, shutdown)
}

async fn no_task(engine: &Engine) -> bool {
    tokio::time::timeout(Duration::from_millis(50), engine.next_task())
        .await
        .is_err()
}

#[tokio::test]
async fn serves_wants_for_stored_blocks() {
    let stored = blocks(0..3);
    let (engine, _shutdown) = engine_with(&stored);
    let peer = PeerId::random();
    engine.message_received(peer, want(&stored));

    let mut served = vec![];
    for _ in 0..3 {
        let task = engine.next_task().await.unwrap();
        assert_eq!(task.peer, peer);
        served.push(task.cid);
    }
    // descending priority
    assert_eq!(
        served,
        stored.iter().map(|b| *b.cid()).collect::<Vec<_>>()
    );
    assert!(no_task(&engine).await);
}

#[tokio::test]
async fn missing_blocks_are_served_once_available() {
    let (engine, _shutdown) = engine_with(&[]);
    let peer = PeerId::random();
    let wanted = blocks(0..2);
    engine.message_received(peer, want(&wanted));
    assert!(no_task(&engine).await);
    assert_eq!(engine.wantlist_for_peer(peer).await.len(), 2);

    engine.blocks_available(vec![*wanted[1].cid()]);
    let task = engine.next_task().await.unwrap();
    assert_eq!((task.peer, task.cid), (peer, *wanted[1].cid()));
}

#[tokio::test]
async fn cancel_drops_queued_task() {
    let stored = blocks(0..2);
    let (engine, _shutdown) = engine_with(&stored);
    let peer = PeerId::random();
    engine.message_received(peer, want(&stored));
    let mut cancel = BitswapMessage::new(false);
    cancel.cancel(*stored[0].cid());
    engine.message_received(peer, cancel);

    assert_eq!(engine.next_task().await.unwrap().cid, *stored[1].cid());
    assert!(no_task(&engine).await);
    let wantlist: Vec<_> = engine
        .wantlist_for_peer(peer)
        .await
        .into_iter()
        .map(|e| e.cid)
        .collect();
    assert_eq!(wantlist, vec![*stored[1].cid()]);
}

#[tokio::test]
async fn full_wantlist_replaces_previous_wants() {
    let stored = blocks(0..3);
    let (engine, _shutdown) = engine_with(&stored);
    let peer = PeerId::random();
    engine.message_received(peer, want(&stored[..2]));
    let mut full = want(&stored[2..]);
    full.set_full(true);
    engine.message_received(peer, full);

    assert_eq!(engine.next_task().await.unwrap().cid, *stored[2].cid());
    assert!(no_task(&engine).await);
    assert_eq!(engine.wantlist_for_peer(peer).await.len(), 1);
}

#[tokio::test]
async fn disconnect_drops_ledger_and_tasks() {
    let stored = blocks(0..2);
    let (engine, _shutdown) = engine_with(&stored);
    let peer = PeerId::random();
    engine.message_received(peer, want(&stored));
    assert_eq!(engine.peers().await, vec![peer]);
    engine.peer_disconnected(peer);

    assert!(no_task(&engine).await);
    assert!(engine.wantlist_for_peer(peer).await.is_empty());
    assert!(engine.ledger_for_peer(peer).await.is_none());
    assert!(engine.peers().await.is_empty());
}

#[tokio::test]
async fn accounting_follows_exchanges() {
    let stored = blocks(0..1);
    let (engine, _shutdown) = engine_with(&stored);
    let peer = PeerId::random();

    let mut incoming = want(&stored);
    incoming.add_block(Block::new(vec![0; 10]));
    engine.message_received(peer, incoming);

    let mut outgoing = BitswapMessage::new(false);
    outgoing.add_block(stored[0].clone());
    engine.message_sent(peer, &outgoing);

    let receipt = engine.ledger_for_peer(peer).await.unwrap();
    assert_eq!(receipt.recv, 10);
    assert_eq!(receipt.blocks_received, 1);
    assert_eq!(receipt.sent, stored[0].len() as u64);
    // sent blocks are no longer wanted
    assert!(engine.wantlist_for_peer(peer).await.is_empty());
}

#[tokio::test]
async fn every_peer_is_served_within_one_round() {
    const PEERS: u32 = 6;
    let stored = blocks(0..PEERS * 5);
    let (engine, _shutdown) = engine_with(&stored);
    let peers: Vec<_> = (0..PEERS).map(|_| PeerId::random()).collect();
    for (peer, wanted) in peers.iter().zip(stored.chunks(5)) {
        engine.message_received(*peer, want(wanted));
    }
    let mut first_round = HashSet::default();
    for _ in 0..PEERS {
        first_round.insert(engine.next_task().await.unwrap().peer);
    }
    assert_eq!(first_round, peers.into_iter().collect::<HashSet<_>>());
}

#[tokio::test]
async fn shutdown_wakes_parked_senders() {
    let (engine, shutdown) = engine_with(&[]);
    let parked = tokio::spawn({
        let engine = engine.clone();
        async move { engine.next_task().await }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.cancel();
    assert!(parked.await.unwrap().is_none());
    assert!(engine.next_task().await.is_none());
}

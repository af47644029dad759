// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use super::*;
use crate::test_utils::{RecordingNetwork, eventually, random_blocks};

fn cids(count: usize) -> Vec<Cid> {
    random_blocks(count).iter().map(|b| *b.cid()).collect()
}

fn spawn_with(interval: Duration) -> (WantManager, Arc<RecordingNetwork>, CancellationToken) {
    let network = Arc::new(RecordingNetwork::default());
    let shutdown = CancellationToken::new();
    let (wm, _) = WantManager::spawn(network.clone(), interval, shutdown.clone(), Span::none());
    (wm, network, shutdown)
}

fn spawn() -> (WantManager, Arc<RecordingNetwork>, CancellationToken) {
    spawn_with(Duration::from_secs(3600))
}

#[tokio::test]
async fn outstanding_want_is_broadcast_once() {
    let (wm, network, _shutdown) = spawn();
    let peer = PeerId::random();
    let key = cids(1)[0];
    wm.connected(peer);
    wm.want_blocks(&[key]);
    eventually(|| async { network.wants_sent(&key) == 1 }).await;

    wm.want_blocks(&[key]);
    wm.want_blocks(&[key]);
    assert_eq!(wm.wantlist().await.len(), 1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(network.wants_sent(&key), 1);
}

#[tokio::test]
async fn newly_connected_peer_gets_full_wantlist() {
    let (wm, network, _shutdown) = spawn();
    let keys = cids(3);
    wm.want_blocks(&keys);
    let peer = PeerId::random();
    wm.connected(peer);
    eventually(|| async { !network.sent().is_empty() }).await;

    let (to, message) = network.sent().remove(0);
    assert_eq!(to, peer);
    assert!(message.full());
    let mut sent: Vec<_> = message.wantlist().map(|e| e.cid).collect();
    sent.sort();
    let mut expected = keys.clone();
    expected.sort();
    assert_eq!(sent, expected);
    assert_eq!(network.connects(), vec![peer]);
}

#[tokio::test]
async fn priorities_follow_request_order() {
    let (wm, _network, _shutdown) = spawn();
    let keys = cids(3);
    wm.want_blocks(&keys);
    let wantlist = wm.wantlist().await;
    assert_eq!(wantlist.iter().map(|e| e.cid).collect::<Vec<_>>(), keys);
    assert_eq!(wantlist[0].priority, MAX_PRIORITY);
    assert_eq!(wantlist[2].priority, MAX_PRIORITY - 2);
}

#[tokio::test]
async fn cancel_only_announces_wanted_keys() {
    let (wm, network, _shutdown) = spawn();
    let peer = PeerId::random();
    let [wanted, unwanted]: [Cid; 2] = cids(2).try_into().unwrap();
    wm.connected(peer);
    wm.want_blocks(&[wanted]);
    wm.cancel_wants(&[wanted, unwanted]);
    eventually(|| async { network.cancels_sent(&wanted) == 1 }).await;
    assert_eq!(network.cancels_sent(&unwanted), 0);
    assert!(wm.wantlist().await.is_empty());
    assert!(wm.wanted(vec![wanted, unwanted]).await.is_empty());
}

#[tokio::test]
async fn released_keys_stay_wanted_while_referenced() {
    let (wm, network, _shutdown) = spawn();
    let peer = PeerId::random();
    let key = cids(1)[0];
    wm.connected(peer);
    wm.want_blocks(&[key]);
    wm.want_blocks(&[key]);

    wm.release_wants(vec![key]);
    assert_eq!(wm.wanted(vec![key]).await, vec![key]);

    wm.release_wants(vec![key]);
    assert!(wm.wanted(vec![key]).await.is_empty());
    eventually(|| async { network.cancels_sent(&key) == 1 }).await;
}

#[tokio::test]
async fn disconnected_peers_are_not_addressed() {
    let (wm, network, _shutdown) = spawn();
    let (stays, leaves) = (PeerId::random(), PeerId::random());
    wm.connected(stays);
    wm.connected(leaves);
    wm.disconnected(leaves);
    assert_eq!(wm.peers().await, vec![stays]);

    let key = cids(1)[0];
    wm.want_blocks(&[key]);
    eventually(|| async { network.wants_sent(&key) == 1 }).await;
    assert!(network.sent().iter().all(|(to, _)| *to == stays));
}

#[tokio::test]
async fn connections_are_reference_counted() {
    let (wm, _network, _shutdown) = spawn();
    let peer = PeerId::random();
    wm.connected(peer);
    wm.connected(peer);
    wm.disconnected(peer);
    assert_eq!(wm.peers().await, vec![peer]);
    wm.disconnected(peer);
    assert!(wm.peers().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn full_wantlist_is_rebroadcast() {
    let (wm, network, _shutdown) = spawn_with(Duration::from_secs(10));
    let peer = PeerId::random();
    let key = cids(1)[0];
    wm.connected(peer);
    wm.want_blocks(&[key]);
    eventually(|| async { network.wants_sent(&key) == 1 }).await;

    tokio::time::sleep(Duration::from_secs(11)).await;
    eventually(|| async { network.wants_sent(&key) == 2 }).await;
    assert!(network.sent().last().is_some_and(|(_, m)| m.full()));
}

#[tokio::test]
async fn queries_end_after_shutdown() {
    let (wm, _network, shutdown) = spawn();
    wm.want_blocks(&cids(2));
    shutdown.cancel();
    eventually(|| async { wm.wantlist().await.is_empty() }).await;
    assert!(wm.peers().await.is_empty());
}

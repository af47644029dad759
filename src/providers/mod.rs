// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

//! Bounded worker pools talking to content routing: one finds and connects to
//! providers of wanted keys, the other advertises newly stored blocks.

use crate::{
    config::BitswapConfig,
    error::Error,
    metrics,
    network::BitswapNetwork,
    scope::{Scope, ScopeError},
};
use cid::Cid;
use futures::{StreamExt as _, stream};
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument as _, Span, debug, trace, warn};

/// Keys of one request looked up concurrently by a discovery worker.
const MAX_CONCURRENT_FINDS: usize = 8;

struct FindRequest {
    scope: Scope,
    cids: Vec<Cid>,
}

/// Handle to the discovery and reprovide pools. Submissions wait for queue
/// space under the caller's scope.
#[derive(Clone)]
pub struct ProviderCoordinator {
    find_requests: flume::Sender<FindRequest>,
    provide_requests: flume::Sender<Cid>,
}

impl ProviderCoordinator {
    pub fn spawn<N: BitswapNetwork>(
        network: Arc<N>,
        config: &BitswapConfig,
        shutdown: CancellationToken,
        span: Span,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let (find_tx, find_rx) = flume::bounded(config.find_request_buffer);
        let (provide_tx, provide_rx) = flume::bounded(config.provide_buffer);
        let mut workers = Vec::with_capacity(config.discovery_workers + config.provide_workers);
        for _ in 0..config.discovery_workers {
            workers.push(tokio::spawn(
                discover(
                    network.clone(),
                    find_rx.clone(),
                    config.max_providers_per_request,
                    config.provider_request_timeout,
                    shutdown.clone(),
                )
                .instrument(span.clone()),
            ));
        }
        for _ in 0..config.provide_workers {
            workers.push(tokio::spawn(
                reprovide(
                    network.clone(),
                    provide_rx.clone(),
                    config.provide_timeout,
                    shutdown.clone(),
                )
                .instrument(span.clone()),
            ));
        }
        (
            Self {
                find_requests: find_tx,
                provide_requests: provide_tx,
            },
            workers,
        )
    }

    /// Queues a provider search for `cids`. Lookups and the connections they
    /// lead to are abandoned once `scope` ends.
    pub async fn find_providers(&self, scope: &Scope, cids: Vec<Cid>) -> Result<(), Error> {
        let request = FindRequest {
            scope: scope.clone(),
            cids,
        };
        scope
            .run(self.find_requests.send_async(request))
            .await?
            .map_err(|_| Error::Closed)
    }

    /// Queues `cid` for announcement, waiting for room at most until `scope`
    /// ends.
    pub async fn provide(&self, scope: &Scope, cid: Cid) -> Result<(), Error> {
        scope
            .run(self.provide_requests.send_async(cid))
            .await?
            .map_err(|_| Error::Closed)
    }

    /// Blocks waiting to be announced.
    pub fn provide_queue_len(&self) -> usize {
        self.provide_requests.len()
    }
}

async fn discover<N: BitswapNetwork>(
    network: Arc<N>,
    requests: flume::Receiver<FindRequest>,
    max_providers: usize,
    request_timeout: Duration,
    shutdown: CancellationToken,
) {
    loop {
        let request = tokio::select! {
            _ = shutdown.cancelled() => break,
            request = requests.recv_async() => match request {
                Ok(request) => request,
                Err(_) => break,
            },
        };
        if request.scope.is_done() {
            continue;
        }
        let network = &network;
        let scope = &request.scope;
        let lookups = stream::iter(request.cids).for_each_concurrent(
            MAX_CONCURRENT_FINDS,
            |cid| async move {
                let query = scope.child_with_timeout(request_timeout);
                let connects = network
                    .find_providers_async(&query, cid, max_providers)
                    .take(max_providers)
                    .for_each_concurrent(None, |peer| {
                        let network = Arc::clone(network);
                        let query = query.clone();
                        async move {
                            match network.connect_to(&query, peer).await {
                                Ok(()) => trace!("connected to {peer}, a provider of {cid}"),
                                Err(e) => {
                                    debug!("failed to connect to provider {peer} of {cid}: {e:#}")
                                }
                            }
                        }
                    });
                if let Err(e) = query.run(connects).await {
                    debug!("provider lookup for {cid} ended: {e}");
                }
            },
        );
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = lookups => {}
        }
    }
}

async fn reprovide<N: BitswapNetwork>(
    network: Arc<N>,
    requests: flume::Receiver<Cid>,
    provide_timeout: Duration,
    shutdown: CancellationToken,
) {
    let root = Scope::from(shutdown.clone());
    loop {
        let cid = tokio::select! {
            _ = shutdown.cancelled() => break,
            cid = requests.recv_async() => match cid {
                Ok(cid) => cid,
                Err(_) => break,
            },
        };
        let scope = root.child_with_timeout(provide_timeout);
        match scope.run(network.provide(&scope, cid)).await {
            Ok(Ok(())) => trace!("provided {cid}"),
            Ok(Err(e)) => {
                metrics::inc(&metrics::values::PROVIDE_FAILURE);
                warn!("failed to provide {cid}: {e:#}");
            }
            Err(ScopeError::Cancelled) => break,
            Err(e) => {
                metrics::inc(&metrics::values::PROVIDE_FAILURE);
                warn!("failed to provide {cid}: {e}");
            }
        }
    }
}

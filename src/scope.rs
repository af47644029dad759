// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

use std::{future::Future, time::Duration};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum ScopeError {
    #[error("context canceled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// A cancellable unit of work with an optional deadline. Cancelling a scope
/// cancels every scope derived from it.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new().child_with_timeout(timeout)
    }

    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// The derived deadline never outlives the parent's.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            token: self.token.child_token(),
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why the scope ended, or `None` while it is still live.
    pub fn error(&self) -> Option<ScopeError> {
        if self.token.is_cancelled() {
            Some(ScopeError::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(ScopeError::DeadlineExceeded)
        } else {
            None
        }
    }

    pub fn is_done(&self) -> bool {
        self.error().is_some()
    }

    /// Resolves once the scope is cancelled or its deadline passes.
    pub async fn done(&self) -> ScopeError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.token.cancelled() => ScopeError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => ScopeError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                ScopeError::Cancelled
            }
        }
    }

    /// Owned variant of [`Scope::done`] for storing in long lived handles.
    pub fn into_done(self) -> impl Future<Output = ScopeError> + Send + 'static {
        async move { self.done().await }
    }

    /// Drives `fut` until it completes or the scope ends, whichever is first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, ScopeError> {
        if let Some(e) = self.error() {
            return Err(e);
        }
        tokio::select! {
            biased;
            out = fut => Ok(out),
            e = self.done() => Err(e),
        }
    }
}

impl From<CancellationToken> for Scope {
    fn from(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }
}

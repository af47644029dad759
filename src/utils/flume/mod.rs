// Copyright 2019-2026 ChainSafe Systems
// SPDX-License-Identifier: Apache-2.0, MIT

pub trait FlumeSenderExt<T> {
    /// Sends without surfacing the error, a closed channel only means the
    /// receiving actor has shut down.
    fn send_or_warn(&self, msg: T);
}

impl<T> FlumeSenderExt<T> for flume::Sender<T> {
    fn send_or_warn(&self, msg: T) {
        if let Err(e) = self.send(msg) {
            tracing::warn!("{e}");
        }
    }
}

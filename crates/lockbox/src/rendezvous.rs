// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! The one-shot startup handoff between the controller and a mount worker.
//!
//! The worker owns a [`Reporter`] and must report exactly once whether its
//! file endpoint came up. The controller owns the matching [`Rendezvous`]
//! and waits for that report before going any further with the session.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::oneshot;

use crate::{Error, Result};

#[cfg(test)]
#[path = "./rendezvous_test.rs"]
mod rendezvous_test;

/// The result of a worker's startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Startup {
    /// The endpoint is bound and about to accept its first request
    Ready(SocketAddr),
    Failed,
}

/// Create a connected reporter and rendezvous pair.
pub fn channel() -> (Reporter, Rendezvous) {
    let (tx, rx) = oneshot::channel();
    (Reporter { tx: Some(tx) }, Rendezvous { rx })
}

/// The worker's half of a startup rendezvous.
///
/// Reporting a second time is a broken worker and panics. A reporter that
/// is dropped without having reported resolves the rendezvous as
/// [`Startup::Failed`], so a worker that returns early or unwinds can
/// never leave the controller waiting.
#[derive(Debug)]
pub struct Reporter {
    tx: Option<oneshot::Sender<Startup>>,
}

impl Reporter {
    pub fn signal_ready(&mut self, endpoint: SocketAddr) {
        self.report(Startup::Ready(endpoint));
    }

    pub fn signal_failed(&mut self) {
        self.report(Startup::Failed);
    }

    pub fn has_reported(&self) -> bool {
        self.tx.is_none()
    }

    fn report(&mut self, result: Startup) {
        let Some(tx) = self.tx.take() else {
            panic!("worker reported its startup result more than once");
        };
        if tx.send(result).is_err() {
            // the controller stopped waiting, usually after a timeout
            tracing::debug!(?result, "startup result was not received");
        }
    }
}

impl Drop for Reporter {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Startup::Failed);
        }
    }
}

/// The controller's half of a startup rendezvous.
#[derive(Debug)]
pub struct Rendezvous {
    rx: oneshot::Receiver<Startup>,
}

impl Rendezvous {
    /// Wait for the worker's report, for as long as it takes.
    pub async fn wait(self) -> Startup {
        self.rx.await.unwrap_or(Startup::Failed)
    }

    /// Wait for the worker's report, giving up after `timeout`.
    pub async fn wait_for(self, timeout: Duration) -> Result<Startup> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| Error::StartupTimedOut(timeout))
    }
}

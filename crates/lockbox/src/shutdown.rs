// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use crate::backend::Mounter;
use crate::registry::MountRegistry;
use crate::session::SessionId;
use crate::Error;

#[cfg(test)]
#[path = "./shutdown_test.rs"]
mod shutdown_test;

/// The outcome of releasing every mount.
#[derive(Debug, Default)]
pub struct ShutdownReport {
    pub stopped: Vec<SessionId>,
    pub failed: Vec<(SessionId, Error)>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Stop every registered session in display order, leaving the registry empty.
///
/// A session that fails to stop is logged and reported but never keeps
/// the remaining sessions from being released.
pub async fn shutdown_all(registry: &mut MountRegistry, mounter: &dyn Mounter) -> ShutdownReport {
    let mut report = ShutdownReport::default();
    let sessions: Vec<_> = registry.drain().collect();
    tracing::debug!(count = sessions.len(), "releasing all mounts");
    for mut session in sessions {
        let id = session.id();
        match session.stop(mounter).await {
            Ok(()) => report.stopped.push(id),
            Err(err) => {
                tracing::error!(session = %id, source = ?session.source_path(), ?err, "failed to release mount");
                report.failed.push((id, err));
            }
        }
    }
    report
}

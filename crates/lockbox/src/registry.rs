// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::path::{Path, PathBuf};

use crate::backend::Mounter;
use crate::session::{MountSession, SessionId};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./registry_test.rs"]
mod registry_test;

/// A point-in-time view of one registered session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSummary {
    pub id: SessionId,
    pub name: String,
    pub source_path: PathBuf,
    pub mount_point: PathBuf,
}

impl From<&MountSession> for MountSummary {
    fn from(session: &MountSession) -> Self {
        Self {
            id: session.id(),
            name: session.name().to_string(),
            source_path: session.source_path().to_owned(),
            mount_point: session.mount_point().map(Path::to_owned).unwrap_or_default(),
        }
    }
}

/// A session that the registry refused to track.
///
/// The session is handed back still running, so that the caller can
/// stop it.
#[derive(Debug)]
pub struct Rejected {
    pub session: Box<MountSession>,
    pub error: Error,
}

/// The running sessions, in the order they were mounted.
///
/// Only the controller ever holds the registry, so nothing here locks.
/// Sessions leave the registry through [`MountRegistry::remove`], which
/// stops a session before letting go of it, or through the crate-internal
/// drain used at shutdown.
#[derive(Debug, Default)]
pub struct MountRegistry {
    sessions: Vec<MountSession>,
}

impl MountRegistry {
    /// Track a newly started session.
    ///
    /// Fails if a session for the same container is already tracked.
    pub fn add(&mut self, session: MountSession) -> std::result::Result<SessionId, Rejected> {
        if self.contains_source_path(session.source_path()) {
            return Err(Rejected {
                error: Error::AlreadyMounted(session.source_path().to_owned()),
                session: Box::new(session),
            });
        }
        let id = session.id();
        self.sessions.push(session);
        Ok(id)
    }

    /// Stop the identified session and forget it.
    ///
    /// The session is unlinked even when stopping it reports an error,
    /// since its worker has been joined by then either way.
    pub async fn remove(&mut self, id: SessionId, mounter: &dyn Mounter) -> Result<()> {
        let index = self
            .sessions
            .iter()
            .position(|s| s.id() == id)
            .ok_or(Error::UnknownSession(id))?;
        let result = self.sessions[index].stop(mounter).await;
        self.sessions.remove(index);
        result
    }

    /// Remove every session, oldest first, without stopping them.
    ///
    /// Callers are expected to stop each returned session.
    pub(crate) fn drain(&mut self) -> std::vec::Drain<'_, MountSession> {
        self.sessions.drain(..)
    }

    pub fn get(&self, id: SessionId) -> Option<&MountSession> {
        self.sessions.iter().find(|s| s.id() == id)
    }

    pub fn find_by_source_path(&self, source_path: &Path) -> Option<&MountSession> {
        let normalized = dunce::canonicalize(source_path).ok();
        self.sessions.iter().find(|s| {
            s.source_path() == source_path || Some(s.source_path()) == normalized.as_deref()
        })
    }

    pub fn contains_source_path(&self, source_path: &Path) -> bool {
        self.find_by_source_path(source_path).is_some()
    }

    /// The session at `index` in display order.
    pub fn nth(&self, index: usize) -> Option<&MountSession> {
        self.sessions.get(index)
    }

    pub fn ids(&self) -> Vec<SessionId> {
        self.sessions.iter().map(MountSession::id).collect()
    }

    pub fn list(&self) -> Vec<MountSummary> {
        self.sessions.iter().map(MountSummary::from).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MountSession> {
        self.sessions.iter()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

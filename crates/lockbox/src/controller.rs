// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! The controller context and its event loop.
//!
//! Every mount operation happens here, one event at a time, which is
//! what allows the registry to go without any locking.

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::backend::{Backends, Credentials};
use crate::liveness::LivenessMonitor;
use crate::notify::Notifier;
use crate::recent::RecentPaths;
use crate::registry::{MountRegistry, MountSummary, Rejected};
use crate::session::{MountSession, SessionId};
use crate::shutdown::{shutdown_all, ShutdownReport};
use crate::{config, Config, Error, Result};

#[cfg(test)]
#[path = "./controller_test.rs"]
mod controller_test;

/// Something the user asked for.
#[derive(Debug)]
pub enum UiAction {
    Mount {
        source_path: PathBuf,
        credentials: Credentials,
    },
    /// Mount an entry of the recently used list, by position
    MountRecent {
        index: usize,
        credentials: Credentials,
    },
    Unmount(Selector),
    Open(Selector),
    List,
    /// Show the recently used container paths
    ListRecent,
    ClearRecents,
    Quit,
}

/// Picks out one mount, either directly or by its position in the
/// listing, counting from zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    Id(SessionId),
    Position(usize),
}

impl From<SessionId> for Selector {
    fn from(id: SessionId) -> Self {
        Self::Id(id)
    }
}

/// Everything the controller reacts to.
#[derive(Debug)]
pub enum Event {
    Ui(UiAction),
    /// The operating system's mounts or devices changed somehow
    DevicesChanged,
    /// Another launch asked this controller to come forward
    Activate,
    Quit,
}

pub struct Controller {
    server: config::Server,
    open_on_mount: bool,
    backends: Backends,
    registry: MountRegistry,
    monitor: LivenessMonitor,
    recent: RecentPaths,
    recent_file: PathBuf,
    notifier: Arc<dyn Notifier>,
    mount_count: watch::Sender<usize>,
}

impl Controller {
    pub fn new(config: &Config, backends: Backends, notifier: Arc<dyn Notifier>) -> Self {
        let recent_file = config.recent.path.clone();
        let recent = match RecentPaths::load(&recent_file, config.recent.max_entries) {
            Ok(recent) => recent,
            Err(err) => {
                tracing::warn!(path = ?recent_file, ?err, "ignoring unreadable recent paths");
                RecentPaths::new(config.recent.max_entries)
            }
        };
        Self {
            server: config.server.clone(),
            open_on_mount: config.mount.open_on_mount,
            backends,
            registry: MountRegistry::default(),
            monitor: LivenessMonitor::new(config.monitor.debounce()),
            recent,
            recent_file,
            notifier,
            mount_count: watch::Sender::new(0),
        }
    }

    /// Follow the number of registered mounts as it changes.
    pub fn watch_mount_count(&self) -> watch::Receiver<usize> {
        self.mount_count.subscribe()
    }

    fn publish_mount_count(&self) {
        self.mount_count.send_replace(self.registry.len());
    }

    /// Mount the container at `source_path`.
    ///
    /// A container that is already mounted is rejected before any worker
    /// is started for it.
    pub async fn add_mount(
        &mut self,
        source_path: &Path,
        credentials: Credentials,
    ) -> Result<SessionId> {
        if let Some(existing) = self.registry.find_by_source_path(source_path) {
            return Err(Error::AlreadyMounted(existing.source_path().to_owned()));
        }
        let session =
            MountSession::start(source_path, credentials, &self.backends, &self.server).await?;
        let source = session.source_path().to_owned();
        let name = session.name().to_string();
        let mount_point = session.mount_point().map(Path::to_owned).unwrap_or_default();
        let id = match self.registry.add(session) {
            Ok(id) => id,
            Err(Rejected { mut session, error }) => {
                if let Err(err) = session.stop(self.backends.mounter.as_ref()).await {
                    tracing::warn!(?err, "failed to stop a session that was not registered");
                }
                return Err(error);
            }
        };
        self.publish_mount_count();

        self.recent.use_path(&source);
        self.save_recent();
        self.notifier.notify(
            "Mounted",
            &format!("{name} is available at {}", mount_point.display()),
        );
        if self.open_on_mount {
            if let Err(err) = self.backends.mounter.open(&mount_point).await {
                tracing::warn!(session = %id, ?err, "failed to open new mount");
            }
        }
        Ok(id)
    }

    /// Stop and forget a mount.
    ///
    /// The mount is forgotten even if it could not be detached, in which
    /// case the detach error is returned.
    pub async fn remove_mount(&mut self, id: SessionId) -> Result<()> {
        let name = self
            .registry
            .get(id)
            .map(|s| s.name().to_string())
            .ok_or(Error::UnknownSession(id))?;
        let removed = self
            .registry
            .remove(id, self.backends.mounter.as_ref())
            .await;
        self.publish_mount_count();
        removed?;
        self.notifier
            .notify("Stopped", &format!("{name} was unmounted"));
        Ok(())
    }

    pub fn list_mounts(&self) -> Vec<MountSummary> {
        self.registry.list()
    }

    pub fn is_source_mounted(&self, source_path: &Path) -> bool {
        self.registry.contains_source_path(source_path)
    }

    /// Release every mount, oldest first.
    pub async fn shutdown_all(&mut self) -> ShutdownReport {
        let report = shutdown_all(&mut self.registry, self.backends.mounter.as_ref()).await;
        self.publish_mount_count();
        for (_, err) in &report.failed {
            self.notifier.notify_error("Unmount failed", err);
        }
        report
    }

    pub async fn open_mount(&self, id: SessionId) -> Result<()> {
        let session = self.registry.get(id).ok_or(Error::UnknownSession(id))?;
        let Some(mount_point) = session.mount_point() else {
            return Err(Error::UnknownSession(id));
        };
        self.backends.mounter.open(mount_point).await
    }

    pub fn recent(&self) -> &RecentPaths {
        &self.recent
    }

    pub fn monitor(&self) -> &LivenessMonitor {
        &self.monitor
    }

    /// React to one event, reporting whether the loop should end.
    pub async fn handle(&mut self, event: Event) -> ControlFlow<()> {
        match event {
            Event::Ui(UiAction::Quit) | Event::Quit => return ControlFlow::Break(()),
            Event::Ui(action) => self.handle_action(action).await,
            Event::DevicesChanged => self.monitor.devices_changed(Instant::now()),
            Event::Activate => self.activate().await,
        }
        ControlFlow::Continue(())
    }

    async fn handle_action(&mut self, action: UiAction) {
        match action {
            UiAction::Mount {
                source_path,
                credentials,
            } => {
                if let Err(err) = self.add_mount(&source_path, credentials).await {
                    self.notifier.notify_error("Mount failed", &err);
                }
            }
            UiAction::MountRecent { index, credentials } => {
                let Some(source_path) = self.recent.get(index).map(Path::to_owned) else {
                    self.notifier
                        .notify_error("Mount failed", &Error::UnknownRecentPath(index));
                    return;
                };
                if let Err(err) = self.add_mount(&source_path, credentials).await {
                    self.notifier.notify_error("Mount failed", &err);
                }
            }
            UiAction::Unmount(selector) => {
                let removed = match self.select(selector) {
                    Ok(id) => self.remove_mount(id).await,
                    Err(err) => Err(err),
                };
                if let Err(err) = removed {
                    self.notifier.notify_error("Unmount failed", &err);
                }
            }
            UiAction::Open(selector) => {
                let opened = match self.select(selector) {
                    Ok(id) => self.open_mount(id).await,
                    Err(err) => Err(err),
                };
                if let Err(err) = opened {
                    self.notifier.notify_error("Open failed", &err);
                }
            }
            UiAction::List => self.notify_listing(),
            UiAction::ListRecent => self.notify_recent(),
            UiAction::ClearRecents => {
                self.recent.clear();
                self.save_recent();
            }
            UiAction::Quit => {}
        }
    }

    fn select(&self, selector: Selector) -> Result<SessionId> {
        match selector {
            Selector::Id(id) => Ok(id),
            Selector::Position(index) => self
                .registry
                .nth(index)
                .map(MountSession::id)
                .ok_or(Error::UnknownMountPosition(index)),
        }
    }

    /// The default action, taken when another launch hands over to us.
    async fn activate(&mut self) {
        if let Some(id) = self.registry.nth(0).map(MountSession::id) {
            if let Err(err) = self.open_mount(id).await {
                self.notifier.notify_error("Open failed", &err);
            }
            return;
        }
        let message = match self.recent.front() {
            Some(path) => format!("Lockbox is already running, last used {}", path.display()),
            None => "Lockbox is already running".to_string(),
        };
        self.notifier.notify("Lockbox", &message);
    }

    fn notify_listing(&self) {
        let mounts = self.registry.list();
        let message = if mounts.is_empty() {
            "No volumes are mounted".to_string()
        } else {
            mounts
                .iter()
                .enumerate()
                .map(|(i, m)| {
                    format!(
                        "{}. {} ({}) at {}",
                        i + 1,
                        m.name,
                        m.source_path.display(),
                        m.mount_point.display()
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };
        self.notifier.notify("Mounts", &message);
    }

    fn notify_recent(&self) {
        let message = if self.recent.is_empty() {
            "No recently used volumes".to_string()
        } else {
            self.recent
                .paths()
                .enumerate()
                .map(|(i, path)| format!("{}. {}", i + 1, path.display()))
                .collect::<Vec<_>>()
                .join("\n")
        };
        self.notifier.notify("Recent", &message);
    }

    fn save_recent(&self) {
        if let Err(err) = self.recent.save(&self.recent_file) {
            tracing::warn!(path = ?self.recent_file, ?err, "failed to save recent paths");
        }
    }

    async fn sweep(&mut self) {
        let removed = self
            .monitor
            .fire(
                &mut self.registry,
                self.backends.mounter.as_ref(),
                self.notifier.as_ref(),
            )
            .await;
        self.publish_mount_count();
        if !removed.is_empty() {
            tracing::debug!(count = removed.len(), "removed vanished mounts");
        }
    }

    /// Handle events until asked to quit or until every sender is gone,
    /// then release all mounts.
    pub async fn run(&mut self, mut events: mpsc::UnboundedReceiver<Event>) -> ShutdownReport {
        loop {
            let event = match self.monitor.deadline() {
                Some(deadline) => tokio::select! {
                    event = events.recv() => event,
                    _ = tokio::time::sleep_until(deadline) => {
                        self.sweep().await;
                        continue;
                    }
                },
                None => events.recv().await,
            };
            let Some(event) = event else {
                tracing::debug!("all event sources closed");
                break;
            };
            tracing::trace!(?event, "handling");
            if self.handle(event).await.is_break() {
                break;
            }
        }
        self.shutdown_all().await
    }
}

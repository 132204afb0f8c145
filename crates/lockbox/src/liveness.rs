// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Detection of mounts that went away without being stopped.
//!
//! The operating system tells us that *something* about its mounts or
//! devices changed, usually several times for one physical event. Those
//! notifications are debounced, and once they settle every registered
//! session is probed and the dead ones are removed.

use std::io::{Read, Seek, SeekFrom};
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::backend::Mounter;
use crate::controller::Event;
use crate::notify::Notifier;
use crate::registry::MountRegistry;
use crate::session::SessionId;
use crate::{Error, Result};

#[cfg(test)]
#[path = "./liveness_test.rs"]
mod liveness_test;

/// The kernel raises POLLPRI on this file whenever the mount table changes.
pub const MOUNT_TABLE: &str = "/proc/self/mountinfo";

/// A one-shot timer that is pushed back by every new notification.
///
/// Each notification bumps a revision counter, which lets whoever acts on
/// the timer tell whether more notifications arrived in the meantime.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    deadline: Option<Instant>,
    rev: u64,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
            rev: 0,
        }
    }

    /// Record a notification, (re)arming the timer.
    pub fn notify(&mut self, now: Instant) {
        self.rev = self.rev.wrapping_add(1);
        self.deadline = Some(now + self.window);
    }

    /// When the timer fires, if it is armed.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn rev(&self) -> u64 {
        self.rev
    }

    /// Disarm the timer, unless it was re-armed after `observed_rev`.
    ///
    /// Returns true if the timer was disarmed.
    pub fn settle(&mut self, observed_rev: u64) -> bool {
        if self.rev != observed_rev {
            return false;
        }
        self.deadline = None;
        true
    }
}

/// Turns device change notifications into sweeps of the registry.
#[derive(Debug)]
pub struct LivenessMonitor {
    debouncer: Debouncer,
    sweeps: u64,
}

impl LivenessMonitor {
    pub fn new(window: Duration) -> Self {
        Self {
            debouncer: Debouncer::new(window),
            sweeps: 0,
        }
    }

    pub fn devices_changed(&mut self, now: Instant) {
        self.debouncer.notify(now);
    }

    /// When the next sweep is due, if one is pending.
    pub fn deadline(&self) -> Option<Instant> {
        self.debouncer.deadline()
    }

    /// How many sweeps have run so far.
    pub fn sweeps(&self) -> u64 {
        self.sweeps
    }

    /// Run the pending sweep, returning the sessions that were removed.
    ///
    /// The timer stays armed if another notification was recorded while
    /// the sweep was running, so that change gets its own sweep.
    pub async fn fire(
        &mut self,
        registry: &mut MountRegistry,
        mounter: &dyn Mounter,
        notifier: &dyn Notifier,
    ) -> Vec<SessionId> {
        let rev = self.debouncer.rev();
        let removed = sweep(registry, mounter, notifier).await;
        self.sweeps += 1;
        if !self.debouncer.settle(rev) {
            tracing::debug!("devices changed during sweep, another one is scheduled");
        }
        removed
    }
}

/// Remove every session whose mount is no longer live.
///
/// Removal goes through the same path as a user requested unmount, and
/// the user is told about each removed session once.
pub async fn sweep(
    registry: &mut MountRegistry,
    mounter: &dyn Mounter,
    notifier: &dyn Notifier,
) -> Vec<SessionId> {
    let snapshot: Vec<(SessionId, String, PathBuf)> = registry
        .iter()
        .filter_map(|s| {
            s.mount_point()
                .map(|mount_point| (s.id(), s.name().to_string(), mount_point.to_owned()))
        })
        .collect();

    let mut removed = Vec::new();
    for (id, name, mount_point) in snapshot {
        if mounter.is_live(&mount_point) {
            continue;
        }
        tracing::info!(session = %id, ?mount_point, "mount disappeared");
        if let Err(err) = registry.remove(id, mounter).await {
            tracing::warn!(session = %id, ?err, "error while reclaiming vanished mount");
        }
        notifier.notify("Stopped", &format!("{name} was unmounted"));
        removed.push(id);
    }
    removed
}

/// Watch `mount_table` on a dedicated thread, sending
/// [`Event::DevicesChanged`] for every change until the receiver is gone.
pub fn spawn_mount_table_watcher(
    mount_table: &Path,
    events: mpsc::UnboundedSender<Event>,
) -> Result<std::thread::JoinHandle<()>> {
    let mut file = std::fs::File::open(mount_table)
        .map_err(|err| Error::FileRead(mount_table.to_owned(), err))?;
    // the first read establishes the baseline that later changes are
    // reported against
    drain(&mut file).map_err(|err| Error::FileRead(mount_table.to_owned(), err))?;

    let path = mount_table.to_owned();
    std::thread::Builder::new()
        .name("lockbox-mount-watcher".into())
        .spawn(move || watch(path, file, events))
        .map_err(Error::WorkerSpawn)
}

fn watch(path: PathBuf, mut file: std::fs::File, events: mpsc::UnboundedSender<Event>) {
    const CLOSED_CHECK_INTERVAL: u16 = 1000;

    loop {
        let mut fds = [PollFd::new(file.as_fd(), PollFlags::POLLPRI)];
        let ready = match poll(&mut fds, PollTimeout::from(CLOSED_CHECK_INTERVAL)) {
            Ok(ready) => ready,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(err) => {
                tracing::error!(?path, ?err, "mount table watch failed");
                return;
            }
        };
        let changed = ready > 0
            && fds[0]
                .revents()
                .is_some_and(|flags| flags.intersects(PollFlags::POLLPRI | PollFlags::POLLERR));
        if !changed {
            if events.is_closed() {
                return;
            }
            continue;
        }
        if let Err(err) = drain(&mut file) {
            tracing::error!(?path, ?err, "failed to re-read mount table");
            return;
        }
        tracing::trace!("mount table changed");
        if events.send(Event::DevicesChanged).is_err() {
            // the receiver has stopped listening, no need to continue
            return;
        }
    }
}

fn drain(file: &mut std::fs::File) -> std::io::Result<()> {
    file.seek(SeekFrom::Start(0))?;
    let mut buf = Vec::new();
    file.read_to_end(&mut buf)?;
    Ok(())
}

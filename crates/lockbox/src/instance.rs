// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Making sure that only one controller runs for each user.
//!
//! Ownership is an exclusive `flock` on a well known lock file that is
//! held for as long as the controller lives. The owner's pid is published
//! in a slot file next to it, and every access to that slot happens under
//! a second, short lived lock so that a later launch can never read the
//! slot before the owner has written it.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use nix::sys::signal::{kill, Signal};
use nix::unistd::{getpid, Pid};

use crate::{Error, Result};

#[cfg(test)]
#[path = "./instance_test.rs"]
mod instance_test;

const LOCK_FILE: &str = "lockbox.lock";
const SLOT_LOCK_FILE: &str = "lockbox.slot.lock";
const SLOT_FILE: &str = "lockbox.pid";

/// Held by the one controller process for its whole lifetime.
pub struct InstanceGuard {
    _lock: Flock<File>,
    runtime_dir: PathBuf,
}

impl std::fmt::Debug for InstanceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceGuard")
            .field("runtime_dir", &self.runtime_dir)
            .finish_non_exhaustive()
    }
}

impl InstanceGuard {
    pub fn runtime_dir(&self) -> &Path {
        &self.runtime_dir
    }
}

/// The result of trying to become the controller.
#[derive(Debug)]
pub enum Claim {
    /// This process is now the controller
    Owner(InstanceGuard),
    /// Another controller already runs as the given process
    Forward(Pid),
}

/// Try to become the controller for `runtime_dir`.
pub fn claim(runtime_dir: &Path) -> Result<Claim> {
    std::fs::create_dir_all(runtime_dir)
        .map_err(|err| Error::FileWrite(runtime_dir.to_owned(), err))?;

    let slot_lock_path = runtime_dir.join(SLOT_LOCK_FILE);
    let slot_lock = Flock::lock(open_lock_file(&slot_lock_path)?, FlockArg::LockExclusive)
        .map_err(|(_, errno)| Error::InstanceLock(slot_lock_path.clone(), errno))?;

    let lock_path = runtime_dir.join(LOCK_FILE);
    let slot_path = runtime_dir.join(SLOT_FILE);
    let claim = match Flock::lock(open_lock_file(&lock_path)?, FlockArg::LockExclusiveNonblock) {
        Ok(lock) => {
            let pid = getpid();
            std::fs::write(&slot_path, pid.to_string())
                .map_err(|err| Error::FileWrite(slot_path.clone(), err))?;
            tracing::debug!(%pid, ?lock_path, "claimed controller instance");
            Claim::Owner(InstanceGuard {
                _lock: lock,
                runtime_dir: runtime_dir.to_owned(),
            })
        }
        Err((_, nix::errno::Errno::EWOULDBLOCK)) => Claim::Forward(read_owner(&slot_path)?),
        Err((_, errno)) => return Err(Error::InstanceLock(lock_path, errno)),
    };
    drop(slot_lock);
    Ok(claim)
}

/// Become the controller, or hand over to the one that already runs.
///
/// When another controller owns the instance, `on_forward` is called
/// with its pid and this process exits with the returned code. Being
/// unable to read or publish the owner aborts the process, as does
/// finding this very process named as some other owner.
pub fn claim_or_forward<F>(runtime_dir: &Path, on_forward: F) -> InstanceGuard
where
    F: FnOnce(Pid) -> i32,
{
    match claim(runtime_dir) {
        Ok(Claim::Owner(guard)) => guard,
        Ok(Claim::Forward(owner)) if owner == getpid() => {
            tracing::error!(%owner, "this process already owns the controller instance");
            std::process::abort();
        }
        Ok(Claim::Forward(owner)) => {
            tracing::info!(%owner, "controller is already running");
            std::process::exit(on_forward(owner));
        }
        Err(err) => {
            tracing::error!(?err, "controller instance slot is unusable");
            std::process::abort();
        }
    }
}

/// Ask the controller running as `owner` to activate itself.
pub fn request_activation(owner: Pid) -> Result<()> {
    kill(owner, Signal::SIGUSR1).map_err(|errno| Error::Signal(owner.as_raw(), errno))
}

fn open_lock_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o600)
        .open(path)
        .map_err(|err| Error::FileWrite(path.to_owned(), err))
}

fn read_owner(slot_path: &Path) -> Result<Pid> {
    let contents = std::fs::read_to_string(slot_path)
        .map_err(|err| Error::FileRead(slot_path.to_owned(), err))?;
    match contents.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(Pid::from_raw(pid)),
        _ => Err(Error::InstanceSlot(slot_path.to_owned())),
    }
}

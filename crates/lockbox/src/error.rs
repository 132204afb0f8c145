// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use miette::Diagnostic;
use thiserror::Error;

use crate::session::SessionId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Diagnostic, Debug, Error)]
#[diagnostic(
    url(
        "https://spkenv.dev/error_codes#{}",
        self.code().unwrap_or_else(|| Box::new("lockbox::generic"))
    )
)]
pub enum Error {
    /// A session could not be brought up; nothing was registered.
    #[error("Failed to start mount for {}", source_path.display())]
    #[diagnostic(code("lockbox::startup"))]
    StartupFailure {
        source_path: PathBuf,
        #[source]
        cause: Box<Error>,
    },
    /// The OS refused to detach a mount point that still appears live.
    #[error("Failed to unmount {}", mount_point.display())]
    #[diagnostic(code("lockbox::unmount"))]
    UnmountFailure {
        mount_point: PathBuf,
        #[source]
        cause: Box<Error>,
    },

    #[error("Volume is already mounted: {}", .0.display())]
    AlreadyMounted(PathBuf),
    #[error("No such mount: {0}")]
    UnknownSession(SessionId),
    #[error("No mount at position {}", .0 + 1)]
    UnknownMountPosition(usize),
    #[error("No recently used path at position {}", .0 + 1)]
    UnknownRecentPath(usize),

    #[error("Failed to open container {}", path.display())]
    EngineOpen {
        path: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    #[error("No free port on {ip} between {start} and {end}")]
    NoFreePort { ip: IpAddr, start: u16, end: u16 },
    #[error("Failed to bind file endpoint to {0}")]
    ServerBind(SocketAddr, #[source] io::Error),
    #[error("File endpoint failed: {0}")]
    Server(String),
    #[error("Mount worker reported a startup failure")]
    WorkerFailed,
    #[error("Mount worker did not report within {0:?}")]
    StartupTimedOut(Duration),
    #[error("Mount worker for {0} panicked")]
    WorkerPanicked(SessionId),
    #[error("Failed to spawn mount worker")]
    WorkerSpawn(#[source] io::Error),

    #[error("Failed to run {command}")]
    ProcessSpawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("{command} exited with {status}")]
    CommandFailed {
        command: String,
        status: std::process::ExitStatus,
    },
    #[error("Failed to create mount point under {}", .0.display())]
    MountPointCreate(PathBuf, #[source] io::Error),

    #[error("Failed to read {}", .0.display())]
    FileRead(PathBuf, #[source] io::Error),
    #[error("Failed to write {}", .0.display())]
    FileWrite(PathBuf, #[source] io::Error),
    #[error("Instance lock {} is unavailable", .0.display())]
    InstanceLock(PathBuf, #[source] nix::Error),
    #[error("Instance slot {} does not name a running controller", .0.display())]
    InstanceSlot(PathBuf),
    #[error("Failed to signal process {0}")]
    Signal(i32, #[source] nix::Error),

    #[error("Cannot load config, lock has been poisoned: {0}")]
    LockPoisonedRead(String),
    #[error("Cannot update config, lock has been poisoned: {0}")]
    LockPoisonedWrite(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error("{0}")]
    String(String),
}

impl Error {
    /// Wrap an error that prevented a session from starting.
    pub fn startup<P: Into<PathBuf>>(source_path: P, cause: Error) -> Self {
        Self::StartupFailure {
            source_path: source_path.into(),
            cause: Box::new(cause),
        }
    }

    /// Wrap an error that prevented a mount point from being detached.
    pub fn unmount<P: Into<PathBuf>>(mount_point: P, cause: Error) -> Self {
        Self::UnmountFailure {
            mount_point: mount_point.into(),
            cause: Box::new(cause),
        }
    }

    pub fn process_spawn_error<S: Into<String>>(command: S, source: io::Error) -> Self {
        Self::ProcessSpawn {
            command: command.into(),
            source,
        }
    }

    pub fn is_startup_failure(&self) -> bool {
        matches!(self, Self::StartupFailure { .. })
    }

    pub fn is_unmount_failure(&self) -> bool {
        matches!(self, Self::UnmountFailure { .. })
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Self::String(err)
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Self::String(err.to_string())
    }
}

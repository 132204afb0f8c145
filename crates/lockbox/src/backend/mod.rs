// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! The narrow interfaces through which sessions reach the encryption
//! engine, the local file endpoint and the operating system's mounts.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use relative_path::RelativePath;
use tokio_util::sync::CancellationToken;

use crate::Result;

mod command;
pub mod probe;

pub use command::CommandMounter;

/// Secret material used to unlock a container.
#[derive(Clone)]
pub struct Credentials {
    passphrase: String,
}

impl Credentials {
    pub fn new<S: Into<String>>(passphrase: S) -> Self {
        Self {
            passphrase: passphrase.into(),
        }
    }

    pub fn passphrase(&self) -> &str {
        &self.passphrase
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credentials(<redacted>)")
    }
}

/// The kind of an entry within an opened volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// A single file or directory within an opened volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
}

impl Entry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// An unlocked container, as produced by an [`Engine`].
///
/// Paths are always relative to the root of the volume.
pub trait Volume: Send + Sync + 'static {
    fn stat(&self, path: &RelativePath) -> std::io::Result<Entry>;
    fn read_dir(&self, path: &RelativePath) -> std::io::Result<Vec<Entry>>;
    fn read(&self, path: &RelativePath) -> std::io::Result<Vec<u8>>;
}

/// Unlocks containers.
pub trait Engine: Send + Sync + 'static {
    /// Open the container at `container`, failing if the credentials
    /// do not unlock it.
    fn open(&self, container: &Path, credentials: &Credentials) -> Result<Arc<dyn Volume>>;
}

/// Serves an opened volume over a local endpoint.
pub trait FileServer: Send + Sync + 'static {
    /// Serve `volume` on `bind` under the `/<name>/` prefix.
    ///
    /// Blocks until `stop` is cancelled. `on_ready` must be invoked exactly
    /// once with the bound address, after binding and before the first
    /// request is accepted. Returning without having called it means the
    /// endpoint never came up.
    fn serve(
        &self,
        volume: Arc<dyn Volume>,
        bind: SocketAddr,
        name: &str,
        stop: CancellationToken,
        on_ready: &mut dyn FnMut(SocketAddr),
    ) -> Result<()>;
}

/// Attaches local endpoints to the operating system as mounts.
#[async_trait::async_trait]
pub trait Mounter: Send + Sync + 'static {
    /// Attach the endpoint at `endpoint`, returning the new mount point.
    async fn attach(&self, endpoint: SocketAddr, name: &str) -> Result<PathBuf>;

    /// Detach a mount point previously returned by [`Mounter::attach`].
    async fn detach(&self, mount_point: &Path) -> Result<()>;

    /// Reveal the mount point to the user.
    async fn open(&self, mount_point: &Path) -> Result<()>;

    /// Clean up after a mount point that was detached by someone else.
    async fn release(&self, _mount_point: &Path) -> Result<()> {
        Ok(())
    }

    /// Whether the mount point still looks attached.
    fn is_live(&self, mount_point: &Path) -> bool {
        probe::is_still_mounted(mount_point)
    }
}

/// The collaborators that every session is started with.
#[derive(Clone)]
pub struct Backends {
    pub engine: Arc<dyn Engine>,
    pub server: Arc<dyn FileServer>,
    pub mounter: Arc<dyn Mounter>,
}

/// Format the url that a mount backend should attach for an endpoint.
pub fn endpoint_url(endpoint: SocketAddr, name: &str) -> String {
    format!("http://{endpoint}/{name}/")
}

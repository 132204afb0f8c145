// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! In-memory stand-ins for the engine, file server, mounter and notifier.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use relative_path::RelativePath;
use rstest::fixture;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backends, Credentials, Engine, Entry, EntryKind, FileServer, Mounter, Volume};
use crate::notify::Notifier;
use crate::{config, Error, Result};

pub const PASSPHRASE: &str = "correct horse";

pub fn init_logging() {
    let sub = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(tracing::Level::TRACE)
        .without_time()
        .with_test_writer()
        .finish();
    let _ = tracing::subscriber::set_global_default(sub);
}

#[fixture]
pub fn tmpdir() -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix("lockbox-test-")
        .tempdir()
        .expect("failed to create dir for test")
}

#[fixture]
pub fn creds() -> Credentials {
    Credentials::new(PASSPHRASE)
}

/// Server config that never waits on a misbehaving worker for long.
#[fixture]
pub fn server_config() -> config::Server {
    config::Server {
        startup_timeout_secs: 10,
        ..Default::default()
    }
}

/// An empty volume with only a root directory.
#[derive(Debug, Default)]
pub struct EmptyVolume;

impl Volume for EmptyVolume {
    fn stat(&self, path: &RelativePath) -> std::io::Result<Entry> {
        if path.as_str().is_empty() {
            return Ok(Entry {
                name: String::new(),
                kind: EntryKind::Directory,
                size: 0,
            });
        }
        Err(std::io::ErrorKind::NotFound.into())
    }

    fn read_dir(&self, path: &RelativePath) -> std::io::Result<Vec<Entry>> {
        self.stat(path).map(|_| Vec::new())
    }

    fn read(&self, _path: &RelativePath) -> std::io::Result<Vec<u8>> {
        Err(std::io::ErrorKind::NotFound.into())
    }
}

/// Unlocks any container with [`PASSPHRASE`].
#[derive(Debug, Default)]
pub struct FakeEngine {
    opens: AtomicUsize,
}

impl FakeEngine {
    /// How many containers were successfully opened.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl Engine for FakeEngine {
    fn open(&self, container: &Path, credentials: &Credentials) -> Result<Arc<dyn Volume>> {
        if credentials.passphrase() != PASSPHRASE {
            return Err(Error::EngineOpen {
                path: container.to_owned(),
                source: "wrong passphrase".into(),
            });
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(EmptyVolume))
    }
}

/// How a [`FakeServer`] behaves when asked to serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServeBehavior {
    /// Report ready, then serve until stopped
    #[default]
    Ready,
    /// Fail to bind without reporting
    FailToBind,
    /// Serve until stopped without ever reporting
    NeverReady,
}

#[derive(Debug, Default)]
pub struct FakeServer {
    behavior: Mutex<ServeBehavior>,
    serves: AtomicUsize,
    exits: AtomicUsize,
}

impl FakeServer {
    pub fn set_behavior(&self, behavior: ServeBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// How many times serving was started.
    pub fn serves(&self) -> usize {
        self.serves.load(Ordering::SeqCst)
    }

    /// How many serving calls have returned.
    pub fn exits(&self) -> usize {
        self.exits.load(Ordering::SeqCst)
    }
}

impl FileServer for FakeServer {
    fn serve(
        &self,
        _volume: Arc<dyn Volume>,
        bind: SocketAddr,
        _name: &str,
        stop: CancellationToken,
        on_ready: &mut dyn FnMut(SocketAddr),
    ) -> Result<()> {
        self.serves.fetch_add(1, Ordering::SeqCst);
        let behavior = *self.behavior.lock().unwrap();
        let result = match behavior {
            ServeBehavior::FailToBind => Err(Error::ServerBind(
                bind,
                std::io::ErrorKind::AddrInUse.into(),
            )),
            ServeBehavior::Ready | ServeBehavior::NeverReady => {
                if behavior == ServeBehavior::Ready {
                    on_ready(bind);
                }
                tokio::runtime::Builder::new_current_thread()
                    .build()
                    .map_err(|err| Error::Server(err.to_string()))
                    .map(|rt| rt.block_on(stop.cancelled()))
            }
        };
        self.exits.fetch_add(1, Ordering::SeqCst);
        result
    }
}

/// Attaches endpoints as plain directories and tracks which are "live".
#[derive(Debug)]
pub struct FakeMounter {
    root: tempfile::TempDir,
    live: Mutex<HashSet<PathBuf>>,
    next: AtomicUsize,
    fail_attach: AtomicBool,
    fail_detach: AtomicBool,
    attaches: AtomicUsize,
    detaches: AtomicUsize,
    opened: Mutex<Vec<PathBuf>>,
    released: Mutex<Vec<PathBuf>>,
    probes: AtomicUsize,
}

impl Default for FakeMounter {
    fn default() -> Self {
        Self {
            root: tmpdir(),
            live: Default::default(),
            next: Default::default(),
            fail_attach: Default::default(),
            fail_detach: Default::default(),
            attaches: Default::default(),
            detaches: Default::default(),
            opened: Default::default(),
            released: Default::default(),
            probes: Default::default(),
        }
    }
}

impl FakeMounter {
    pub fn fail_attach(&self, fail: bool) {
        self.fail_attach.store(fail, Ordering::SeqCst);
    }

    pub fn fail_detach(&self, fail: bool) {
        self.fail_detach.store(fail, Ordering::SeqCst);
    }

    /// Make a mount disappear as if someone else unmounted it.
    pub fn unmount_externally(&self, mount_point: &Path) {
        self.live.lock().unwrap().remove(mount_point);
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }

    pub fn attaches(&self) -> usize {
        self.attaches.load(Ordering::SeqCst)
    }

    pub fn detaches(&self) -> usize {
        self.detaches.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn opened(&self) -> Vec<PathBuf> {
        self.opened.lock().unwrap().clone()
    }

    /// Mount points cleaned up after they vanished.
    pub fn released(&self) -> Vec<PathBuf> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl Mounter for FakeMounter {
    async fn attach(&self, _endpoint: SocketAddr, name: &str) -> Result<PathBuf> {
        self.attaches.fetch_add(1, Ordering::SeqCst);
        if self.fail_attach.load(Ordering::SeqCst) {
            return Err("attach refused".into());
        }
        let n = self.next.fetch_add(1, Ordering::SeqCst);
        let mount_point = self.root.path().join(format!("{name}.{n}"));
        std::fs::create_dir(&mount_point)
            .map_err(|err| Error::MountPointCreate(mount_point.clone(), err))?;
        self.live.lock().unwrap().insert(mount_point.clone());
        Ok(mount_point)
    }

    async fn detach(&self, mount_point: &Path) -> Result<()> {
        self.detaches.fetch_add(1, Ordering::SeqCst);
        if self.fail_detach.load(Ordering::SeqCst) {
            return Err("detach refused".into());
        }
        if !self.live.lock().unwrap().remove(mount_point) {
            return Err("not mounted".into());
        }
        Ok(())
    }

    async fn open(&self, mount_point: &Path) -> Result<()> {
        self.opened.lock().unwrap().push(mount_point.to_owned());
        Ok(())
    }

    async fn release(&self, mount_point: &Path) -> Result<()> {
        self.released.lock().unwrap().push(mount_point.to_owned());
        Ok(())
    }

    fn is_live(&self, mount_point: &Path) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.live.lock().unwrap().contains(mount_point)
    }
}

/// The fake collaborators, kept reachable for inspection.
#[derive(Default)]
pub struct FakeBackends {
    pub engine: Arc<FakeEngine>,
    pub server: Arc<FakeServer>,
    pub mounter: Arc<FakeMounter>,
}

impl FakeBackends {
    pub fn backends(&self) -> Backends {
        Backends {
            engine: self.engine.clone(),
            server: self.server.clone(),
            mounter: self.mounter.clone(),
        }
    }
}

#[fixture]
pub fn fakes() -> FakeBackends {
    FakeBackends::default()
}

/// Collects every notification for later inspection.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn titles(&self) -> Vec<String> {
        self.messages().into_iter().map(|(title, _)| title).collect()
    }

    pub fn count(&self, title: &str) -> usize {
        self.messages().iter().filter(|(t, _)| t == title).count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, title: &str, message: &str) {
        self.messages
            .lock()
            .unwrap()
            .push((title.to_string(), message.to_string()));
    }
}

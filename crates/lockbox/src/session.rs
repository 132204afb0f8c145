// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! A single mounted container and the worker thread serving it.

use std::net::{IpAddr, SocketAddr, TcpListener};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::backend::{Backends, Credentials, Engine, FileServer, Mounter};
use crate::rendezvous::{self, Rendezvous, Reporter, Startup};
use crate::{config, Error, Result};

#[cfg(test)]
#[path = "./session_test.rs"]
mod session_test;

/// Identifies a session for as long as it exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(ulid::Ulid);

impl SessionId {
    fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Starting,
    Running,
    StopRequested,
    Stopped,
    /// Startup did not complete, the worker is gone
    Failed,
}

/// One mounted container.
///
/// A session owns exactly one worker thread. Once started it must be
/// shut down with [`MountSession::stop`]; dropping a session that still
/// has a worker only asks the worker to exit without waiting for it.
#[derive(Debug)]
pub struct MountSession {
    id: SessionId,
    source_path: PathBuf,
    name: String,
    endpoint: Option<SocketAddr>,
    mount_point: Option<PathBuf>,
    state: SessionState,
    worker: Option<JoinHandle<Result<()>>>,
    stop: CancellationToken,
}

impl MountSession {
    /// Bring up a session for the container at `source_path`.
    ///
    /// Returns only once the worker has reported that its endpoint is
    /// up and the endpoint has been attached as a mount. Any failure is
    /// wrapped as [`Error::StartupFailure`], and by then the worker has
    /// already been told to exit.
    pub async fn start(
        source_path: &Path,
        credentials: Credentials,
        backends: &Backends,
        server: &config::Server,
    ) -> Result<Self> {
        let source_path = normalize_source_path(source_path);
        let (mut session, rendezvous) = Self::spawn(
            source_path.clone(),
            credentials,
            Arc::clone(&backends.engine),
            Arc::clone(&backends.server),
            server,
        )
        .map_err(|err| Error::startup(&source_path, err))?;

        let startup = match server.startup_timeout() {
            Some(timeout) => rendezvous.wait_for(timeout).await,
            None => Ok(rendezvous.wait().await),
        };
        match session.finish_startup(startup, backends.mounter.as_ref()).await {
            Ok(()) => Ok(session),
            Err(err) => {
                tracing::error!(session = %session.id, source = ?source_path, ?err, "mount failed to start");
                Err(Error::startup(source_path, err))
            }
        }
    }

    fn spawn(
        source_path: PathBuf,
        credentials: Credentials,
        engine: Arc<dyn Engine>,
        server: Arc<dyn FileServer>,
        config: &config::Server,
    ) -> Result<(Self, Rendezvous)> {
        let id = SessionId::new();
        let name = mount_name(&source_path);
        let stop = CancellationToken::new();
        let (reporter, rendezvous) = rendezvous::channel();
        let params = WorkerParams {
            id,
            source_path: source_path.clone(),
            name: name.clone(),
            credentials,
            engine,
            server,
            bind_ip: config.bind_ip,
            ports: (config.port_range_start, config.port_range_end),
            stop: stop.clone(),
            reporter,
        };
        let worker = std::thread::Builder::new()
            .name(format!("lockbox-{name}"))
            .spawn(move || params.run())
            .map_err(Error::WorkerSpawn)?;
        tracing::debug!(session = %id, source = ?source_path, "spawned mount worker");
        let session = Self {
            id,
            source_path,
            name,
            endpoint: None,
            mount_point: None,
            state: SessionState::Starting,
            worker: Some(worker),
            stop,
        };
        Ok((session, rendezvous))
    }

    async fn finish_startup(
        &mut self,
        startup: Result<Startup>,
        mounter: &dyn Mounter,
    ) -> Result<()> {
        let endpoint = match startup {
            Ok(Startup::Ready(endpoint)) => endpoint,
            Ok(Startup::Failed) => {
                let cause = match self.join_worker().await {
                    Ok(()) => Error::WorkerFailed,
                    Err(err) => err,
                };
                self.state = SessionState::Failed;
                return Err(cause);
            }
            Err(err) => {
                // a worker that never reported cannot be trusted to notice
                // the request either, so it is left to exit on its own
                self.stop.cancel();
                self.worker = None;
                self.state = SessionState::Failed;
                return Err(err);
            }
        };
        self.endpoint = Some(endpoint);

        match mounter.attach(endpoint, &self.name).await {
            Ok(mount_point) => {
                tracing::info!(session = %self.id, source = ?self.source_path, ?mount_point, %endpoint, "mounted");
                self.mount_point = Some(mount_point);
                self.state = SessionState::Running;
                Ok(())
            }
            Err(err) => {
                self.stop.cancel();
                if let Err(join_err) = self.join_worker().await {
                    tracing::warn!(session = %self.id, err = ?join_err, "worker exited with an error");
                }
                self.state = SessionState::Failed;
                Err(err)
            }
        }
    }

    /// Detach the mount, stop the worker and wait for it to exit.
    ///
    /// Calling this again after the session has stopped does nothing. A
    /// failed detach is ignored when the mount has already disappeared,
    /// otherwise it is reported as [`Error::UnmountFailure`] once the
    /// worker has been joined regardless.
    pub async fn stop(&mut self, mounter: &dyn Mounter) -> Result<()> {
        if self.worker.is_none() {
            return Ok(());
        }
        self.state = SessionState::StopRequested;

        let mut result = Ok(());
        if let Some(mount_point) = &self.mount_point {
            if let Err(err) = mounter.detach(mount_point).await {
                if mounter.is_live(mount_point) {
                    tracing::error!(session = %self.id, ?mount_point, ?err, "failed to unmount");
                    result = Err(Error::unmount(mount_point, err));
                } else {
                    tracing::debug!(session = %self.id, ?mount_point, ?err, "mount was already gone");
                    if let Err(err) = mounter.release(mount_point).await {
                        tracing::warn!(session = %self.id, ?mount_point, ?err, "failed to release mount point");
                    }
                }
            }
        }

        self.stop.cancel();
        match self.join_worker().await {
            Ok(()) => {}
            Err(err @ Error::WorkerPanicked(_)) if result.is_ok() => result = Err(err),
            Err(err) => {
                tracing::warn!(session = %self.id, ?err, "worker exited with an error");
            }
        }
        self.state = SessionState::Stopped;
        tracing::info!(session = %self.id, source = ?self.source_path, "stopped");
        result
    }

    async fn join_worker(&mut self) -> Result<()> {
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };
        let id = self.id;
        match tokio::task::spawn_blocking(move || handle.join()).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) | Err(_) => Err(Error::WorkerPanicked(id)),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn source_path(&self) -> &Path {
        &self.source_path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> Option<SocketAddr> {
        self.endpoint
    }

    pub fn mount_point(&self) -> Option<&Path> {
        self.mount_point.as_deref()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// True while this session still owns a worker thread.
    pub fn has_worker(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for MountSession {
    fn drop(&mut self) {
        if self.worker.is_some() {
            tracing::warn!(session = %self.id, "session dropped without being stopped");
            self.stop.cancel();
        }
    }
}

/// Everything a worker needs, moved into its thread.
struct WorkerParams {
    id: SessionId,
    source_path: PathBuf,
    name: String,
    credentials: Credentials,
    engine: Arc<dyn Engine>,
    server: Arc<dyn FileServer>,
    bind_ip: IpAddr,
    ports: (u16, u16),
    stop: CancellationToken,
    reporter: Reporter,
}

impl WorkerParams {
    fn run(self) -> Result<()> {
        let Self {
            id,
            source_path,
            name,
            credentials,
            engine,
            server,
            bind_ip,
            ports,
            stop,
            mut reporter,
        } = self;
        let _span = tracing::info_span!("worker", session = %id).entered();

        let result = engine
            .open(&source_path, &credentials)
            .and_then(|volume| {
                let port = find_free_port(bind_ip, ports.0, ports.1)?;
                let bind = SocketAddr::new(bind_ip, port);
                server.serve(volume, bind, &name, stop, &mut |endpoint| {
                    reporter.signal_ready(endpoint)
                })
            });
        if let Err(err) = &result {
            tracing::error!(source = ?source_path, ?err, "mount worker failed");
        }
        if !reporter.has_reported() {
            reporter.signal_failed();
        }
        result
    }
}

/// Find a port on `ip` between `start` and `end` that can currently be bound.
///
/// Candidates are tried in order from a random starting point, wrapping
/// around, so that concurrent sessions rarely race for the same port.
pub fn find_free_port(ip: IpAddr, start: u16, end: u16) -> Result<u16> {
    if start > end {
        return Err(Error::NoFreePort { ip, start, end });
    }
    let span = u32::from(end - start) + 1;
    let offset = rand::thread_rng().gen_range(0..span);
    for i in 0..span {
        let port = u32::from(start) + (offset + i) % span;
        let port = port as u16;
        match TcpListener::bind((ip, port)) {
            Ok(_) => return Ok(port),
            Err(err) => tracing::trace!(%ip, port, ?err, "port unavailable"),
        }
    }
    Err(Error::NoFreePort { ip, start, end })
}

fn normalize_source_path(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| path.to_owned())
}

/// The user facing name of a container, safe for use in a url path.
pub fn mount_name(source_path: &Path) -> String {
    let name: String = source_path
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_default()
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect();
    if name.trim_matches('.').is_empty() {
        "lockbox".to_string()
    } else {
        name
    }
}

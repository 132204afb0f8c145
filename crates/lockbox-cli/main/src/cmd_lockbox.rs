// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use lockbox::instance::{claim_or_forward, request_activation};
use lockbox::liveness::{spawn_mount_table_watcher, MOUNT_TABLE};
use lockbox::{Backends, CommandMounter, Config, Controller, Notifier, TracingNotifier};
use lockbox_cli_common as cli;
use lockbox_cli_common::CommandName;
use lockbox_vfs::{DirectoryEngine, HttpServer};
use tokio::sync::mpsc;

use crate::terminal::{self, ConsoleNotifier};
use crate::signal::Signals;

/// Mount containers as local volumes and keep them available.
///
/// Only one controller runs per user. Launching again while one is
/// running asks the running one to come forward and then exits.
#[derive(Debug, Parser)]
#[clap(name = "lockbox", version = lockbox::VERSION)]
pub struct CmdLockbox {
    #[clap(flatten)]
    pub logging: cli::Logging,

    /// Do not read commands from stdin, only react to signals
    #[clap(long)]
    no_console: bool,

    /// Containers to mount right away, each prompting for its passphrase
    #[clap(value_name = "PATH")]
    paths: Vec<PathBuf>,
}

impl CommandName for CmdLockbox {
    fn command_name(&self) -> &'static str {
        "lockbox"
    }
}

impl CmdLockbox {
    pub fn run(&mut self, config: &Config) -> Result<i32> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed to establish async runtime")?;

        let signals = {
            let _enter = rt.enter();
            Signals::install().context("Failed to install signal handlers")?
        };

        let guard = claim_or_forward(&config.instance.runtime_dir, |owner| {
            if !self.paths.is_empty() {
                tracing::warn!("paths are not passed on to the running controller");
            }
            match request_activation(owner) {
                Ok(()) => {
                    tracing::info!(%owner, "asked the running controller to come forward");
                    0
                }
                Err(err) => {
                    tracing::error!("{err}");
                    1
                }
            }
        });
        tracing::debug!(runtime_dir = ?guard.runtime_dir(), "claimed controller instance");

        let code = rt.block_on(self.run_async(config, signals))?;
        // blocking joins of unresponsive workers must not hold up the exit
        rt.shutdown_timeout(std::time::Duration::from_millis(250));
        drop(guard);
        Ok(code)
    }

    async fn run_async(&mut self, config: &Config, signals: Signals) -> Result<i32> {
        let (events, receiver) = mpsc::unbounded_channel();

        if let Err(err) = spawn_mount_table_watcher(Path::new(MOUNT_TABLE), events.clone()) {
            tracing::warn!("{err}, vanished mounts will not be noticed");
        }
        tokio::task::spawn(signals.forward(events.clone()));

        let notifier: Arc<dyn Notifier> = if self.no_console {
            Arc::new(TracingNotifier)
        } else {
            Arc::new(ConsoleNotifier)
        };
        let backends = Backends {
            engine: Arc::new(DirectoryEngine),
            server: Arc::new(HttpServer),
            mounter: Arc::new(CommandMounter::new(config.mount.clone())),
        };
        let mut controller = Controller::new(config, backends, notifier);

        if self.no_console {
            if !self.paths.is_empty() {
                tracing::warn!("paths can only be mounted from the console");
            }
        } else {
            terminal::spawn(
                std::mem::take(&mut self.paths),
                events.clone(),
                controller.watch_mount_count(),
            )
            .context("Failed to start the console")?;
        }
        drop(events);

        tracing::info!("lockbox is running");
        let report = controller.run(receiver).await;

        if report.is_clean() {
            tracing::info!(released = report.stopped.len(), "all mounts released");
            Ok(0)
        } else {
            tracing::error!(
                released = report.stopped.len(),
                failed = report.failed.len(),
                "some mounts could not be released"
            );
            Ok(1)
        }
    }
}

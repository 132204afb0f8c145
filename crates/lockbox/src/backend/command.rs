// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use super::{endpoint_url, Mounter};
use crate::config::Mount;
use crate::{Error, Result};

const MOUNT_POINT_PREFIX: &str = "bvmount.";

/// Attaches and detaches endpoints by running external programs.
///
/// Every attach gets a freshly created, uniquely named directory under
/// the configured root, which is removed again once the mount is
/// detached.
#[derive(Debug, Clone)]
pub struct CommandMounter {
    config: Mount,
}

impl CommandMounter {
    pub fn new(config: Mount) -> Self {
        Self { config }
    }

    fn create_mount_point(&self) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.config.root)
            .map_err(|err| Error::MountPointCreate(self.config.root.clone(), err))?;
        let template = self
            .config
            .root
            .join(format!("{MOUNT_POINT_PREFIX}XXXXXXXXXXX"));
        nix::unistd::mkdtemp(&template).map_err(|errno| {
            Error::MountPointCreate(self.config.root.clone(), std::io::Error::from(errno))
        })
    }

    fn render_args(&self, url: &str, name: &str, mount_point: &Path) -> Vec<String> {
        let mount_point = mount_point.to_string_lossy();
        self.config
            .attach_args
            .iter()
            .map(|arg| {
                arg.replace("{url}", url)
                    .replace("{name}", name)
                    .replace("{mount_point}", &mount_point)
            })
            .collect()
    }
}

async fn run(command: &str, args: &[String]) -> Result<()> {
    tracing::debug!(%command, ?args, "running");
    let status = tokio::process::Command::new(command)
        .args(args)
        .stdin(std::process::Stdio::null())
        .status()
        .await
        .map_err(|err| Error::process_spawn_error(command, err))?;
    if !status.success() {
        return Err(Error::CommandFailed {
            command: command.to_string(),
            status,
        });
    }
    Ok(())
}

#[async_trait::async_trait]
impl Mounter for CommandMounter {
    async fn attach(&self, endpoint: SocketAddr, name: &str) -> Result<PathBuf> {
        let mount_point = self.create_mount_point()?;
        let url = endpoint_url(endpoint, name);
        let args = self.render_args(&url, name, &mount_point);
        if let Err(err) = run(&self.config.attach_command, &args).await {
            if let Err(rm_err) = tokio::fs::remove_dir(&mount_point).await {
                tracing::warn!(?mount_point, err = ?rm_err, "failed to clean up unused mount point");
            }
            return Err(err);
        }
        tracing::info!(%url, ?mount_point, "attached");
        Ok(mount_point)
    }

    async fn detach(&self, mount_point: &Path) -> Result<()> {
        let args = [mount_point.to_string_lossy().into_owned()];
        run(&self.config.detach_command, &args).await?;
        self.release(mount_point).await
    }

    async fn release(&self, mount_point: &Path) -> Result<()> {
        if let Err(err) = tokio::fs::remove_dir(mount_point).await {
            tracing::debug!(?mount_point, ?err, "mount point was not removed");
        }
        Ok(())
    }

    async fn open(&self, mount_point: &Path) -> Result<()> {
        let args = [mount_point.to_string_lossy().into_owned()];
        run(&self.config.open_command, &args).await
    }
}

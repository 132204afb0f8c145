// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

use crate::Result;

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

static CONFIG: OnceCell<RwLock<Arc<Config>>> = OnceCell::new();

/// The first port of the IANA dynamic/private range.
pub const PRIVATE_PORT_START: u16 = 49152;
/// The last port of the IANA dynamic/private range.
pub const PRIVATE_PORT_END: u16 = 65535;

static FALLBACK_RUNTIME_ROOT: &str = "/tmp/lockbox";

fn runtime_root() -> PathBuf {
    dirs::runtime_dir()
        .map(|dir| dir.join("lockbox"))
        .unwrap_or_else(|| PathBuf::from(FALLBACK_RUNTIME_ROOT))
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Server {
    /// The address that every file endpoint listens on
    pub bind_ip: IpAddr,

    /// Lowest port that a file endpoint may be bound to
    pub port_range_start: u16,

    /// Highest port that a file endpoint may be bound to
    pub port_range_end: u16,

    /// Seconds to wait for a worker to report its startup result
    ///
    /// When zero, which is the default, the controller waits for as
    /// long as the worker takes.
    pub startup_timeout_secs: u64,
}

impl Default for Server {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port_range_start: PRIVATE_PORT_START,
            port_range_end: PRIVATE_PORT_END,
            startup_timeout_secs: 0,
        }
    }
}

impl Server {
    pub fn startup_timeout(&self) -> Option<Duration> {
        match self.startup_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Mount {
    /// Directory under which new mount points are created
    pub root: PathBuf,

    /// Program that attaches a file endpoint to a mount point
    pub attach_command: String,

    /// Arguments for the attach command
    ///
    /// `{url}`, `{name}` and `{mount_point}` are replaced with the
    /// endpoint url, the mount name and the mount point respectively.
    pub attach_args: Vec<String>,

    /// Program that detaches a mount point, given as its only argument
    pub detach_command: String,

    /// Program that reveals a mount point to the user, given as its only argument
    pub open_command: String,

    /// Reveal every new mount once it has been attached
    pub open_on_mount: bool,
}

impl Default for Mount {
    fn default() -> Self {
        Self {
            root: runtime_root().join("mounts"),
            attach_command: "mount".into(),
            attach_args: vec![
                "-t".into(),
                "davfs".into(),
                "{url}".into(),
                "{mount_point}".into(),
            ],
            detach_command: "umount".into(),
            open_command: "xdg-open".into(),
            open_on_mount: true,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Monitor {
    /// Quiet period after a mount table change before mounts are re-checked
    pub debounce_ms: u64,
}

impl Default for Monitor {
    fn default() -> Self {
        Self { debounce_ms: 250 }
    }
}

impl Monitor {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Instance {
    /// Directory holding the single-instance lock and owner slot
    pub runtime_dir: PathBuf,
}

impl Default for Instance {
    fn default() -> Self {
        Self {
            runtime_dir: runtime_root(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Recent {
    /// Where the recently used container paths are stored
    pub path: PathBuf,

    /// How many recently used container paths are remembered
    pub max_entries: usize,
}

impl Default for Recent {
    fn default() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_else(runtime_root);
        Self {
            path: data_dir.join("lockbox").join("recent_paths.json"),
            max_entries: 10,
        }
    }
}

/// Configuration values for lockbox.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    // These sub-types should aim to only have one level of
    // values within them, otherwise they become impossible to address
    // with environment variables.
    pub server: Server,
    pub mount: Mount,
    pub monitor: Monitor,
    pub instance: Instance,
    pub recent: Recent,
}

impl Config {
    /// Get the current loaded config, loading it if needed
    pub fn current() -> Result<Arc<Self>> {
        get_config()
    }

    /// Load the config from disk, even if it's already been loaded before
    pub fn load() -> Result<Self> {
        load_config()
    }

    /// Parse a config from toml, with defaults for anything left out
    pub fn load_string<S: AsRef<str>>(conf: S) -> Result<Self> {
        use config::{Config as RawConfig, File, FileFormat};

        let config = RawConfig::builder()
            .add_source(File::from_str(conf.as_ref(), FileFormat::Toml))
            .build()?;
        Ok(Config::deserialize(config)?)
    }

    /// Make this config the current global one
    pub fn make_current(self) -> Result<Arc<Self>> {
        // Note we don't know if we won the race to set the value here,
        // so we still need to try to update it.
        let config = CONFIG.get_or_try_init(|| -> Result<RwLock<Arc<Config>>> {
            Ok(RwLock::new(Arc::new(self.clone())))
        })?;

        let mut lock = config
            .write()
            .map_err(|err| crate::Error::LockPoisonedWrite(err.to_string()))?;
        *Arc::make_mut(&mut lock) = self;
        Ok(Arc::clone(&lock))
    }
}

/// Get the current lockbox config, fetching it from disk if needed.
pub fn get_config() -> Result<Arc<Config>> {
    let config = CONFIG.get_or_try_init(|| -> Result<RwLock<Arc<Config>>> {
        Ok(RwLock::new(Arc::new(load_config()?)))
    })?;
    let lock = config
        .read()
        .map_err(|err| crate::Error::LockPoisonedRead(err.to_string()))?;
    Ok(Arc::clone(&*lock))
}

/// Load the lockbox configuration from disk, even if it has already been loaded.
///
/// This includes the default, user, and system configurations (if they exist),
/// followed by any `LOCKBOX_<SECTION>_<NAME>` environment variables.
pub fn load_config() -> Result<Config> {
    use config::{Config as RawConfig, File};

    let mut config_builder = RawConfig::builder()
        // the system config can also be in any support format: toml, yaml, json, ini, etc
        .add_source(File::with_name("/etc/lockbox").required(false));
    if let Some(user_config) = dirs::config_dir() {
        let user_config = user_config.join("lockbox").join("lockbox");
        config_builder = config_builder
            .add_source(File::with_name(&format!("{}", user_config.display())).required(false));
    }

    for (var, value) in std::env::vars() {
        let Some(tail) = var.strip_prefix("LOCKBOX_") else {
            continue;
        };
        let Some((section, name)) = tail.split_once('_') else {
            // typically, a value with no section is not a configuration
            // value, and can be skipped (eg: LOCKBOX_LOG)
            continue;
        };

        let key = format!("{}.{}", section.to_lowercase(), name.to_lowercase());
        config_builder = config_builder.set_override(key, value)?;
    }

    let config = config_builder.build()?;
    Ok(Config::deserialize(config)?)
}

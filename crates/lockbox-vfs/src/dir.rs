// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lockbox::backend::{Entry, EntryKind};
use lockbox::{Credentials, Engine, Error, Result, Volume};
use relative_path::{Component, RelativePath};

#[cfg(test)]
#[path = "./dir_test.rs"]
mod dir_test;

/// When present in a container directory, the passphrase that unlocks it.
///
/// The file itself is never visible through the opened volume.
pub const PASSPHRASE_FILE: &str = ".lockbox-passphrase";

/// Opens plain directories as volumes, without any encryption.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectoryEngine;

impl Engine for DirectoryEngine {
    fn open(&self, container: &Path, credentials: &Credentials) -> Result<Arc<dyn Volume>> {
        let open_error = |source: Box<dyn std::error::Error + Send + Sync>| Error::EngineOpen {
            path: container.to_owned(),
            source,
        };
        let meta = std::fs::metadata(container).map_err(|err| open_error(err.into()))?;
        if !meta.is_dir() {
            return Err(open_error("not a directory".into()));
        }
        match std::fs::read_to_string(container.join(PASSPHRASE_FILE)) {
            Ok(expected) if expected.trim_end_matches(['\r', '\n']) == credentials.passphrase() => {}
            Ok(_) => return Err(open_error("incorrect passphrase".into())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(open_error(err.into())),
        }
        tracing::debug!(?container, "opened directory volume");
        Ok(Arc::new(DirectoryVolume::new(container)))
    }
}

/// A directory on the local filesystem, exposed as a volume.
#[derive(Debug, Clone)]
pub struct DirectoryVolume {
    root: PathBuf,
}

impl DirectoryVolume {
    /// Expose the directory at `root`.
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, path: &RelativePath) -> io::Result<PathBuf> {
        let normalized = path.normalize();
        for component in normalized.components() {
            match component {
                Component::ParentDir => {
                    return Err(io::Error::new(
                        io::ErrorKind::PermissionDenied,
                        "path escapes the volume",
                    ));
                }
                Component::Normal(PASSPHRASE_FILE) => {
                    return Err(io::ErrorKind::NotFound.into());
                }
                _ => {}
            }
        }
        Ok(normalized.to_logical_path(&self.root))
    }
}

fn entry(name: String, meta: &std::fs::Metadata) -> Entry {
    let kind = if meta.is_dir() {
        EntryKind::Directory
    } else {
        EntryKind::File
    };
    Entry {
        name,
        kind,
        size: if meta.is_dir() { 0 } else { meta.len() },
    }
}

impl Volume for DirectoryVolume {
    fn stat(&self, path: &RelativePath) -> io::Result<Entry> {
        let real = self.resolve(path)?;
        let meta = std::fs::metadata(&real)?;
        let name = path.file_name().unwrap_or_default().to_string();
        Ok(entry(name, &meta))
    }

    fn read_dir(&self, path: &RelativePath) -> io::Result<Vec<Entry>> {
        let real = self.resolve(path)?;
        let mut entries = Vec::new();
        for dirent in std::fs::read_dir(real)? {
            let dirent = dirent?;
            let name = dirent.file_name().to_string_lossy().into_owned();
            if name == PASSPHRASE_FILE {
                continue;
            }
            // entries that vanish or cannot be followed are left out
            let Ok(meta) = std::fs::metadata(dirent.path()) else {
                continue;
            };
            entries.push(entry(name, &meta));
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    fn read(&self, path: &RelativePath) -> io::Result<Vec<u8>> {
        std::fs::read(self.resolve(path)?)
    }
}

// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[cfg(test)]
#[path = "./recent_test.rs"]
mod recent_test;

/// The most recently mounted containers, newest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentPaths {
    #[serde(skip)]
    max_entries: usize,
    paths: VecDeque<PathBuf>,
}

impl RecentPaths {
    pub fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            paths: VecDeque::new(),
        }
    }

    /// Load the list stored at `path`.
    ///
    /// A missing file is an empty list.
    pub fn load(path: &Path, max_entries: usize) -> Result<Self> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::new(max_entries));
            }
            Err(err) => return Err(Error::FileRead(path.to_owned(), err)),
        };
        let mut recent: Self = serde_json::from_slice(&data)?;
        recent.max_entries = max_entries;
        recent.paths.truncate(max_entries);
        Ok(recent)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| Error::FileWrite(parent.to_owned(), err))?;
        }
        let data = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, data).map_err(|err| Error::FileWrite(path.to_owned(), err))
    }

    /// Move `path` to the front of the list, dropping the oldest entry
    /// if the list is full.
    pub fn use_path(&mut self, path: &Path) {
        self.paths.retain(|p| p != path);
        self.paths.push_front(path.to_owned());
        self.paths.truncate(self.max_entries);
    }

    pub fn clear(&mut self) {
        self.paths.clear();
    }

    pub fn front(&self) -> Option<&Path> {
        self.paths.front().map(PathBuf::as_path)
    }

    pub fn get(&self, index: usize) -> Option<&Path> {
        self.paths.get(index).map(PathBuf::as_path)
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.paths.iter().map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Heuristic liveness checks for attached mount points.

use std::path::Path;

use nix::errno::Errno;
use nix::sys::stat::{lstat, stat};

/// Report whether `mount_point` still appears to be a mount.
///
/// A mounted directory lives on a different device than its parent, so
/// once the two device ids agree again the mount is considered gone. This
/// cannot tell our mount apart from some other filesystem mounted in its
/// place, and a mount point whose parent itself changed device will be
/// misjudged. A missing path, or any failure to stat, reads as not live.
pub fn is_still_mounted(mount_point: &Path) -> bool {
    let child = match stat(mount_point) {
        Ok(st) => st,
        Err(Errno::ENOENT) => return false,
        Err(err) => {
            tracing::debug!(?mount_point, ?err, "failed to stat mount point");
            return false;
        }
    };
    let Some(parent) = mount_point.parent() else {
        // the root of the filesystem is always mounted
        return true;
    };
    let parent = if parent.as_os_str().is_empty() {
        Path::new(".")
    } else {
        parent
    };
    match lstat(parent) {
        Ok(st) => st.st_dev != child.st_dev,
        Err(err) => {
            tracing::debug!(?parent, ?err, "failed to stat mount point parent");
            false
        }
    }
}

#[cfg(test)]
mod probe_test {
    use rstest::rstest;

    use super::is_still_mounted;

    #[rstest]
    fn test_plain_directory_is_not_a_mount() {
        let tmpdir = tempfile::tempdir().unwrap();
        let dir = tmpdir.path().join("mnt");
        std::fs::create_dir(&dir).unwrap();
        assert!(!is_still_mounted(&dir));
    }

    #[rstest]
    fn test_missing_mount_point_is_not_live() {
        let tmpdir = tempfile::tempdir().unwrap();
        assert!(!is_still_mounted(&tmpdir.path().join("gone")));
    }

    #[rstest]
    fn test_root_is_live() {
        assert!(is_still_mounted(std::path::Path::new("/")));
    }
}

// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rstest::rstest;

use super::MountRegistry;
use crate::fixtures::*;
use crate::session::{MountSession, SessionState};
use crate::Error;

async fn start(fakes: &FakeBackends, path: &str) -> MountSession {
    MountSession::start(
        Path::new(path),
        creds(),
        &fakes.backends(),
        &server_config(),
    )
    .await
    .expect("session should start")
}

#[rstest]
#[tokio::test]
async fn test_list_keeps_insertion_order(fakes: FakeBackends) {
    let mut registry = MountRegistry::default();
    for path in ["/vol/b", "/vol/a", "/vol/c"] {
        registry.add(start(&fakes, path).await).unwrap();
    }
    let sources: Vec<_> = registry.list().into_iter().map(|m| m.source_path).collect();
    assert_eq!(
        sources,
        vec![
            PathBuf::from("/vol/b"),
            PathBuf::from("/vol/a"),
            PathBuf::from("/vol/c")
        ]
    );

    let ids = registry.ids();
    for id in ids {
        registry.remove(id, fakes.mounter.as_ref()).await.unwrap();
    }
    assert!(registry.is_empty());
}

#[rstest]
#[tokio::test]
async fn test_duplicate_source_rejected(fakes: FakeBackends) {
    let mut registry = MountRegistry::default();
    let id = registry.add(start(&fakes, "/vol/a").await).unwrap();

    let duplicate = start(&fakes, "/vol/a").await;
    let rejected = registry.add(duplicate).expect_err("same container twice");
    assert!(matches!(rejected.error, Error::AlreadyMounted(_)));
    assert_eq!(registry.len(), 1);
    assert_eq!(registry.find_by_source_path(Path::new("/vol/a")).unwrap().id(), id);

    let mut duplicate = rejected.session;
    assert_eq!(duplicate.state(), SessionState::Running, "handed back untouched");
    duplicate.stop(fakes.mounter.as_ref()).await.unwrap();
    assert_eq!(duplicate.state(), SessionState::Stopped);
    assert_eq!(fakes.server.exits(), 1, "the rejected worker was stopped");

    registry.remove(id, fakes.mounter.as_ref()).await.unwrap();
    assert_eq!(fakes.server.exits(), 2);
}

#[rstest]
#[tokio::test]
async fn test_remove_unknown(fakes: FakeBackends) {
    let mut registry = MountRegistry::default();
    let id = registry.add(start(&fakes, "/vol/a").await).unwrap();
    registry.remove(id, fakes.mounter.as_ref()).await.unwrap();

    let err = registry
        .remove(id, fakes.mounter.as_ref())
        .await
        .expect_err("already removed");
    assert!(matches!(err, Error::UnknownSession(_)));
}

#[rstest]
#[tokio::test]
async fn test_remove_unlinks_on_unmount_failure(fakes: FakeBackends) {
    let mut registry = MountRegistry::default();
    let id = registry.add(start(&fakes, "/vol/a").await).unwrap();
    fakes.mounter.fail_detach(true);

    let err = registry
        .remove(id, fakes.mounter.as_ref())
        .await
        .expect_err("detach refused");
    assert!(err.is_unmount_failure());
    assert!(registry.is_empty(), "a stuck mount must not stay registered");
    assert_eq!(fakes.server.exits(), 1);
}

#[rstest]
#[tokio::test]
async fn test_consistency_over_serial_operations(fakes: FakeBackends) {
    let mut registry = MountRegistry::default();
    let mut adds = 0;
    let mut removes = 0;
    let paths = ["/vol/a", "/vol/b", "/vol/c", "/vol/a", "/vol/d", "/vol/b"];
    for (i, path) in paths.iter().enumerate() {
        if registry.contains_source_path(Path::new(path)) {
            let id = registry.find_by_source_path(Path::new(path)).unwrap().id();
            registry.remove(id, fakes.mounter.as_ref()).await.unwrap();
            removes += 1;
        } else {
            registry.add(start(&fakes, path).await).unwrap();
            adds += 1;
        }
        if i % 2 == 1 {
            if let Some(id) = registry.nth(0).map(MountSession::id) {
                registry.remove(id, fakes.mounter.as_ref()).await.unwrap();
                removes += 1;
            }
        }

        assert_eq!(registry.len(), adds - removes);
        let unique: HashSet<_> = registry.iter().map(|s| s.source_path().to_owned()).collect();
        assert_eq!(unique.len(), registry.len(), "no source path appears twice");
        assert!(registry.iter().all(|s| s.state() == SessionState::Running));
    }

    for id in registry.ids() {
        registry.remove(id, fakes.mounter.as_ref()).await.unwrap();
    }
    assert_eq!(fakes.server.serves(), fakes.server.exits());
}

#[rstest]
fn test_empty_registry() {
    let registry = MountRegistry::default();
    assert!(registry.list().is_empty());
    assert!(registry.find_by_source_path(Path::new("/vol/a")).is_none());
}

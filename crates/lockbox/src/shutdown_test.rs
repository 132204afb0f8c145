// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::path::Path;

use rstest::rstest;

use super::shutdown_all;
use crate::fixtures::*;
use crate::registry::MountRegistry;
use crate::session::MountSession;

#[rstest]
#[tokio::test]
async fn test_shutdown_releases_everything(fakes: FakeBackends) {
    let mut registry = MountRegistry::default();
    let mut expected = Vec::new();
    for path in ["/vol/a", "/vol/b", "/vol/c"] {
        let session = MountSession::start(
            Path::new(path),
            creds(),
            &fakes.backends(),
            &server_config(),
        )
        .await
        .unwrap();
        expected.push(registry.add(session).unwrap());
    }

    let report = shutdown_all(&mut registry, fakes.mounter.as_ref()).await;
    assert!(report.is_clean());
    assert_eq!(report.stopped, expected, "sessions stop in display order");
    assert!(registry.is_empty());
    assert_eq!(fakes.server.exits(), 3);
    assert_eq!(fakes.mounter.live_count(), 0);
}

#[rstest]
#[tokio::test]
async fn test_shutdown_tolerates_failures(fakes: FakeBackends) {
    let mut registry = MountRegistry::default();
    for path in ["/vol/a", "/vol/b"] {
        let session = MountSession::start(
            Path::new(path),
            creds(),
            &fakes.backends(),
            &server_config(),
        )
        .await
        .unwrap();
        registry.add(session).unwrap();
    }
    fakes.mounter.fail_detach(true);

    let report = shutdown_all(&mut registry, fakes.mounter.as_ref()).await;
    assert_eq!(report.failed.len(), 2);
    assert!(report.failed.iter().all(|(_, err)| err.is_unmount_failure()));
    assert!(registry.is_empty());
    assert_eq!(fakes.server.exits(), 2, "every worker is still joined");
}

#[rstest]
#[tokio::test]
async fn test_shutdown_empty(fakes: FakeBackends) {
    let mut registry = MountRegistry::default();
    let report = shutdown_all(&mut registry, fakes.mounter.as_ref()).await;
    assert!(report.is_clean());
    assert!(report.stopped.is_empty());
}

// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::os::unix::process::ExitStatusExt;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};

use nix::sys::signal::Signal;
use nix::unistd::getpid;
use rstest::rstest;

use super::{claim, claim_or_forward, Claim, SLOT_FILE};
use crate::fixtures::*;
use crate::Error;

#[rstest]
fn test_first_claim_owns(tmpdir: tempfile::TempDir) {
    let runtime_dir = tmpdir.path().join("run");
    let Claim::Owner(guard) = claim(&runtime_dir).unwrap() else {
        panic!("first claim should own the instance");
    };
    assert_eq!(guard.runtime_dir(), runtime_dir);
    let slot = std::fs::read_to_string(runtime_dir.join(SLOT_FILE)).unwrap();
    assert_eq!(slot, getpid().to_string());
}

#[rstest]
fn test_second_claim_forwards_to_owner(tmpdir: tempfile::TempDir) {
    let _guard = match claim(tmpdir.path()).unwrap() {
        Claim::Owner(guard) => guard,
        Claim::Forward(_) => panic!("first claim should own the instance"),
    };
    match claim(tmpdir.path()).unwrap() {
        Claim::Forward(owner) => assert_eq!(owner, getpid()),
        Claim::Owner(_) => panic!("two owners for one instance"),
    }
}

#[rstest]
fn test_released_instance_can_be_claimed(tmpdir: tempfile::TempDir) {
    let first = claim(tmpdir.path()).unwrap();
    assert!(matches!(first, Claim::Owner(_)));
    drop(first);
    assert!(matches!(claim(tmpdir.path()).unwrap(), Claim::Owner(_)));
}

#[rstest]
fn test_corrupt_slot_is_an_error(tmpdir: tempfile::TempDir) {
    let _guard = claim(tmpdir.path()).unwrap();
    std::fs::write(tmpdir.path().join(SLOT_FILE), "not a pid").unwrap();
    let err = claim(tmpdir.path()).expect_err("slot cannot be read");
    assert!(matches!(err, Error::InstanceSlot(_)));
}

const RUNTIME_DIR_VAR: &str = "INSTANCE_TEST_RUNTIME_DIR";
const OWNER_VAR: &str = "INSTANCE_TEST_OWNER";
const FORWARDED: i32 = 42;
const FORWARDED_ELSEWHERE: i32 = 43;
const OWNED: i32 = 44;

/// Does nothing unless started by [`launch_second`], in which case it
/// plays a second launch of the controller and exits.
#[rstest]
fn test_second_launch() {
    let Some(runtime_dir) = std::env::var_os(RUNTIME_DIR_VAR) else {
        return;
    };
    let expected: i32 = std::env::var(OWNER_VAR)
        .ok()
        .and_then(|pid| pid.parse().ok())
        .unwrap_or_default();
    let _guard = claim_or_forward(Path::new(&runtime_dir), |owner| {
        if owner.as_raw() == expected {
            FORWARDED
        } else {
            FORWARDED_ELSEWHERE
        }
    });
    std::process::exit(OWNED);
}

/// Run [`test_second_launch`] in a new process of this test binary.
fn launch_second(runtime_dir: &Path) -> ExitStatus {
    let exe = std::env::current_exe().expect("test binary path");
    Command::new(exe)
        .args([
            "instance::instance_test::test_second_launch",
            "--exact",
            "--test-threads=1",
        ])
        .env(RUNTIME_DIR_VAR, runtime_dir)
        .env(OWNER_VAR, getpid().to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .expect("second launch should start")
}

#[rstest]
fn test_second_launch_forwards_and_exits(tmpdir: tempfile::TempDir) {
    let Claim::Owner(_guard) = claim(tmpdir.path()).unwrap() else {
        panic!("first claim should own the instance");
    };
    let status = launch_second(tmpdir.path());
    assert_eq!(
        status.code(),
        Some(FORWARDED),
        "exits with the forward code after being handed our pid: {status:?}"
    );
}

#[rstest]
fn test_second_launch_owns_a_free_instance(tmpdir: tempfile::TempDir) {
    let status = launch_second(tmpdir.path());
    assert_eq!(status.code(), Some(OWNED), "{status:?}");
    assert!(
        matches!(claim(tmpdir.path()).unwrap(), Claim::Owner(_)),
        "the instance is free again once that launch exited"
    );
}

#[rstest]
fn test_second_launch_aborts_on_corrupt_slot(tmpdir: tempfile::TempDir) {
    let _guard = claim(tmpdir.path()).unwrap();
    std::fs::write(tmpdir.path().join(SLOT_FILE), "not a pid").unwrap();
    let status = launch_second(tmpdir.path());
    assert_eq!(status.code(), None, "{status:?}");
    assert_eq!(status.signal(), Some(Signal::SIGABRT as i32));
}

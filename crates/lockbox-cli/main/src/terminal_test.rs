// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::path::PathBuf;

use lockbox::{Error, Event, UiAction};
use rstest::rstest;
use tokio::sync::{mpsc, watch};

use super::{confirms, describe, layout, quit_prompt, Command, Console};

/// Feed `input` to a console while `mounted` volumes are in use,
/// returning every event it sent.
fn run_console(input: &[&str], mounted: usize) -> Vec<Event> {
    let lines: Vec<std::io::Result<String>> = input.iter().map(|l| Ok(l.to_string())).collect();
    let (events, mut received) = mpsc::unbounded_channel();
    let (_count, mounted) = watch::channel(mounted);
    Console::new(Box::new(lines.into_iter()), events, mounted).run(Vec::new());
    let mut sent = Vec::new();
    while let Ok(event) = received.try_recv() {
        sent.push(event);
    }
    sent
}

#[rstest]
#[case("mount /data/vault.lbx", Command::Mount(PathBuf::from("/data/vault.lbx")))]
#[case("  mount   /data/my vault  ", Command::Mount(PathBuf::from("/data/my vault")))]
#[case("recent", Command::Recent)]
#[case("recent 2", Command::MountRecent(1))]
#[case("ls", Command::List)]
#[case("open 1", Command::Open(0))]
#[case("umount 3", Command::Unmount(2))]
#[case("clear-recents", Command::ClearRecents)]
#[case("exit", Command::Quit)]
#[case("?", Command::Help)]
fn test_parse_command(#[case] line: &str, #[case] expected: Command) {
    assert_eq!(line.parse::<Command>(), Ok(expected));
}

#[rstest]
#[case("mount")]
#[case("unmount")]
#[case("unmount 0")]
#[case("open first")]
#[case("list everything")]
#[case("format c:")]
fn test_parse_invalid_command(#[case] line: &str) {
    assert!(line.parse::<Command>().is_err(), "{line} should not parse");
}

#[rstest]
fn test_describe_includes_causes() {
    let err = Error::startup("/vol/a", Error::WorkerFailed);
    assert_eq!(
        describe(&err),
        "Failed to start mount for /vol/a\n  caused by: Mount worker reported a startup failure"
    );
}

#[rstest]
fn test_layout() {
    assert_eq!(layout("Mounted:", "a is ready"), "Mounted: a is ready");
    assert_eq!(layout("Mounts:", "1. a\n2. b"), "Mounts:\n1. a\n2. b");
}

#[rstest]
#[case(0, None)]
#[case(1, Some("1 volume is mounted, quit anyway? [y/N] "))]
#[case(3, Some("3 volumes are mounted, quit anyway? [y/N] "))]
fn test_quit_prompt(#[case] mounted: usize, #[case] expected: Option<&str>) {
    assert_eq!(quit_prompt(mounted).as_deref(), expected);
}

#[rstest]
#[case("y", true)]
#[case(" YES ", true)]
#[case("", false)]
#[case("n", false)]
#[case("yep", false)]
fn test_confirms(#[case] answer: &str, #[case] expected: bool) {
    assert_eq!(confirms(answer), expected);
}

#[rstest]
fn test_quit_without_mounts_needs_no_confirmation() {
    let sent = run_console(&["quit", "list"], 0);
    assert_eq!(sent.len(), 1, "{sent:?}");
    assert!(matches!(sent[0], Event::Ui(UiAction::Quit)));
}

#[rstest]
fn test_quit_with_mounts_asks_first() {
    let sent = run_console(&["quit", "n", "list", "quit", "yes", "list"], 2);
    assert_eq!(sent.len(), 2, "{sent:?}");
    assert!(matches!(sent[0], Event::Ui(UiAction::List)));
    assert!(matches!(sent[1], Event::Ui(UiAction::Quit)));
}

#[rstest]
fn test_unanswered_quit_still_quits_at_end_of_input() {
    let sent = run_console(&["quit"], 1);
    assert_eq!(sent.len(), 1, "{sent:?}");
    assert!(matches!(sent[0], Event::Quit), "closing stdin quits");
}

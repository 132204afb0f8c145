// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! The interactive front end of the controller.
//!
//! Commands are read from stdin on a dedicated thread and turned into
//! [`UiAction`]s, while notifications are written to the terminal.

use std::io::{self, BufRead};
use std::path::PathBuf;
use std::str::FromStr;

use console::{style, Term};
use lockbox::{Credentials, Event, Notifier, Selector, UiAction};
use tokio::sync::{mpsc, watch};

#[cfg(test)]
#[path = "./terminal_test.rs"]
mod terminal_test;

const HELP: &str = "\
mount PATH     mount the container at PATH
recent         list recently used containers
recent N       mount the Nth recently used container
list           list mounted volumes
open N         reveal the Nth mounted volume
unmount N      unmount the Nth mounted volume
clear-recents  forget all recently used containers
quit           unmount everything and exit, asking first if anything is mounted";

/// One line of console input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Mount(PathBuf),
    MountRecent(usize),
    Recent,
    List,
    Open(usize),
    Unmount(usize),
    ClearRecents,
    Quit,
    Help,
}

impl FromStr for Command {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (word, rest) = line
            .split_once(char::is_whitespace)
            .map(|(word, rest)| (word, rest.trim()))
            .unwrap_or((line, ""));
        let command = match (word, rest) {
            ("mount", "") => return Err("mount needs the path of a container".into()),
            ("mount", path) => Command::Mount(PathBuf::from(path)),
            ("recent", "") => Command::Recent,
            ("recent", n) => Command::MountRecent(position(n)?),
            ("list" | "ls", "") => Command::List,
            ("open", n) => Command::Open(position(n)?),
            ("unmount" | "umount", n) => Command::Unmount(position(n)?),
            ("clear-recents", "") => Command::ClearRecents,
            ("quit" | "exit", "") => Command::Quit,
            ("help" | "?", "") => Command::Help,
            _ => return Err(format!("unknown command '{line}', try 'help'")),
        };
        Ok(command)
    }
}

/// Parse a position as shown to the user, counting from one.
fn position(n: &str) -> Result<usize, String> {
    match n.parse::<usize>() {
        Ok(0) | Err(_) => Err(format!("expected a position starting at 1, got '{n}'")),
        Ok(n) => Ok(n - 1),
    }
}

/// The question asked before quitting with `mounted` volumes still in use.
fn quit_prompt(mounted: usize) -> Option<String> {
    match mounted {
        0 => None,
        1 => Some("1 volume is mounted, quit anyway? [y/N] ".into()),
        n => Some(format!("{n} volumes are mounted, quit anyway? [y/N] ")),
    }
}

fn confirms(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

/// Start reading commands from stdin on a dedicated thread.
///
/// Each of `initial` is mounted first, prompting for its passphrase.
/// When stdin closes the controller is asked to quit.
pub fn spawn(
    initial: Vec<PathBuf>,
    events: mpsc::UnboundedSender<Event>,
    mounted: watch::Receiver<usize>,
) -> io::Result<std::thread::JoinHandle<()>> {
    std::thread::Builder::new()
        .name("lockbox-console".into())
        .spawn(move || {
            let lines = Box::new(io::stdin().lock().lines());
            Console::new(lines, events, mounted).run(initial)
        })
}

struct Console {
    term: Term,
    lines: Box<dyn Iterator<Item = io::Result<String>>>,
    events: mpsc::UnboundedSender<Event>,
    mounted: watch::Receiver<usize>,
}

impl Console {
    fn new(
        lines: Box<dyn Iterator<Item = io::Result<String>>>,
        events: mpsc::UnboundedSender<Event>,
        mounted: watch::Receiver<usize>,
    ) -> Self {
        Self {
            term: Term::stderr(),
            lines,
            events,
            mounted,
        }
    }

    fn run(mut self, initial: Vec<PathBuf>) {
        for source_path in initial {
            if !self.mount(source_path) {
                return;
            }
        }
        loop {
            if self.term.is_term() {
                let _ = self.term.write_str("lockbox> ");
            }
            let line = match self.lines.next() {
                Some(Ok(line)) => line,
                Some(Err(err)) => {
                    tracing::warn!(?err, "failed to read from stdin");
                    let _ = self.events.send(Event::Quit);
                    return;
                }
                None => {
                    tracing::debug!("stdin closed");
                    let _ = self.events.send(Event::Quit);
                    return;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            let command = match line.parse::<Command>() {
                Ok(command) => command,
                Err(message) => {
                    let _ = self.term.write_line(&message);
                    continue;
                }
            };
            let sent = match command {
                Command::Help => {
                    let _ = self.term.write_line(HELP);
                    true
                }
                Command::Mount(source_path) => self.mount(source_path),
                Command::MountRecent(index) => match self.credentials("recent volume") {
                    Some(credentials) => self.send(UiAction::MountRecent { index, credentials }),
                    None => false,
                },
                Command::Recent => self.send(UiAction::ListRecent),
                Command::List => self.send(UiAction::List),
                Command::Open(n) => self.send(UiAction::Open(Selector::Position(n))),
                Command::Unmount(n) => self.send(UiAction::Unmount(Selector::Position(n))),
                Command::ClearRecents => self.send(UiAction::ClearRecents),
                Command::Quit if self.confirm_quit() => {
                    self.send(UiAction::Quit);
                    return;
                }
                Command::Quit => true,
            };
            if !sent {
                return;
            }
        }
    }

    /// Ask before quitting while anything is mounted.
    fn confirm_quit(&mut self) -> bool {
        let mounted = *self.mounted.borrow();
        let Some(prompt) = quit_prompt(mounted) else {
            return true;
        };
        let _ = self.term.write_str(&prompt);
        match self.lines.next() {
            Some(Ok(answer)) => confirms(&answer),
            _ => false,
        }
    }

    /// Returns false once the controller is no longer listening.
    fn send(&self, action: UiAction) -> bool {
        self.events.send(Event::Ui(action)).is_ok()
    }

    fn mount(&mut self, source_path: PathBuf) -> bool {
        let label = source_path.display().to_string();
        match self.credentials(&label) {
            Some(credentials) => self.send(UiAction::Mount {
                source_path,
                credentials,
            }),
            None => false,
        }
    }

    fn credentials(&mut self, label: &str) -> Option<Credentials> {
        let passphrase = if self.term.is_term() {
            let _ = self.term.write_str(&format!("Passphrase for {label}: "));
            self.term.read_secure_line().ok()
        } else {
            self.lines.next().and_then(|line| line.ok())
        };
        if passphrase.is_none() {
            let _ = self.events.send(Event::Quit);
        }
        passphrase.map(Credentials::new)
    }
}

/// Writes notifications to the terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, title: &str, message: &str) {
        tracing::debug!(%title, "{message}");
        let title = style(format!("{title}:")).bold().cyan();
        let _ = Term::stderr().write_line(&layout(title, message));
    }

    fn notify_error(&self, title: &str, err: &lockbox::Error) {
        tracing::debug!(%title, ?err, "reporting error");
        let title = style(format!("{title}:")).bold().red();
        let _ = Term::stderr().write_line(&layout(title, &describe(err)));
    }
}

fn layout<D: std::fmt::Display>(title: D, message: &str) -> String {
    if message.contains('\n') {
        format!("{title}\n{message}")
    } else {
        format!("{title} {message}")
    }
}

/// The error message followed by each of its causes.
fn describe(err: &lockbox::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(&format!("\n  caused by: {cause}"));
        source = cause.source();
    }
    message
}

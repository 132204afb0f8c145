// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Mount lifecycle and coordination for encrypted containers.
//!
//! A single controller process owns a [`MountRegistry`] of
//! [`MountSession`]s. Each session runs a dedicated worker thread that
//! serves the opened container over a local endpoint, and the controller
//! attaches that endpoint to the operating system as a mount.

#![deny(unsafe_op_in_unsafe_fn)]

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(any(test, feature = "test-fixtures"))]
pub mod fixtures;

pub mod backend;
pub mod config;
pub mod controller;
mod error;
pub mod instance;
pub mod liveness;
pub mod notify;
pub mod recent;
pub mod registry;
pub mod rendezvous;
pub mod session;
pub mod shutdown;

// re-exported to make downstream implementations easier
pub use async_trait::async_trait;
pub use backend::{Backends, CommandMounter, Credentials, Engine, FileServer, Mounter, Volume};
pub use controller::{Controller, Event, Selector, UiAction};
pub use error::{Error, Result};
pub use notify::{Notifier, TracingNotifier};
pub use registry::{MountRegistry, MountSummary};
pub use session::{MountSession, SessionId, SessionState};

pub use self::config::{get_config, load_config, Config};

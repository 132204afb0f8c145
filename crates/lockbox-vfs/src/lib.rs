// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Default engine and file endpoint implementations for lockbox
//!
//! Provides a pass-through engine that exposes a plain directory as a
//! volume, and a small read-only http endpoint that serves any volume.

#![deny(missing_docs)]

mod dir;
mod http;

pub use dir::{DirectoryEngine, DirectoryVolume, PASSPHRASE_FILE};
pub use http::HttpServer;

// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Common macros and argument structures for the lockbox command line

mod args;

pub use args::{configure_logging, log_filter, CommandName, Logging};

#[doc(hidden)]
pub mod __private {
    // Private re-exports for macros
    pub use {libc, lockbox};
}

// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;

#[cfg(test)]
#[path = "./args_test.rs"]
mod args_test;

const LOCKBOX_LOG: &str = "LOCKBOX_LOG";

/// Command line flags for configuring logging
#[derive(Debug, Clone, clap::Args)]
pub struct Logging {
    /// Make output more verbose, can be specified more than once
    #[clap(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Additionally log output to the provided file
    #[clap(long, global = true, env = "LOCKBOX_LOG_FILE", value_hint = clap::ValueHint::FilePath)]
    pub log_file: Option<PathBuf>,

    /// Send log output to syslog instead of stderr
    #[clap(long, global = true, env = "LOCKBOX_SYSLOG")]
    pub syslog: bool,
}

impl Logging {
    pub fn configure(&self) {
        configure_logging(self.verbose, self.syslog, self.log_file.as_deref());
    }
}

/// The filter directives for the given verbosity.
///
/// At the default verbosity an existing `LOCKBOX_LOG` value replaces the
/// default directives, and `RUST_LOG` is always appended last so that it
/// can override anything else.
pub fn log_filter(verbosity: u8, existing: Option<String>, overrides: Option<String>) -> String {
    let mut config = match verbosity {
        0 => existing.unwrap_or_else(|| "lockbox=info,warn".to_string()),
        1 => "lockbox=debug,info".to_string(),
        2 => "lockbox=trace,info".to_string(),
        3 => "lockbox=trace,debug".to_string(),
        _ => "trace".to_string(),
    };
    if let Some(overrides) = overrides {
        config.push(',');
        config.push_str(&overrides);
    }
    config
}

pub fn configure_logging(verbosity: u8, syslog: bool, log_file: Option<&std::path::Path>) {
    let config = log_filter(
        verbosity,
        std::env::var(LOCKBOX_LOG).ok(),
        std::env::var("RUST_LOG").ok(),
    );
    let env_filter = tracing_subscriber::filter::EnvFilter::from(config);

    if syslog {
        let identity = c"lockbox";
        let (options, facility) = Default::default();
        match syslog_tracing::Syslog::new(identity, options, facility) {
            Some(writer) => return install(writer, false, verbosity, env_filter),
            None => eprintln!("syslog is already in use, logging to stderr instead"),
        }
    }

    if let Some(path) = log_file {
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
        {
            Ok(file) => return install(Mutex::new(file), false, verbosity, env_filter),
            Err(err) => eprintln!("cannot open log file {}: {err}", path.display()),
        }
    }

    install(std::io::stderr, true, verbosity, env_filter);
}

fn install<W>(
    writer: W,
    ansi: bool,
    verbosity: u8,
    env_filter: tracing_subscriber::filter::EnvFilter,
) where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .without_time()
        .with_target(verbosity > 2)
        .with_ansi(ansi)
        .with_writer(writer);
    let sub = tracing_subscriber::registry().with(layer.with_filter(env_filter));
    if let Err(err) = tracing::subscriber::set_global_default(sub) {
        eprintln!("logging was already configured: {err}");
    }
}

/// The name used for a command in logs and error reports.
pub trait CommandName {
    fn command_name(&self) -> &str;
}

#[macro_export]
macro_rules! main {
    ($cmd:ident) => {
        fn main() {
            // because this function exits right away it does not
            // properly handle destruction of data, so we put the actual
            // logic into a separate function/scope
            std::process::exit(main2())
        }
        fn main2() -> i32 {
            let mut opt = $cmd::parse();
            let config = $crate::configure!(opt);

            let result = opt.run(&config);

            $crate::handle_result!(result)
        }
    };
}

#[macro_export]
macro_rules! configure {
    ($opt:ident) => {{
        $opt.logging.configure();
        tracing::debug!(command = $crate::CommandName::command_name(&$opt), "configured logging");

        match $crate::__private::lockbox::get_config() {
            Err(err) => {
                tracing::error!(err = ?err, "failed to load config");
                return 1;
            }
            Ok(config) => config,
        }
    }};
}

#[macro_export]
macro_rules! handle_result {
    ($result:ident) => {{
        match $result {
            Err(err) => match err.root_cause().downcast_ref::<std::io::Error>() {
                Some(io_err)
                    if std::matches!(
                        io_err.raw_os_error(),
                        Some($crate::__private::libc::ENOSPC)
                    ) =>
                {
                    tracing::error!("Out of disk space: {err:#}");
                    1
                }
                _ => {
                    tracing::error!("{err:#}");
                    1
                }
            },
            Ok(code) => code,
        }
    }};
}

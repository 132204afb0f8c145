// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use clap::Parser;
use rstest::rstest;

use super::{log_filter, Logging};

#[derive(Debug, Parser)]
struct Opt {
    #[clap(flatten)]
    logging: Logging,
}

#[rstest]
#[case(0, None, None, "lockbox=info,warn")]
#[case(0, Some("lockbox=warn"), None, "lockbox=warn")]
#[case(1, Some("lockbox=warn"), None, "lockbox=debug,info")]
#[case(3, None, Some("hyper=trace"), "lockbox=trace,debug,hyper=trace")]
#[case(7, None, None, "trace")]
fn test_log_filter(
    #[case] verbosity: u8,
    #[case] existing: Option<&str>,
    #[case] overrides: Option<&str>,
    #[case] expected: &str,
) {
    let actual = log_filter(
        verbosity,
        existing.map(String::from),
        overrides.map(String::from),
    );
    assert_eq!(actual, expected);
}

#[rstest]
fn test_logging_flags() {
    let opt = Opt::try_parse_from(["lockbox", "-vv", "--log-file", "/tmp/lockbox.log"])
        .expect("valid logging flags");
    assert_eq!(opt.logging.verbose, 2);
    assert_eq!(
        opt.logging.log_file.as_deref(),
        Some(std::path::Path::new("/tmp/lockbox.log"))
    );
}

// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use clap::Parser;
use lockbox_cli_common as cli;

mod cmd_lockbox;
mod terminal;
mod signal;

use cmd_lockbox::CmdLockbox;

cli::main!(CmdLockbox);

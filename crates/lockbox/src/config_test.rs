// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use rstest::rstest;

use super::{load_config, Config, PRIVATE_PORT_END, PRIVATE_PORT_START};

#[rstest]
fn test_config_defaults() {
    let config = Config::default();
    assert_eq!(config.server.bind_ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
    assert_eq!(config.server.port_range_start, PRIVATE_PORT_START);
    assert_eq!(config.server.port_range_end, PRIVATE_PORT_END);
    assert_eq!(config.server.startup_timeout(), None);
    assert_eq!(config.monitor.debounce(), Duration::from_millis(250));
    assert_eq!(config.recent.max_entries, 10);
    assert!(config.mount.open_on_mount, "new mounts are revealed by default");
}

#[rstest]
fn test_config_load_string_partial() {
    let config = Config::load_string(
        "[server]\nport_range_start = 50000\nstartup_timeout_secs = 5\n\n[monitor]\ndebounce_ms = 10\n",
    )
    .expect("valid toml config");
    assert_eq!(config.server.port_range_start, 50000);
    assert_eq!(config.server.port_range_end, PRIVATE_PORT_END);
    assert_eq!(config.server.startup_timeout(), Some(Duration::from_secs(5)));
    assert_eq!(config.monitor.debounce_ms, 10);
    assert_eq!(config.mount.detach_command, "umount");
}

#[rstest]
#[serial_test::serial(env)]
fn test_config_env_overrides() {
    // Safety: serialized with every other test that touches the environment
    unsafe {
        std::env::set_var("LOCKBOX_MONITOR_DEBOUNCE_MS", "42");
        std::env::set_var("LOCKBOX_MOUNT_OPEN_COMMAND", "true");
        std::env::set_var("LOCKBOX_LOG", "debug");
    }
    let config = load_config();
    unsafe {
        std::env::remove_var("LOCKBOX_MONITOR_DEBOUNCE_MS");
        std::env::remove_var("LOCKBOX_MOUNT_OPEN_COMMAND");
        std::env::remove_var("LOCKBOX_LOG");
    }
    let config = config.expect("config with env overrides");
    assert_eq!(config.monitor.debounce_ms, 42);
    assert_eq!(config.mount.open_command, "true");
}

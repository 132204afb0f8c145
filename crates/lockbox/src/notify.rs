// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

/// Receives the short messages that are shown to the user.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);

    fn notify_error(&self, title: &str, err: &crate::Error) {
        self.notify(title, &err.to_string());
    }
}

/// Sends every notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, title: &str, message: &str) {
        tracing::info!(%title, "{message}");
    }
}

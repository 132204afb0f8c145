// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use lockbox::Event;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio::sync::mpsc;

/// The signals that the controller reacts to.
///
/// These must be installed before the instance is claimed, since a
/// second launch may send the activation signal as soon as it can
/// read our pid, and the default action for it ends the process.
pub struct Signals {
    activate: Signal,
    interrupt: Signal,
    quit: Signal,
    terminate: Signal,
}

impl Signals {
    /// Install the handlers, which requires a runtime context.
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {
            activate: signal(SignalKind::user_defined1())?,
            interrupt: signal(SignalKind::interrupt())?,
            quit: signal(SignalKind::quit())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    /// Turn signals into controller events until the controller is gone.
    pub async fn forward(mut self, events: mpsc::UnboundedSender<Event>) {
        loop {
            let event = tokio::select! {
                _ = self.activate.recv() => Event::Activate,
                // we explicitly catch any signal related to interruption
                // so that every mount is released before exiting
                _ = self.interrupt.recv() => Event::Quit,
                _ = self.quit.recv() => Event::Quit,
                _ = self.terminate.recv() => Event::Quit,
            };
            tracing::debug!(?event, "received signal");
            if events.send(event).is_err() {
                break;
            }
        }
    }
}

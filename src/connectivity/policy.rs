// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Retry timing for the connectivity state machine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::settings::duration_ms;

/// How a broker connect attempt handles failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConnectMode {
    /// Back off and retry until the handshake succeeds.
    #[default]
    Blocking,
    /// Give up after one failed attempt.
    NonBlocking,
}

/// Fixed delays used while connecting and recovering.
///
/// All waits are fixed; there is no exponential backoff and no retry limit.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use cat_scale::connectivity::{ConnectMode, RetryPolicy};
///
/// let policy = RetryPolicy::new()
///     .with_broker_backoff(Duration::from_secs(5))
///     .with_recovery_mode(ConnectMode::NonBlocking);
/// assert_eq!(policy.network_poll, Duration::from_millis(500));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryPolicy {
    /// Wait between failed blocking handshakes.
    #[serde(with = "duration_ms")]
    pub broker_backoff: Duration,
    /// Association poll interval during bring-up.
    #[serde(with = "duration_ms")]
    pub network_poll: Duration,
    /// Association poll interval during recovery.
    #[serde(with = "duration_ms")]
    pub recovery_poll: Duration,
    /// Pause after detecting a lost broker session.
    #[serde(with = "duration_ms")]
    pub failure_pause: Duration,
    /// Wait between a fatal time failure and the restart request.
    #[serde(with = "duration_ms")]
    pub restart_delay: Duration,
    /// Connect mode used when recovering a lost session.
    pub recovery_mode: ConnectMode,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            broker_backoff: Duration::from_secs(2),
            network_poll: Duration::from_millis(500),
            recovery_poll: Duration::from_secs(1),
            failure_pause: Duration::from_secs(1),
            restart_delay: Duration::from_secs(2),
            recovery_mode: ConnectMode::Blocking,
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with the default delays.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the wait between failed blocking handshakes.
    #[must_use]
    pub fn with_broker_backoff(mut self, delay: Duration) -> Self {
        self.broker_backoff = delay;
        self
    }

    /// Sets the bring-up association poll interval.
    #[must_use]
    pub fn with_network_poll(mut self, interval: Duration) -> Self {
        self.network_poll = interval;
        self
    }

    /// Sets the recovery association poll interval.
    #[must_use]
    pub fn with_recovery_poll(mut self, interval: Duration) -> Self {
        self.recovery_poll = interval;
        self
    }

    /// Sets the pause after a lost session.
    #[must_use]
    pub fn with_failure_pause(mut self, pause: Duration) -> Self {
        self.failure_pause = pause;
        self
    }

    /// Sets the wait before a restart request.
    #[must_use]
    pub fn with_restart_delay(mut self, delay: Duration) -> Self {
        self.restart_delay = delay;
        self
    }

    /// Sets the connect mode used during recovery.
    #[must_use]
    pub fn with_recovery_mode(mut self, mode: ConnectMode) -> Self {
        self.recovery_mode = mode;
        self
    }
}

// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Platform collaborators used by the connectivity layer.
//!
//! The radio, the clock, the hardware watchdog and the reset line all
//! belong to the board support code. This module only names the narrow
//! capabilities the firmware core needs from them, plus host
//! implementations for running on an operating system that already manages
//! networking and time.

use chrono::{DateTime, Utc};

use crate::error::TimeSyncError;

/// Earliest wall-clock time accepted as synchronized (2020-01-01T00:00:00Z).
///
/// A clock reading before this means the time service never answered and
/// certificate validation would fail.
pub const MIN_VALID_UNIX_TIME: i64 = 1_577_836_800;

/// Returns true if `time` can be a synchronized wall-clock reading.
#[must_use]
pub fn is_time_valid(time: &DateTime<Utc>) -> bool {
    time.timestamp() > MIN_VALID_UNIX_TIME
}

/// Network association (Wi-Fi station) control.
pub trait Network {
    /// Starts associating with the configured access point.
    ///
    /// Association proceeds in the background; poll
    /// [`is_associated`](Self::is_associated) to observe completion.
    fn begin(&mut self);

    /// Returns true while the station is associated and has an address.
    fn is_associated(&self) -> bool;
}

/// Source of wall-clock time.
#[allow(async_fn_in_trait)]
pub trait TimeSource {
    /// Synchronizes the clock with a time service and returns the new time.
    ///
    /// # Errors
    ///
    /// Returns [`TimeSyncError`] if no time service answered.
    async fn synchronize(&mut self) -> Result<DateTime<Utc>, TimeSyncError>;

    /// Returns the current wall-clock time.
    fn now(&self) -> DateTime<Utc>;
}

/// Liveness signal for an external watchdog.
///
/// Must be fed at every point that can block for a long time; a watchdog
/// that is not fed resets the device.
pub trait Watchdog: Send + Sync {
    /// Signals that the firmware is still making progress.
    fn feed(&self);
}

impl<F> Watchdog for F
where
    F: Fn() + Send + Sync,
{
    fn feed(&self) {
        self();
    }
}

/// Full device reset, used only for unrecoverable conditions.
pub trait SystemReset: Send + Sync {
    /// Requests a full restart of the device.
    ///
    /// On hardware this does not return. Host implementations may return,
    /// in which case the caller stops with the fatal error that caused it.
    fn restart(&self);
}

impl<F> SystemReset for F
where
    F: Fn() + Send + Sync,
{
    fn restart(&self) {
        self();
    }
}

/// Network handled by the host operating system.
///
/// Reports itself as associated at all times.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostNetwork;

impl Network for HostNetwork {
    fn begin(&mut self) {
        tracing::debug!("Host network is managed by the operating system");
    }

    fn is_associated(&self) -> bool {
        true
    }
}

/// Clock kept in sync by the host operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl TimeSource for SystemClock {
    async fn synchronize(&mut self) -> Result<DateTime<Utc>, TimeSyncError> {
        Ok(Utc::now())
    }

    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

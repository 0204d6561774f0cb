// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Zero-point drift detection.

use tokio::time::Instant;

use crate::settings::ScaleSettings;

use super::IGNORE_LOW_THRESHOLD;

/// Hold-tracking state, owned by a [`TareDriftDetector`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TareState {
    /// The reading currently being held. Starts at negative infinity so no
    /// real reading matches it.
    pub last_hold_value: f32,
    /// When the hold timer was last (re)started. `None` until the first
    /// evaluation.
    pub last_hold_time: Option<Instant>,
}

impl Default for TareState {
    fn default() -> Self {
        Self {
            last_hold_value: f32::NEG_INFINITY,
            last_hold_time: None,
        }
    }
}

/// Why the detector asked for a re-tare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetareReason {
    /// The reading fell below [`IGNORE_LOW_THRESHOLD`].
    LowFault,
    /// A non-zero reading held longer than the tare hold time.
    Drift,
}

impl RetareReason {
    /// Status text shown while re-taring.
    #[must_use]
    pub fn display_text(self) -> &'static str {
        match self {
            Self::LowFault => "low tare...",
            Self::Drift => "new tare...",
        }
    }
}

/// Outcome of one [`TareDriftDetector::evaluate`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TareDecision {
    /// True if the reading is not new and must not be published.
    pub holding: bool,
    /// Set when the caller must zero the scale.
    pub retare: Option<RetareReason>,
}

impl TareDecision {
    fn moved() -> Self {
        Self {
            holding: false,
            retare: None,
        }
    }

    fn held() -> Self {
        Self {
            holding: true,
            retare: None,
        }
    }

    fn retare(reason: RetareReason) -> Self {
        Self {
            holding: true,
            retare: Some(reason),
        }
    }
}

/// Tracks whether readings hold near a non-zero value long enough to imply
/// zero-point drift.
///
/// Rules, first match wins:
///
/// 1. Below [`IGNORE_LOW_THRESHOLD`]: re-tare now, restart the hold timer.
/// 2. No hold yet, or moved more than `tare_hold_threshold` from the held
///    value: hold the new value. Not holding.
/// 3. Non-zero and unchanged: once held longer than `tare_hold_time`,
///    re-tare and restart the hold timer. Holding.
/// 4. Near zero and unchanged: restart the hold timer. Holding.
///
/// The detector only decides. Zeroing the scale is up to the caller.
#[derive(Debug, Clone, Default)]
pub struct TareDriftDetector {
    state: TareState,
}

impl TareDriftDetector {
    /// Creates a detector with no hold recorded.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current hold state.
    #[must_use]
    pub fn state(&self) -> TareState {
        self.state
    }

    /// Evaluates one stabilized reading taken at `now`.
    pub fn evaluate(&mut self, reading: f32, settings: &ScaleSettings, now: Instant) -> TareDecision {
        let threshold = settings.tare_hold_threshold;

        if reading < IGNORE_LOW_THRESHOLD {
            tracing::warn!(reading, "Weight super low, updating as new tare value");
            self.state.last_hold_time = Some(now);
            return TareDecision::retare(RetareReason::LowFault);
        }

        let Some(held_since) = self.state.last_hold_time else {
            return self.hold(reading, now);
        };
        if (reading - self.state.last_hold_value).abs() > threshold {
            return self.hold(reading, now);
        }

        if reading.abs() > threshold {
            let held_for = now.saturating_duration_since(held_since);
            if held_for > settings.tare_hold_time {
                tracing::info!(
                    reading,
                    held_for_secs = held_for.as_secs(),
                    "Weight holding, updating as new tare value"
                );
                self.state.last_hold_time = Some(now);
                return TareDecision::retare(RetareReason::Drift);
            }
            return TareDecision::held();
        }

        self.state.last_hold_time = Some(now);
        TareDecision::held()
    }

    fn hold(&mut self, reading: f32, now: Instant) -> TareDecision {
        self.state.last_hold_value = reading;
        self.state.last_hold_time = Some(now);
        TareDecision::moved()
    }
}

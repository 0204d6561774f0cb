// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scale tuning settings.
//!
//! [`ScaleSettings`] is an immutable snapshot. Updates arriving from the
//! shadow document are expressed as a [`SettingsPatch`] that is overlaid on
//! the current snapshot to produce a complete new one; a snapshot is never
//! mutated field by field while in use.
//!
//! The JSON representation uses the field names of the shadow document:
//!
//! ```
//! use cat_scale::ScaleSettings;
//!
//! let json = serde_json::to_value(ScaleSettings::default()).unwrap();
//! assert_eq!(json["numMeasurements"], 10);
//! assert_eq!(json["tareHoldTime"], 300_000);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default load-cell calibration factor.
pub const DEFAULT_CALIBRATION_FACTOR: f32 = -10800.0;

/// Default number of raw readings averaged per measurement.
pub const DEFAULT_NUM_MEASUREMENTS: u32 = 10;

/// Default weight above which the scale counts as occupied.
pub const DEFAULT_LARGE_THRESHOLD: f32 = 1.0;

/// Default step between consecutive readings that restarts averaging.
pub const DEFAULT_SMALL_THRESHOLD: f32 = 0.5;

/// Default band around a held value (and around zero) for drift detection.
pub const DEFAULT_TARE_HOLD_THRESHOLD: f32 = 0.25;

/// Default time a non-zero value must hold before the scale re-tares.
pub const DEFAULT_TARE_HOLD_TIME: Duration = Duration::from_secs(5 * 60);

/// Shortest accepted tare hold time.
pub const MIN_TARE_HOLD_TIME: Duration = Duration::from_secs(15);

/// Tuning parameters for weighing and drift detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScaleSettings {
    /// Raw-to-unit conversion factor applied by the sample source.
    pub calibration_factor: f32,
    /// Number of raw readings per averaged measurement.
    pub num_measurements: u32,
    /// Pre-check weight at or above which the scale counts as occupied.
    pub large_threshold: f32,
    /// Largest step between consecutive readings that keeps averaging going.
    pub small_threshold: f32,
    /// Band used both for "near zero" and for "still holding".
    pub tare_hold_threshold: f32,
    /// How long a non-zero value must hold before re-taring.
    #[serde(with = "duration_ms")]
    pub tare_hold_time: Duration,
}

impl Default for ScaleSettings {
    fn default() -> Self {
        Self {
            calibration_factor: DEFAULT_CALIBRATION_FACTOR,
            num_measurements: DEFAULT_NUM_MEASUREMENTS,
            large_threshold: DEFAULT_LARGE_THRESHOLD,
            small_threshold: DEFAULT_SMALL_THRESHOLD,
            tare_hold_threshold: DEFAULT_TARE_HOLD_THRESHOLD,
            tare_hold_time: DEFAULT_TARE_HOLD_TIME,
        }
    }
}

impl ScaleSettings {
    /// Checks the snapshot and normalizes the tare hold time.
    ///
    /// A tare hold time shorter than [`MIN_TARE_HOLD_TIME`] is raised to the
    /// minimum rather than rejected.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the calibration factor is zero
    /// or not finite, if no measurements are requested, or if a threshold is
    /// negative or not finite.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        if !self.calibration_factor.is_finite() || self.calibration_factor == 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "calibrationFactor",
                message: format!("{} is not a usable factor", self.calibration_factor),
            });
        }
        if self.num_measurements == 0 {
            return Err(ConfigError::InvalidValue {
                field: "numMeasurements",
                message: "must be at least 1".to_string(),
            });
        }
        for (field, value) in [
            ("largeThreshold", self.large_threshold),
            ("smallThreshold", self.small_threshold),
            ("tareHoldThreshold", self.tare_hold_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    message: format!("{value} must be a finite, non-negative weight"),
                });
            }
        }
        if self.tare_hold_time < MIN_TARE_HOLD_TIME {
            tracing::warn!(
                requested_ms = self.tare_hold_time.as_millis(),
                minimum_ms = MIN_TARE_HOLD_TIME.as_millis(),
                "Tare hold time below minimum, clamping"
            );
            self.tare_hold_time = MIN_TARE_HOLD_TIME;
        }
        Ok(self)
    }

    /// Number of readings taken by the quick occupancy pre-check.
    #[must_use]
    pub fn precheck_measurements(&self) -> u32 {
        (self.num_measurements / 2).max(1)
    }

    /// Overlays a patch on this snapshot and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the merged snapshot fails [`Self::validated`].
    pub fn merged(&self, patch: &SettingsPatch) -> Result<Self, ConfigError> {
        Self {
            calibration_factor: patch.calibration_factor.unwrap_or(self.calibration_factor),
            num_measurements: patch.num_measurements.unwrap_or(self.num_measurements),
            large_threshold: patch.large_threshold.unwrap_or(self.large_threshold),
            small_threshold: patch.small_threshold.unwrap_or(self.small_threshold),
            tare_hold_threshold: patch.tare_hold_threshold.unwrap_or(self.tare_hold_threshold),
            tare_hold_time: patch
                .tare_hold_time
                .map_or(self.tare_hold_time, Duration::from_millis),
        }
        .validated()
    }
}

/// A partial settings document, as found in shadow `desired` or `delta`
/// sections. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    /// New calibration factor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calibration_factor: Option<f32>,
    /// New measurement count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_measurements: Option<u32>,
    /// New occupancy threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large_threshold: Option<f32>,
    /// New restart threshold.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small_threshold: Option<f32>,
    /// New hold band.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tare_hold_threshold: Option<f32>,
    /// New hold time in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tare_hold_time: Option<u64>,
}

impl SettingsPatch {
    /// Returns true if the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Serializes a [`Duration`] as whole milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        // Hold times are minutes, far from the u64 limit
        #[allow(clippy::cast_possible_truncation)]
        let millis = value.as_millis() as u64;
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Outbound telemetry and shadow settings synchronization.
//!
//! Weight records go to the device telemetry topic:
//!
//! ```text
//! catScale/pub  {"time":"2024-05-01T12:00:00Z","weight":10.5,"tare":false}
//! ```
//!
//! Settings are reported as a full shadow document and updated from the
//! shadow's `get/accepted` and `update/delta` topics by the
//! [`ShadowSettingsHandler`].

mod shadow;

pub use shadow::{ShadowReport, ShadowSettingsHandler};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, Result};
use crate::protocol::Topics;
use crate::settings::ScaleSettings;

/// A weight the scale wants published.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightReport {
    /// Weight in calibrated units.
    pub weight: f32,
    /// True if the scale was just zeroed.
    pub tare: bool,
}

impl WeightReport {
    /// A regular weight reading.
    #[must_use]
    pub fn weight(weight: f32) -> Self {
        Self {
            weight,
            tare: false,
        }
    }

    /// The zero published right after a tare.
    #[must_use]
    pub fn tare() -> Self {
        Self {
            weight: 0.0,
            tare: true,
        }
    }
}

/// The JSON record sent to the telemetry topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightRecord {
    /// UTC timestamp, ISO-8601 with second precision.
    pub time: String,
    /// Weight in calibrated units.
    pub weight: f32,
    /// True if the scale was just zeroed.
    pub tare: bool,
}

impl WeightRecord {
    /// Stamps a report with `at`.
    #[must_use]
    pub fn new(report: WeightReport, at: DateTime<Utc>) -> Self {
        Self {
            time: at.to_rfc3339_opts(SecondsFormat::Secs, true),
            weight: report.weight,
            tare: report.tare,
        }
    }
}

/// The last weight handed to the sink.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LastPublished {
    /// Starts at negative infinity so the first reading always goes out.
    pub value: f32,
}

impl Default for LastPublished {
    fn default() -> Self {
        Self {
            value: f32::NEG_INFINITY,
        }
    }
}

/// Where formatted messages are delivered.
#[allow(async_fn_in_trait)]
pub trait TelemetrySink {
    /// Publishes `payload` on `topic`.
    ///
    /// # Errors
    ///
    /// Returns an error if no broker connection is up or the write failed.
    async fn deliver(&mut self, topic: &str, payload: &str) -> Result<()>;
}

/// Formats weight records and shadow reports and suppresses repeats.
#[derive(Debug, Clone)]
pub struct TelemetryPublisher {
    telemetry_topic: String,
    shadow_update_topic: String,
    last: LastPublished,
}

impl TelemetryPublisher {
    /// Creates a publisher for the given topic layout.
    #[must_use]
    pub fn new(topics: &Topics) -> Self {
        Self {
            telemetry_topic: topics.telemetry(),
            shadow_update_topic: topics.shadow_update(),
            last: LastPublished::default(),
        }
    }

    /// Last weight that was delivered.
    #[must_use]
    pub fn last_published(&self) -> LastPublished {
        self.last
    }

    /// Publishes a weight record unless it repeats the last delivered weight.
    ///
    /// A tare report clears the last delivered weight first, so the zero after
    /// a tare always goes out. The last delivered weight only changes once the
    /// sink accepted the record.
    ///
    /// Returns true if a record was delivered.
    ///
    /// # Errors
    ///
    /// Returns the sink's error if delivery failed.
    #[allow(clippy::float_cmp)]
    pub async fn publish_weight<K: TelemetrySink>(
        &mut self,
        report: WeightReport,
        at: DateTime<Utc>,
        sink: &mut K,
    ) -> Result<bool> {
        if report.tare {
            self.last = LastPublished::default();
        }
        // Readings are averaged, so exact repeats mean nothing changed
        if report.weight == self.last.value {
            tracing::trace!(weight = report.weight, "Weight unchanged, not publishing");
            return Ok(false);
        }

        let record = WeightRecord::new(report, at);
        let payload = serde_json::to_string(&record).map_err(ParseError::from)?;
        tracing::info!(
            weight = format!("{:.1}", report.weight),
            tare = report.tare,
            "Publishing weight"
        );
        sink.deliver(&self.telemetry_topic, &payload).await?;
        self.last.value = report.weight;
        Ok(true)
    }

    /// Reports the full settings document to the shadow. Never suppressed.
    ///
    /// # Errors
    ///
    /// Returns the sink's error if delivery failed.
    pub async fn publish_shadow<K: TelemetrySink>(
        &self,
        settings: &ScaleSettings,
        sink: &mut K,
    ) -> Result<()> {
        let payload = ShadowReport::new(settings).to_json()?;
        tracing::info!(topic = %self.shadow_update_topic, "Reporting settings to shadow");
        sink.deliver(&self.shadow_update_topic, &payload).await
    }
}

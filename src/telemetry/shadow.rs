// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shadow documents for the scale settings.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::connectivity::MessageHandler;
use crate::error::{ConfigError, ParseError, Result};
use crate::protocol::{InboundTopic, Topics};
use crate::settings::{ScaleSettings, SettingsPatch};

/// `{"state":{"reported":{...}}}` update document.
#[derive(Debug, Serialize)]
pub struct ShadowReport<'a> {
    state: ReportedState<'a>,
}

#[derive(Debug, Serialize)]
struct ReportedState<'a> {
    reported: &'a ScaleSettings,
}

impl<'a> ShadowReport<'a> {
    /// Wraps a full settings snapshot.
    #[must_use]
    pub fn new(settings: &'a ScaleSettings) -> Self {
        Self {
            state: ReportedState { reported: settings },
        }
    }

    /// Serializes the document.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Json`] if serialization fails.
    pub fn to_json(&self) -> std::result::Result<String, ParseError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Deserialize)]
struct AcceptedDocument {
    #[serde(default)]
    state: Option<AcceptedState>,
    #[serde(default)]
    version: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AcceptedState {
    #[serde(default)]
    desired: Option<SettingsPatch>,
    #[serde(default)]
    reported: Option<SettingsPatch>,
}

#[derive(Debug, Deserialize)]
struct DeltaDocument {
    state: Option<SettingsPatch>,
    #[serde(default)]
    version: Option<u64>,
}

/// Applies shadow documents to the settings channel.
///
/// Handles `get/accepted` (using `state.desired`, falling back to
/// `state.reported`) and `update/delta` (using `state`). Each patch is
/// overlaid on the current snapshot, validated, and sent as a whole new
/// snapshot. Documents whose `version` is not newer than the last applied
/// one are ignored.
///
/// Malformed documents are logged and dropped; the current snapshot stays in
/// effect.
#[derive(Debug)]
pub struct ShadowSettingsHandler {
    topics: Topics,
    settings: watch::Sender<ScaleSettings>,
    last_version: Mutex<Option<u64>>,
}

impl ShadowSettingsHandler {
    /// Creates a handler seeded with `initial` and returns the receiving end
    /// for the scale.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if `initial` fails
    /// [`ScaleSettings::validated`].
    pub fn new(
        topics: Topics,
        initial: ScaleSettings,
    ) -> std::result::Result<(Self, watch::Receiver<ScaleSettings>), ConfigError> {
        let (settings, rx) = watch::channel(initial.validated()?);
        let handler = Self {
            topics,
            settings,
            last_version: Mutex::new(None),
        };
        Ok((handler, rx))
    }

    /// Another receiver for the settings snapshots.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ScaleSettings> {
        self.settings.subscribe()
    }

    /// Current settings snapshot.
    #[must_use]
    pub fn current(&self) -> ScaleSettings {
        *self.settings.borrow()
    }

    /// Applies a `get/accepted` document.
    ///
    /// Returns true if a new snapshot was sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a shadow document or the merged
    /// settings are invalid.
    pub fn apply_accepted(&self, payload: &str) -> Result<bool> {
        let document: AcceptedDocument = serde_json::from_str(payload).map_err(ParseError::from)?;
        let Some(state) = document.state else {
            return Err(ParseError::MissingField("state").into());
        };
        let Some(patch) = state.desired.or(state.reported) else {
            tracing::debug!("Shadow document has no settings section");
            return Ok(false);
        };
        self.apply(&patch, document.version)
    }

    /// Applies an `update/delta` document.
    ///
    /// Returns true if a new snapshot was sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload is not a delta document or the merged
    /// settings are invalid.
    pub fn apply_delta(&self, payload: &str) -> Result<bool> {
        let document: DeltaDocument = serde_json::from_str(payload).map_err(ParseError::from)?;
        let patch = document.state.ok_or(ParseError::MissingField("state"))?;
        self.apply(&patch, document.version)
    }

    fn apply(&self, patch: &SettingsPatch, version: Option<u64>) -> Result<bool> {
        let mut last_version = self.last_version.lock();
        if let (Some(version), Some(last)) = (version, *last_version)
            && version <= last
        {
            tracing::debug!(version, last, "Ignoring stale shadow document");
            return Ok(false);
        }

        let merged = self.current().merged(patch)?;
        if version.is_some() {
            *last_version = version;
        }
        tracing::info!(?version, settings = ?merged, "Applying shadow settings");
        // Sent even when unchanged so the shadow gets a fresh report
        self.settings.send_replace(merged);
        Ok(true)
    }
}

impl MessageHandler for ShadowSettingsHandler {
    fn handle(&self, topic: &str, payload: &str) {
        let result = match self.topics.classify(topic) {
            InboundTopic::ShadowAccepted => self.apply_accepted(payload),
            InboundTopic::ShadowDelta => self.apply_delta(payload),
            InboundTopic::Command => {
                tracing::info!(payload, "Command message ignored");
                return;
            }
            InboundTopic::Other => {
                tracing::debug!(topic, "Message on unexpected topic");
                return;
            }
        };
        if let Err(e) = result {
            tracing::warn!(topic, error = %e, "Failed to apply shadow document");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn handler() -> (ShadowSettingsHandler, watch::Receiver<ScaleSettings>) {
        ShadowSettingsHandler::new(Topics::default(), ScaleSettings::default()).unwrap()
    }

    #[test]
    fn invalid_initial_settings_are_rejected() {
        let initial = ScaleSettings {
            num_measurements: 0,
            ..ScaleSettings::default()
        };
        let err = ShadowSettingsHandler::new(Topics::default(), initial).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { field: "numMeasurements", .. }));
    }

    #[test]
    fn report_document_shape() {
        let settings = ScaleSettings::default();
        let json = ShadowReport::new(&settings).to_json().unwrap();
        let doc: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(doc["state"]["reported"]["tareHoldTime"], 300_000);
        assert!(doc["state"].get("desired").is_none());
    }

    #[test]
    fn accepted_uses_desired_section() {
        let (handler, mut rx) = handler();
        let payload = r#"{
            "state": {
                "desired": {"numMeasurements": 6},
                "reported": {"numMeasurements": 9}
            },
            "version": 3
        }"#;

        assert!(handler.apply_accepted(payload).unwrap());
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().num_measurements, 6);
    }

    #[test]
    fn accepted_falls_back_to_reported() {
        let (handler, rx) = handler();
        let payload = r#"{"state":{"reported":{"largeThreshold":2.5}},"version":1}"#;

        assert!(handler.apply_accepted(payload).unwrap());
        assert!((rx.borrow().large_threshold - 2.5).abs() < f32::EPSILON);
    }

    #[test]
    fn delta_overlays_current_snapshot() {
        let (handler, rx) = handler();
        handler
            .apply_delta(r#"{"state":{"numMeasurements":4},"version":5}"#)
            .unwrap();
        handler
            .apply_delta(r#"{"state":{"tareHoldTime":20000},"version":6}"#)
            .unwrap();

        let settings = *rx.borrow();
        assert_eq!(settings.num_measurements, 4);
        assert_eq!(settings.tare_hold_time, Duration::from_secs(20));
    }

    #[test]
    fn stale_version_is_ignored() {
        let (handler, rx) = handler();
        handler
            .apply_delta(r#"{"state":{"numMeasurements":4},"version":5}"#)
            .unwrap();

        let applied = handler
            .apply_delta(r#"{"state":{"numMeasurements":8},"version":5}"#)
            .unwrap();

        assert!(!applied);
        assert_eq!(rx.borrow().num_measurements, 4);
    }

    #[test]
    fn invalid_values_keep_current_snapshot() {
        let (handler, mut rx) = handler();
        let err = handler
            .apply_delta(r#"{"state":{"numMeasurements":0},"version":2}"#)
            .unwrap_err();

        assert!(matches!(err, crate::Error::Config(_)));
        assert!(!rx.has_changed().unwrap());

        // A rejected document does not consume its version
        assert!(
            handler
                .apply_delta(r#"{"state":{"numMeasurements":3},"version":2}"#)
                .unwrap()
        );
        assert_eq!(rx.borrow_and_update().num_measurements, 3);
    }

    #[test]
    fn handle_routes_by_topic() {
        let (handler, rx) = handler();
        let topics = Topics::default();

        handler.handle(&topics.shadow_update_delta(), r#"{"state":{"smallThreshold":0.4}}"#);
        assert!((rx.borrow().small_threshold - 0.4).abs() < f32::EPSILON);

        handler.handle(&topics.command(), r#"{"state":{"smallThreshold":0.9}}"#);
        handler.handle(&topics.shadow_get_accepted(), "not json");
        assert!((rx.borrow().small_threshold - 0.4).abs() < f32::EPSILON);
    }
}

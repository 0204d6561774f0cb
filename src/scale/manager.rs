// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-cycle scale logic.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::ConfigError;
use crate::platform::Watchdog;
use crate::settings::ScaleSettings;
use crate::telemetry::WeightReport;

use super::sampler::WeightSampler;
use super::tare::{RetareReason, TareDecision, TareDriftDetector};
use super::{IGNORE_HIGH_THRESHOLD, IGNORE_LOW_THRESHOLD, SampleSource, WeightDisplay};

/// Owns the sample source and the display and runs one weighing cycle at a
/// time.
///
/// Settings arrive as whole snapshots through a [`watch`] channel, normally
/// fed by the shadow settings handler. A new snapshot only takes effect when
/// [`refresh_settings`](Self::refresh_settings) is called, so a cycle always
/// runs against one consistent snapshot.
///
/// # Examples
///
/// ```no_run
/// # use std::sync::Arc;
/// # use cat_scale::{ScaleManager, ScaleSettings, SampleSource, WeightDisplay, Watchdog};
/// # async fn demo<S: SampleSource, D: WeightDisplay>(source: S, display: D) -> cat_scale::Result<()> {
/// let (_tx, rx) = tokio::sync::watch::channel(ScaleSettings::default());
/// let watchdog: Arc<dyn Watchdog> = Arc::new(|| {});
/// let mut scale = ScaleManager::new(source, display, rx, watchdog)?;
///
/// let mut reports = scale.setup().await;
/// reports.extend(scale.cycle().await);
/// # Ok(())
/// # }
/// ```
pub struct ScaleManager<S, D> {
    source: S,
    display: D,
    sampler: WeightSampler,
    detector: TareDriftDetector,
    settings: ScaleSettings,
    settings_rx: watch::Receiver<ScaleSettings>,
    last_displayed: f32,
    watchdog: Arc<dyn Watchdog>,
}

impl<S: SampleSource, D: WeightDisplay> ScaleManager<S, D> {
    /// Creates a manager using the snapshot currently in `settings_rx`.
    ///
    /// Later snapshots are expected to be validated by their sender, as
    /// [`ShadowSettingsHandler`](crate::ShadowSettingsHandler) does.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] if the current snapshot fails
    /// [`ScaleSettings::validated`].
    pub fn new(
        source: S,
        display: D,
        mut settings_rx: watch::Receiver<ScaleSettings>,
        watchdog: Arc<dyn Watchdog>,
    ) -> Result<Self, ConfigError> {
        let settings = settings_rx.borrow_and_update().validated()?;
        Ok(Self {
            source,
            display,
            sampler: WeightSampler::new(Arc::clone(&watchdog)),
            detector: TareDriftDetector::new(),
            settings,
            settings_rx,
            last_displayed: f32::NEG_INFINITY,
            watchdog,
        })
    }

    /// Replaces the sampler, e.g. to shorten the inter-sample delay.
    #[must_use]
    pub fn with_sampler(mut self, sampler: WeightSampler) -> Self {
        self.sampler = sampler;
        self
    }

    /// Settings snapshot in effect.
    #[must_use]
    pub fn settings(&self) -> &ScaleSettings {
        &self.settings
    }

    /// Drift detector, for inspection.
    #[must_use]
    pub fn detector(&self) -> &TareDriftDetector {
        &self.detector
    }

    /// The sample source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// The display.
    pub fn display(&self) -> &D {
        &self.display
    }

    /// Applies calibration and zeroes the scale.
    pub async fn setup(&mut self) -> Vec<WeightReport> {
        tracing::info!(
            calibration_factor = self.settings.calibration_factor,
            "Initializing scale"
        );
        self.source.set_calibration(self.settings.calibration_factor);
        self.show_text("reset...");

        let mut reports = Vec::with_capacity(1);
        self.tare(&mut reports).await;
        reports
    }

    /// Picks up a new settings snapshot if one was sent.
    ///
    /// Returns true if the settings changed.
    pub fn refresh_settings(&mut self) -> bool {
        if !self.settings_rx.has_changed().unwrap_or(false) {
            return false;
        }
        let settings = *self.settings_rx.borrow_and_update();
        self.apply_settings(settings);
        true
    }

    /// Swaps in a new snapshot and re-applies calibration.
    pub fn apply_settings(&mut self, settings: ScaleSettings) {
        tracing::info!(?settings, "Changing scale settings");
        self.settings = settings;
        self.source.set_calibration(settings.calibration_factor);
    }

    /// Runs one weighing cycle and returns the reports to publish.
    ///
    /// A snapshot still pending in the channel is applied first.
    pub async fn cycle(&mut self) -> Vec<WeightReport> {
        self.refresh_settings();
        let measurement = self.sampler.sample(&mut self.source, &self.settings).await;
        let weight = measurement.reading.value();
        let mut reports = Vec::new();

        if measurement.occupied {
            self.show_number(weight);
            let decision = self.evaluate(weight);
            self.apply_retare(decision, &mut reports).await;

            if !decision.holding && weight > IGNORE_LOW_THRESHOLD && weight < IGNORE_HIGH_THRESHOLD {
                reports.push(WeightReport::weight(weight));
            }
        } else {
            if measurement.reading.is_zero() {
                self.show_number(0.0);
                reports.push(WeightReport::weight(0.0));
            }
            let decision = self.evaluate(weight);
            self.apply_retare(decision, &mut reports).await;
        }

        self.watchdog.feed();
        reports
    }

    fn evaluate(&mut self, weight: f32) -> TareDecision {
        self.detector.evaluate(weight, &self.settings, Instant::now())
    }

    async fn apply_retare(&mut self, decision: TareDecision, reports: &mut Vec<WeightReport>) {
        if let Some(reason) = decision.retare {
            self.retare(reason, reports).await;
        }
    }

    async fn retare(&mut self, reason: RetareReason, reports: &mut Vec<WeightReport>) {
        self.show_text(reason.display_text());
        self.tare(reports).await;
    }

    async fn tare(&mut self, reports: &mut Vec<WeightReport>) {
        self.source.tare().await;
        self.watchdog.feed();
        self.show_number(0.0);
        reports.push(WeightReport::tare());
    }

    #[allow(clippy::float_cmp)]
    fn show_number(&mut self, value: f32) {
        if value == self.last_displayed {
            return;
        }
        self.last_displayed = value;
        self.display.render_number(value);
    }

    fn show_text(&mut self, text: &str) {
        // Text replaces the number, so the next number must be redrawn
        self.last_displayed = f32::NEG_INFINITY;
        self.display.render_text(text);
    }
}

impl<S, D> std::fmt::Debug for ScaleManager<S, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScaleManager")
            .field("settings", &self.settings)
            .field("detector", &self.detector)
            .field("last_displayed", &self.last_displayed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::{DisplayOp, RecordingDisplay, ScriptedSource, counting_watchdog};

    fn settings() -> ScaleSettings {
        ScaleSettings {
            num_measurements: 2,
            large_threshold: 1.0,
            small_threshold: 0.5,
            tare_hold_threshold: 0.25,
            tare_hold_time: Duration::from_secs(60),
            ..ScaleSettings::default()
        }
    }

    fn manager(
        readings: impl IntoIterator<Item = f32>,
    ) -> (ScaleManager<ScriptedSource, RecordingDisplay>, watch::Sender<ScaleSettings>) {
        let (tx, rx) = watch::channel(settings());
        let (watchdog, _) = counting_watchdog();
        let manager = ScaleManager::new(
            ScriptedSource::new(readings),
            RecordingDisplay::default(),
            rx,
            watchdog,
        )
        .unwrap();
        (manager, tx)
    }

    #[tokio::test(start_paused = true)]
    async fn setup_calibrates_and_tares() {
        let (mut scale, _tx) = manager([]);

        let reports = scale.setup().await;

        assert_eq!(reports, vec![WeightReport::tare()]);
        assert_eq!(scale.source().tares(), 1);
        assert_eq!(scale.source().calibration(), Some(settings().calibration_factor));
        assert_eq!(
            scale.display().ops(),
            &[DisplayOp::Text("reset...".to_string()), DisplayOp::Number(0.0)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn new_weight_is_reported_once() {
        // precheck 1, seed 1, convergence 2 per cycle
        let (mut scale, _tx) = manager([5.0; 8]);

        let first = scale.cycle().await;
        let second = scale.cycle().await;

        assert_eq!(first, vec![WeightReport::weight(5.0)]);
        assert!(second.is_empty());
        assert_eq!(scale.display().ops(), &[DisplayOp::Number(5.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_scale_reports_zero() {
        let (mut scale, _tx) = manager([0.0; 3]);

        let reports = scale.cycle().await;

        assert_eq!(reports, vec![WeightReport::weight(0.0)]);
        assert_eq!(scale.display().ops(), &[DisplayOp::Number(0.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_weight_is_not_reported() {
        let (mut scale, _tx) = manager([250.0; 4]);

        let reports = scale.cycle().await;

        assert!(reports.is_empty());
        assert_eq!(scale.display().ops(), &[DisplayOp::Number(250.0)]);
    }

    #[tokio::test(start_paused = true)]
    async fn low_fault_retares() {
        let (mut scale, _tx) = manager([-80.0; 3]);

        let reports = scale.cycle().await;

        assert_eq!(reports, vec![WeightReport::tare()]);
        assert_eq!(scale.source().tares(), 1);
        assert_eq!(
            scale.display().ops(),
            &[DisplayOp::Text("low tare...".to_string()), DisplayOp::Number(0.0)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn drift_retares_after_hold_time() {
        let (mut scale, _tx) = manager([5.0; 12]);

        assert_eq!(scale.cycle().await, vec![WeightReport::weight(5.0)]);
        tokio::time::advance(Duration::from_secs(61)).await;
        let reports = scale.cycle().await;

        assert_eq!(reports, vec![WeightReport::tare()]);
        assert!(scale.display().ops().contains(&DisplayOp::Text("new tare...".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_scale_drift_retares_after_hold_time() {
        // Below the occupancy threshold but outside the zero band
        let (mut scale, _tx) = manager([0.6; 12]);

        assert!(scale.cycle().await.is_empty());
        tokio::time::advance(Duration::from_secs(61)).await;
        let reports = scale.cycle().await;

        assert_eq!(reports, vec![WeightReport::tare()]);
        assert_eq!(scale.source().tares(), 1);
        assert_eq!(
            scale.display().ops(),
            &[DisplayOp::Text("new tare...".to_string()), DisplayOp::Number(0.0)]
        );
    }

    #[test]
    fn invalid_initial_settings_are_rejected() {
        let (_tx, rx) = watch::channel(ScaleSettings {
            num_measurements: 0,
            ..settings()
        });
        let (watchdog, _) = counting_watchdog();

        let err = ScaleManager::new(
            ScriptedSource::default(),
            RecordingDisplay::default(),
            rx,
            watchdog,
        )
        .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidValue { field: "numMeasurements", .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn settings_take_effect_on_refresh() {
        let (mut scale, tx) = manager([]);
        assert!(!scale.refresh_settings());

        let updated = ScaleSettings {
            calibration_factor: -9000.0,
            ..settings()
        };
        tx.send(updated).unwrap();
        assert_eq!(scale.settings(), &settings());

        assert!(scale.refresh_settings());
        assert_eq!(scale.settings(), &updated);
        assert_eq!(scale.source().calibration(), Some(-9000.0));
        assert!(!scale.refresh_settings());
    }
}

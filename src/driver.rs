// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Fixed-period main loop.

use std::convert::Infallible;
use std::time::Duration;

use tokio::time::{MissedTickBehavior, interval};

use crate::config::DEFAULT_CYCLE_PERIOD;
use crate::connectivity::ConnectivityManager;
use crate::error::Result;
use crate::platform::{Network, TimeSource};
use crate::protocol::BrokerLink;
use crate::scale::{SampleSource, ScaleManager, WeightDisplay};
use crate::telemetry::{TelemetryPublisher, WeightReport};

/// Ties the scale, the publisher and the connectivity manager together.
///
/// Each cycle runs, in order: broker servicing (or recovery), a shadow
/// report if the settings changed, one weighing cycle, then publishing of
/// the weighing results. Delivery errors are logged and the cycle goes on.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use cat_scale::prelude::*;
///
/// # async fn example<S: SampleSource, D: WeightDisplay>(source: S, display: D) -> cat_scale::Result<()> {
/// let config = DeviceConfig::load("scale.json")?;
/// let watchdog: Arc<dyn Watchdog> = Arc::new(|| {});
/// let reset: Arc<dyn SystemReset> = Arc::new(|| tracing::error!("Restart requested"));
///
/// let (handler, settings_rx) = ShadowSettingsHandler::new(config.topics.clone(), config.settings)?;
/// let connectivity = ConnectivityManager::new(
///     MqttLink::new(config.broker_config()?),
///     HostNetwork,
///     SystemClock,
///     config.topics.clone(),
///     Arc::clone(&watchdog),
///     reset,
/// )
/// .with_policy(config.retry.clone())
/// .with_handler(Arc::new(handler));
/// let scale = ScaleManager::new(source, display, settings_rx, watchdog)?;
///
/// let mut driver = Driver::new(scale, TelemetryPublisher::new(&config.topics), connectivity)
///     .with_period(config.cycle_period);
/// driver.run().await?;
/// # Ok(())
/// # }
/// ```
pub struct Driver<S, D, L, N, T> {
    scale: ScaleManager<S, D>,
    telemetry: TelemetryPublisher,
    connectivity: ConnectivityManager<L, N, T>,
    period: Duration,
}

impl<S, D, L, N, T> Driver<S, D, L, N, T>
where
    S: SampleSource,
    D: WeightDisplay,
    L: BrokerLink,
    N: Network,
    T: TimeSource,
{
    /// Creates a driver with the default cycle period.
    pub fn new(
        scale: ScaleManager<S, D>,
        telemetry: TelemetryPublisher,
        connectivity: ConnectivityManager<L, N, T>,
    ) -> Self {
        Self {
            scale,
            telemetry,
            connectivity,
            period: DEFAULT_CYCLE_PERIOD,
        }
    }

    /// Sets the cycle period.
    #[must_use]
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// The scale manager.
    pub fn scale(&self) -> &ScaleManager<S, D> {
        &self.scale
    }

    /// The connectivity manager.
    pub fn connectivity(&self) -> &ConnectivityManager<L, N, T> {
        &self.connectivity
    }

    /// The connectivity manager, mutably.
    pub fn connectivity_mut(&mut self) -> &mut ConnectivityManager<L, N, T> {
        &mut self.connectivity
    }

    /// Brings the device online, zeroes the scale and publishes the tare.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TimeSync`](crate::Error::TimeSync) if the clock could
    /// not be synchronized.
    pub async fn setup(&mut self) -> Result<()> {
        self.connectivity.setup().await?;
        let reports = self.scale.setup().await;
        self.publish(reports).await;
        tracing::info!("Setup complete");
        Ok(())
    }

    /// Runs one cycle.
    pub async fn cycle(&mut self) {
        self.connectivity.service().await;

        if self.scale.refresh_settings()
            && let Err(e) = self
                .telemetry
                .publish_shadow(self.scale.settings(), &mut self.connectivity)
                .await
        {
            tracing::warn!(error = %e, "Failed to report settings");
        }

        let reports = self.scale.cycle().await;
        self.publish(reports).await;
    }

    async fn publish(&mut self, reports: Vec<WeightReport>) {
        for report in reports {
            let at = self.connectivity.now();
            if let Err(e) = self
                .telemetry
                .publish_weight(report, at, &mut self.connectivity)
                .await
            {
                tracing::warn!(weight = report.weight, error = %e, "Failed to publish weight");
            }
        }
    }

    /// Runs setup, then cycles forever at the configured period.
    ///
    /// A cycle that overruns the period delays the next tick instead of
    /// bursting to catch up.
    ///
    /// # Errors
    ///
    /// Only returns if setup fails.
    pub async fn run(&mut self) -> Result<Infallible> {
        self.setup().await?;

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.cycle().await;
        }
    }
}

impl<S, D, L, N, T> std::fmt::Debug for Driver<S, D, L, N, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("scale", &self.scale)
            .field("telemetry", &self.telemetry)
            .field("connectivity", &self.connectivity)
            .field("period", &self.period)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::error::{Error, ProtocolError};
    use crate::protocol::{InboundMessage, Topics};
    use crate::settings::ScaleSettings;
    use crate::telemetry::ShadowSettingsHandler;
    use crate::testing::{
        FakeClock, FakeLink, FakeNetwork, RecordingDisplay, ScriptedSource, counting_reset,
        counting_watchdog,
    };

    type TestDriver = Driver<ScriptedSource, RecordingDisplay, FakeLink, FakeNetwork, FakeClock>;

    fn driver(readings: impl IntoIterator<Item = f32>, clock: FakeClock) -> (TestDriver, Arc<std::sync::atomic::AtomicUsize>) {
        let topics = Topics::default();
        let initial = ScaleSettings {
            num_measurements: 2,
            ..ScaleSettings::default()
        };
        let (watchdog, _) = counting_watchdog();
        let (reset, restarts) = counting_reset();
        let (handler, settings_rx) = ShadowSettingsHandler::new(topics.clone(), initial).unwrap();

        let connectivity = ConnectivityManager::new(
            FakeLink::default(),
            FakeNetwork::associated_after(1),
            clock,
            topics.clone(),
            Arc::clone(&watchdog),
            reset,
        )
        .with_handler(Arc::new(handler));
        let scale = ScaleManager::new(
            ScriptedSource::new(readings),
            RecordingDisplay::default(),
            settings_rx,
            watchdog,
        )
        .unwrap();
        let driver = Driver::new(scale, TelemetryPublisher::new(&topics), connectivity);
        (driver, restarts)
    }

    fn published(driver: &TestDriver) -> Vec<(String, serde_json::Value)> {
        driver
            .connectivity()
            .link()
            .published
            .iter()
            .filter(|(_, payload)| !payload.is_empty())
            .map(|(topic, payload)| (topic.clone(), serde_json::from_str(payload).unwrap()))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn setup_publishes_tare() {
        let (mut driver, _) = driver([], FakeClock::valid());

        driver.setup().await.unwrap();

        let published = published(&driver);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, "catScale/pub");
        assert_eq!(published[0].1["tare"], true);
        assert_eq!(published[0].1["weight"], 0.0);
        assert_eq!(published[0].1["time"], "2024-05-01T12:00:00Z");
    }

    #[tokio::test(start_paused = true)]
    async fn time_failure_stops_before_scale_setup() {
        let (mut driver, restarts) = driver([], FakeClock::failing());

        let err = driver.setup().await.unwrap_err();

        assert!(matches!(err, Error::TimeSync(_)));
        assert_eq!(restarts.load(Ordering::Relaxed), 1);
        assert_eq!(driver.scale().source().tares(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn weight_is_published_once() {
        let (mut driver, _) = driver([6.5; 8], FakeClock::valid());
        driver.setup().await.unwrap();

        driver.cycle().await;
        driver.cycle().await;

        let weights: Vec<f64> = published(&driver)
            .iter()
            .map(|(_, record)| record["weight"].as_f64().unwrap())
            .collect();
        assert_eq!(weights, vec![0.0, 6.5]);
    }

    #[tokio::test(start_paused = true)]
    async fn shadow_delta_updates_settings_and_reports() {
        let (mut driver, _) = driver([0.0; 12], FakeClock::valid());
        driver.setup().await.unwrap();
        let delta_topic = Topics::default().shadow_update_delta();
        driver
            .connectivity_mut()
            .link_mut()
            .inbound
            .push_back(vec![InboundMessage::new(
                delta_topic,
                r#"{"state":{"numMeasurements":4},"version":7}"#,
            )]);

        driver.cycle().await;

        assert_eq!(driver.scale().settings().num_measurements, 4);
        let published = published(&driver);
        let (topic, report) = published
            .iter()
            .find(|(topic, _)| topic.ends_with("/update"))
            .unwrap();
        assert_eq!(
            topic,
            "$aws/things/Cat-Scale-Firebeetle8266/shadow/name/CatScaleConfig/update"
        );
        assert_eq!(report["state"]["reported"]["numMeasurements"], 4);
    }

    #[tokio::test(start_paused = true)]
    async fn cycle_recovers_lost_session_before_publishing() {
        let (mut driver, _) = driver([3.0; 8], FakeClock::valid());
        driver.setup().await.unwrap();
        driver
            .connectivity_mut()
            .link_mut()
            .drop_session(ProtocolError::NetworkFailedRead);

        driver.cycle().await;

        assert!(driver.connectivity().is_connected());
        assert_eq!(driver.connectivity().link().connect_attempts, 2);
        let last = published(&driver).pop().unwrap();
        assert_eq!(last.1["weight"], 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn run_cycles_at_period() {
        let (mut driver, _) = driver([0.0; 3], FakeClock::valid());
        driver = driver.with_period(Duration::from_secs(1));

        let result = tokio::time::timeout(Duration::from_secs(5), driver.run()).await;

        assert!(result.is_err());
        assert!(driver.scale().source().reads() >= 9);
    }
}

// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `cat_scale` - Weight telemetry core for a connected litter-box scale.
//!
//! The crate turns noisy load-cell readings into stable weights, keeps the
//! scale zeroed as its baseline drifts, and publishes the results over a
//! TLS-secured MQTT session whose tuning settings are synchronized with a
//! cloud shadow document.
//!
//! # Components
//!
//! - [`WeightSampler`]: outlier-rejecting averaging, one measurement per cycle
//! - [`TareDriftDetector`]: hold tracking and automatic re-tare
//! - [`ScaleManager`]: per-cycle scale logic and display updates
//! - [`TelemetryPublisher`]: weight records with repeat suppression, shadow reports
//! - [`ShadowSettingsHandler`]: applies shadow documents to the settings
//! - [`ConnectivityManager`]: network, clock and broker lifecycle with recovery
//! - [`Driver`]: the fixed-period loop tying it all together
//!
//! Hardware stays behind narrow traits: [`SampleSource`], [`WeightDisplay`],
//! [`Network`], [`TimeSource`], [`Watchdog`] and [`SystemReset`].
//!
//! # Execution model
//!
//! Everything runs cooperatively on one task. Waits are explicit sleeps and
//! the watchdog is fed around every long wait, so no lock is held across
//! an await and nothing runs concurrently.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use cat_scale::prelude::*;
//!
//! struct Cell;
//! impl SampleSource for Cell {
//!     async fn read_units(&mut self) -> f32 { 0.0 }
//!     async fn tare(&mut self) {}
//!     fn set_calibration(&mut self, _factor: f32) {}
//! }
//!
//! struct Console;
//! impl WeightDisplay for Console {
//!     fn render_number(&mut self, value: f32) { println!("{value:.1}"); }
//!     fn render_text(&mut self, text: &str) { println!("{text}"); }
//! }
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> cat_scale::Result<()> {
//!     let config = DeviceConfig::load("scale.json")?;
//!     let watchdog: Arc<dyn Watchdog> = Arc::new(|| {});
//!     let reset: Arc<dyn SystemReset> = Arc::new(|| {});
//!
//!     let (handler, settings_rx) =
//!         ShadowSettingsHandler::new(config.topics.clone(), config.settings)?;
//!     let connectivity = ConnectivityManager::new(
//!         MqttLink::new(config.broker_config()?),
//!         HostNetwork,
//!         SystemClock,
//!         config.topics.clone(),
//!         Arc::clone(&watchdog),
//!         reset,
//!     )
//!     .with_handler(Arc::new(handler));
//!     let scale = ScaleManager::new(Cell, Console, settings_rx, watchdog)?;
//!
//!     Driver::new(scale, TelemetryPublisher::new(&config.topics), connectivity)
//!         .run()
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connectivity;
mod driver;
pub mod error;
pub mod platform;
pub mod protocol;
pub mod scale;
mod settings;
pub mod telemetry;

#[cfg(test)]
mod testing;

pub use config::DeviceConfig;
pub use connectivity::{
    ConnectMode, ConnectionState, ConnectivityEvent, ConnectivityManager, EventListener,
    MessageHandler, RetryPolicy,
};
pub use driver::Driver;
pub use error::{
    ConfigError, ConnectRejection, Error, LinkFailure, ParseError, ProtocolError, Result,
    TimeSyncError,
};
pub use platform::{HostNetwork, Network, SystemClock, SystemReset, TimeSource, Watchdog};
#[cfg(feature = "mqtt")]
pub use protocol::MqttLink;
pub use protocol::{BrokerConfig, BrokerLink, InboundMessage, TlsMaterial, Topics};
pub use scale::{
    Measurement, SampleSource, ScaleManager, StabilizedReading, TareDriftDetector, WeightDisplay,
    WeightSampler,
};
pub use settings::{
    DEFAULT_CALIBRATION_FACTOR, DEFAULT_LARGE_THRESHOLD, DEFAULT_NUM_MEASUREMENTS,
    DEFAULT_SMALL_THRESHOLD, DEFAULT_TARE_HOLD_THRESHOLD, DEFAULT_TARE_HOLD_TIME,
    MIN_TARE_HOLD_TIME, ScaleSettings, SettingsPatch,
};
pub use telemetry::{
    ShadowSettingsHandler, TelemetryPublisher, TelemetrySink, WeightRecord, WeightReport,
};

/// The types needed to assemble a scale.
pub mod prelude {
    pub use crate::config::DeviceConfig;
    pub use crate::connectivity::{ConnectMode, ConnectivityManager, RetryPolicy};
    pub use crate::driver::Driver;
    pub use crate::platform::{
        HostNetwork, Network, SystemClock, SystemReset, TimeSource, Watchdog,
    };
    #[cfg(feature = "mqtt")]
    pub use crate::protocol::MqttLink;
    pub use crate::protocol::{BrokerLink, Topics};
    pub use crate::scale::{SampleSource, ScaleManager, WeightDisplay};
    pub use crate::settings::ScaleSettings;
    pub use crate::telemetry::{ShadowSettingsHandler, TelemetryPublisher};
}

// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Weighing: stabilization, drift detection and the per-cycle scale logic.
//!
//! # Architecture
//!
//! ```text
//! SampleSource ──► WeightSampler ──► Measurement
//!                                       │
//!                     ┌─────────────────┴───────────────┐
//!                     ▼                                 ▼
//!             TareDriftDetector                   WeightDisplay
//!                     │ retare?
//!                     ▼
//!               ScaleManager ──► Vec<WeightReport> (to telemetry)
//! ```
//!
//! The [`ScaleManager`] never talks to the network. It returns the weight
//! reports produced during a cycle and the driver hands them to the
//! telemetry publisher.

mod manager;
mod sampler;
mod tare;

pub use manager::ScaleManager;
pub use sampler::{INTER_SAMPLE_DELAY, Measurement, StabilizedReading, WeightSampler};
pub use tare::{RetareReason, TareDecision, TareDriftDetector, TareState};

/// Readings below this are a sensor or mechanical fault and force a re-tare.
pub const IGNORE_LOW_THRESHOLD: f32 = -50.0;

/// Occupied readings at or above this are never published.
pub const IGNORE_HIGH_THRESHOLD: f32 = 200.0;

/// Load-cell amplifier interface.
#[allow(async_fn_in_trait)]
pub trait SampleSource {
    /// Reads one calibrated weight value. May block briefly.
    async fn read_units(&mut self) -> f32;

    /// Takes the current load as the new zero reference.
    async fn tare(&mut self);

    /// Sets the raw-to-unit calibration factor.
    fn set_calibration(&mut self, factor: f32);
}

/// Front-panel display.
pub trait WeightDisplay {
    /// Shows a weight value.
    fn render_number(&mut self, value: f32);

    /// Shows a short status text.
    fn render_text(&mut self, text: &str);
}

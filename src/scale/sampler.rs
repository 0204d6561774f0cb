// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Noise rejection for raw load-cell readings.

use std::sync::Arc;
use std::time::Duration;

use crate::platform::Watchdog;
use crate::settings::ScaleSettings;

use super::SampleSource;

/// Pause between readings of the convergence loop.
pub const INTER_SAMPLE_DELAY: Duration = Duration::from_millis(100);

/// The filtered value produced by one sampling cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StabilizedReading {
    /// The average was within the hold band around zero.
    Zero,
    /// A weight outside the hold band around zero.
    Weight(f32),
}

impl StabilizedReading {
    /// Clamps `average` to [`Zero`](Self::Zero) when its magnitude is below
    /// `zero_band`.
    #[must_use]
    pub fn from_average(average: f32, zero_band: f32) -> Self {
        if average.abs() < zero_band {
            Self::Zero
        } else {
            Self::Weight(average)
        }
    }

    /// Returns the weight, with [`Zero`](Self::Zero) as `0.0`.
    #[must_use]
    pub fn value(self) -> f32 {
        match self {
            Self::Zero => 0.0,
            Self::Weight(weight) => weight,
        }
    }

    /// Returns true for the zero sentinel.
    #[must_use]
    pub fn is_zero(self) -> bool {
        matches!(self, Self::Zero)
    }
}

/// One stabilized measurement and the occupancy decision behind it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// The filtered value.
    pub reading: StabilizedReading,
    /// Whether the quick pre-check found something on the scale.
    pub occupied: bool,
}

/// Turns noisy readings into one stabilized measurement per cycle.
///
/// A quick pre-check decides whether the scale is empty. An empty scale is
/// simply averaged. An occupied scale goes through a convergence loop that
/// throws away everything accumulated so far whenever two consecutive
/// readings differ by more than the small threshold, so the result is the
/// mean of an uninterrupted run of consistent readings.
///
/// The convergence loop has no attempt limit: under sustained vibration it
/// keeps restarting. The watchdog is fed after every reading and each
/// restart is traced.
pub struct WeightSampler {
    inter_sample_delay: Duration,
    watchdog: Arc<dyn Watchdog>,
}

impl WeightSampler {
    /// Creates a sampler with the default inter-sample delay.
    #[must_use]
    pub fn new(watchdog: Arc<dyn Watchdog>) -> Self {
        Self {
            inter_sample_delay: INTER_SAMPLE_DELAY,
            watchdog,
        }
    }

    /// Overrides the pause between convergence readings.
    #[must_use]
    pub fn with_inter_sample_delay(mut self, delay: Duration) -> Self {
        self.inter_sample_delay = delay;
        self
    }

    /// Produces one stabilized measurement.
    pub async fn sample<S: SampleSource>(
        &self,
        source: &mut S,
        settings: &ScaleSettings,
    ) -> Measurement {
        let precheck = self
            .average(source, settings.precheck_measurements())
            .await;

        if precheck < settings.large_threshold {
            let average = self.average(source, settings.num_measurements).await;
            return Measurement {
                reading: StabilizedReading::from_average(average, settings.tare_hold_threshold),
                occupied: false,
            };
        }

        let average = self.converge(source, settings).await;
        Measurement {
            reading: StabilizedReading::from_average(average, settings.tare_hold_threshold),
            occupied: true,
        }
    }

    /// Plain average of `count` readings.
    async fn average<S: SampleSource>(&self, source: &mut S, count: u32) -> f32 {
        let mut sum = 0.0;
        for _ in 0..count {
            sum += source.read_units().await;
            self.watchdog.feed();
        }
        #[allow(clippy::cast_precision_loss)]
        let count = count.max(1) as f32;
        sum / count
    }

    /// Averages `num_measurements` consecutive readings, restarting whenever
    /// a reading jumps by more than the small threshold.
    async fn converge<S: SampleSource>(&self, source: &mut S, settings: &ScaleSettings) -> f32 {
        let mut previous = source.read_units().await;
        self.watchdog.feed();

        let mut sum = 0.0;
        let mut count = 0;
        let mut restarts = 0u32;
        while count < settings.num_measurements {
            tokio::time::sleep(self.inter_sample_delay).await;
            let reading = source.read_units().await;
            self.watchdog.feed();

            sum += reading;
            count += 1;
            if (reading - previous).abs() > settings.small_threshold {
                restarts += 1;
                tracing::debug!(
                    previous,
                    reading,
                    restarts,
                    "Reading jumped, restarting average"
                );
                sum = 0.0;
                count = 0;
            }
            previous = reading;
        }

        #[allow(clippy::cast_precision_loss)]
        let count = settings.num_measurements as f32;
        sum / count
    }
}

impl std::fmt::Debug for WeightSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeightSampler")
            .field("inter_sample_delay", &self.inter_sample_delay)
            .finish_non_exhaustive()
    }
}

// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scripted collaborators for unit tests.

use std::cell::Cell;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::connectivity::{ConnectionState, ConnectivityEvent, EventListener};
use crate::error::{Error, LinkFailure, ProtocolError, Result, TimeSyncError};
use crate::platform::{Network, SystemReset, TimeSource, Watchdog};
use crate::protocol::{BrokerLink, InboundMessage};
use crate::scale::{SampleSource, WeightDisplay};
use crate::telemetry::TelemetrySink;

/// Replays readings in order, then repeats the last one.
#[derive(Debug, Default)]
pub(crate) struct ScriptedSource {
    readings: VecDeque<f32>,
    last: f32,
    reads: usize,
    tares: usize,
    calibration: Option<f32>,
}

impl ScriptedSource {
    pub(crate) fn new(readings: impl IntoIterator<Item = f32>) -> Self {
        Self {
            readings: readings.into_iter().collect(),
            ..Self::default()
        }
    }

    pub(crate) fn reads(&self) -> usize {
        self.reads
    }

    pub(crate) fn tares(&self) -> usize {
        self.tares
    }

    pub(crate) fn calibration(&self) -> Option<f32> {
        self.calibration
    }
}

impl SampleSource for ScriptedSource {
    async fn read_units(&mut self) -> f32 {
        self.reads += 1;
        if let Some(reading) = self.readings.pop_front() {
            self.last = reading;
        }
        self.last
    }

    async fn tare(&mut self) {
        self.tares += 1;
    }

    fn set_calibration(&mut self, factor: f32) {
        self.calibration = Some(factor);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum DisplayOp {
    Number(f32),
    Text(String),
}

#[derive(Debug, Default)]
pub(crate) struct RecordingDisplay {
    ops: Vec<DisplayOp>,
}

impl RecordingDisplay {
    pub(crate) fn ops(&self) -> &[DisplayOp] {
        &self.ops
    }
}

impl WeightDisplay for RecordingDisplay {
    fn render_number(&mut self, value: f32) {
        self.ops.push(DisplayOp::Number(value));
    }

    fn render_text(&mut self, text: &str) {
        self.ops.push(DisplayOp::Text(text.to_string()));
    }
}

pub(crate) fn counting_watchdog() -> (Arc<dyn Watchdog>, Arc<AtomicUsize>) {
    let fed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fed);
    let watchdog: Arc<dyn Watchdog> = Arc::new(move || {
        counter.fetch_add(1, Ordering::Relaxed);
    });
    (watchdog, fed)
}

pub(crate) fn counting_reset() -> (Arc<dyn SystemReset>, Arc<AtomicUsize>) {
    let restarts = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&restarts);
    let reset: Arc<dyn SystemReset> = Arc::new(move || {
        counter.fetch_add(1, Ordering::Relaxed);
    });
    (reset, restarts)
}

#[derive(Debug, Clone, Default)]
pub(crate) struct EventLog {
    events: Arc<Mutex<Vec<ConnectivityEvent>>>,
}

impl EventLog {
    pub(crate) fn listener(&self) -> Arc<dyn EventListener> {
        let events = Arc::clone(&self.events);
        Arc::new(move |event: ConnectivityEvent, _message: &str| {
            events.lock().push(event);
        })
    }

    pub(crate) fn recorded(&self) -> Vec<ConnectivityEvent> {
        self.events.lock().clone()
    }
}

/// Associates after a number of polls.
#[derive(Debug, Default)]
pub(crate) struct FakeNetwork {
    pending_polls: Cell<u32>,
}

impl FakeNetwork {
    pub(crate) fn associated_after(polls: u32) -> Self {
        Self {
            pending_polls: Cell::new(polls),
        }
    }
}

impl Network for FakeNetwork {
    fn begin(&mut self) {}

    fn is_associated(&self) -> bool {
        let pending = self.pending_polls.get();
        if pending == 0 {
            return true;
        }
        self.pending_polls.set(pending - 1);
        false
    }
}

#[derive(Debug, Clone)]
pub(crate) struct FakeClock {
    sync_result: std::result::Result<DateTime<Utc>, TimeSyncError>,
    now: DateTime<Utc>,
}

impl FakeClock {
    pub(crate) fn at(time: DateTime<Utc>) -> Self {
        Self {
            sync_result: Ok(time),
            now: time,
        }
    }

    pub(crate) fn valid() -> Self {
        Self::at(Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
    }

    pub(crate) fn failing() -> Self {
        Self {
            sync_result: Err(TimeSyncError::Unreachable("pool.ntp.org".to_string())),
            now: Utc.timestamp_opt(0, 0).unwrap(),
        }
    }
}

impl TimeSource for FakeClock {
    async fn synchronize(&mut self) -> std::result::Result<DateTime<Utc>, TimeSyncError> {
        self.sync_result.clone()
    }

    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

/// Broker link with scripted handshake outcomes. Handshakes succeed once
/// the script is exhausted.
///
/// With `observed_state` set, the manager's state is recorded at every
/// handshake in `states_at_connect`.
#[derive(Debug, Default)]
pub(crate) struct FakeLink {
    pub(crate) connect_results: VecDeque<std::result::Result<(), LinkFailure>>,
    pub(crate) connected: bool,
    pub(crate) connect_attempts: u32,
    pub(crate) subscriptions: Vec<String>,
    pub(crate) published: Vec<(String, String)>,
    pub(crate) inbound: VecDeque<Vec<InboundMessage>>,
    pub(crate) last_failure: Option<LinkFailure>,
    pub(crate) observed_state: Option<watch::Receiver<ConnectionState>>,
    pub(crate) states_at_connect: Vec<ConnectionState>,
}

impl FakeLink {
    pub(crate) fn failing_with(failures: impl IntoIterator<Item = LinkFailure>) -> Self {
        Self {
            connect_results: failures.into_iter().map(Err).collect(),
            ..Self::default()
        }
    }

    pub(crate) fn drop_session(&mut self, error: ProtocolError) {
        self.connected = false;
        self.last_failure = Some(LinkFailure::transport(error));
    }
}

impl BrokerLink for FakeLink {
    async fn connect(&mut self) -> std::result::Result<(), LinkFailure> {
        self.connect_attempts += 1;
        if let Some(state) = &self.observed_state {
            self.states_at_connect.push(*state.borrow());
        }
        let result = self.connect_results.pop_front().unwrap_or(Ok(()));
        match result {
            Ok(()) => {
                self.connected = true;
                self.last_failure = None;
            }
            Err(failure) => {
                self.connected = false;
                self.last_failure = Some(failure);
            }
        }
        result
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn last_failure(&self) -> Option<LinkFailure> {
        self.last_failure
    }

    async fn subscribe(&mut self, topic: &str) -> std::result::Result<(), ProtocolError> {
        if !self.connected {
            return Err(ProtocolError::NetworkFailedWrite);
        }
        self.subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &str) -> std::result::Result<(), ProtocolError> {
        if !self.connected {
            return Err(ProtocolError::NetworkFailedWrite);
        }
        self.published.push((topic.to_string(), payload.to_string()));
        Ok(())
    }

    async fn service(&mut self) -> Vec<InboundMessage> {
        self.inbound.pop_front().unwrap_or_default()
    }

    fn endpoint(&self) -> String {
        "fake:8883".to_string()
    }
}

/// Records deliveries; refuses them while `connected` is false.
#[derive(Debug)]
pub(crate) struct RecordingSink {
    pub(crate) delivered: Vec<(String, String)>,
    pub(crate) connected: bool,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self {
            delivered: Vec::new(),
            connected: true,
        }
    }
}

impl TelemetrySink for RecordingSink {
    async fn deliver(&mut self, topic: &str, payload: &str) -> Result<()> {
        if !self.connected {
            return Err(Error::NotConnected);
        }
        self.delivered.push((topic.to_string(), payload.to_string()));
        Ok(())
    }
}

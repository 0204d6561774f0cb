// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Network and broker lifecycle.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::sleep;

use crate::error::{Error, LinkFailure, Result, TimeSyncError};
use crate::platform::{Network, SystemReset, TimeSource, Watchdog, is_time_valid};
use crate::protocol::{BrokerLink, InboundMessage, Topics};
use crate::telemetry::TelemetrySink;

use super::event::{ConnectivityEvent, EventListener, MessageHandler};
use super::policy::{ConnectMode, RetryPolicy};
use super::state::ConnectionState;

/// Owns the network association, clock synchronization and broker session.
///
/// Everything runs on the caller's task. Waits are plain sleeps and the
/// watchdog is fed around every one of them.
///
/// Bring-up ([`setup`](Self::setup)) associates with the network,
/// synchronizes the clock once, then connects to the broker in blocking
/// mode. Each cycle, [`service`](Self::service) either processes broker
/// traffic or, if the session is down, runs the recovery path: re-check the
/// network, then reconnect.
pub struct ConnectivityManager<L, N, T> {
    link: L,
    network: N,
    clock: T,
    topics: Topics,
    policy: RetryPolicy,
    state: watch::Sender<ConnectionState>,
    time_synced: bool,
    handler: Option<Arc<dyn MessageHandler>>,
    listener: Option<Arc<dyn EventListener>>,
    watchdog: Arc<dyn Watchdog>,
    reset: Arc<dyn SystemReset>,
}

impl<L: BrokerLink, N: Network, T: TimeSource> ConnectivityManager<L, N, T> {
    /// Creates a manager with the default retry policy.
    pub fn new(
        link: L,
        network: N,
        clock: T,
        topics: Topics,
        watchdog: Arc<dyn Watchdog>,
        reset: Arc<dyn SystemReset>,
    ) -> Self {
        Self {
            link,
            network,
            clock,
            topics,
            policy: RetryPolicy::default(),
            state: watch::channel(ConnectionState::Disconnected).0,
            time_synced: false,
            handler: None,
            listener: None,
            watchdog,
            reset,
        }
    }

    /// Sets the handler receiving inbound messages.
    #[must_use]
    pub fn with_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Sets the status event listener.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Sets the retry policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Creates a watch receiver for state transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            tracing::debug!(from = %current, to = %state, "Connection state changed");
            *current = state;
            true
        });
    }

    /// Returns true while the broker session is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    /// Topic layout in use.
    #[must_use]
    pub fn topics(&self) -> &Topics {
        &self.topics
    }

    /// Wall-clock time from the synchronized clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// The broker link.
    pub fn link(&self) -> &L {
        &self.link
    }

    /// The broker link, mutably.
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    /// Brings the device online: network, clock, then broker (blocking).
    ///
    /// # Errors
    ///
    /// Returns [`Error::TimeSync`] if the clock could not be synchronized.
    /// A restart has already been requested by then.
    pub async fn setup(&mut self) -> Result<()> {
        self.init_network().await?;
        self.configure_broker();
        self.connect(ConnectMode::Blocking).await;
        Ok(())
    }

    async fn init_network(&mut self) -> Result<()> {
        self.notify(ConnectivityEvent::ConnectingNetwork);
        self.set_state(ConnectionState::WifiConnecting);
        tracing::info!("Connecting to network");
        self.network.begin();
        self.wait_for_network(self.policy.network_poll).await;

        if !self.time_synced {
            self.synchronize_time().await?;
        }
        Ok(())
    }

    async fn wait_for_network(&mut self, poll: Duration) {
        let mut polls = 0u32;
        while !self.network.is_associated() {
            polls += 1;
            tracing::debug!(polls, "Waiting for network association");
            sleep(poll).await;
            self.watchdog.feed();
        }
        self.set_state(ConnectionState::WifiConnected);
        tracing::info!(polls, "Network associated");
    }

    async fn synchronize_time(&mut self) -> Result<()> {
        self.set_state(ConnectionState::TimeSyncing);
        tracing::info!("Synchronizing clock");
        let result = self.clock.synchronize().await;
        self.watchdog.feed();

        let failure = match result {
            Ok(time) if is_time_valid(&time) => {
                tracing::info!(time = %time.to_rfc3339(), "Clock synchronized");
                self.time_synced = true;
                return Ok(());
            }
            Ok(time) => TimeSyncError::InvalidTime(time.to_rfc3339()),
            Err(e) => e,
        };

        tracing::error!(error = %failure, "Failed to get time from server, restarting");
        self.notify(ConnectivityEvent::TimeFailure);
        self.set_state(ConnectionState::Failed);
        sleep(self.policy.restart_delay).await;
        self.reset.restart();
        Err(failure.into())
    }

    fn configure_broker(&mut self) {
        self.notify(ConnectivityEvent::ConnectingBroker);
        tracing::info!(endpoint = %self.link.endpoint(), "Connecting to broker");
    }

    /// Connects to the broker unless already connected.
    ///
    /// In [`ConnectMode::Blocking`] failed handshakes are retried after the
    /// broker backoff until one succeeds. In [`ConnectMode::NonBlocking`] the
    /// first failure ends the attempt.
    ///
    /// Returns true if the session is up.
    pub async fn connect(&mut self, mode: ConnectMode) -> bool {
        let mut attempt = 0u32;
        while !self.link.is_connected() {
            self.watchdog.feed();
            self.set_state(ConnectionState::BrokerConnecting);
            attempt += 1;

            match self.link.connect().await {
                Ok(()) => {
                    self.watchdog.feed();
                    self.bootstrap().await;
                }
                Err(failure) => {
                    self.watchdog.feed();
                    log_failure(attempt, &failure);
                    match mode {
                        ConnectMode::Blocking => {
                            tracing::debug!(
                                backoff_ms = self.policy.broker_backoff.as_millis(),
                                "Retrying broker handshake"
                            );
                            sleep(self.policy.broker_backoff).await;
                            self.watchdog.feed();
                        }
                        ConnectMode::NonBlocking => {
                            self.set_state(ConnectionState::Failed);
                            return false;
                        }
                    }
                }
            }
        }
        true
    }

    async fn bootstrap(&mut self) {
        for topic in self.topics.subscriptions() {
            if let Err(e) = self.link.subscribe(&topic).await {
                tracing::warn!(topic = %topic, error = %e, "Subscription failed");
            }
        }
        tracing::info!(endpoint = %self.link.endpoint(), "Broker connected");
        self.notify(ConnectivityEvent::Connected);

        let get_topic = self.topics.shadow_get();
        if let Err(e) = self.link.publish(&get_topic, "").await {
            tracing::warn!(topic = %get_topic, error = %e, "Shadow request failed");
        }
        self.set_state(ConnectionState::BrokerConnected);
    }

    /// Runs once per cycle: processes broker traffic, or recovers the
    /// session if it is down.
    pub async fn service(&mut self) {
        if !self.link.is_connected() {
            self.recover().await;
            return;
        }

        let inbound = self.link.service().await;
        for message in &inbound {
            self.dispatch(message);
        }
        self.watchdog.feed();

        if !self.link.is_connected() {
            self.set_state(ConnectionState::Failed);
        }
    }

    async fn recover(&mut self) {
        match self.link.last_failure() {
            Some(failure) => tracing::warn!(
                error = %failure.error,
                reason = ?failure.rejection,
                "Broker not connected"
            ),
            None => tracing::warn!("Broker not connected"),
        }
        self.notify(ConnectivityEvent::BrokerFailure);
        self.set_state(ConnectionState::Failed);
        sleep(self.policy.failure_pause).await;
        self.watchdog.feed();

        self.set_state(ConnectionState::WifiConnecting);
        tracing::info!("Checking network before reconnecting");
        self.wait_for_network(self.policy.recovery_poll).await;
        self.connect(self.policy.recovery_mode).await;
    }

    fn dispatch(&self, message: &InboundMessage) {
        match &self.handler {
            Some(handler) => handler.handle(&message.topic, &message.payload),
            None => tracing::debug!(topic = %message.topic, "No handler for inbound message"),
        }
    }

    fn notify(&self, event: ConnectivityEvent) {
        tracing::debug!(code = event.code(), message = event.message(), "Connectivity event");
        if let Some(listener) = &self.listener {
            listener.on_event(event, event.message());
        }
    }
}

fn log_failure(attempt: u32, failure: &LinkFailure) {
    match failure.rejection {
        Some(reason) => tracing::warn!(
            attempt,
            error = %failure.error,
            reason = %reason,
            "Broker refused connection"
        ),
        None => tracing::warn!(attempt, error = %failure.error, "Broker handshake failed"),
    }
}

impl<L: BrokerLink, N: Network, T: TimeSource> TelemetrySink for ConnectivityManager<L, N, T> {
    async fn deliver(&mut self, topic: &str, payload: &str) -> Result<()> {
        if !self.link.is_connected() {
            tracing::warn!(topic, "Dropping message, broker not connected");
            return Err(Error::NotConnected);
        }
        self.link.publish(topic, payload).await?;
        self.watchdog.feed();
        Ok(())
    }
}

impl<L, N, T> std::fmt::Debug for ConnectivityManager<L, N, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectivityManager")
            .field("state", &*self.state.borrow())
            .field("topics", &self.topics)
            .field("policy", &self.policy)
            .field("time_synced", &self.time_synced)
            .finish_non_exhaustive()
    }
}

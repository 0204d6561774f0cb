// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broker transport for the scale.
//!
//! [`BrokerLink`] is the seam between the connectivity state machine and an
//! MQTT client. [`MqttLink`] implements it over `rumqttc` (feature `mqtt`);
//! the state machine itself never touches the client library.

mod broker_config;
#[cfg(feature = "mqtt")]
mod mqtt;
mod topics;

pub use broker_config::{
    BrokerConfig, BrokerConfigBuilder, DEFAULT_BROKER_PORT, DEFAULT_IO_TIMEOUT,
    DEFAULT_KEEP_ALIVE, MAX_IO_TIMEOUT, MAX_KEEP_ALIVE, TlsMaterial,
};
#[cfg(feature = "mqtt")]
pub use mqtt::MqttLink;
pub use topics::{
    DEFAULT_DEVICE_TOPIC, DEFAULT_SHADOW_NAME, DEFAULT_THING_NAME, InboundTopic, Topics,
};

use crate::error::{LinkFailure, ProtocolError};

/// A message received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Topic the message was published on.
    pub topic: String,
    /// Payload as text.
    pub payload: String,
}

impl InboundMessage {
    /// Creates a message.
    #[must_use]
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// A session with one MQTT broker.
#[allow(async_fn_in_trait)]
pub trait BrokerLink {
    /// Performs the transport and MQTT handshake, replacing any previous
    /// session.
    ///
    /// # Errors
    ///
    /// Returns the classified failure if the handshake did not complete.
    async fn connect(&mut self) -> Result<(), LinkFailure>;

    /// Returns true while the session is up.
    fn is_connected(&self) -> bool;

    /// The failure that ended the last session or handshake, if any.
    fn last_failure(&self) -> Option<LinkFailure>;

    /// Subscribes to `topic`.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no session or the request failed.
    async fn subscribe(&mut self, topic: &str) -> Result<(), ProtocolError>;

    /// Publishes `payload` on `topic`.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no session or the request failed.
    async fn publish(&mut self, topic: &str, payload: &str) -> Result<(), ProtocolError>;

    /// Processes pending network traffic and keep-alives and returns the
    /// messages received. Marks the link disconnected if the session drops.
    ///
    /// Every received publish is returned. Payload bytes that are not valid
    /// UTF-8 are replaced with U+FFFD.
    async fn service(&mut self) -> Vec<InboundMessage>;

    /// `host:port` of the broker, for logs.
    fn endpoint(&self) -> String;
}

// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Status events and inbound message callbacks.

/// Status events for a surrounding status display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityEvent {
    /// Network association started.
    ConnectingNetwork,
    /// Broker handshake started.
    ConnectingBroker,
    /// Broker session up and subscriptions issued.
    Connected,
    /// The broker session was found down.
    BrokerFailure,
    /// The clock could not be synchronized; the device restarts.
    TimeFailure,
}

impl ConnectivityEvent {
    /// Numeric event code.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::ConnectingNetwork => 1,
            Self::ConnectingBroker => 2,
            Self::Connected => 3,
            Self::BrokerFailure => 4,
            Self::TimeFailure => 5,
        }
    }

    /// Short message shown alongside the event.
    #[must_use]
    pub fn message(self) -> &'static str {
        match self {
            Self::ConnectingNetwork => "Wi-Fi",
            Self::ConnectingBroker => "AWS",
            Self::Connected => "Connected!",
            Self::BrokerFailure => "AWS IoT Failure!",
            Self::TimeFailure => "Date",
        }
    }
}

/// Receives status events.
pub trait EventListener: Send + Sync {
    /// Called on every status change.
    fn on_event(&self, event: ConnectivityEvent, message: &str);
}

impl<F> EventListener for F
where
    F: Fn(ConnectivityEvent, &str) + Send + Sync,
{
    fn on_event(&self, event: ConnectivityEvent, message: &str) {
        self(event, message);
    }
}

/// Receives messages arriving on the subscribed topics, verbatim.
pub trait MessageHandler: Send + Sync {
    /// Handles one inbound message.
    fn handle(&self, topic: &str, payload: &str);
}

impl<F> MessageHandler for F
where
    F: Fn(&str, &str) + Send + Sync,
{
    fn handle(&self, topic: &str, payload: &str) {
        self(topic, payload);
    }
}

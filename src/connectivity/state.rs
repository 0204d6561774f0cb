// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Connection lifecycle state.

/// Where the device is in its connection lifecycle.
///
/// ```text
/// Disconnected → WifiConnecting → WifiConnected → TimeSyncing
///              → BrokerConnecting → BrokerConnected
///
/// Failed → WifiConnecting (recovery)
/// ```
///
/// Time is only synchronized once per session, so recovery goes straight
/// from `WifiConnected` to `BrokerConnecting`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Nothing started yet.
    #[default]
    Disconnected,
    /// Waiting for network association.
    WifiConnecting,
    /// Network associated.
    WifiConnected,
    /// Synchronizing the wall clock.
    TimeSyncing,
    /// Broker handshake in progress or being retried.
    BrokerConnecting,
    /// Broker session up and subscriptions issued.
    BrokerConnected,
    /// The last attempt failed.
    Failed,
}

impl ConnectionState {
    /// Returns true if the broker session is up.
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::BrokerConnected)
    }

    /// Returns true if the last attempt failed.
    #[must_use]
    pub fn is_failed(self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::WifiConnecting => "wifi-connecting",
            Self::WifiConnected => "wifi-connected",
            Self::TimeSyncing => "time-syncing",
            Self::BrokerConnecting => "broker-connecting",
            Self::BrokerConnected => "broker-connected",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_broker_connected_is_connected() {
        assert!(ConnectionState::BrokerConnected.is_connected());
        assert!(!ConnectionState::WifiConnected.is_connected());
        assert!(ConnectionState::Failed.is_failed());
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[test]
    fn display_names() {
        assert_eq!(ConnectionState::TimeSyncing.to_string(), "time-syncing");
    }
}

// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for the scale firmware core.
//!
//! Most failures in this crate are recoverable and are resolved inside the
//! connectivity state machine: they are classified, logged and retried.
//! The types here exist so that classification is explicit and so that the
//! few conditions that do escape (a failed clock synchronization, a bad
//! configuration) carry a meaningful description.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Low-level transport failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Broker handshake or session failure.
    #[error("broker link failure: {0}")]
    Link(#[from] LinkFailure),

    /// Wall-clock synchronization failed; the device must restart.
    #[error("time synchronization failed: {0}")]
    TimeSync(#[from] TimeSyncError),

    /// Invalid configuration or settings.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Error occurred while parsing an inbound document.
    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    /// A delivery was attempted without a live broker connection.
    #[error("broker is not connected")]
    NotConnected,
}

/// Low-level MQTT transport errors.
///
/// These mirror the error codes reported by small embedded MQTT clients so
/// that logs read the same regardless of which client produced them.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// Packet did not fit the client buffer.
    #[error("Buffer too short")]
    BufferTooShort,

    /// Variable-length integer overflowed.
    #[error("Varnum overflow")]
    VarnumOverflow,

    /// The TCP/TLS connection could not be established.
    #[error("Network failed connect")]
    NetworkFailedConnect,

    /// A network operation timed out.
    #[error("Network timeout")]
    NetworkTimeout,

    /// Reading from the network failed.
    #[error("Network failed read")]
    NetworkFailedRead,

    /// Writing to the network failed.
    #[error("Network failed write")]
    NetworkFailedWrite,

    /// Remaining-length field overflowed.
    #[error("Remaining length overflow")]
    RemainingLengthOverflow,

    /// Remaining-length field did not match the packet.
    #[error("Remaining length mismatch")]
    RemainingLengthMismatch,

    /// An unexpected or malformed packet was received.
    #[error("Missing or wrong packet")]
    MissingOrWrongPacket,

    /// The broker refused the connection.
    #[error("Connection denied")]
    ConnectionDenied,

    /// A subscription was rejected.
    #[error("Failed subscription")]
    FailedSubscription,

    /// Too many subscription acknowledgements in one packet.
    #[error("Suback array overflow")]
    SubackArrayOverflow,

    /// The broker did not answer a keep-alive ping.
    #[error("Pong timeout")]
    PongTimeout,
}

/// Reasons a broker gives for refusing a connection.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConnectRejection {
    /// The broker does not speak the requested protocol level.
    #[error("Unacceptable Protocol")]
    UnacceptableProtocol,

    /// The client identifier was rejected.
    #[error("Identifier Rejected")]
    IdentifierRejected,

    /// The broker is temporarily unavailable.
    #[error("Server Unavailable")]
    ServerUnavailable,

    /// Username or password were rejected.
    #[error("Bad UserName/Password")]
    BadCredentials,

    /// The client is not authorized to connect.
    #[error("Not Authorized")]
    NotAuthorized,

    /// The broker answered with an unknown return code.
    #[error("Unknown Return Code")]
    Unknown,
}

/// A classified broker link failure.
///
/// Every failure carries the transport error; handshake refusals also carry
/// the broker's rejection reason.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("{error}{}", .rejection.map(|r| format!(" ({r})")).unwrap_or_default())]
pub struct LinkFailure {
    /// The low-level transport error.
    pub error: ProtocolError,
    /// The broker's reason, when the broker refused the handshake.
    pub rejection: Option<ConnectRejection>,
}

impl LinkFailure {
    /// Creates a failure for a transport-level error.
    #[must_use]
    pub fn transport(error: ProtocolError) -> Self {
        Self {
            error,
            rejection: None,
        }
    }

    /// Creates a failure for a broker refusal.
    #[must_use]
    pub fn rejected(reason: ConnectRejection) -> Self {
        Self {
            error: ProtocolError::ConnectionDenied,
            rejection: Some(reason),
        }
    }
}

impl From<ProtocolError> for LinkFailure {
    fn from(error: ProtocolError) -> Self {
        Self::transport(error)
    }
}

/// Errors related to wall-clock synchronization.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimeSyncError {
    /// The time service could not be reached.
    #[error("time service unreachable: {0}")]
    Unreachable(String),

    /// The clock reported a time that cannot be valid.
    #[error("clock reports invalid time {0}")]
    InvalidTime(String),
}

/// Errors related to configuration and settings validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A settings value is outside its allowed domain.
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        /// The offending field.
        field: &'static str,
        /// Description of the constraint.
        message: String,
    },

    /// A required configuration entry is missing.
    #[error("missing configuration: {0}")]
    Missing(&'static str),

    /// A configuration or credential file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path of the file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A configuration file is not valid JSON.
    #[error("invalid configuration file: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors related to parsing inbound documents.
#[derive(Debug, Error)]
pub enum ParseError {
    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    /// Expected field is missing from the document.
    #[error("missing field in document: {0}")]
    MissingField(&'static str),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_error_display() {
        assert_eq!(ProtocolError::PongTimeout.to_string(), "Pong timeout");
        assert_eq!(
            ProtocolError::NetworkFailedConnect.to_string(),
            "Network failed connect"
        );
    }

    #[test]
    fn link_failure_display_with_rejection() {
        let failure = LinkFailure::rejected(ConnectRejection::NotAuthorized);
        assert_eq!(failure.error, ProtocolError::ConnectionDenied);
        assert_eq!(failure.to_string(), "Connection denied (Not Authorized)");
    }

    #[test]
    fn link_failure_display_transport_only() {
        let failure = LinkFailure::transport(ProtocolError::NetworkTimeout);
        assert!(failure.rejection.is_none());
        assert_eq!(failure.to_string(), "Network timeout");
    }

    #[test]
    fn error_from_time_sync() {
        let err: Error = TimeSyncError::InvalidTime("1970-01-01T00:00:00Z".to_string()).into();
        assert!(matches!(err, Error::TimeSync(TimeSyncError::InvalidTime(_))));
    }

    #[test]
    fn config_error_display() {
        let err = ConfigError::InvalidValue {
            field: "numMeasurements",
            message: "must be at least 1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "invalid value for numMeasurements: must be at least 1"
        );
    }
}

// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broker endpoint and secured transport configuration.

use std::time::Duration;

use crate::error::ConfigError;

/// Default secured MQTT port.
pub const DEFAULT_BROKER_PORT: u16 = 8883;

/// Default MQTT keep-alive interval.
pub const DEFAULT_KEEP_ALIVE: Duration = Duration::from_secs(50);

/// Default bound on a single handshake.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(4);

/// Longest keep-alive the CONNECT packet can carry.
pub const MAX_KEEP_ALIVE: Duration = Duration::from_secs(65_535);

/// Longest accepted handshake timeout.
pub const MAX_IO_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Trust anchor and client identity for the TLS transport.
///
/// All three are PEM blobs supplied by provisioning. They are handed to the
/// TLS stack untouched.
#[derive(Clone, PartialEq, Eq)]
pub struct TlsMaterial {
    /// CA certificate.
    pub ca: Vec<u8>,
    /// Client certificate.
    pub client_cert: Vec<u8>,
    /// Client private key.
    pub client_key: Vec<u8>,
}

impl std::fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca", &format_args!("{} bytes", self.ca.len()))
            .field("client_cert", &format_args!("{} bytes", self.client_cert.len()))
            .field("client_key", &"<redacted>")
            .finish()
    }
}

/// Configuration for the broker link.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    host: String,
    port: u16,
    client_id: String,
    keep_alive: Duration,
    io_timeout: Duration,
    tls: Option<TlsMaterial>,
}

impl BrokerConfig {
    /// Creates a new builder.
    #[must_use]
    pub fn builder() -> BrokerConfigBuilder {
        BrokerConfigBuilder::default()
    }

    /// Broker host name.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Broker port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// MQTT client identifier.
    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Keep-alive interval.
    #[must_use]
    pub fn keep_alive(&self) -> Duration {
        self.keep_alive
    }

    /// Bound on a single handshake.
    #[must_use]
    pub fn io_timeout(&self) -> Duration {
        self.io_timeout
    }

    /// TLS material, if the transport is secured.
    #[must_use]
    pub fn tls(&self) -> Option<&TlsMaterial> {
        self.tls.as_ref()
    }

    /// `host:port`, for logs.
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Builder for [`BrokerConfig`].
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use cat_scale::protocol::BrokerConfig;
///
/// let config = BrokerConfig::builder()
///     .host("example-ats.iot.us-east-1.amazonaws.com")
///     .client_id("Cat-Scale-Firebeetle8266")
///     .keep_alive(Duration::from_secs(30))
///     .build()
///     .unwrap();
/// assert_eq!(config.port(), 8883);
/// ```
#[derive(Debug)]
pub struct BrokerConfigBuilder {
    host: String,
    port: u16,
    client_id: String,
    keep_alive: Duration,
    io_timeout: Duration,
    tls: Option<TlsMaterial>,
}

impl Default for BrokerConfigBuilder {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_BROKER_PORT,
            client_id: String::new(),
            keep_alive: DEFAULT_KEEP_ALIVE,
            io_timeout: DEFAULT_IO_TIMEOUT,
            tls: None,
        }
    }
}

impl BrokerConfigBuilder {
    /// Sets the broker host.
    #[must_use]
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Sets the broker port (default: 8883).
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the MQTT client identifier.
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    /// Sets the keep-alive interval (default: 50 seconds).
    #[must_use]
    pub fn keep_alive(mut self, duration: Duration) -> Self {
        self.keep_alive = duration;
        self
    }

    /// Sets the handshake timeout (default: 4 seconds).
    #[must_use]
    pub fn io_timeout(mut self, duration: Duration) -> Self {
        self.io_timeout = duration;
        self
    }

    /// Secures the transport with the given material.
    #[must_use]
    pub fn tls(mut self, material: TlsMaterial) -> Self {
        self.tls = Some(material);
        self
    }

    /// Validates and builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] if the host or client id is not set,
    /// and [`ConfigError::InvalidValue`] for a keep-alive that is neither zero
    /// nor between one second and [`MAX_KEEP_ALIVE`], or for a timeout that
    /// is zero or above [`MAX_IO_TIMEOUT`].
    pub fn build(self) -> Result<BrokerConfig, ConfigError> {
        if self.host.is_empty() {
            return Err(ConfigError::Missing("broker host"));
        }
        if self.client_id.is_empty() {
            return Err(ConfigError::Missing("client id"));
        }
        if !self.keep_alive.is_zero()
            && (self.keep_alive < Duration::from_secs(1) || self.keep_alive > MAX_KEEP_ALIVE)
        {
            return Err(ConfigError::InvalidValue {
                field: "keepAlive",
                message: format!(
                    "{} ms must be 0 or between 1 s and {} s",
                    self.keep_alive.as_millis(),
                    MAX_KEEP_ALIVE.as_secs()
                ),
            });
        }
        if self.io_timeout.is_zero() || self.io_timeout > MAX_IO_TIMEOUT {
            return Err(ConfigError::InvalidValue {
                field: "ioTimeout",
                message: format!(
                    "{} ms must be greater than zero and at most {} s",
                    self.io_timeout.as_millis(),
                    MAX_IO_TIMEOUT.as_secs()
                ),
            });
        }
        Ok(BrokerConfig {
            host: self.host,
            port: self.port,
            client_id: self.client_id,
            keep_alive: self.keep_alive,
            io_timeout: self.io_timeout,
            tls: self.tls,
        })
    }
}

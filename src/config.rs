// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Device configuration file.
//!
//! ```json
//! {
//!   "broker": {
//!     "host": "example-ats.iot.us-east-1.amazonaws.com",
//!     "clientId": "Cat-Scale-Firebeetle8266"
//!   },
//!   "tls": {
//!     "caPath": "certs/AmazonRootCA1.pem",
//!     "certPath": "certs/certificate.pem.crt",
//!     "keyPath": "certs/private.pem.key"
//!   },
//!   "retry": { "recoveryMode": "nonBlocking" }
//! }
//! ```
//!
//! Everything except `broker.host` has a default. `settings` seeds the scale
//! until the shadow document arrives.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connectivity::RetryPolicy;
use crate::error::ConfigError;
use crate::protocol::{
    BrokerConfig, DEFAULT_BROKER_PORT, DEFAULT_IO_TIMEOUT, DEFAULT_KEEP_ALIVE, TlsMaterial,
    Topics,
};
use crate::settings::{ScaleSettings, duration_ms};

/// Default period of the driver cycle.
pub const DEFAULT_CYCLE_PERIOD: Duration = Duration::from_secs(1);

/// Broker section of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerSection {
    /// Broker host name.
    pub host: String,
    /// Broker port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// MQTT client id. Defaults to the thing name.
    #[serde(default)]
    pub client_id: Option<String>,
    /// Keep-alive interval in milliseconds.
    #[serde(default = "default_keep_alive", with = "duration_ms")]
    pub keep_alive: Duration,
    /// Handshake timeout in milliseconds.
    #[serde(default = "default_io_timeout", with = "duration_ms")]
    pub io_timeout: Duration,
}

/// Paths to the PEM files securing the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TlsPaths {
    /// CA certificate.
    pub ca_path: PathBuf,
    /// Client certificate.
    pub cert_path: PathBuf,
    /// Client private key.
    pub key_path: PathBuf,
}

/// Complete device configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    /// Broker endpoint.
    pub broker: BrokerSection,
    /// Transport security. Plain TCP when absent.
    #[serde(default)]
    pub tls: Option<TlsPaths>,
    /// Topic layout.
    #[serde(default)]
    pub topics: Topics,
    /// Retry timing.
    #[serde(default)]
    pub retry: RetryPolicy,
    /// Initial scale settings.
    #[serde(default)]
    pub settings: ScaleSettings,
    /// Driver cycle period in milliseconds.
    #[serde(default = "default_cycle_period", with = "duration_ms")]
    pub cycle_period: Duration,
}

fn default_port() -> u16 {
    DEFAULT_BROKER_PORT
}

fn default_keep_alive() -> Duration {
    DEFAULT_KEEP_ALIVE
}

fn default_io_timeout() -> Duration {
    DEFAULT_IO_TIMEOUT
}

fn default_cycle_period() -> Duration {
    DEFAULT_CYCLE_PERIOD
}

impl DeviceConfig {
    /// Reads and validates a configuration file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, and the errors
    /// of [`from_json`](Self::from_json) otherwise.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "Loading device configuration");
        let text = read(path)?;
        Self::from_json(&text)
    }

    /// Parses and validates a configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Json`] for malformed documents and
    /// [`ConfigError::InvalidValue`] for invalid settings.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(text)?;
        config.settings = config.settings.validated()?;
        if config.cycle_period.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "cyclePeriod",
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(config)
    }

    /// Reads the PEM files named in the `tls` section.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if a file cannot be read.
    pub fn tls_material(&self) -> Result<Option<TlsMaterial>, ConfigError> {
        let Some(paths) = &self.tls else {
            return Ok(None);
        };
        Ok(Some(TlsMaterial {
            ca: read_bytes(&paths.ca_path)?,
            client_cert: read_bytes(&paths.cert_path)?,
            client_key: read_bytes(&paths.key_path)?,
        }))
    }

    /// Builds the broker link configuration, loading TLS material.
    ///
    /// # Errors
    ///
    /// Returns an error if TLS files cannot be read or the broker section is
    /// incomplete.
    pub fn broker_config(&self) -> Result<BrokerConfig, ConfigError> {
        let client_id = self
            .broker
            .client_id
            .clone()
            .unwrap_or_else(|| self.topics.thing_name().to_string());
        let mut builder = BrokerConfig::builder()
            .host(&self.broker.host)
            .port(self.broker.port)
            .client_id(client_id)
            .keep_alive(self.broker.keep_alive)
            .io_timeout(self.broker.io_timeout);
        if let Some(material) = self.tls_material()? {
            builder = builder.tls(material);
        }
        builder.build()
    }
}

fn read(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })
}

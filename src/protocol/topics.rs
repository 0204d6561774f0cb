// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Topic layout for the scale.
//!
//! ```text
//! {device}/pub                                        telemetry (out)
//! {device}/sub                                        commands (in)
//! $aws/things/{thing}/shadow/name/{shadow}/get        shadow request (out)
//! $aws/things/{thing}/shadow/name/{shadow}/update     shadow report (out)
//! .../get/accepted                                    shadow document (in)
//! .../update/delta                                    shadow delta (in)
//! ```

use serde::{Deserialize, Serialize};

/// Default device topic prefix.
pub const DEFAULT_DEVICE_TOPIC: &str = "catScale";

/// Default IoT thing name.
pub const DEFAULT_THING_NAME: &str = "Cat-Scale-Firebeetle8266";

/// Default named shadow holding the scale settings.
pub const DEFAULT_SHADOW_NAME: &str = "CatScaleConfig";

/// What an inbound topic is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundTopic {
    /// Device command topic.
    Command,
    /// Full shadow document answering a get request.
    ShadowAccepted,
    /// Shadow delta between desired and reported state.
    ShadowDelta,
    /// Anything else.
    Other,
}

/// Names of every topic the device uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Topics {
    device: String,
    thing_name: String,
    shadow_name: String,
}

impl Default for Topics {
    fn default() -> Self {
        Self::new(DEFAULT_DEVICE_TOPIC, DEFAULT_THING_NAME, DEFAULT_SHADOW_NAME)
    }
}

impl Topics {
    /// Creates a topic layout.
    #[must_use]
    pub fn new(
        device: impl Into<String>,
        thing_name: impl Into<String>,
        shadow_name: impl Into<String>,
    ) -> Self {
        Self {
            device: device.into(),
            thing_name: thing_name.into(),
            shadow_name: shadow_name.into(),
        }
    }

    /// Device topic prefix.
    #[must_use]
    pub fn device(&self) -> &str {
        &self.device
    }

    /// IoT thing name.
    #[must_use]
    pub fn thing_name(&self) -> &str {
        &self.thing_name
    }

    /// Outbound weight records.
    #[must_use]
    pub fn telemetry(&self) -> String {
        format!("{}/pub", self.device)
    }

    /// Inbound device commands.
    #[must_use]
    pub fn command(&self) -> String {
        format!("{}/sub", self.device)
    }

    fn shadow(&self, suffix: &str) -> String {
        format!(
            "$aws/things/{}/shadow/name/{}/{suffix}",
            self.thing_name, self.shadow_name
        )
    }

    /// Shadow get request.
    #[must_use]
    pub fn shadow_get(&self) -> String {
        self.shadow("get")
    }

    /// Shadow report.
    #[must_use]
    pub fn shadow_update(&self) -> String {
        self.shadow("update")
    }

    /// Shadow get response.
    #[must_use]
    pub fn shadow_get_accepted(&self) -> String {
        self.shadow("get/accepted")
    }

    /// Shadow delta notifications.
    #[must_use]
    pub fn shadow_update_delta(&self) -> String {
        self.shadow("update/delta")
    }

    /// The three topics subscribed after every handshake.
    #[must_use]
    pub fn subscriptions(&self) -> [String; 3] {
        [
            self.command(),
            self.shadow_get_accepted(),
            self.shadow_update_delta(),
        ]
    }

    /// Classifies an inbound topic.
    #[must_use]
    pub fn classify(&self, topic: &str) -> InboundTopic {
        if topic == self.command() {
            InboundTopic::Command
        } else if topic == self.shadow_get_accepted() {
            InboundTopic::ShadowAccepted
        } else if topic == self.shadow_update_delta() {
            InboundTopic::ShadowDelta
        } else {
            InboundTopic::Other
        }
    }
}

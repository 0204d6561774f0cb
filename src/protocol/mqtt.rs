// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Broker link over `rumqttc`.

use std::borrow::Cow;
use std::io;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, Publish,
    QoS, StateError, SubscribeReasonCode, Transport,
};
use tokio::time::Instant;

use crate::error::{ConnectRejection, LinkFailure, ProtocolError};
use crate::protocol::{BrokerConfig, BrokerLink, InboundMessage};

/// Capacity of the request channel between client and event loop.
const REQUEST_CAPACITY: usize = 32;

/// How long one `service` call waits for further events.
const SERVICE_POLL_WINDOW: Duration = Duration::from_millis(50);

/// Upper bound on events handled by one `service` call.
const MAX_EVENTS_PER_SERVICE: usize = 64;

struct Session {
    client: AsyncClient,
    event_loop: EventLoop,
}

/// MQTT 3.1.1 link driven from the caller's task.
///
/// No background task is spawned: the event loop only runs inside
/// [`connect`](BrokerLink::connect) and [`service`](BrokerLink::service),
/// so keep-alives depend on `service` being called regularly.
///
/// # Examples
///
/// ```no_run
/// use cat_scale::protocol::{BrokerConfig, BrokerLink, MqttLink};
///
/// # async fn example() -> cat_scale::Result<()> {
/// let config = BrokerConfig::builder()
///     .host("127.0.0.1")
///     .port(1883)
///     .client_id("scale")
///     .build()?;
/// let mut link = MqttLink::new(config);
///
/// link.connect().await?;
/// link.publish("catScale/pub", r#"{"weight":1.0}"#).await?;
/// for message in link.service().await {
///     println!("{}: {}", message.topic, message.payload);
/// }
/// # Ok(())
/// # }
/// ```
pub struct MqttLink {
    config: BrokerConfig,
    session: Option<Session>,
    connected: bool,
    last_failure: Option<LinkFailure>,
}

impl MqttLink {
    /// Creates a disconnected link.
    #[must_use]
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            session: None,
            connected: false,
            last_failure: None,
        }
    }

    /// The link configuration.
    #[must_use]
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.config.client_id(),
            self.config.host(),
            self.config.port(),
        );
        options.set_keep_alive(self.config.keep_alive());
        options.set_clean_session(true);

        if let Some(tls) = self.config.tls() {
            options.set_transport(Transport::tls(
                tls.ca.clone(),
                Some((tls.client_cert.clone(), tls.client_key.clone())),
                None,
            ));
        }
        options
    }

    fn mark_lost(&mut self, failure: LinkFailure) {
        tracing::warn!(
            endpoint = %self.config.endpoint(),
            error = %failure,
            "Broker connection lost"
        );
        self.connected = false;
        self.session = None;
        self.last_failure = Some(failure);
    }
}

impl BrokerLink for MqttLink {
    async fn connect(&mut self) -> Result<(), LinkFailure> {
        self.connected = false;
        self.session = None;

        let (client, mut event_loop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);
        let deadline = Instant::now() + self.config.io_timeout();

        let outcome = loop {
            match tokio::time::timeout_at(deadline, event_loop.poll()).await {
                Err(_) => break Err(LinkFailure::transport(ProtocolError::NetworkTimeout)),
                Ok(Ok(Event::Incoming(Packet::ConnAck(connack)))) => {
                    tracing::debug!(?connack, "MQTT broker answered handshake");
                    break match rejection_for(connack.code) {
                        None => Ok(()),
                        Some(reason) => Err(LinkFailure::rejected(reason)),
                    };
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    tracing::debug!(error = %e, "MQTT handshake error");
                    break Err(classify(&e, ProtocolError::NetworkFailedConnect));
                }
            }
        };

        match outcome {
            Ok(()) => {
                tracing::info!(
                    endpoint = %self.config.endpoint(),
                    client_id = %self.config.client_id(),
                    "Connected to MQTT broker"
                );
                self.session = Some(Session { client, event_loop });
                self.connected = true;
                self.last_failure = None;
                Ok(())
            }
            Err(failure) => {
                self.last_failure = Some(failure);
                Err(failure)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn last_failure(&self) -> Option<LinkFailure> {
        self.last_failure
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), ProtocolError> {
        let Some(session) = self.session.as_ref() else {
            return Err(ProtocolError::NetworkFailedWrite);
        };
        session
            .client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| {
                tracing::warn!(topic, error = %e, "Failed to queue subscription");
                ProtocolError::FailedSubscription
            })?;
        tracing::debug!(topic, "Subscribed");
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &str) -> Result<(), ProtocolError> {
        let Some(session) = self.session.as_ref() else {
            return Err(ProtocolError::NetworkFailedWrite);
        };
        tracing::debug!(topic, payload, "Publishing MQTT message");
        session
            .client
            .publish(topic, QoS::AtMostOnce, false, payload.as_bytes().to_vec())
            .await
            .map_err(|e| {
                tracing::warn!(topic, error = %e, "Failed to queue publish");
                ProtocolError::NetworkFailedWrite
            })
    }

    async fn service(&mut self) -> Vec<InboundMessage> {
        let mut inbound = Vec::new();
        let Some(session) = self.session.as_mut() else {
            return inbound;
        };

        let mut lost = None;
        for _ in 0..MAX_EVENTS_PER_SERVICE {
            match tokio::time::timeout(SERVICE_POLL_WINDOW, session.event_loop.poll()).await {
                Err(_) => break,
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    let message = inbound_message(&publish);
                    tracing::debug!(
                        topic = %message.topic,
                        payload = %message.payload,
                        "MQTT message received"
                    );
                    inbound.push(message);
                }
                Ok(Ok(Event::Incoming(Packet::SubAck(suback)))) => {
                    if suback
                        .return_codes
                        .iter()
                        .any(|code| matches!(code, SubscribeReasonCode::Failure))
                    {
                        tracing::warn!(
                            pkid = suback.pkid,
                            error = %ProtocolError::FailedSubscription,
                            "Broker rejected subscription"
                        );
                    }
                }
                Ok(Ok(Event::Incoming(Packet::Disconnect))) => {
                    lost = Some(LinkFailure::transport(ProtocolError::NetworkFailedRead));
                    break;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    lost = Some(classify(&e, ProtocolError::NetworkFailedRead));
                    break;
                }
            }
        }

        if let Some(failure) = lost {
            self.mark_lost(failure);
        }
        inbound
    }

    fn endpoint(&self) -> String {
        self.config.endpoint()
    }
}

impl std::fmt::Debug for MqttLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttLink")
            .field("endpoint", &self.config.endpoint())
            .field("connected", &self.connected)
            .field("last_failure", &self.last_failure)
            .finish_non_exhaustive()
    }
}

/// Converts a received publish. Invalid UTF-8 is replaced rather than
/// dropped; the handler decides what to make of it.
fn inbound_message(publish: &Publish) -> InboundMessage {
    let payload = String::from_utf8_lossy(&publish.payload);
    if let Cow::Owned(_) = payload {
        tracing::warn!(topic = %publish.topic, "Payload is not valid UTF-8, forwarding lossy copy");
    }
    InboundMessage::new(publish.topic.clone(), payload)
}

/// Maps a CONNACK return code to a rejection reason. `None` means accepted.
fn rejection_for(code: ConnectReturnCode) -> Option<ConnectRejection> {
    #[allow(unreachable_patterns)]
    match code {
        ConnectReturnCode::Success => None,
        ConnectReturnCode::RefusedProtocolVersion => Some(ConnectRejection::UnacceptableProtocol),
        ConnectReturnCode::BadClientId => Some(ConnectRejection::IdentifierRejected),
        ConnectReturnCode::ServiceUnavailable => Some(ConnectRejection::ServerUnavailable),
        ConnectReturnCode::BadUserNamePassword => Some(ConnectRejection::BadCredentials),
        ConnectReturnCode::NotAuthorized => Some(ConnectRejection::NotAuthorized),
        _ => Some(ConnectRejection::Unknown),
    }
}

/// Classifies a client error. `fallback` covers errors with no closer match.
fn classify(err: &ConnectionError, fallback: ProtocolError) -> LinkFailure {
    match err {
        ConnectionError::ConnectionRefused(code) => rejection_for(*code).map_or(
            LinkFailure::transport(ProtocolError::ConnectionDenied),
            LinkFailure::rejected,
        ),
        ConnectionError::NetworkTimeout => LinkFailure::transport(ProtocolError::NetworkTimeout),
        ConnectionError::Io(e) => LinkFailure::transport(classify_io(e, fallback)),
        ConnectionError::MqttState(StateError::AwaitPingResp) => {
            LinkFailure::transport(ProtocolError::PongTimeout)
        }
        ConnectionError::MqttState(StateError::Deserialization(_))
        | ConnectionError::NotConnAck(_) => {
            LinkFailure::transport(ProtocolError::MissingOrWrongPacket)
        }
        _ => LinkFailure::transport(fallback),
    }
}

fn classify_io(err: &io::Error, fallback: ProtocolError) -> ProtocolError {
    match err.kind() {
        io::ErrorKind::TimedOut => ProtocolError::NetworkTimeout,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::AddrNotAvailable
        | io::ErrorKind::NotFound => ProtocolError::NetworkFailedConnect,
        io::ErrorKind::UnexpectedEof
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted => ProtocolError::NetworkFailedRead,
        io::ErrorKind::BrokenPipe | io::ErrorKind::WriteZero => ProtocolError::NetworkFailedWrite,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_handshake_has_no_rejection() {
        assert_eq!(rejection_for(ConnectReturnCode::Success), None);
    }

    #[test]
    fn refusal_codes_map_to_reasons() {
        assert_eq!(
            rejection_for(ConnectReturnCode::NotAuthorized),
            Some(ConnectRejection::NotAuthorized)
        );
        assert_eq!(
            rejection_for(ConnectReturnCode::BadClientId),
            Some(ConnectRejection::IdentifierRejected)
        );

        let failure = classify(
            &ConnectionError::ConnectionRefused(ConnectReturnCode::BadUserNamePassword),
            ProtocolError::NetworkFailedConnect,
        );
        assert_eq!(failure, LinkFailure::rejected(ConnectRejection::BadCredentials));
    }

    #[test]
    fn io_errors_are_classified() {
        let refused = ConnectionError::Io(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert_eq!(
            classify(&refused, ProtocolError::NetworkFailedRead).error,
            ProtocolError::NetworkFailedConnect
        );

        let reset = ConnectionError::Io(io::Error::from(io::ErrorKind::ConnectionReset));
        assert_eq!(
            classify(&reset, ProtocolError::NetworkFailedConnect).error,
            ProtocolError::NetworkFailedRead
        );

        let other = ConnectionError::Io(io::Error::other("tls"));
        assert_eq!(
            classify(&other, ProtocolError::NetworkFailedConnect).error,
            ProtocolError::NetworkFailedConnect
        );
    }

    #[test]
    fn timeouts_are_classified() {
        assert_eq!(
            classify(&ConnectionError::NetworkTimeout, ProtocolError::NetworkFailedRead).error,
            ProtocolError::NetworkTimeout
        );
        assert_eq!(
            classify(
                &ConnectionError::MqttState(StateError::AwaitPingResp),
                ProtocolError::NetworkFailedRead
            )
            .error,
            ProtocolError::PongTimeout
        );
    }

    #[test]
    fn inbound_payload_is_forwarded() {
        let publish = Publish::new("catScale/sub", QoS::AtMostOnce, r#"{"tare":true}"#);
        assert_eq!(
            inbound_message(&publish),
            InboundMessage::new("catScale/sub", r#"{"tare":true}"#)
        );
    }

    #[test]
    fn invalid_utf8_payload_is_forwarded_lossy() {
        let publish = Publish::new("catScale/sub", QoS::AtMostOnce, vec![b'o', b'k', 0xff]);
        let message = inbound_message(&publish);
        assert_eq!(message.topic, "catScale/sub");
        assert_eq!(message.payload, "ok\u{fffd}");
    }

    #[tokio::test]
    async fn disconnected_link_refuses_io() {
        let config = BrokerConfig::builder()
            .host("127.0.0.1")
            .client_id("scale")
            .build()
            .unwrap();
        let mut link = MqttLink::new(config);

        assert!(!link.is_connected());
        assert!(link.service().await.is_empty());
        assert_eq!(
            link.publish("catScale/pub", "{}").await,
            Err(ProtocolError::NetworkFailedWrite)
        );
    }
}

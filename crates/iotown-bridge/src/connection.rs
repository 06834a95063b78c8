// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MQTT broker connections.
//!
//! Each connection owns a rumqttc event loop running in its own task. The
//! loop never calls back into the bridge directly: incoming publishes and
//! connectivity changes are forwarded as [`BridgeEvent`]s into one channel
//! shared by both connections, which the bridge consumes in order.

use crate::config::BrokerConfig;
use crate::queue::{DeliveryOptions, PublishError, Publisher, Qos};
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet,
    SubscribeReasonCode, TlsConfiguration, Transport,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

const MAX_PACKET_SIZE: usize = 1024 * 1024;
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Connection errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Failed to read CA file {path}: {source}")]
    CaFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// Which broker a connection talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// ChirpStack.
    Source,
    /// IOTOWN.
    Destination,
}

impl Side {
    /// Short tag used in client IDs.
    pub fn tag(self) -> &'static str {
        match self {
            Self::Source => "chirpstack",
            Self::Destination => "iotown",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Source => write!(f, "ChirpStack"),
            Self::Destination => write!(f, "IOTOWN"),
        }
    }
}

/// Event delivered to the bridge controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    /// A message received on a subscribed source topic.
    Message { topic: String, payload: Vec<u8> },
    /// A broker connection went up or down.
    Connectivity { side: Side, connected: bool },
}

/// Client ID: `{prefix}-{chirpstack|iotown}-{unix millis}`.
pub fn client_id(prefix: &str, side: Side) -> String {
    format!(
        "{}-{}-{}",
        prefix,
        side.tag(),
        chrono::Utc::now().timestamp_millis()
    )
}

/// Build rumqttc options for a broker.
pub fn mqtt_options(broker: &BrokerConfig, client_id: &str) -> Result<MqttOptions, ConnectionError> {
    let mut opts = MqttOptions::new(client_id, &broker.host, broker.port);
    opts.set_keep_alive(Duration::from_secs(broker.keep_alive_secs));
    opts.set_clean_session(true);
    opts.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);

    if let Some(username) = broker.username.as_deref().filter(|u| !u.is_empty()) {
        opts.set_credentials(username, broker.password.as_deref().unwrap_or(""));
    }

    if broker.tls {
        let transport = if !broker.reject_unauthorized {
            tracing::warn!(
                "TLS certificate verification disabled for {}",
                broker.broker_addr()
            );
            Transport::tls_with_config(TlsConfiguration::Rustls(Arc::new(
                insecure::client_config(),
            )))
        } else if let Some(path) = &broker.ca_file {
            let ca = std::fs::read(path).map_err(|source| ConnectionError::CaFile {
                path: path.clone(),
                source,
            })?;
            Transport::tls_with_config(TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth: None,
            })
        } else {
            Transport::tls_with_default_config()
        };
        opts.set_transport(transport);
    }

    Ok(opts)
}

/// A live broker connection.
pub struct MqttConnection {
    side: Side,
    client: AsyncClient,
    task: JoinHandle<()>,
}

impl MqttConnection {
    /// Ask the client to connect and start forwarding events.
    ///
    /// Returns immediately; establishment is reported later through a
    /// `Connectivity` event. `subscriptions` are (re)subscribed on every
    /// connection acknowledgement.
    pub fn open(
        side: Side,
        broker: &BrokerConfig,
        client_id: &str,
        subscriptions: Vec<String>,
        reconnect_interval: Duration,
        events: UnboundedSender<BridgeEvent>,
    ) -> Result<Self, ConnectionError> {
        let opts = mqtt_options(broker, client_id)?;
        let (client, eventloop) = AsyncClient::new(opts, broker.request_capacity.max(1));

        tracing::info!("Connecting to {} MQTT: {}", side, broker.url());

        let task = tokio::spawn(run_event_loop(
            side,
            eventloop,
            client.clone(),
            subscriptions,
            broker.qos,
            reconnect_interval,
            events,
        ));

        Ok(Self { side, client, task })
    }

    /// Which broker this connection talks to.
    pub fn side(&self) -> Side {
        self.side
    }

    /// Publisher handle for this connection.
    pub fn publisher(&self, timeout: Duration) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
            timeout,
        }
    }

    /// Disconnect and wait briefly for the event loop to finish.
    pub async fn close(self) {
        if let Err(err) = self.client.try_disconnect() {
            tracing::debug!("{} disconnect request failed: {}", self.side, err);
        }

        let mut task = self.task;
        if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
            task.abort();
        }
        tracing::info!("Disconnected from {} MQTT", self.side);
    }
}

async fn run_event_loop(
    side: Side,
    mut eventloop: EventLoop,
    client: AsyncClient,
    subscriptions: Vec<String>,
    qos: Qos,
    reconnect_interval: Duration,
    events: UnboundedSender<BridgeEvent>,
) {
    let mut connected = false;

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code != ConnectReturnCode::Success {
                    tracing::error!("{} MQTT broker refused connection: {:?}", side, ack.code);
                    continue;
                }

                tracing::info!("Connected to {} MQTT broker", side);
                connected = true;
                if events
                    .send(BridgeEvent::Connectivity {
                        side,
                        connected: true,
                    })
                    .is_err()
                {
                    break;
                }

                for topic in &subscriptions {
                    if let Err(err) = client.try_subscribe(topic.as_str(), qos.into()) {
                        tracing::error!("{} subscription error for {}: {}", side, topic, err);
                    }
                }
            }
            Ok(Event::Incoming(Packet::SubAck(ack))) => {
                for code in &ack.return_codes {
                    match code {
                        SubscribeReasonCode::Success(granted) => {
                            tracing::info!("Subscribed to {} topic (QoS {:?})", side, granted);
                        }
                        SubscribeReasonCode::Failure => {
                            tracing::error!("{} rejected a subscription (pkid {})", side, ack.pkid);
                        }
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if side != Side::Source {
                    continue;
                }
                let event = BridgeEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                };
                if let Err(err) = events.send(event) {
                    if let BridgeEvent::Message { topic, .. } = err.0 {
                        tracing::warn!("Bridge stopped, dropping message from {}", topic);
                    }
                    break;
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                if connected {
                    let _ = events.send(BridgeEvent::Connectivity {
                        side,
                        connected: false,
                    });
                }
                break;
            }
            Ok(_) => {}
            Err(rumqttc::ConnectionError::RequestsDone) => break,
            Err(err) => {
                if connected {
                    connected = false;
                    tracing::warn!("{} MQTT connection closed: {}", side, err);
                    if events
                        .send(BridgeEvent::Connectivity {
                            side,
                            connected: false,
                        })
                        .is_err()
                    {
                        break;
                    }
                } else {
                    tracing::error!("{} MQTT error: {}", side, err);
                }

                tracing::warn!("Reconnecting to {} MQTT broker...", side);
                tokio::time::sleep(reconnect_interval).await;
            }
        }
    }

    tracing::debug!("{} event loop stopped", side);
}

/// [`Publisher`] backed by a rumqttc client.
#[derive(Clone)]
pub struct MqttPublisher {
    client: AsyncClient,
    timeout: Duration,
}

#[async_trait]
impl Publisher for MqttPublisher {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        options: DeliveryOptions,
    ) -> Result<(), PublishError> {
        let request = self
            .client
            .publish(topic, options.qos.into(), options.retain, payload);

        match tokio::time::timeout(self.timeout, request).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(PublishError::Client(err.to_string())),
            Err(_) => Err(PublishError::Timeout),
        }
    }
}

/// TLS client configuration that accepts any server certificate.
mod insecure {
    use rumqttc::tokio_rustls::rustls;
    use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
    use rustls::{ClientConfig, DigitallySignedStruct, Error, SignatureScheme};
    use std::sync::Arc;

    #[derive(Debug)]
    struct AcceptAnyCertificate;

    impl ServerCertVerifier for AcceptAnyCertificate {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn verify_tls13_signature(
            &self,
            _message: &[u8],
            _cert: &CertificateDer<'_>,
            _dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, Error> {
            Ok(HandshakeSignatureValid::assertion())
        }

        fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
            vec![
                SignatureScheme::RSA_PKCS1_SHA256,
                SignatureScheme::RSA_PKCS1_SHA384,
                SignatureScheme::RSA_PKCS1_SHA512,
                SignatureScheme::ECDSA_NISTP256_SHA256,
                SignatureScheme::ECDSA_NISTP384_SHA384,
                SignatureScheme::RSA_PSS_SHA256,
                SignatureScheme::RSA_PSS_SHA384,
                SignatureScheme::RSA_PSS_SHA512,
                SignatureScheme::ED25519,
            ]
        }
    }

    pub fn client_config() -> ClientConfig {
        ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCertificate))
            .with_no_client_auth()
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bridge controller and lifecycle.
//!
//! [`BridgeController`] runs the per-message pipeline (route, decode,
//! enqueue) and reacts to connectivity events. [`Bridge`] owns the two
//! broker connections and drives the controller from a single event channel
//! until shutdown.

use crate::codec::{CodecError, PayloadCodec};
use crate::config::{BridgeConfig, ConfigError};
use crate::connection::{self, BridgeEvent, ConnectionError, MqttConnection, Side};
use crate::queue::{
    ConnectivityState, DeliveryOptions, DeliveryOutcome, DeliveryQueue, PendingDelivery, Publisher,
};
use crate::route::{BridgeStats, StatsSnapshot};
use crate::transform::TopicRouter;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Notify};

/// Bridge errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Bridge already running")]
    AlreadyRunning,

    #[error("Bridge not running")]
    NotRunning,
}

/// Why a single message was not bridged.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("Unable to transform topic: {0}")]
    RouteNotFound(String),

    #[error("Failed to decode payload on {topic}: {source}")]
    Decode {
        topic: String,
        #[source]
        source: CodecError,
    },
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BridgeState {
    Starting = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl BridgeState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Starting,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

#[derive(Debug)]
struct StateCell(AtomicU8);

impl StateCell {
    fn new(state: BridgeState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn get(&self) -> BridgeState {
        BridgeState::from_u8(self.0.load(Ordering::Acquire))
    }

    fn set(&self, state: BridgeState) {
        self.0.store(state as u8, Ordering::Release);
    }
}

/// Message processing core, independent of the network.
pub struct BridgeController {
    router: TopicRouter,
    codec: PayloadCodec,
    queue: DeliveryQueue,
    options: DeliveryOptions,
    stats: Arc<BridgeStats>,
    source_connected: AtomicBool,
    progress_every: u64,
}

impl BridgeController {
    /// Create a controller delivering through `publisher`.
    pub fn new(config: &BridgeConfig, publisher: Arc<dyn Publisher>) -> Self {
        Self::with_stats(config, publisher, Arc::new(BridgeStats::new()))
    }

    /// Create a controller that records into existing statistics.
    pub fn with_stats(
        config: &BridgeConfig,
        publisher: Arc<dyn Publisher>,
        stats: Arc<BridgeStats>,
    ) -> Self {
        Self {
            router: TopicRouter::from_config(&config.mapping),
            codec: PayloadCodec::new(),
            queue: DeliveryQueue::new(publisher),
            options: config.delivery_options(),
            stats,
            source_connected: AtomicBool::new(false),
            progress_every: config.progress_every,
        }
    }

    /// Route and encode one source message without side effects.
    pub fn prepare(&self, topic: &str, payload: Vec<u8>) -> Result<PendingDelivery, MessageError> {
        let route = self
            .router
            .route(topic)
            .ok_or_else(|| MessageError::RouteNotFound(topic.to_string()))?;

        let payload = self
            .codec
            .transcode(route.message_class, route.region.as_deref(), payload)
            .map_err(|source| MessageError::Decode {
                topic: topic.to_string(),
                source,
            })?;

        tracing::info!("Bridging: {} -> {}", topic, route.destination_topic);
        tracing::debug!(
            "Route: {}",
            serde_json::to_string(&route).unwrap_or_default()
        );

        Ok(PendingDelivery::new(
            route.destination_topic,
            payload,
            self.options,
        ))
    }

    /// Bridge one source message.
    ///
    /// Failures are logged and counted here; the caller only needs the result
    /// for inspection.
    pub async fn handle_message(
        &self,
        topic: &str,
        payload: Vec<u8>,
    ) -> Result<DeliveryOutcome, MessageError> {
        let delivery = match self.prepare(topic, payload) {
            Ok(delivery) => delivery,
            Err(err) => {
                match &err {
                    MessageError::RouteNotFound(_) => {
                        self.stats.record_dropped();
                        tracing::warn!("{}", err);
                    }
                    MessageError::Decode { .. } => {
                        self.stats.record_decode_failure();
                        tracing::error!("{}", err);
                    }
                }
                return Err(err);
            }
        };

        let bytes = delivery.payload.len() as u64;
        let outcome = self.queue.enqueue_or_send(delivery).await;
        match outcome {
            DeliveryOutcome::Queued => self.stats.record_queued(),
            DeliveryOutcome::Failed => self.stats.record_publish_failures(1),
            DeliveryOutcome::Sent => {}
        }

        let total = self.stats.record_routed(bytes);
        if self.progress_every > 0 && total % self.progress_every == 0 {
            tracing::info!("Total messages bridged: {}", total);
        }

        Ok(outcome)
    }

    /// Apply a connectivity change.
    pub async fn handle_connectivity(&self, side: Side, connected: bool) {
        match (side, connected) {
            (Side::Source, _) => self.source_connected.store(connected, Ordering::Release),
            (Side::Destination, true) => {
                let report = self.queue.on_connected().await;
                self.stats.record_publish_failures(report.failed as u64);
            }
            (Side::Destination, false) => self.queue.on_disconnected().await,
        }
        tracing::debug!("{} connectivity: {}", side, connected);
    }

    /// Process one event to completion.
    pub async fn handle_event(&self, event: BridgeEvent) {
        match event {
            BridgeEvent::Message { topic, payload } => {
                // Already logged and counted.
                let _ = self.handle_message(&topic, payload).await;
            }
            BridgeEvent::Connectivity { side, connected } => {
                self.handle_connectivity(side, connected).await;
            }
        }
    }

    /// Consume events until the channel closes or `shutdown` resolves.
    ///
    /// Messages still in the channel at shutdown are counted as dropped.
    pub async fn run<F>(&self, mut events: mpsc::UnboundedReceiver<BridgeEvent>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                event = events.recv() => match event {
                    Some(event) => self.handle_event(event).await,
                    None => break,
                },
            }
        }

        // Senders fail from here on and log their own drops.
        events.close();
        let mut dropped = 0u64;
        while let Ok(event) = events.try_recv() {
            if let BridgeEvent::Message { topic, .. } = event {
                tracing::debug!("Dropping message from {} at shutdown", topic);
                self.stats.record_dropped();
                dropped += 1;
            }
        }
        if dropped > 0 {
            tracing::warn!("Dropped {} received messages at shutdown", dropped);
        }
    }

    /// Source broker connectivity.
    pub fn source_connectivity(&self) -> ConnectivityState {
        self.source_connected.load(Ordering::Acquire).into()
    }

    /// Destination broker connectivity.
    pub async fn destination_connectivity(&self) -> ConnectivityState {
        self.queue.connectivity().await
    }

    /// Messages waiting for the destination.
    pub async fn pending(&self) -> usize {
        self.queue.len().await
    }

    /// Shared statistics.
    pub fn stats(&self) -> Arc<BridgeStats> {
        self.stats.clone()
    }
}

/// Handle to observe and stop a running bridge.
#[derive(Clone)]
pub struct BridgeHandle {
    state: Arc<StateCell>,
    stats: Arc<BridgeStats>,
    shutdown: Arc<Notify>,
}

impl BridgeHandle {
    /// Current lifecycle state.
    pub fn state(&self) -> BridgeState {
        self.state.get()
    }

    /// Check if the bridge is running.
    pub fn is_running(&self) -> bool {
        self.state() == BridgeState::Running
    }

    /// Request a running bridge to stop.
    pub fn stop(&self) -> Result<(), BridgeError> {
        if self.state() != BridgeState::Running {
            return Err(BridgeError::NotRunning);
        }
        self.shutdown.notify_one();
        Ok(())
    }

    /// Current statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }
}

/// ChirpStack to IOTOWN bridge.
pub struct Bridge {
    config: BridgeConfig,
    state: Arc<StateCell>,
    stats: Arc<BridgeStats>,
    shutdown: Arc<Notify>,
}

impl Bridge {
    /// Create a bridge from a validated configuration.
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        config.validate()?;
        Ok(Self {
            config,
            state: Arc::new(StateCell::new(BridgeState::Starting)),
            stats: Arc::new(BridgeStats::new()),
            shutdown: Arc::new(Notify::new()),
        })
    }

    /// Get the bridge configuration.
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BridgeState {
        self.state.get()
    }

    /// Handle for stopping the bridge from another task.
    pub fn handle(&self) -> BridgeHandle {
        BridgeHandle {
            state: self.state.clone(),
            stats: self.stats.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Connect both brokers and bridge messages until `shutdown` resolves or
    /// [`BridgeHandle::stop`] is called. Returns the final statistics.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<StatsSnapshot, BridgeError>
    where
        F: Future<Output = ()>,
    {
        if self.state() != BridgeState::Starting {
            return Err(BridgeError::AlreadyRunning);
        }

        tracing::info!("Starting MQTT Bridge '{}'...", self.config.name);

        let (tx, rx) = mpsc::unbounded_channel();
        let reconnect = Duration::from_millis(self.config.reconnect_interval_ms);

        // Destination first so it is ready when the first uplink arrives.
        let destination = MqttConnection::open(
            Side::Destination,
            &self.config.destination,
            &connection::client_id(&self.config.client_id_prefix, Side::Destination),
            Vec::new(),
            reconnect,
            tx.clone(),
        )?;

        let source = match MqttConnection::open(
            Side::Source,
            &self.config.source,
            &connection::client_id(&self.config.client_id_prefix, Side::Source),
            self.config.subscribe_topics.clone(),
            reconnect,
            tx,
        ) {
            Ok(source) => source,
            Err(err) => {
                destination.close().await;
                self.state.set(BridgeState::Stopped);
                return Err(err.into());
            }
        };

        let publisher = destination.publisher(Duration::from_millis(self.config.publish_timeout_ms));
        let controller =
            BridgeController::with_stats(&self.config, Arc::new(publisher), self.stats.clone());

        self.state.set(BridgeState::Running);
        tracing::info!("MQTT Bridge started successfully");

        let notify = self.shutdown.clone();
        controller
            .run(rx, async move {
                tokio::select! {
                    _ = shutdown => {}
                    _ = notify.notified() => {}
                }
            })
            .await;

        self.state.set(BridgeState::Stopping);
        tracing::info!("Stopping MQTT Bridge...");

        let pending = controller.pending().await;
        if pending > 0 {
            tracing::warn!("Dropping {} undelivered messages", pending);
        }

        source.close().await;
        destination.close().await;

        let snapshot = self.stats.snapshot();
        tracing::info!(
            "MQTT Bridge stopped. Total messages bridged: {}",
            snapshot.messages_routed
        );
        self.state.set(BridgeState::Stopped);

        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BrokerConfig, GroupMapping};
    use crate::queue::testing::RecordingPublisher;
    use serde_json::Value;

    fn config() -> BridgeConfig {
        let mut config = BridgeConfig::default();
        config.destination = BrokerConfig::new("iotown.local", 8883)
            .with_tls(true)
            .with_auth("user", "pass");
        config.mapping.applications = GroupMapping::applications().with("app-42", "siteA");
        config
    }

    fn controller() -> (BridgeController, Arc<RecordingPublisher>) {
        let publisher = Arc::new(RecordingPublisher::default());
        (BridgeController::new(&config(), publisher.clone()), publisher)
    }

    #[tokio::test]
    async fn test_device_uplink_passthrough() {
        let (controller, publisher) = controller();
        controller.handle_connectivity(Side::Destination, true).await;

        let payload = br#"{"deviceInfo":{"devEui":"0004a30b001c0530"},"data":"AQID"}"#.to_vec();
        let outcome = controller
            .handle_message(
                "application/app-42/device/0004A30B001C0530/event/up",
                payload.clone(),
            )
            .await
            .expect("bridged");

        assert_eq!(outcome, DeliveryOutcome::Sent);
        assert_eq!(publisher.topics(), vec!["iotown/siteA/0004A30B001C0530/data"]);
        assert_eq!(publisher.payloads(), vec![payload]);
        assert_eq!(controller.stats().messages_routed(), 1);
    }

    #[tokio::test]
    async fn test_no_route_publishes_nothing() {
        let (controller, publisher) = controller();
        controller.handle_connectivity(Side::Destination, true).await;

        let err = controller
            .handle_message(
                "application/app-42/device/0004A30B001C0530/event/down",
                b"{}".to_vec(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, MessageError::RouteNotFound(_)));
        assert!(publisher.topics().is_empty());
        let stats = controller.stats().snapshot();
        assert_eq!(stats.messages_routed, 0);
        assert_eq!(stats.messages_dropped, 1);
    }

    #[tokio::test]
    async fn test_gateway_stats_enriched() {
        let (controller, publisher) = controller();
        controller.handle_connectivity(Side::Destination, true).await;

        controller
            .handle_message(
                "eu868/gateway/gw-7/event/stats",
                br#"{"gatewayId":"gw-7","rxPacketsReceived":4,"region":"old"}"#.to_vec(),
            )
            .await
            .expect("bridged");

        assert_eq!(publisher.topics(), vec!["iotown/gateway/gw-7/data"]);
        let body: Value = serde_json::from_slice(&publisher.payloads()[0]).expect("json");
        assert_eq!(body["region"], "eu868");
        assert_eq!(body["rxPacketsReceived"], 4);
        assert_eq!(body["gatewayId"], "gw-7");
    }

    #[tokio::test]
    async fn test_gateway_stats_decode_failure() {
        let (controller, publisher) = controller();
        controller.handle_connectivity(Side::Destination, true).await;

        let err = controller
            .handle_message("eu868/gateway/gw-7/event/stats", vec![0xff, 0xff])
            .await
            .unwrap_err();

        match err {
            MessageError::Decode { topic, .. } => {
                assert_eq!(topic, "eu868/gateway/gw-7/event/stats")
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(publisher.topics().is_empty());
        let stats = controller.stats().snapshot();
        assert_eq!(stats.messages_routed, 0);
        assert_eq!(stats.decode_failures, 1);
    }

    #[tokio::test]
    async fn test_queued_until_destination_connects() {
        let (controller, publisher) = controller();

        for eui in ["01", "02", "03"] {
            let topic = format!("application/app-42/device/{}/event/up", eui);
            let outcome = controller
                .handle_message(&topic, eui.as_bytes().to_vec())
                .await
                .expect("bridged");
            assert_eq!(outcome, DeliveryOutcome::Queued);
        }
        assert_eq!(controller.pending().await, 3);
        assert!(publisher.topics().is_empty());

        controller.handle_connectivity(Side::Destination, true).await;
        assert_eq!(
            publisher.payloads(),
            vec![b"01".to_vec(), b"02".to_vec(), b"03".to_vec()]
        );
        assert_eq!(controller.pending().await, 0);

        let stats = controller.stats().snapshot();
        assert_eq!(stats.messages_routed, 3);
        assert_eq!(stats.messages_queued, 3);
    }

    #[tokio::test]
    async fn test_publish_failure_counted() {
        let publisher = Arc::new(RecordingPublisher::failing(&["iotown/default/eui/data"]));
        let controller = BridgeController::new(&config(), publisher.clone());
        controller.handle_connectivity(Side::Destination, true).await;

        let outcome = controller
            .handle_message("application/other/device/eui/event/up", b"x".to_vec())
            .await
            .expect("routed");
        assert_eq!(outcome, DeliveryOutcome::Failed);

        let stats = controller.stats().snapshot();
        assert_eq!(stats.messages_routed, 1);
        assert_eq!(stats.publish_failures, 1);
    }

    #[tokio::test]
    async fn test_event_loop_preserves_order() {
        let (controller, publisher) = controller();
        let (tx, rx) = mpsc::unbounded_channel();

        let message = |eui: &str| BridgeEvent::Message {
            topic: format!("application/app-42/device/{}/event/up", eui),
            payload: eui.as_bytes().to_vec(),
        };

        tx.send(BridgeEvent::Connectivity {
            side: Side::Source,
            connected: true,
        })
        .expect("send");
        tx.send(message("P1")).expect("send");
        tx.send(message("P2")).expect("send");
        tx.send(BridgeEvent::Connectivity {
            side: Side::Destination,
            connected: true,
        })
        .expect("send");
        tx.send(message("P3")).expect("send");
        tx.send(BridgeEvent::Connectivity {
            side: Side::Destination,
            connected: false,
        })
        .expect("send");
        tx.send(message("P4")).expect("send");
        drop(tx);

        controller.run(rx, std::future::pending()).await;

        assert_eq!(
            publisher.payloads(),
            vec![b"P1".to_vec(), b"P2".to_vec(), b"P3".to_vec()]
        );
        assert_eq!(controller.pending().await, 1);
        assert!(controller.source_connectivity().is_connected());
        assert!(!controller.destination_connectivity().await.is_connected());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (controller, publisher) = controller();
        let (tx, rx) = mpsc::unbounded_channel();
        for eui in ["01", "02", "03"] {
            tx.send(BridgeEvent::Message {
                topic: format!("application/app-42/device/{}/event/up", eui),
                payload: b"late".to_vec(),
            })
            .expect("send");
        }

        // Shutdown wins over pending events; leftovers are counted.
        controller.run(rx, async {}).await;
        assert!(publisher.topics().is_empty());

        let stats = controller.stats().snapshot();
        assert_eq!(stats.messages_routed, 0);
        assert_eq!(stats.messages_dropped, 3);

        // The channel is closed; late sends fail instead of vanishing.
        assert!(tx
            .send(BridgeEvent::Connectivity {
                side: Side::Source,
                connected: false,
            })
            .is_err());
    }

    #[tokio::test]
    async fn test_shared_stats() {
        let stats = Arc::new(BridgeStats::new());
        let controller = BridgeController::with_stats(
            &config(),
            Arc::new(RecordingPublisher::default()),
            stats.clone(),
        );
        controller
            .handle_message("application/a/device/b/event/up", b"x".to_vec())
            .await
            .expect("bridged");
        assert_eq!(stats.messages_routed(), 1);
    }

    #[tokio::test]
    async fn test_progress_every_counter() {
        let mut config = config();
        config.progress_every = 2;
        let controller = BridgeController::new(&config, Arc::new(RecordingPublisher::default()));

        for _ in 0..5 {
            controller
                .handle_message("application/a/device/b/event/up", b"x".to_vec())
                .await
                .expect("bridged");
        }
        assert_eq!(controller.stats().messages_routed(), 5);
    }

    #[test]
    fn test_bridge_requires_valid_config() {
        assert!(matches!(
            Bridge::new(BridgeConfig::default()),
            Err(BridgeError::Config(_))
        ));

        let bridge = Bridge::new(config()).expect("bridge");
        assert_eq!(bridge.state(), BridgeState::Starting);

        let handle = bridge.handle();
        assert!(!handle.is_running());
        assert_eq!(handle.stats().messages_routed, 0);
        assert!(matches!(handle.stop(), Err(BridgeError::NotRunning)));

        bridge.state.set(BridgeState::Running);
        handle.stop().expect("stop running bridge");

        bridge.state.set(BridgeState::Stopped);
        assert!(matches!(handle.stop(), Err(BridgeError::NotRunning)));
    }

    #[tokio::test]
    async fn test_run_until_lifecycle() {
        // Nothing listens on port 1; both connections keep retrying.
        let mut config = config();
        config.source = BrokerConfig::new("127.0.0.1", 1);
        config.destination = BrokerConfig::new("127.0.0.1", 1).with_auth("user", "pass");
        config.reconnect_interval_ms = 10;

        let mut bridge = Bridge::new(config).expect("bridge");
        let handle = bridge.handle();

        let stats = bridge.run_until(async {}).await.expect("run");
        assert_eq!(stats.messages_routed, 0);
        assert_eq!(bridge.state(), BridgeState::Stopped);
        assert!(!handle.is_running());

        assert!(matches!(
            bridge.run_until(async {}).await,
            Err(BridgeError::AlreadyRunning)
        ));
    }

    #[test]
    fn test_state_cell() {
        let cell = StateCell::new(BridgeState::Starting);
        for state in [
            BridgeState::Running,
            BridgeState::Stopping,
            BridgeState::Stopped,
        ] {
            cell.set(state);
            assert_eq!(cell.get(), state);
        }
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Store-and-forward delivery to the destination broker.
//!
//! While the destination is disconnected, outgoing messages are appended to
//! an in-memory FIFO. When connectivity returns the FIFO is drained
//! head-to-tail. Append and drain share one mutex, so a message can never
//! overtake one that was queued before it.
//!
//! The buffer is unbounded and lives only for the process lifetime.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

/// MQTT QoS level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Qos {
    AtMostOnce = 0,
    #[default]
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl From<Qos> for rumqttc::QoS {
    fn from(qos: Qos) -> Self {
        match qos {
            Qos::AtMostOnce => rumqttc::QoS::AtMostOnce,
            Qos::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
            Qos::ExactlyOnce => rumqttc::QoS::ExactlyOnce,
        }
    }
}

/// Publish options for one destination message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeliveryOptions {
    pub qos: Qos,
    pub retain: bool,
}

/// A message waiting for (or undergoing) delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingDelivery {
    pub topic: String,
    pub payload: Vec<u8>,
    pub options: DeliveryOptions,
}

impl PendingDelivery {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>, options: DeliveryOptions) -> Self {
        Self {
            topic: topic.into(),
            payload,
            options,
        }
    }
}

/// Connection state of one broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectivityState {
    #[default]
    Disconnected,
    Connected,
}

impl ConnectivityState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}

impl From<bool> for ConnectivityState {
    fn from(connected: bool) -> Self {
        if connected {
            Self::Connected
        } else {
            Self::Disconnected
        }
    }
}

/// Publish errors reported by the destination client.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Client error: {0}")]
    Client(String),

    #[error("Timed out handing message to the client")]
    Timeout,
}

/// Destination side of the bridge.
///
/// `publish` hands the payload to the client's outbound path and returns; it
/// must not wait for broker acknowledgement.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        options: DeliveryOptions,
    ) -> Result<(), PublishError>;
}

/// Result of [`DeliveryQueue::enqueue_or_send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handed to the destination client.
    Sent,
    /// Buffered until the destination reconnects.
    Queued,
    /// The client rejected the publish; the message is not retried.
    Failed,
}

/// Result of draining the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushReport {
    pub flushed: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    connectivity: ConnectivityState,
    pending: VecDeque<PendingDelivery>,
}

/// Delivery queue in front of a [`Publisher`].
pub struct DeliveryQueue {
    publisher: Arc<dyn Publisher>,
    state: Mutex<QueueState>,
}

impl DeliveryQueue {
    /// Create a queue; the destination starts disconnected.
    pub fn new(publisher: Arc<dyn Publisher>) -> Self {
        Self {
            publisher,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Publish now if connected, otherwise append to the buffer.
    pub async fn enqueue_or_send(&self, delivery: PendingDelivery) -> DeliveryOutcome {
        let mut state = self.state.lock().await;

        if !state.connectivity.is_connected() {
            state.pending.push_back(delivery);
            tracing::debug!(
                "Message queued for topic: {} (queue size: {})",
                state.pending.back().map_or("", |d| d.topic.as_str()),
                state.pending.len()
            );
            return DeliveryOutcome::Queued;
        }

        match self
            .publisher
            .publish(&delivery.topic, delivery.payload, delivery.options)
            .await
        {
            Ok(()) => {
                tracing::debug!("Published to IOTOWN topic: {}", delivery.topic);
                DeliveryOutcome::Sent
            }
            Err(err) => {
                tracing::error!("Failed to publish to {}: {}", delivery.topic, err);
                DeliveryOutcome::Failed
            }
        }
    }

    /// Mark the destination connected and drain the buffer in order.
    pub async fn on_connected(&self) -> FlushReport {
        let mut state = self.state.lock().await;
        state.connectivity = ConnectivityState::Connected;

        let mut report = FlushReport::default();
        if state.pending.is_empty() {
            return report;
        }

        let queue_size = state.pending.len();
        tracing::info!("Flushing {} queued messages...", queue_size);

        while let Some(delivery) = state.pending.pop_front() {
            match self
                .publisher
                .publish(&delivery.topic, delivery.payload, delivery.options)
                .await
            {
                Ok(()) => report.flushed += 1,
                Err(err) => {
                    report.failed += 1;
                    tracing::error!(
                        "Failed to publish queued message to {}: {}",
                        delivery.topic,
                        err
                    );
                }
            }
        }

        tracing::info!("Flushed {} queued messages", queue_size);
        report
    }

    /// Mark the destination disconnected; later messages are buffered.
    pub async fn on_disconnected(&self) {
        self.state.lock().await.connectivity = ConnectivityState::Disconnected;
    }

    /// Current destination connectivity.
    pub async fn connectivity(&self) -> ConnectivityState {
        self.state.lock().await.connectivity
    }

    /// Number of buffered messages.
    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    /// Whether the buffer is empty.
    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.pending.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::RecordingPublisher;
    use super::*;

    fn delivery(topic: &str, payload: &str) -> PendingDelivery {
        PendingDelivery::new(topic, payload.as_bytes().to_vec(), DeliveryOptions::default())
    }

    #[tokio::test]
    async fn test_queued_while_disconnected_then_flushed_in_order() {
        let publisher = Arc::new(RecordingPublisher::default());
        let queue = DeliveryQueue::new(publisher.clone());

        assert_eq!(queue.connectivity().await, ConnectivityState::Disconnected);
        for (topic, payload) in [("t/1", "P1"), ("t/2", "P2"), ("t/3", "P3")] {
            let outcome = queue.enqueue_or_send(delivery(topic, payload)).await;
            assert_eq!(outcome, DeliveryOutcome::Queued);
        }
        assert_eq!(queue.len().await, 3);
        assert!(publisher.topics().is_empty());

        let report = queue.on_connected().await;
        assert_eq!(report, FlushReport { flushed: 3, failed: 0 });
        assert_eq!(
            publisher.payloads(),
            vec![b"P1".to_vec(), b"P2".to_vec(), b"P3".to_vec()]
        );
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_sent_immediately_when_connected() {
        let publisher = Arc::new(RecordingPublisher::default());
        let queue = DeliveryQueue::new(publisher.clone());
        queue.on_connected().await;

        let outcome = queue.enqueue_or_send(delivery("t/1", "P1")).await;
        assert_eq!(outcome, DeliveryOutcome::Sent);
        assert_eq!(publisher.topics(), vec!["t/1"]);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_publish_failure_not_requeued() {
        let publisher = Arc::new(RecordingPublisher::failing(&["t/bad"]));
        let queue = DeliveryQueue::new(publisher.clone());
        queue.on_connected().await;

        let outcome = queue.enqueue_or_send(delivery("t/bad", "X")).await;
        assert_eq!(outcome, DeliveryOutcome::Failed);
        assert!(queue.is_empty().await);

        // A later reconnect does not resend it.
        queue.on_disconnected().await;
        queue.on_connected().await;
        assert_eq!(publisher.topics(), vec!["t/bad"]);
    }

    #[tokio::test]
    async fn test_flush_failure_not_retried() {
        let publisher = Arc::new(RecordingPublisher::failing(&["t/2"]));
        let queue = DeliveryQueue::new(publisher.clone());

        for (topic, payload) in [("t/1", "P1"), ("t/2", "P2"), ("t/3", "P3")] {
            queue.enqueue_or_send(delivery(topic, payload)).await;
        }

        let report = queue.on_connected().await;
        assert_eq!(report, FlushReport { flushed: 2, failed: 1 });
        assert_eq!(publisher.topics(), vec!["t/1", "t/2", "t/3"]);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn test_disconnect_buffers_again() {
        let publisher = Arc::new(RecordingPublisher::default());
        let queue = DeliveryQueue::new(publisher.clone());

        queue.on_connected().await;
        queue.enqueue_or_send(delivery("t/1", "P1")).await;
        queue.on_disconnected().await;
        assert_eq!(
            queue.enqueue_or_send(delivery("t/2", "P2")).await,
            DeliveryOutcome::Queued
        );
        queue.enqueue_or_send(delivery("t/3", "P3")).await;
        assert_eq!(publisher.topics(), vec!["t/1"]);

        queue.on_connected().await;
        queue.enqueue_or_send(delivery("t/4", "P4")).await;
        assert_eq!(publisher.topics(), vec!["t/1", "t/2", "t/3", "t/4"]);
    }

    #[tokio::test]
    async fn test_empty_flush() {
        let queue = DeliveryQueue::new(Arc::new(RecordingPublisher::default()));
        assert_eq!(queue.on_connected().await, FlushReport::default());
        assert!(queue.connectivity().await.is_connected());
    }

    #[test]
    fn test_qos_conversion() {
        assert_eq!(rumqttc::QoS::from(Qos::AtMostOnce), rumqttc::QoS::AtMostOnce);
        assert_eq!(rumqttc::QoS::from(Qos::default()), rumqttc::QoS::AtLeastOnce);
        assert_eq!(ConnectivityState::from(true), ConnectivityState::Connected);
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Route definition and statistics.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Kind of source message a route was built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageClass {
    /// `application/{app}/device/{devEui}/event/up`
    DeviceUplink,
    /// `{region}/gateway/{gatewayId}/event/stats`
    GatewayStats,
}

/// Routing decision for one inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    /// Message class.
    pub message_class: MessageClass,

    /// Destination topic (`iotown/{group_id}/{entity_id}/data`).
    pub destination_topic: String,

    /// Destination group.
    pub group_id: String,

    /// Device EUI or gateway ID.
    pub entity_id: String,

    /// Source-side key the group was resolved from (application or gateway ID).
    pub source_key: String,

    /// Region segment of a gateway stats topic.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
}

impl Route {
    /// Build a device uplink route.
    pub fn device_uplink(application_id: &str, dev_eui: &str, group_id: &str) -> Self {
        Self {
            message_class: MessageClass::DeviceUplink,
            destination_topic: destination_topic(group_id, dev_eui),
            group_id: group_id.to_string(),
            entity_id: dev_eui.to_string(),
            source_key: application_id.to_string(),
            region: None,
        }
    }

    /// Build a gateway stats route.
    pub fn gateway_stats(region: &str, gateway_id: &str, group_id: &str) -> Self {
        Self {
            message_class: MessageClass::GatewayStats,
            destination_topic: destination_topic(group_id, gateway_id),
            group_id: group_id.to_string(),
            entity_id: gateway_id.to_string(),
            source_key: gateway_id.to_string(),
            region: Some(region.to_string()),
        }
    }
}

/// Destination topic template, identical for every message class.
pub fn destination_topic(group_id: &str, entity_id: &str) -> String {
    format!("iotown/{}/{}/data", group_id, entity_id)
}

/// Bridge statistics.
#[derive(Debug)]
pub struct BridgeStats {
    /// Messages successfully routed (sent, queued or handed to a failing publish).
    pub messages_routed: AtomicU64,

    /// Payload bytes routed.
    pub bytes_routed: AtomicU64,

    /// Messages dropped because no route matched.
    pub messages_dropped: AtomicU64,

    /// Gateway stats payloads that could not be decoded.
    pub decode_failures: AtomicU64,

    /// Messages buffered while the destination was disconnected.
    pub messages_queued: AtomicU64,

    /// Publishes the destination client rejected.
    pub publish_failures: AtomicU64,

    /// Creation time.
    pub created: Instant,
}

impl BridgeStats {
    /// Create new stats.
    pub fn new() -> Self {
        Self {
            messages_routed: AtomicU64::new(0),
            bytes_routed: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            messages_queued: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            created: Instant::now(),
        }
    }

    /// Record a routed message; returns the new total.
    pub fn record_routed(&self, bytes: u64) -> u64 {
        self.bytes_routed.fetch_add(bytes, Ordering::Relaxed);
        self.messages_routed.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Record a message without a route.
    pub fn record_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a gateway stats decode failure.
    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a message buffered for later delivery.
    pub fn record_queued(&self) {
        self.messages_queued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record failed publishes.
    pub fn record_publish_failures(&self, count: u64) {
        self.publish_failures.fetch_add(count, Ordering::Relaxed);
    }

    /// Total routed messages.
    pub fn messages_routed(&self) -> u64 {
        self.messages_routed.load(Ordering::Relaxed)
    }

    /// Get snapshot of current stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_routed: self.messages_routed.load(Ordering::Relaxed),
            bytes_routed: self.bytes_routed.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            messages_queued: self.messages_queued.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            uptime_secs: self.created.elapsed().as_secs(),
        }
    }
}

impl Default for BridgeStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of bridge statistics.
#[derive(Debug, Clone, Default)]
pub struct StatsSnapshot {
    pub messages_routed: u64,
    pub bytes_routed: u64,
    pub messages_dropped: u64,
    pub decode_failures: u64,
    pub messages_queued: u64,
    pub publish_failures: u64,
    pub uptime_secs: u64,
}

impl StatsSnapshot {
    /// Calculate messages per second.
    pub fn messages_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.messages_routed as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }

    /// Calculate bytes per second.
    pub fn bytes_per_second(&self) -> f64 {
        if self.uptime_secs > 0 {
            self.bytes_routed as f64 / self.uptime_secs as f64
        } else {
            0.0
        }
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ChirpStack to IOTOWN MQTT Bridge
//!
//! Subscribes to a ChirpStack broker and republishes device uplinks and
//! gateway statistics to an IOTOWN broker under `iotown/<group>/<id>/data`.
//!
//! # Features
//!
//! - **Topic Routing**: Device uplinks and gateway stats mapped to IOTOWN groups
//! - **Dual Codec**: Gateway stats accepted as JSON or protobuf, emitted as JSON
//! - **Store and Forward**: Messages buffered while IOTOWN is unreachable
//! - **Reconnects**: Both brokers retried at a fixed interval
//!
//! # Quick Start
//!
//! ```bash
//! IOTOWN_MQTT_HOST=mqtt.iotown.example \
//! IOTOWN_MQTT_USERNAME=bridge IOTOWN_MQTT_PASSWORD=secret \
//! APP_GROUP_MAPPING='{"app-42":"siteA"}' \
//! iotown-bridge
//!
//! # Using config file
//! iotown-bridge --config bridge.toml
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! name = "site-bridge"
//!
//! [source]
//! host = "mosquitto"
//! port = 1883
//!
//! [destination]
//! host = "mqtt.iotown.example"
//! port = 8883
//! tls = true
//! username = "bridge"
//! password = "secret"
//!
//! [mapping.applications]
//! default_group = "default"
//! groups = { "app-42" = "siteA" }
//! ```

pub mod bridge;
pub mod codec;
pub mod config;
pub mod connection;
pub mod proto;
pub mod queue;
pub mod route;
pub mod transform;

pub use bridge::{Bridge, BridgeController, BridgeError, BridgeHandle, BridgeState, MessageError};
pub use codec::{CodecError, PayloadCodec, PayloadFormat};
pub use config::{BridgeConfig, BrokerConfig, ConfigError, GroupMapping, MappingConfig};
pub use connection::{BridgeEvent, Side};
pub use queue::{
    ConnectivityState, DeliveryOptions, DeliveryOutcome, DeliveryQueue, PendingDelivery,
    PublishError, Publisher, Qos,
};
pub use route::{BridgeStats, MessageClass, Route, StatsSnapshot};
pub use transform::TopicRouter;

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Source topic to destination topic transformation.
//!
//! Two ChirpStack topic grammars are recognized, tried in this order:
//!
//! | Source topic | Destination topic |
//! |--------------|-------------------|
//! | `application/{app}/device/{devEui}/event/up` | `iotown/{group}/{devEui}/data` |
//! | `{region}/gateway/{gatewayId}/event/stats` | `iotown/{group}/{gatewayId}/data` |

use crate::config::{GroupMapping, MappingConfig};
use crate::route::{MessageClass, Route};
use regex::Regex;

const DEVICE_UPLINK_PATTERN: &str = r"^application/([^/]+)/device/([^/]+)/event/up$";
const GATEWAY_STATS_PATTERN: &str = r"^([^/]+)/gateway/([^/]+)/event/stats$";

/// One recognized topic grammar.
#[derive(Debug, Clone)]
struct TopicPattern {
    class: MessageClass,
    regex: Regex,
}

impl TopicPattern {
    fn new(class: MessageClass, pattern: &str) -> Self {
        // Constant patterns, exercised by the tests below.
        let regex = Regex::new(pattern).expect("built-in topic pattern");
        Self { class, regex }
    }
}

/// Topic router.
///
/// Pure: holds the patterns and the read-only group mappings, never mutates.
#[derive(Debug, Clone)]
pub struct TopicRouter {
    patterns: Vec<TopicPattern>,
    applications: GroupMapping,
    gateways: GroupMapping,
}

impl TopicRouter {
    /// Create a router from the two group mappings.
    pub fn new(applications: GroupMapping, gateways: GroupMapping) -> Self {
        Self {
            patterns: vec![
                TopicPattern::new(MessageClass::DeviceUplink, DEVICE_UPLINK_PATTERN),
                TopicPattern::new(MessageClass::GatewayStats, GATEWAY_STATS_PATTERN),
            ],
            applications,
            gateways,
        }
    }

    /// Create a router from the mapping section of the configuration.
    pub fn from_config(mapping: &MappingConfig) -> Self {
        Self::new(mapping.applications.clone(), mapping.gateways.clone())
    }

    /// Transform a source topic.
    ///
    /// Returns `None` when the topic matches neither grammar.
    pub fn route(&self, topic: &str) -> Option<Route> {
        for pattern in &self.patterns {
            let Some(caps) = pattern.regex.captures(topic) else {
                continue;
            };
            let first = caps.get(1).map_or("", |m| m.as_str());
            let second = caps.get(2).map_or("", |m| m.as_str());

            let route = match pattern.class {
                MessageClass::DeviceUplink => {
                    let group = self.applications.group_for(first);
                    Route::device_uplink(first, second, group)
                }
                MessageClass::GatewayStats => {
                    let group = self.gateways.group_for(second);
                    Route::gateway_stats(first, second, group)
                }
            };
            return Some(route);
        }
        None
    }

    /// Check if any pattern accepts this topic.
    pub fn matches(&self, topic: &str) -> bool {
        self.patterns.iter().any(|p| p.regex.is_match(topic))
    }

    /// Application mapping in use.
    pub fn applications(&self) -> &GroupMapping {
        &self.applications
    }

    /// Gateway mapping in use.
    pub fn gateways(&self) -> &GroupMapping {
        &self.gateways
    }
}

impl Default for TopicRouter {
    fn default() -> Self {
        Self::new(GroupMapping::applications(), GroupMapping::gateways())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> TopicRouter {
        TopicRouter::new(
            GroupMapping::applications().with("app-42", "siteA"),
            GroupMapping::gateways().with("gw-1", "north"),
        )
    }

    #[test]
    fn test_device_uplink_mapped() {
        let route = router()
            .route("application/app-42/device/0004A30B001C0530/event/up")
            .expect("route");

        assert_eq!(route.message_class, MessageClass::DeviceUplink);
        assert_eq!(route.destination_topic, "iotown/siteA/0004A30B001C0530/data");
        assert_eq!(route.group_id, "siteA");
        assert_eq!(route.entity_id, "0004A30B001C0530");
        assert_eq!(route.source_key, "app-42");
    }

    #[test]
    fn test_device_uplink_default_group() {
        let route = router()
            .route("application/unknown-app/device/abc/event/up")
            .expect("route");
        assert_eq!(route.destination_topic, "iotown/default/abc/data");
    }

    #[test]
    fn test_device_uplink_destination_for_many_topics() {
        let router = router();
        for (app, eui) in [
            ("app-42", "0004A30B001C0530"),
            ("1", "ffffffffffffffff"),
            ("a b", "E-U-I"),
            ("app-42", "0"),
        ] {
            let topic = format!("application/{}/device/{}/event/up", app, eui);
            let route = router.route(&topic).expect("route");
            assert_eq!(route.entity_id, eui);
            assert_eq!(
                route.destination_topic,
                format!("iotown/{}/{}/data", route.group_id, eui)
            );
        }
    }

    #[test]
    fn test_gateway_stats_default_group() {
        let route = router().route("eu868/gateway/gw-7/event/stats").expect("route");

        assert_eq!(route.message_class, MessageClass::GatewayStats);
        assert_eq!(route.destination_topic, "iotown/gateway/gw-7/data");
        assert_eq!(route.region.as_deref(), Some("eu868"));
    }

    #[test]
    fn test_gateway_stats_mapped() {
        let route = router().route("us915_0/gateway/gw-1/event/stats").expect("route");
        assert_eq!(route.destination_topic, "iotown/north/gw-1/data");
        assert_eq!(route.region.as_deref(), Some("us915_0"));
    }

    #[test]
    fn test_wrong_suffix_no_match() {
        let router = router();
        assert!(router
            .route("application/app-42/device/0004A30B001C0530/event/down")
            .is_none());
        assert!(router.route("eu868/gateway/gw-7/event/up").is_none());
    }

    #[test]
    fn test_anchoring() {
        let router = router();
        for topic in [
            "prefix/application/app/device/eui/event/up",
            "application/app/device/eui/event/up/extra",
            "application/app/device/eui/event/upx",
            "xeu868/gateway/gw/event/stats/",
            "a/b/gateway/gw/event/stats",
            "application//device/eui/event/up",
            "eu868/gateway//event/stats",
            "application/app/device/a/b/event/up",
            "",
        ] {
            assert!(router.route(topic).is_none(), "unexpected match: {}", topic);
            assert!(!router.matches(topic));
        }
    }

    #[test]
    fn test_decoy_topics_do_not_cross_patterns() {
        let router = router();

        // A region literally named "application" is still a gateway topic.
        let route = router
            .route("application/gateway/gw-1/event/stats")
            .expect("route");
        assert_eq!(route.region.as_deref(), Some("application"));
        assert_eq!(route.group_id, "north");

        // Device uplink segments named like the gateway grammar.
        let route = router
            .route("application/gateway/device/stats/event/up")
            .expect("route");
        assert_eq!(route.message_class, MessageClass::DeviceUplink);
        assert_eq!(route.entity_id, "stats");

        // No topic is accepted by both grammars.
        let device = Regex::new(DEVICE_UPLINK_PATTERN).expect("regex");
        let gateway = Regex::new(GATEWAY_STATS_PATTERN).expect("regex");
        for topic in [
            "application/gateway/device/stats/event/up",
            "application/gateway/gw-1/event/stats",
            "application/app/device/eui/event/stats",
        ] {
            assert!(!(device.is_match(topic) && gateway.is_match(topic)));
        }
    }
}

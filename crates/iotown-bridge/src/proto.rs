// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! ChirpStack gateway statistics protobuf schema (`gw.GatewayStats`).
//!
//! Only the fields the bridge forwards are declared; prost skips unknown
//! tags, so newer gateway bridges still decode.

use std::collections::HashMap;

/// `google.protobuf.Timestamp`
#[derive(Clone, PartialEq, prost::Message)]
pub struct Timestamp {
    #[prost(int64, tag = "1")]
    pub seconds: i64,
    #[prost(int32, tag = "2")]
    pub nanos: i32,
}

/// `common.LocationSource`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum LocationSource {
    Unknown = 0,
    Gps = 1,
    Config = 2,
    GeoResolverTdoa = 3,
    GeoResolverRssi = 4,
    GeoResolverGnss = 5,
    GeoResolverWifi = 6,
}

impl LocationSource {
    /// Protobuf enum value name.
    pub fn as_str_name(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Gps => "GPS",
            Self::Config => "CONFIG",
            Self::GeoResolverTdoa => "GEO_RESOLVER_TDOA",
            Self::GeoResolverRssi => "GEO_RESOLVER_RSSI",
            Self::GeoResolverGnss => "GEO_RESOLVER_GNSS",
            Self::GeoResolverWifi => "GEO_RESOLVER_WIFI",
        }
    }
}

/// `common.Location`
#[derive(Clone, PartialEq, prost::Message)]
pub struct Location {
    #[prost(double, tag = "1")]
    pub latitude: f64,
    #[prost(double, tag = "2")]
    pub longitude: f64,
    #[prost(double, tag = "3")]
    pub altitude: f64,
    #[prost(enumeration = "LocationSource", tag = "4")]
    pub source: i32,
    #[prost(float, tag = "5")]
    pub accuracy: f32,
}

/// `gw.CodeRate`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum CodeRate {
    CrUndefined = 0,
    Cr45 = 1,
    Cr46 = 2,
    Cr47 = 3,
    Cr48 = 4,
    Cr38 = 5,
    Cr26 = 6,
    Cr14 = 7,
    Cr16 = 8,
    Cr56 = 9,
    Cr45Li = 10,
    Cr46Li = 11,
    Cr48Li = 12,
}

impl CodeRate {
    /// Protobuf enum value name.
    pub fn as_str_name(&self) -> &'static str {
        match self {
            Self::CrUndefined => "CR_UNDEFINED",
            Self::Cr45 => "CR_4_5",
            Self::Cr46 => "CR_4_6",
            Self::Cr47 => "CR_4_7",
            Self::Cr48 => "CR_4_8",
            Self::Cr38 => "CR_3_8",
            Self::Cr26 => "CR_2_6",
            Self::Cr14 => "CR_1_4",
            Self::Cr16 => "CR_1_6",
            Self::Cr56 => "CR_5_6",
            Self::Cr45Li => "CR_4_5_LI",
            Self::Cr46Li => "CR_4_6_LI",
            Self::Cr48Li => "CR_4_8_LI",
        }
    }
}

/// `gw.LoraModulationInfo`
#[derive(Clone, PartialEq, prost::Message)]
pub struct LoraModulationInfo {
    #[prost(uint32, tag = "1")]
    pub bandwidth: u32,
    #[prost(uint32, tag = "2")]
    pub spreading_factor: u32,
    #[prost(string, tag = "3")]
    pub code_rate_legacy: String,
    #[prost(bool, tag = "4")]
    pub polarization_inversion: bool,
    #[prost(enumeration = "CodeRate", tag = "5")]
    pub code_rate: i32,
    #[prost(uint32, tag = "6")]
    pub preamble: u32,
    #[prost(bool, tag = "7")]
    pub no_crc: bool,
}

/// `gw.FskModulationInfo`
#[derive(Clone, PartialEq, prost::Message)]
pub struct FskModulationInfo {
    #[prost(uint32, tag = "1")]
    pub frequency_deviation: u32,
    #[prost(uint32, tag = "2")]
    pub datarate: u32,
}

/// `gw.LrFhssModulationInfo`
#[derive(Clone, PartialEq, prost::Message)]
pub struct LrFhssModulationInfo {
    #[prost(uint32, tag = "1")]
    pub operating_channel_width: u32,
    #[prost(string, tag = "2")]
    pub code_rate_legacy: String,
    #[prost(uint32, tag = "3")]
    pub grid_steps: u32,
    #[prost(enumeration = "CodeRate", tag = "4")]
    pub code_rate: i32,
}

/// `gw.Modulation`
#[derive(Clone, PartialEq, prost::Message)]
pub struct Modulation {
    #[prost(oneof = "modulation::Parameters", tags = "3, 4, 5")]
    pub parameters: Option<modulation::Parameters>,
}

pub mod modulation {
    /// Modulation parameters.
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Parameters {
        #[prost(message, tag = "3")]
        Lora(super::LoraModulationInfo),
        #[prost(message, tag = "4")]
        Fsk(super::FskModulationInfo),
        #[prost(message, tag = "5")]
        LrFhss(super::LrFhssModulationInfo),
    }
}

/// `gw.PerModulationCount`
#[derive(Clone, PartialEq, prost::Message)]
pub struct PerModulationCount {
    #[prost(message, optional, tag = "1")]
    pub modulation: Option<Modulation>,
    #[prost(uint32, tag = "2")]
    pub count: u32,
}

/// `gw.GatewayStats`
#[derive(Clone, PartialEq, prost::Message)]
pub struct GatewayStats {
    /// Raw 8-byte ID sent by older gateway bridges instead of `gateway_id`.
    #[prost(bytes = "vec", tag = "1")]
    pub gateway_id_legacy: Vec<u8>,
    #[prost(string, tag = "17")]
    pub gateway_id: String,
    #[prost(message, optional, tag = "2")]
    pub time: Option<Timestamp>,
    #[prost(message, optional, tag = "3")]
    pub location: Option<Location>,
    #[prost(string, tag = "4")]
    pub config_version: String,
    #[prost(uint32, tag = "5")]
    pub rx_packets_received: u32,
    #[prost(uint32, tag = "6")]
    pub rx_packets_received_ok: u32,
    #[prost(uint32, tag = "7")]
    pub tx_packets_received: u32,
    #[prost(uint32, tag = "8")]
    pub tx_packets_emitted: u32,
    #[prost(map = "string, string", tag = "10")]
    pub metadata: HashMap<String, String>,
    #[prost(map = "uint32, uint32", tag = "12")]
    pub tx_packets_per_frequency: HashMap<u32, u32>,
    #[prost(map = "uint32, uint32", tag = "13")]
    pub rx_packets_per_frequency: HashMap<u32, u32>,
    #[prost(message, repeated, tag = "14")]
    pub tx_packets_per_modulation: Vec<PerModulationCount>,
    #[prost(message, repeated, tag = "15")]
    pub rx_packets_per_modulation: Vec<PerModulationCount>,
    #[prost(map = "string, uint32", tag = "16")]
    pub tx_packets_per_status: HashMap<String, u32>,
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Payload encoding for bridged messages.
//!
//! Device uplinks are forwarded byte-for-byte. Gateway statistics arrive as
//! either JSON or protobuf depending on the ChirpStack gateway bridge
//! version; both are decoded into the same JSON object (protobuf fields use
//! the canonical protobuf JSON mapping), enriched with the region and
//! re-serialized as JSON.

use crate::proto;
use crate::route::MessageClass;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, SecondsFormat};
use prost::Message;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Decoded key/value record.
pub type Record = Map<String, Value>;

/// Wire encoding of a gateway stats payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    Json,
    Protobuf,
}

impl fmt::Display for PayloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => write!(f, "JSON"),
            Self::Protobuf => write!(f, "protobuf"),
        }
    }
}

/// Failure of a single decode attempt.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("payload does not start with '{{'")]
    NotJson,

    #[error("JSON payload is not an object")]
    NotAnObject,

    #[error("empty payload")]
    Empty,

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid protobuf: {0}")]
    Protobuf(#[from] prost::DecodeError),

    #[error("timestamp out of range: {0}s {1}ns")]
    Timestamp(i64, i32),
}

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Every decoder rejected the payload; carries the last attempt.
    #[error("Failed to decode gateway stats as {format}: {source}")]
    DecodeFailure {
        format: PayloadFormat,
        #[source]
        source: FormatError,
    },

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A successfully decoded gateway stats payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub format: PayloadFormat,
    pub record: Record,
}

struct Decoder {
    format: PayloadFormat,
    probe: fn(&[u8]) -> Result<(), FormatError>,
    decode: fn(&[u8]) -> Result<Record, FormatError>,
}

/// JSON first: it is recognizable from its first byte.
const GATEWAY_STATS_DECODERS: &[Decoder] = &[
    Decoder {
        format: PayloadFormat::Json,
        probe: probe_json,
        decode: decode_json,
    },
    Decoder {
        format: PayloadFormat::Protobuf,
        probe: probe_protobuf,
        decode: decode_protobuf,
    },
];

/// Payload codec.
#[derive(Clone, Copy)]
pub struct PayloadCodec {
    decoders: &'static [Decoder],
}

impl PayloadCodec {
    /// Create the codec with the gateway stats decoders.
    pub fn new() -> Self {
        Self {
            decoders: GATEWAY_STATS_DECODERS,
        }
    }

    /// Decode a gateway stats payload, trying each encoding in order.
    pub fn decode_gateway_stats(&self, bytes: &[u8]) -> Result<Decoded, CodecError> {
        let mut last = None;

        for decoder in self.decoders {
            let attempt = (decoder.probe)(bytes).and_then(|()| (decoder.decode)(bytes));
            match attempt {
                Ok(record) => {
                    tracing::debug!("Decoded gateway stats as {}", decoder.format);
                    return Ok(Decoded {
                        format: decoder.format,
                        record,
                    });
                }
                Err(err) => last = Some((decoder.format, err)),
            }
        }

        let (format, source) = last.unwrap_or((PayloadFormat::Protobuf, FormatError::Empty));
        Err(CodecError::DecodeFailure { format, source })
    }

    /// Produce the outgoing payload for a message.
    ///
    /// Device uplinks are returned unchanged. Gateway stats are decoded,
    /// enriched with `region` and serialized as JSON.
    pub fn transcode(
        &self,
        class: MessageClass,
        region: Option<&str>,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, CodecError> {
        match class {
            MessageClass::DeviceUplink => Ok(payload),
            MessageClass::GatewayStats => {
                let mut decoded = self.decode_gateway_stats(&payload)?;
                if let Some(region) = region {
                    enrich(&mut decoded.record, region);
                }
                Ok(serde_json::to_vec(&decoded.record)?)
            }
        }
    }
}

impl Default for PayloadCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Merge `region` at the top level, overwriting any existing value.
pub fn enrich(record: &mut Record, region: &str) {
    record.insert("region".to_string(), Value::String(region.to_string()));
}

fn probe_json(bytes: &[u8]) -> Result<(), FormatError> {
    match bytes.iter().find(|b| !b.is_ascii_whitespace()) {
        Some(b'{') => Ok(()),
        _ => Err(FormatError::NotJson),
    }
}

fn decode_json(bytes: &[u8]) -> Result<Record, FormatError> {
    match serde_json::from_slice(bytes)? {
        Value::Object(record) => Ok(record),
        _ => Err(FormatError::NotAnObject),
    }
}

fn probe_protobuf(bytes: &[u8]) -> Result<(), FormatError> {
    if bytes.is_empty() {
        return Err(FormatError::Empty);
    }
    Ok(())
}

fn decode_protobuf(bytes: &[u8]) -> Result<Record, FormatError> {
    let stats = proto::GatewayStats::decode(bytes)?;
    flatten_gateway_stats(&stats)
}

/// Flatten protobuf gateway stats with the protobuf JSON mapping:
/// lowerCamelCase keys, default values omitted.
pub fn flatten_gateway_stats(stats: &proto::GatewayStats) -> Result<Record, FormatError> {
    let mut out = Record::new();

    if !stats.gateway_id_legacy.is_empty() {
        out.insert(
            "gatewayIdLegacy".into(),
            Value::String(STANDARD.encode(&stats.gateway_id_legacy)),
        );
    }
    put_str(&mut out, "gatewayId", &stats.gateway_id);
    if let Some(time) = &stats.time {
        out.insert("time".into(), Value::String(format_timestamp(time)?));
    }
    if let Some(location) = &stats.location {
        out.insert("location".into(), Value::Object(flatten_location(location)));
    }
    put_str(&mut out, "configVersion", &stats.config_version);
    put_u32(&mut out, "rxPacketsReceived", stats.rx_packets_received);
    put_u32(&mut out, "rxPacketsReceivedOk", stats.rx_packets_received_ok);
    put_u32(&mut out, "txPacketsReceived", stats.tx_packets_received);
    put_u32(&mut out, "txPacketsEmitted", stats.tx_packets_emitted);

    if !stats.metadata.is_empty() {
        let metadata = stats
            .metadata
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        out.insert("metadata".into(), Value::Object(metadata));
    }
    put_frequency_map(&mut out, "txPacketsPerFrequency", &stats.tx_packets_per_frequency);
    put_frequency_map(&mut out, "rxPacketsPerFrequency", &stats.rx_packets_per_frequency);
    put_modulation_counts(&mut out, "txPacketsPerModulation", &stats.tx_packets_per_modulation);
    put_modulation_counts(&mut out, "rxPacketsPerModulation", &stats.rx_packets_per_modulation);

    if !stats.tx_packets_per_status.is_empty() {
        let per_status = stats
            .tx_packets_per_status
            .iter()
            .map(|(k, v)| (k.clone(), Value::from(*v)))
            .collect();
        out.insert("txPacketsPerStatus".into(), Value::Object(per_status));
    }

    Ok(out)
}

fn format_timestamp(ts: &proto::Timestamp) -> Result<String, FormatError> {
    let nanos = u32::try_from(ts.nanos).map_err(|_| FormatError::Timestamp(ts.seconds, ts.nanos))?;
    DateTime::from_timestamp(ts.seconds, nanos)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        .ok_or(FormatError::Timestamp(ts.seconds, ts.nanos))
}

fn flatten_location(location: &proto::Location) -> Record {
    let mut out = Record::new();
    put_f64(&mut out, "latitude", location.latitude);
    put_f64(&mut out, "longitude", location.longitude);
    put_f64(&mut out, "altitude", location.altitude);
    if location.source != 0 {
        out.insert(
            "source".into(),
            Value::String(location.source().as_str_name().to_string()),
        );
    }
    put_f32(&mut out, "accuracy", location.accuracy);
    out
}

fn flatten_modulation(modulation: &proto::Modulation) -> Record {
    use proto::modulation::Parameters;

    let mut out = Record::new();
    match &modulation.parameters {
        Some(Parameters::Lora(lora)) => {
            let mut info = Record::new();
            put_u32(&mut info, "bandwidth", lora.bandwidth);
            put_u32(&mut info, "spreadingFactor", lora.spreading_factor);
            put_str(&mut info, "codeRateLegacy", &lora.code_rate_legacy);
            put_bool(&mut info, "polarizationInversion", lora.polarization_inversion);
            put_code_rate(&mut info, lora.code_rate());
            put_u32(&mut info, "preamble", lora.preamble);
            put_bool(&mut info, "noCrc", lora.no_crc);
            out.insert("lora".into(), Value::Object(info));
        }
        Some(Parameters::Fsk(fsk)) => {
            let mut info = Record::new();
            put_u32(&mut info, "frequencyDeviation", fsk.frequency_deviation);
            put_u32(&mut info, "datarate", fsk.datarate);
            out.insert("fsk".into(), Value::Object(info));
        }
        Some(Parameters::LrFhss(lr_fhss)) => {
            let mut info = Record::new();
            put_u32(&mut info, "operatingChannelWidth", lr_fhss.operating_channel_width);
            put_str(&mut info, "codeRateLegacy", &lr_fhss.code_rate_legacy);
            put_u32(&mut info, "gridSteps", lr_fhss.grid_steps);
            put_code_rate(&mut info, lr_fhss.code_rate());
            out.insert("lrFhss".into(), Value::Object(info));
        }
        None => {}
    }
    out
}

fn put_str(out: &mut Record, key: &str, value: &str) {
    if !value.is_empty() {
        out.insert(key.into(), Value::String(value.to_string()));
    }
}

fn put_u32(out: &mut Record, key: &str, value: u32) {
    if value != 0 {
        out.insert(key.into(), Value::from(value));
    }
}

fn put_bool(out: &mut Record, key: &str, value: bool) {
    if value {
        out.insert(key.into(), Value::Bool(true));
    }
}

fn put_f64(out: &mut Record, key: &str, value: f64) {
    if value != 0.0 {
        out.insert(key.into(), Value::from(value));
    }
}

/// `float` fields keep their shortest f32 representation (`0.1`, not
/// `0.10000000149011612`).
fn put_f32(out: &mut Record, key: &str, value: f32) {
    if value != 0.0 {
        let widened = value.to_string().parse::<f64>().unwrap_or(f64::from(value));
        out.insert(key.into(), Value::from(widened));
    }
}

fn put_code_rate(out: &mut Record, code_rate: proto::CodeRate) {
    if code_rate != proto::CodeRate::CrUndefined {
        out.insert("codeRate".into(), Value::String(code_rate.as_str_name().to_string()));
    }
}

fn put_frequency_map(out: &mut Record, key: &str, map: &HashMap<u32, u32>) {
    if map.is_empty() {
        return;
    }
    let entries = map
        .iter()
        .map(|(freq, count)| (freq.to_string(), Value::from(*count)))
        .collect();
    out.insert(key.into(), Value::Object(entries));
}

fn put_modulation_counts(out: &mut Record, key: &str, counts: &[proto::PerModulationCount]) {
    if counts.is_empty() {
        return;
    }
    let items = counts
        .iter()
        .map(|c| {
            let mut item = Record::new();
            if let Some(modulation) = &c.modulation {
                item.insert("modulation".into(), Value::Object(flatten_modulation(modulation)));
            }
            put_u32(&mut item, "count", c.count);
            Value::Object(item)
        })
        .collect();
    out.insert(key.into(), Value::Array(items));
}

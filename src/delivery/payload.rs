use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::db::LocationSample;

/// The JSON body the collector accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorPayload {
    pub owner_id: u64,
    pub latitude: f64,
    pub longitude: f64,
    /// Sent as `0` or `1`.
    #[serde(serialize_with = "flag_as_int", deserialize_with = "flag_from_int")]
    pub context_flag: bool,
}

impl CollectorPayload {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize collector payload")
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("pending payload is not valid collector JSON")
    }
}

impl From<&LocationSample> for CollectorPayload {
    fn from(sample: &LocationSample) -> Self {
        Self {
            owner_id: sample.owner_id,
            latitude: sample.latitude,
            longitude: sample.longitude,
            context_flag: sample.context_flag,
        }
    }
}

fn flag_as_int<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u8(u8::from(*value))
}

fn flag_from_int<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match u8::deserialize(deserializer)? {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(serde::de::Error::custom(format!(
            "contextFlag must be 0 or 1, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{json, Value};

    #[test]
    fn wire_shape_matches_collector_contract() {
        let sample = LocationSample {
            id: 42,
            owner_id: 9,
            latitude: 10.5,
            longitude: 76.25,
            timestamp: Utc::now(),
            context_flag: true,
        };

        let body: Value =
            serde_json::from_str(&CollectorPayload::from(&sample).to_json().unwrap()).unwrap();
        assert_eq!(
            body,
            json!({ "ownerId": 9, "latitude": 10.5, "longitude": 76.25, "contextFlag": 1 })
        );
    }

    #[test]
    fn rejects_non_binary_flag() {
        let raw = r#"{"ownerId":1,"latitude":1.0,"longitude":2.0,"contextFlag":2}"#;
        assert!(CollectorPayload::from_json(raw).is_err());
        assert!(CollectorPayload::from_json("not json").is_err());
    }
}

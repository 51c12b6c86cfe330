use chrono::Local;
use indexmap::IndexMap;
use std::str::FromStr;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::protocol::COMPANY;

/// Lifecycle state carried by an announcement
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnouncementStatus {
    #[default]
    Running,
    Goodbye,
    /// Any status this build does not know, e.g. "starting"
    #[serde(other)]
    Unknown,
}

/// A service presence datagram broadcast by the discovery beacon.
/// Never persisted; every field defaults so older or partial senders still parse,
/// and a malformed status or number falls back to its default instead of
/// rejecting the whole datagram.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceAnnouncement {
    /// Service name, e.g. "ADAMService"
    #[serde(rename = "service")]
    pub service_name: String,

    /// Company tag, the alternate match key
    pub company: String,

    /// Routable address of the announcing host
    pub ip: String,

    /// TCP command port; 0 when absent or unusable
    #[serde(deserialize_with = "lenient_number")]
    pub port: u16,

    pub hostname: String,

    /// Seconds since the Unix epoch
    #[serde(deserialize_with = "lenient_number")]
    pub timestamp: f64,

    pub version: String,

    pub capabilities: Vec<String>,

    #[serde(deserialize_with = "lenient_number")]
    pub discovery_port: u16,

    #[serde(deserialize_with = "lenient_status")]
    pub status: AnnouncementStatus,

    /// Restarts at 0 for every beacon lifetime
    #[serde(deserialize_with = "lenient_number")]
    pub sequence: u64,

    /// Free text, only set on goodbye
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A number, or a string holding one; anything else is the type's default
fn lenient_number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + FromStr + Deserialize<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(text) => text.trim().parse().unwrap_or_default(),
        value @ Value::Number(_) => T::deserialize(value).unwrap_or_default(),
        _ => T::default(),
    })
}

fn lenient_status<'de, D>(deserializer: D) -> Result<AnnouncementStatus, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(AnnouncementStatus::deserialize(value).unwrap_or(AnnouncementStatus::Unknown))
}

impl ServiceAnnouncement {
    /// True if this announcement belongs to the wanted service, by name or company tag
    pub fn matches(&self, service_name: &str) -> bool {
        self.service_name == service_name || self.company == COMPANY
    }

    pub fn is_goodbye(&self) -> bool {
        self.status == AnnouncementStatus::Goodbye
    }
}

/// Per-channel frequency response as submitted by a workstation.
/// `frequencies` is only present on the wire; it never reaches the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequencies: Option<Vec<f64>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub levels: Option<Vec<f64>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_points: Option<usize>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One device measurement. Unknown fields pass through to the store untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_serial: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workstation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub measurement_file: Option<String>,

    #[serde(default)]
    pub channels: IndexMap<String, ChannelData>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreMetadata {
    pub created: String,
    pub last_updated: String,
    pub total_measurements: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_points: Option<usize>,
}

impl StoreMetadata {
    pub fn fresh() -> Self {
        let now = iso_now();
        Self {
            created: now.clone(),
            last_updated: now,
            total_measurements: 0,
            frequency_points: None,
        }
    }
}

/// The persisted aggregate of all measurements for one target directory.
/// Once `frequency_vector` is set it never changes; channel levels index against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementStore {
    pub metadata: StoreMetadata,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency_vector: Option<Vec<f64>>,

    #[serde(default)]
    pub measurements: IndexMap<String, MeasurementRecord>,
}

impl Default for MeasurementStore {
    fn default() -> Self {
        Self {
            metadata: StoreMetadata::fresh(),
            frequency_vector: None,
            measurements: IndexMap::new(),
        }
    }
}

/// Local wall-clock time in ISO 8601 form, matching what existing stores contain
pub fn iso_now() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_announcement_wire_names() {
        let announcement = ServiceAnnouncement {
            service_name: "ADAMService".to_string(),
            company: COMPANY.to_string(),
            ip: "10.0.0.5".to_string(),
            port: 65432,
            ..Default::default()
        };

        let json = serde_json::to_value(&announcement).unwrap();
        assert_eq!(json["service"], "ADAMService");
        assert_eq!(json["status"], "running");
        assert!(json.get("message").is_none());
    }

    #[test]
    fn test_partial_announcement_parses() {
        let parsed: ServiceAnnouncement =
            serde_json::from_str(r#"{"service": "Other", "ip": "unknown"}"#).unwrap();
        assert_eq!(parsed.service_name, "Other");
        assert_eq!(parsed.port, 0);
        assert!(!parsed.is_goodbye());
    }

    #[test]
    fn test_unexpected_status_and_numbers_fall_back() {
        let parsed: ServiceAnnouncement = serde_json::from_str(
            r#"{"service": "ADAMService", "status": "starting", "port": "65432",
                "discovery_port": "nope", "sequence": -3, "timestamp": "1760000000.5"}"#,
        )
        .unwrap();
        assert_eq!(parsed.status, AnnouncementStatus::Unknown);
        assert!(!parsed.is_goodbye());
        assert_eq!(parsed.port, 65432);
        assert_eq!(parsed.discovery_port, 0);
        assert_eq!(parsed.sequence, 0);
        assert_eq!(parsed.timestamp, 1760000000.5);

        let parsed: ServiceAnnouncement =
            serde_json::from_str(r#"{"service": "ADAMService", "status": 7, "port": 70000}"#).unwrap();
        assert_eq!(parsed.status, AnnouncementStatus::Unknown);
        assert_eq!(parsed.port, 0);
    }

    #[test]
    fn test_matches_by_name_or_company() {
        let by_name = ServiceAnnouncement {
            service_name: "ADAMService".to_string(),
            company: "Someone Else".to_string(),
            ..Default::default()
        };
        let by_company = ServiceAnnouncement {
            service_name: "Renamed".to_string(),
            company: COMPANY.to_string(),
            ..Default::default()
        };
        let neither = ServiceAnnouncement {
            service_name: "Renamed".to_string(),
            company: "Someone Else".to_string(),
            ..Default::default()
        };

        assert!(by_name.matches("ADAMService"));
        assert!(by_company.matches("ADAMService"));
        assert!(!neither.matches("ADAMService"));
    }

    #[test]
    fn test_record_keeps_unknown_fields() {
        let raw = r#"{
            "device_serial": "SN1",
            "operator": "night shift",
            "channels": {"Ch1": {"levels": [1.0], "unit": "dBSPL", "gain": 3}}
        }"#;
        let record: MeasurementRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(record.extra["operator"], "night shift");
        assert_eq!(record.channels["Ch1"].extra["gain"], 3);

        let back = serde_json::to_value(&record).unwrap();
        assert_eq!(back["operator"], "night shift");
        assert!(back["channels"]["Ch1"].get("frequencies").is_none());
    }
}

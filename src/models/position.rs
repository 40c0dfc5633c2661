use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// A point-in-time location report for a delivery agent.
///
/// The REST backend persists these with a `createdAt` column while live
/// pushes carry `timestamp`; both decode into the same value.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PositionSnapshot {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(alias = "createdAt")]
    pub timestamp: DateTime<Utc>,
}

impl PositionSnapshot {
    pub fn point(&self) -> GeoPoint {
        GeoPoint {
            lat: self.latitude,
            lng: self.longitude,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::PositionSnapshot;

    #[test]
    fn rest_record_decodes_created_at_as_timestamp() {
        let snapshot: PositionSnapshot = serde_json::from_value(json!({
            "latitude": 29.99,
            "longitude": 31.21,
            "createdAt": "2024-05-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(snapshot.address, None);
        assert_eq!(snapshot.timestamp.to_rfc3339(), "2024-05-01T10:00:00+00:00");
        assert_eq!(snapshot.point().lat, 29.99);
    }

    #[test]
    fn push_payload_keeps_address_label() {
        let snapshot: PositionSnapshot = serde_json::from_value(json!({
            "latitude": 29.995,
            "longitude": 31.205,
            "address": "Corniche El Nil",
            "timestamp": "2024-05-01T10:00:05Z"
        }))
        .unwrap();

        assert_eq!(snapshot.address.as_deref(), Some("Corniche El Nil"));
    }
}

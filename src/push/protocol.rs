//! JSON frames exchanged over the push channel.
//!
//! Every frame is `{"event": "<name>", "data": {...}}`, whatever the
//! transport carrying it.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::ChannelError;
use crate::models::order::OrderId;
use crate::models::position::PositionSnapshot;

pub const TRACK_ORDER: &str = "track_order";
pub const UNTRACK_ORDER: &str = "untrack_order";
pub const LOCATION_UPDATED: &str = "location_updated";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Frame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    TrackOrder(OrderId),
    UntrackOrder(OrderId),
}

impl Outbound {
    pub fn to_frame(&self) -> Frame {
        let (event, order_id) = match self {
            Outbound::TrackOrder(id) => (TRACK_ORDER, id),
            Outbound::UntrackOrder(id) => (UNTRACK_ORDER, id),
        };
        Frame {
            event: event.to_string(),
            data: serde_json::json!({ "orderId": order_id }),
        }
    }

    pub fn encode(&self) -> Result<String, ChannelError> {
        Ok(serde_json::to_string(&self.to_frame())?)
    }
}

/// Payload of `location_updated`. The server scopes events by room, so
/// `order_id` is optional on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    #[serde(flatten)]
    pub position: PositionSnapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    LocationUpdated(LocationUpdate),
    Other(String),
}

impl Inbound {
    pub fn from_frame(frame: Frame) -> Result<Self, ChannelError> {
        match frame.event.as_str() {
            LOCATION_UPDATED => Ok(Inbound::LocationUpdated(serde_json::from_value(frame.data)?)),
            _ => {
                debug!(event = %frame.event, "ignoring push event");
                Ok(Inbound::Other(frame.event))
            }
        }
    }

    pub fn decode(text: &str) -> Result<Self, ChannelError> {
        let frame: Frame = serde_json::from_str(text)?;
        Self::from_frame(frame)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Inbound, Outbound};
    use crate::models::order::OrderId;

    #[test]
    fn track_order_frame_uses_camel_case_order_id() {
        let text = Outbound::TrackOrder(OrderId::new("ORD-1")).encode().unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value, json!({ "event": "track_order", "data": { "orderId": "ORD-1" } }));
    }

    #[test]
    fn location_update_without_order_id_decodes() {
        let inbound = Inbound::decode(
            r#"{"event":"location_updated","data":{"latitude":29.995,"longitude":31.205,"timestamp":"2024-05-01T10:00:05Z"}}"#,
        )
        .unwrap();

        match inbound {
            Inbound::LocationUpdated(update) => {
                assert!(update.order_id.is_none());
                assert_eq!(update.position.latitude, 29.995);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn unknown_events_are_not_errors() {
        let inbound = Inbound::decode(r#"{"event":"order_status","data":{"status":"delivered"}}"#)
            .unwrap();
        assert_eq!(inbound, Inbound::Other("order_status".to_string()));
    }

    #[test]
    fn malformed_location_is_a_protocol_error() {
        assert!(Inbound::decode(r#"{"event":"location_updated","data":{"latitude":"x"}}"#).is_err());
    }
}

use std::future::Future;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::TrackError;
use crate::models::order::{Order, OrderId};
use crate::models::position::PositionSnapshot;
use crate::session::SessionCredential;

/// The two read calls tracking needs from the REST backend.
pub trait TrackingApi: Send + Sync {
    fn fetch_order(
        &self,
        order_id: &OrderId,
    ) -> impl Future<Output = Result<Order, TrackError>> + Send;

    /// Most recent persisted position for a delivery agent, if any.
    fn latest_position(
        &self,
        agent_id: &str,
    ) -> impl Future<Output = Result<Option<PositionSnapshot>, TrackError>> + Send;
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitialTrackingState {
    pub order: Order,
    pub initial_position: Option<PositionSnapshot>,
}

pub async fn fetch_initial_tracking_state<A: TrackingApi>(
    api: &A,
    order_id: &OrderId,
) -> Result<InitialTrackingState, TrackError> {
    let order = api.fetch_order(order_id).await?;

    let initial_position = match order.delivery_agent() {
        Some(agent) => match api.latest_position(&agent.id).await {
            Ok(position) => position,
            Err(err) => {
                let err = TrackError::SnapshotUnavailable(err.to_string());
                warn!(order_id = %order_id, agent_id = %agent.id, error = %err, "no initial position");
                None
            }
        },
        None => {
            debug!(order_id = %order_id, "order has no assigned delivery agent");
            None
        }
    };

    Ok(InitialTrackingState {
        order,
        initial_position,
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LocationsBody {
    List(Vec<PositionSnapshot>),
    Envelope { data: Vec<PositionSnapshot> },
}

impl LocationsBody {
    fn into_latest(self) -> Option<PositionSnapshot> {
        let records = match self {
            LocationsBody::List(records) => records,
            LocationsBody::Envelope { data } => data,
        };
        records.into_iter().next()
    }
}

#[derive(Clone)]
pub struct RestTrackingApi {
    http: reqwest::Client,
    base_url: String,
    credential: SessionCredential,
}

impl RestTrackingApi {
    pub fn new(
        base_url: impl Into<String>,
        credential: SessionCredential,
        timeout: Duration,
    ) -> Result<Self, TrackError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| TrackError::Internal(format!("failed to build http client: {err}")))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            credential,
        })
    }

    fn check_status(status: StatusCode, what: &str) -> Result<(), TrackError> {
        match status {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(TrackError::NotFound(what.to_string())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(TrackError::Unauthorized(format!("{what}: {status}")))
            }
            status => Err(TrackError::Http(format!("{what}: {status}"))),
        }
    }
}

impl TrackingApi for RestTrackingApi {
    async fn fetch_order(&self, order_id: &OrderId) -> Result<Order, TrackError> {
        let response = self
            .http
            .get(format!("{}/orders/{}", self.base_url, order_id))
            .bearer_auth(self.credential.token())
            .send()
            .await?;

        Self::check_status(response.status(), &format!("order {order_id}"))?;
        Ok(response.json::<Order>().await?)
    }

    async fn latest_position(&self, agent_id: &str) -> Result<Option<PositionSnapshot>, TrackError> {
        let response = self
            .http
            .get(format!("{}/delivery-locations", self.base_url))
            .query(&[("deliveryId", agent_id), ("limit", "1")])
            .bearer_auth(self.credential.token())
            .send()
            .await?;

        Self::check_status(response.status(), &format!("locations for {agent_id}"))?;
        Ok(response.json::<LocationsBody>().await?.into_latest())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::{InitialTrackingState, LocationsBody, TrackingApi, fetch_initial_tracking_state};
    use crate::error::TrackError;
    use crate::models::order::{Order, OrderId};
    use crate::models::position::PositionSnapshot;

    pub(crate) struct StubApi {
        pub orders: Vec<Order>,
        pub position: Mutex<Option<Result<Option<PositionSnapshot>, TrackError>>>,
    }

    impl TrackingApi for StubApi {
        async fn fetch_order(&self, order_id: &OrderId) -> Result<Order, TrackError> {
            self.orders
                .iter()
                .find(|order| &order.id == order_id)
                .cloned()
                .ok_or_else(|| TrackError::NotFound(format!("order {order_id}")))
        }

        async fn latest_position(
            &self,
            _agent_id: &str,
        ) -> Result<Option<PositionSnapshot>, TrackError> {
            self.position.lock().unwrap().take().unwrap_or(Ok(None))
        }
    }

    pub(crate) fn order(id: &str, agent: Option<&str>) -> Order {
        let mut value = json!({
            "id": id,
            "latitude": 30.0,
            "longitude": 31.2,
            "address": "12 Tahrir Sq",
            "status": "out_for_delivery"
        });
        if let Some(agent) = agent {
            value["assignment"] = json!({ "delivery": { "id": agent, "name": "Omar" } });
        }
        serde_json::from_value(value).unwrap()
    }

    pub(crate) fn position(lat: f64, lng: f64, second: u32) -> PositionSnapshot {
        PositionSnapshot {
            latitude: lat,
            longitude: lng,
            address: None,
            timestamp: Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, second).unwrap(),
        }
    }

    fn stub(order: Order, position: Result<Option<PositionSnapshot>, TrackError>) -> StubApi {
        StubApi {
            orders: vec![order],
            position: Mutex::new(Some(position)),
        }
    }

    #[tokio::test]
    async fn unassigned_order_has_no_initial_position() {
        let api = stub(order("ORD-1", None), Ok(Some(position(1.0, 1.0, 0))));
        let state = fetch_initial_tracking_state(&api, &OrderId::new("ORD-1"))
            .await
            .unwrap();

        assert!(state.initial_position.is_none());
    }

    #[tokio::test]
    async fn assigned_order_without_history_has_no_initial_position() {
        let api = stub(order("ORD-1", Some("AG-3")), Ok(None));
        let state = fetch_initial_tracking_state(&api, &OrderId::new("ORD-1"))
            .await
            .unwrap();

        assert!(state.initial_position.is_none());
    }

    #[tokio::test]
    async fn failed_location_query_degrades_to_no_position() {
        let api = stub(
            order("ORD-1", Some("AG-3")),
            Err(TrackError::Http("locations for AG-3: 500".to_string())),
        );
        let state = fetch_initial_tracking_state(&api, &OrderId::new("ORD-1"))
            .await
            .unwrap();

        assert!(state.initial_position.is_none());
    }

    #[tokio::test]
    async fn assigned_order_returns_last_known_position() {
        let last = position(29.99, 31.21, 0);
        let api = stub(order("ORD-1", Some("AG-3")), Ok(Some(last.clone())));
        let state = fetch_initial_tracking_state(&api, &OrderId::new("ORD-1"))
            .await
            .unwrap();

        assert_eq!(
            state,
            InitialTrackingState {
                order: order("ORD-1", Some("AG-3")),
                initial_position: Some(last),
            }
        );
    }

    #[tokio::test]
    async fn missing_order_is_not_found() {
        let api = stub(order("ORD-1", None), Ok(None));
        let err = fetch_initial_tracking_state(&api, &OrderId::new("ORD-404"))
            .await
            .unwrap_err();

        assert!(matches!(err, TrackError::NotFound(_)));
        assert_eq!(err.redirect_target(), Some("/orders"));
    }

    #[test]
    fn locations_body_accepts_bare_list_and_envelope() {
        let record = json!({ "latitude": 1.0, "longitude": 2.0, "createdAt": "2024-05-01T10:00:00Z" });

        let list: LocationsBody = serde_json::from_value(json!([record.clone()])).unwrap();
        assert_eq!(list.into_latest().unwrap().longitude, 2.0);

        let envelope: LocationsBody = serde_json::from_value(json!({ "data": [record] })).unwrap();
        assert!(envelope.into_latest().is_some());

        let empty: LocationsBody = serde_json::from_value(json!({ "data": [] })).unwrap();
        assert!(empty.into_latest().is_none());
    }
}

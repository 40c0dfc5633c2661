//! Projection of tracking state onto a tile map.
//!
//! Nothing here knows about a concrete map library: [`MapRenderer`] turns
//! [`TrackingState`] into a plain [`MapScene`] and a [`MapSurface`]
//! implementation draws it.

pub mod surface;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::WatchStream;
use tracing::debug;

use crate::geo::distance_km;
use crate::models::order::OrderId;
use crate::models::position::GeoPoint;
use crate::tracking::reconciler::{Phase, TrackingState};

pub use surface::{LogSurface, MapSurface};

pub const WAITING_MESSAGE: &str =
    "Waiting for the delivery agent to share a live location. The map updates automatically.";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub enum MarkerKind {
    Destination,
    Delivery,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Marker {
    pub kind: MarkerKind,
    pub position: GeoPoint,
    pub label: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub enum Overlay {
    Loading,
    WaitingForLocation { message: String },
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InfoPanel {
    pub order_id: OrderId,
    pub status: String,
    pub agent_name: Option<String>,
    pub vehicle: Option<String>,
    pub phone: Option<String>,
    pub last_update: Option<DateTime<Utc>>,
    pub distance_to_destination_km: Option<f64>,
    pub live: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MapScene {
    pub center: GeoPoint,
    pub zoom: u8,
    /// The viewport must move to `center` for this frame.
    pub recenter: bool,
    pub destination: Option<Marker>,
    pub delivery: Option<Marker>,
    pub overlay: Option<Overlay>,
    pub info: Option<InfoPanel>,
}

pub struct MapRenderer {
    default_center: GeoPoint,
    zoom: u8,
    last_order: Option<OrderId>,
    last_delivery: Option<GeoPoint>,
}

impl MapRenderer {
    pub fn new(default_center: GeoPoint, zoom: u8) -> Self {
        Self {
            default_center,
            zoom,
            last_order: None,
            last_delivery: None,
        }
    }

    pub fn project(&mut self, state: &TrackingState) -> MapScene {
        if state.order_id != self.last_order {
            self.last_order = state.order_id.clone();
            self.last_delivery = None;
        }

        let Some(order) = state.order.as_ref().filter(|_| state.phase != Phase::Uninitialized)
        else {
            return MapScene {
                center: self.default_center,
                zoom: self.zoom,
                recenter: false,
                destination: None,
                delivery: None,
                overlay: Some(Overlay::Loading),
                info: None,
            };
        };

        let destination = order.destination().map(|position| Marker {
            kind: MarkerKind::Destination,
            position,
            label: order.address.clone(),
        });

        let agent = order.delivery_agent();
        let delivery = state.current_position.as_ref().map(|snapshot| Marker {
            kind: MarkerKind::Delivery,
            position: snapshot.point(),
            label: snapshot
                .address
                .clone()
                .or_else(|| agent.map(|agent| agent.name.clone()))
                .unwrap_or_else(|| "Delivery agent".to_string()),
        });

        let delivery_point = delivery.as_ref().map(|marker| marker.position);
        let recenter = delivery_point.is_some() && delivery_point != self.last_delivery;
        if delivery_point.is_some() {
            self.last_delivery = delivery_point;
        }

        let center = delivery_point
            .or_else(|| destination.as_ref().map(|marker| marker.position))
            .unwrap_or(self.default_center);

        let overlay = delivery.is_none().then(|| Overlay::WaitingForLocation {
            message: WAITING_MESSAGE.to_string(),
        });

        let distance_to_destination_km = match (&delivery, &destination) {
            (Some(delivery), Some(destination)) => {
                Some(distance_km(&delivery.position, &destination.position))
            }
            _ => None,
        };

        let info = InfoPanel {
            order_id: order.id.clone(),
            status: order.status.to_string(),
            agent_name: agent.map(|agent| agent.name.clone()),
            vehicle: agent.and_then(|agent| agent.vehicle.clone()),
            phone: agent.and_then(|agent| agent.phone.clone()),
            last_update: state.current_position.as_ref().map(|p| p.timestamp),
            distance_to_destination_km,
            live: state.has_live_signal(),
        };

        MapScene {
            center,
            zoom: self.zoom,
            recenter,
            destination,
            delivery,
            overlay,
            info: Some(info),
        }
    }

    /// Renders every state change until the reconciler goes away.
    pub async fn run<S: MapSurface>(
        mut self,
        state: watch::Receiver<TrackingState>,
        surface: &mut S,
    ) {
        let mut updates = WatchStream::new(state);
        while let Some(state) = updates.next().await {
            let scene = self.project(&state);
            surface.render(&scene);
        }
        debug!("map renderer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::{MapRenderer, MarkerKind, Overlay};
    use crate::models::order::OrderId;
    use crate::models::position::GeoPoint;
    use crate::snapshot::InitialTrackingState;
    use crate::snapshot::tests::{order, position};
    use crate::tracking::reconciler::{Reconciler, StalenessPolicy};

    const DEFAULT_CENTER: GeoPoint = GeoPoint {
        lat: 30.0444,
        lng: 31.2357,
    };

    fn renderer() -> MapRenderer {
        MapRenderer::new(DEFAULT_CENTER, 15)
    }

    #[test]
    fn loading_state_has_no_markers() {
        let reconciler = Reconciler::new(StalenessPolicy::default());
        reconciler.begin(&OrderId::new("ORD-1"));

        let scene = renderer().project(&reconciler.snapshot());

        assert_eq!(scene.overlay, Some(Overlay::Loading));
        assert!(scene.destination.is_none());
        assert!(scene.delivery.is_none());
        assert_eq!(scene.center, DEFAULT_CENTER);
    }

    #[test]
    fn missing_position_shows_waiting_overlay_instead_of_delivery_marker() {
        let reconciler = Reconciler::new(StalenessPolicy::default());
        let epoch = reconciler.begin(&OrderId::new("ORD-1"));
        reconciler.apply_snapshot(
            epoch,
            InitialTrackingState {
                order: order("ORD-1", None),
                initial_position: None,
            },
        );

        let scene = renderer().project(&reconciler.snapshot());

        assert!(matches!(scene.overlay, Some(Overlay::WaitingForLocation { .. })));
        assert!(scene.delivery.is_none());
        let destination = scene.destination.unwrap();
        assert_eq!(destination.kind, MarkerKind::Destination);
        assert_eq!(destination.label, "12 Tahrir Sq");
        assert_eq!(scene.center, destination.position);
        assert!(!scene.recenter);
    }

    #[test]
    fn every_push_recenters_and_destination_stays_fixed() {
        let reconciler = Reconciler::new(StalenessPolicy::default());
        let epoch = reconciler.begin(&OrderId::new("ORD-1"));
        reconciler.apply_snapshot(
            epoch,
            InitialTrackingState {
                order: order("ORD-1", Some("AG-3")),
                initial_position: Some(position(29.99, 31.21, 0)),
            },
        );

        let mut renderer = renderer();
        let first = renderer.project(&reconciler.snapshot());
        assert!(first.recenter);
        assert!(first.overlay.is_none());
        assert_eq!(first.delivery.as_ref().unwrap().label, "Omar");
        assert!(!first.info.as_ref().unwrap().live);

        let unchanged = renderer.project(&reconciler.snapshot());
        assert!(!unchanged.recenter);

        reconciler.apply_push(epoch, position(29.995, 31.205, 5));
        let moved = renderer.project(&reconciler.snapshot());

        assert!(moved.recenter);
        assert_eq!(moved.center, GeoPoint { lat: 29.995, lng: 31.205 });
        assert_eq!(moved.destination, first.destination);
        let info = moved.info.unwrap();
        assert!(info.live);
        let distance = info.distance_to_destination_km.unwrap();
        assert!(distance > 0.5 && distance < 1.0);
    }
}

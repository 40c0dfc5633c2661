use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::TrackError;
use crate::models::order::OrderId;
use crate::observability::metrics::Metrics;
use crate::push::{PushChannelClient, Subscription};
use crate::snapshot::{TrackingApi, fetch_initial_tracking_state};
use crate::tracking::reconciler::{Phase, Reconciler, StalenessPolicy, TrackingState};

/// One mounted order-tracking screen.
///
/// The view consumes the session's push channel but never connects or
/// disconnects it.
pub struct TrackingView<A: TrackingApi> {
    api: Arc<A>,
    channel: PushChannelClient,
    reconciler: Arc<Reconciler>,
    order_id: Option<OrderId>,
    epoch: u64,
    subscription: Option<Subscription>,
    metrics: Metrics,
}

impl<A: TrackingApi> TrackingView<A> {
    pub fn new(
        api: Arc<A>,
        channel: PushChannelClient,
        policy: StalenessPolicy,
        metrics: Metrics,
    ) -> Self {
        Self {
            api,
            channel,
            reconciler: Arc::new(Reconciler::new(policy)),
            order_id: None,
            epoch: 0,
            subscription: None,
            metrics,
        }
    }

    /// Starts tracking `order_id`. Anything tracked before is unsubscribed
    /// first, so a late event for the old order cannot reach the new state.
    pub async fn mount(&mut self, order_id: OrderId) -> Result<(), TrackError> {
        self.release_subscription();
        self.epoch = self.reconciler.begin(&order_id);
        self.order_id = Some(order_id.clone());

        let start = Instant::now();
        let initial = match fetch_initial_tracking_state(self.api.as_ref(), &order_id).await {
            Ok(initial) => {
                self.observe_fetch("success", start);
                initial
            }
            Err(err) => {
                self.observe_fetch("error", start);
                warn!(order_id = %order_id, error = %err, "failed to load tracking view");
                return Err(err);
            }
        };

        info!(
            order_id = %order_id,
            has_position = initial.initial_position.is_some(),
            "tracking snapshot loaded"
        );
        self.reconciler.apply_snapshot(self.epoch, initial);
        self.ensure_live();

        Ok(())
    }

    /// Navigating to another order: cancel the old one, then start the new.
    pub async fn change_order(&mut self, order_id: OrderId) -> Result<(), TrackError> {
        self.mount(order_id).await
    }

    /// (Re)subscribes to live updates if the view has a loaded order and no
    /// working subscription, e.g. after the channel reconnected. Returns
    /// whether live updates are flowing.
    pub fn ensure_live(&mut self) -> bool {
        if let Some(subscription) = &self.subscription {
            if self.channel.is_active(subscription) {
                return true;
            }
            self.subscription = None;
        }

        let Some(order_id) = self.order_id.clone() else {
            return false;
        };
        let state = self.reconciler.snapshot();
        if state.epoch != self.epoch || state.phase == Phase::Uninitialized {
            return false;
        }

        let epoch = self.epoch;
        let reconciler = Arc::clone(&self.reconciler);
        let metrics = self.metrics.clone();
        self.subscription = self.channel.subscribe_to_order(&order_id, move |position| {
            let outcome = if reconciler.apply_push(epoch, position) {
                "applied"
            } else {
                "dropped"
            };
            metrics.push_events_total.with_label_values(&[outcome]).inc();
        });

        if self.subscription.is_none() {
            let err = TrackError::ChannelUnavailable;
            debug!(order_id = %order_id, error = %err, "showing snapshot only");
        }
        self.subscription.is_some()
    }

    pub fn unmount(&mut self) {
        self.release_subscription();
        self.reconciler.close();
        if let Some(order_id) = self.order_id.take() {
            info!(order_id = %order_id, "tracking view unmounted");
        }
    }

    pub fn state(&self) -> watch::Receiver<TrackingState> {
        self.reconciler.subscribe()
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn order_id(&self) -> Option<&OrderId> {
        self.order_id.as_ref()
    }

    pub fn is_live(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(|subscription| self.channel.is_active(subscription))
    }

    fn release_subscription(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            self.channel.unsubscribe_from_order(subscription);
        }
    }

    fn observe_fetch(&self, outcome: &str, start: Instant) {
        self.metrics
            .snapshot_fetch_seconds
            .with_label_values(&[outcome])
            .observe(start.elapsed().as_secs_f64());
    }
}

impl<A: TrackingApi> Drop for TrackingView<A> {
    fn drop(&mut self) {
        self.release_subscription();
        self.reconciler.close();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use super::TrackingView;
    use crate::error::TrackError;
    use crate::models::order::OrderId;
    use crate::observability::metrics::Metrics;
    use crate::push::PushChannelClient;
    use crate::push::transport::{TransportKind, TransportSettings};
    use crate::snapshot::tests::{StubApi, order, position};
    use crate::tracking::reconciler::{Phase, StalenessPolicy};

    fn view(api: StubApi) -> TrackingView<StubApi> {
        let settings = TransportSettings::new(
            "http://127.0.0.1:9",
            vec![TransportKind::WebSocket],
            Duration::from_millis(200),
            Duration::from_millis(200),
        );
        let channel = PushChannelClient::new(settings, Metrics::new());
        TrackingView::new(Arc::new(api), channel, StalenessPolicy::default(), Metrics::new())
    }

    #[tokio::test]
    async fn mount_without_channel_shows_snapshot_only() {
        let mut view = view(StubApi {
            orders: vec![order("ORD-1", Some("AG-3"))],
            position: Mutex::new(Some(Ok(Some(position(29.99, 31.21, 0))))),
        });

        view.mount(OrderId::new("ORD-1")).await.unwrap();

        let state = view.reconciler().snapshot();
        assert_eq!(state.phase, Phase::SnapshotOnly);
        assert!(state.current_position.is_some());
        assert!(!view.is_live());
        assert!(!view.ensure_live());
    }

    #[tokio::test]
    async fn unknown_order_surfaces_not_found() {
        let mut view = view(StubApi {
            orders: vec![],
            position: Mutex::new(None),
        });

        let err = view.mount(OrderId::new("ORD-404")).await.unwrap_err();

        assert!(matches!(err, TrackError::NotFound(_)));
        assert_eq!(view.reconciler().snapshot().phase, Phase::Uninitialized);
    }

    #[tokio::test]
    async fn unmount_clears_state() {
        let mut view = view(StubApi {
            orders: vec![order("ORD-1", None)],
            position: Mutex::new(None),
        });

        view.mount(OrderId::new("ORD-1")).await.unwrap();
        view.unmount();

        assert!(view.order_id().is_none());
        assert!(view.reconciler().snapshot().order.is_none());
    }
}

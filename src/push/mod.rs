pub mod protocol;
pub mod transport;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::ChannelError;
use crate::models::order::OrderId;
use crate::models::position::PositionSnapshot;
use crate::observability::metrics::Metrics;
use crate::push::protocol::{Inbound, LocationUpdate, Outbound};
use crate::push::transport::{TransportKind, TransportLink, TransportSettings};
use crate::session::SessionCredential;

const INBOUND_BUFFER: usize = 64;

pub type LocationCallback = Arc<dyn Fn(PositionSnapshot) + Send + Sync>;

/// Registration handle returned by [`PushChannelClient::subscribe_to_order`].
/// Give it back to [`PushChannelClient::unsubscribe_from_order`] to stop
/// receiving updates.
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    order_id: OrderId,
}

impl Subscription {
    pub fn order_id(&self) -> &OrderId {
        &self.order_id
    }
}

struct Subscriber {
    order_id: OrderId,
    on_update: LocationCallback,
}

struct Connection {
    id: Uuid,
    credential: SessionCredential,
    link: TransportLink,
    dispatcher: tokio::task::JoinHandle<()>,
}

impl Connection {
    fn close(self) {
        self.link.abort();
        self.dispatcher.abort();
    }
}

struct Inner {
    settings: TransportSettings,
    connection: Mutex<Option<Connection>>,
    lifecycle: tokio::sync::Mutex<()>,
    subscribers: DashMap<Uuid, Subscriber>,
    metrics: Metrics,
}

impl Inner {
    fn connection(&self) -> MutexGuard<'_, Option<Connection>> {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, update: LocationUpdate) {
        let mut delivered = 0usize;

        // Callbacks run while the shard guard is held, so removing a
        // subscriber waits for an in-progress delivery to finish.
        for entry in self.subscribers.iter() {
            let subscriber = entry.value();
            if update
                .order_id
                .as_ref()
                .is_none_or(|order_id| order_id == &subscriber.order_id)
            {
                (subscriber.on_update)(update.position.clone());
                delivered += 1;
            }
        }

        let routing = if delivered > 0 { "delivered" } else { "unrouted" };
        self.metrics.push_frames_total.with_label_values(&[routing]).inc();
    }

    fn drop_subscribers(&self) {
        let dropped = self.subscribers.len();
        self.subscribers.clear();
        self.metrics.active_subscriptions.set(0);
        if dropped > 0 {
            debug!(dropped, "dropped push subscriptions");
        }
    }

    fn connection_lost(&self, connection_id: Uuid) {
        let mut guard = self.connection();
        if guard.as_ref().is_some_and(|conn| conn.id == connection_id) {
            if let Some(conn) = guard.take() {
                conn.link.abort();
            }
            self.drop_subscribers();
            warn!(connection_id = %connection_id, "push channel lost; subscriptions must be re-established");
        }
    }
}

/// Session-scoped push channel with order-scoped subscriptions on top.
///
/// Cloning shares the same underlying connection.
#[derive(Clone)]
pub struct PushChannelClient {
    inner: Arc<Inner>,
}

impl PushChannelClient {
    pub fn new(settings: TransportSettings, metrics: Metrics) -> Self {
        Self {
            inner: Arc::new(Inner {
                settings,
                connection: Mutex::new(None),
                lifecycle: tokio::sync::Mutex::new(()),
                subscribers: DashMap::new(),
                metrics,
            }),
        }
    }

    /// Opens the channel for `credential`. A no-op when a live connection
    /// for the same credential exists; a different credential replaces it.
    pub async fn connect(&self, credential: &SessionCredential) -> Result<(), ChannelError> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        {
            let mut guard = self.inner.connection();
            match guard.as_ref() {
                Some(conn) if conn.credential == *credential && !conn.link.outbound.is_closed() => {
                    debug!(connection_id = %conn.id, "push channel already connected");
                    return Ok(());
                }
                Some(_) => {
                    if let Some(previous) = guard.take() {
                        info!(connection_id = %previous.id, "replacing push channel connection");
                        previous.close();
                    }
                    self.inner.drop_subscribers();
                }
                None => {}
            }
        }

        let (inbound_tx, mut inbound_rx) = mpsc::channel::<Inbound>(INBOUND_BUFFER);
        let link = transport::open(&self.inner.settings, credential, inbound_tx).await?;
        let connection_id = Uuid::new_v4();

        self.inner
            .metrics
            .push_connections_total
            .with_label_values(&[link.kind.as_str()])
            .inc();

        let inner = self.inner.clone();
        let dispatcher = tokio::spawn(async move {
            while let Some(frame) = inbound_rx.recv().await {
                match frame {
                    Inbound::LocationUpdated(update) => inner.dispatch(update),
                    Inbound::Other(_) => {}
                }
            }
            inner.connection_lost(connection_id);
        });

        info!(connection_id = %connection_id, transport = %link.kind, "push channel connected");

        *self.inner.connection() = Some(Connection {
            id: connection_id,
            credential: credential.clone(),
            link,
            dispatcher,
        });

        Ok(())
    }

    /// Closes the channel. No callback is invoked once this returns.
    pub async fn disconnect(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let previous = self.inner.connection().take();
        self.inner.drop_subscribers();

        if let Some(conn) = previous {
            info!(connection_id = %conn.id, "push channel disconnected");
            conn.close();
        }
    }

    pub fn is_connected(&self) -> bool {
        self.inner
            .connection()
            .as_ref()
            .is_some_and(|conn| !conn.link.outbound.is_closed())
    }

    pub fn transport(&self) -> Option<TransportKind> {
        self.inner.connection().as_ref().map(|conn| conn.link.kind)
    }

    /// Registers `on_update` for live positions of `order_id`. Events are
    /// delivered in arrival order. Returns `None` without side effects when
    /// the channel is not connected.
    ///
    /// The callback runs on the dispatcher task while the registry is
    /// locked: it must be non-blocking and must not call back into this
    /// client.
    pub fn subscribe_to_order<F>(&self, order_id: &OrderId, on_update: F) -> Option<Subscription>
    where
        F: Fn(PositionSnapshot) + Send + Sync + 'static,
    {
        let guard = self.inner.connection();
        let Some(conn) = guard.as_ref() else {
            debug!(order_id = %order_id, "push channel not connected; skipping subscribe");
            return None;
        };

        let first_for_order = !self
            .inner
            .subscribers
            .iter()
            .any(|entry| entry.value().order_id == *order_id);

        let id = Uuid::new_v4();
        self.inner.subscribers.insert(
            id,
            Subscriber {
                order_id: order_id.clone(),
                on_update: Arc::new(on_update),
            },
        );

        if first_for_order
            && conn
                .link
                .outbound
                .send(Outbound::TrackOrder(order_id.clone()))
                .is_err()
        {
            self.inner.subscribers.remove(&id);
            debug!(order_id = %order_id, "push transport closed; skipping subscribe");
            return None;
        }

        self.inner.metrics.active_subscriptions.inc();
        debug!(order_id = %order_id, subscription_id = %id, "subscribed to order");

        Some(Subscription {
            id,
            order_id: order_id.clone(),
        })
    }

    /// Removes a registration. Once this returns its callback never runs
    /// again.
    pub fn unsubscribe_from_order(&self, subscription: Subscription) {
        let guard = self.inner.connection();

        if self.inner.subscribers.remove(&subscription.id).is_none() {
            return;
        }
        self.inner.metrics.active_subscriptions.dec();

        let still_tracked = self
            .inner
            .subscribers
            .iter()
            .any(|entry| entry.value().order_id == subscription.order_id);

        if !still_tracked {
            if let Some(conn) = guard.as_ref() {
                let _ = conn
                    .link
                    .outbound
                    .send(Outbound::UntrackOrder(subscription.order_id.clone()));
            }
        }

        debug!(order_id = %subscription.order_id, subscription_id = %subscription.id, "unsubscribed from order");
    }

    /// False once the registration was removed, including when the
    /// connection dropped underneath it.
    pub fn is_active(&self, subscription: &Subscription) -> bool {
        self.inner.subscribers.contains_key(&subscription.id)
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}

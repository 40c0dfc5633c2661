use std::fmt;
use std::str::FromStr;

use tokio::sync::watch;
use tracing::debug;

use crate::models::order::{Order, OrderId};
use crate::models::position::PositionSnapshot;
use crate::snapshot::InitialTrackingState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    SnapshotOnly,
    Live,
}

/// How a push is weighed against the position already shown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StalenessPolicy {
    /// Every push replaces the current position, whatever its timestamp.
    #[default]
    LastReceivedWins,
    /// A push older than the current position is dropped.
    RejectOlder,
}

impl FromStr for StalenessPolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "last_received_wins" | "last-received-wins" => Ok(StalenessPolicy::LastReceivedWins),
            "reject_older" | "reject-older" => Ok(StalenessPolicy::RejectOlder),
            other => Err(format!(
                "unknown staleness policy: {other}, expected last_received_wins/reject_older"
            )),
        }
    }
}

impl fmt::Display for StalenessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StalenessPolicy::LastReceivedWins => f.write_str("last_received_wins"),
            StalenessPolicy::RejectOlder => f.write_str("reject_older"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingState {
    pub phase: Phase,
    pub order_id: Option<OrderId>,
    pub order: Option<Order>,
    pub current_position: Option<PositionSnapshot>,
    /// Bumped on every reset; writes tagged with an older epoch are dropped.
    pub epoch: u64,
    pub live_updates: u64,
}

impl TrackingState {
    fn empty(epoch: u64) -> Self {
        Self {
            phase: Phase::Uninitialized,
            order_id: None,
            order: None,
            current_position: None,
            epoch,
            live_updates: 0,
        }
    }

    pub fn has_live_signal(&self) -> bool {
        self.phase == Phase::Live
    }
}

/// Holds the single "current delivery position" cell for one view.
///
/// The cell is a `watch` channel, so observers only ever see the latest
/// value and nothing queues up behind a slow renderer.
pub struct Reconciler {
    state: watch::Sender<TrackingState>,
    policy: StalenessPolicy,
}

impl Reconciler {
    pub fn new(policy: StalenessPolicy) -> Self {
        let (state, _rx) = watch::channel(TrackingState::empty(0));
        Self { state, policy }
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackingState> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> TrackingState {
        self.state.borrow().clone()
    }

    pub fn has_live_signal(&self) -> bool {
        self.state.borrow().has_live_signal()
    }

    pub fn current_position(&self) -> Option<PositionSnapshot> {
        self.state.borrow().current_position.clone()
    }

    /// Resets to `Uninitialized` for `order_id` and returns the epoch that
    /// later writes must carry.
    pub fn begin(&self, order_id: &OrderId) -> u64 {
        let mut epoch = 0;
        self.state.send_modify(|state| {
            epoch = state.epoch + 1;
            *state = TrackingState::empty(epoch);
            state.order_id = Some(order_id.clone());
        });
        debug!(order_id = %order_id, epoch, "tracking state reset");
        epoch
    }

    pub fn apply_snapshot(&self, epoch: u64, initial: InitialTrackingState) -> bool {
        self.state.send_if_modified(|state| {
            if state.epoch != epoch || state.phase != Phase::Uninitialized {
                return false;
            }
            state.phase = Phase::SnapshotOnly;
            state.current_position = initial.initial_position;
            state.order = Some(initial.order);
            true
        })
    }

    /// Applies a live push. Returns whether the displayed position changed.
    pub fn apply_push(&self, epoch: u64, position: PositionSnapshot) -> bool {
        let policy = self.policy;
        self.state.send_if_modified(|state| {
            if state.epoch != epoch || state.phase == Phase::Uninitialized {
                return false;
            }

            if policy == StalenessPolicy::RejectOlder
                && state
                    .current_position
                    .as_ref()
                    .is_some_and(|current| position.timestamp < current.timestamp)
            {
                return false;
            }

            state.phase = Phase::Live;
            state.current_position = Some(position);
            state.live_updates += 1;
            true
        })
    }

    /// Fences off every write still in flight. Used on unmount.
    pub fn close(&self) {
        self.state.send_modify(|state| {
            let epoch = state.epoch + 1;
            *state = TrackingState::empty(epoch);
        });
    }
}

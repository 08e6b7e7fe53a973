use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::debug;

use crate::balancer::address::BalancerAddress;
use crate::balancer::state::{ConnectivityState, StateTransition};
use crate::error::BeamrpcError;

static NEXT_SUBCHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique subchannel identifier, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubchannelId(u64);

impl SubchannelId {
    fn next() -> Self {
        Self(NEXT_SUBCHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SubchannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subchannel-{}", self.0)
    }
}

struct SubchannelShared {
    addresses: Vec<BalancerAddress>,
    state: ConnectivityState,
    observers: Vec<mpsc::UnboundedSender<StateTransition>>,
}

/// One backend endpoint (or a set of equivalent endpoints) as seen by the
/// load balancer.
///
/// The subchannel owns the candidate address list and the connectivity
/// state. The transport updates that state via
/// [`update_connectivity_state`](Subchannel::update_connectivity_state) as
/// it connects, probes and tears down sockets; balancing policies observe
/// the resulting transitions through [`subscribe`](Subchannel::subscribe).
///
/// Transitions are published losslessly and in order. Updates that would
/// not change the state are suppressed, and nothing is published after
/// [`ConnectivityState::Shutdown`].
pub struct Subchannel {
    id: SubchannelId,
    shared: Mutex<SubchannelShared>,
}

impl Subchannel {
    /// Creates a subchannel for the given candidate addresses.
    ///
    /// The initial connectivity state is [`ConnectivityState::Idle`].
    pub fn new(addresses: Vec<BalancerAddress>) -> Arc<Self> {
        Arc::new(Self {
            id: SubchannelId::next(),
            shared: Mutex::new(SubchannelShared {
                addresses,
                state: ConnectivityState::Idle,
                observers: Vec::new(),
            }),
        })
    }

    pub fn id(&self) -> SubchannelId {
        self.id
    }

    /// Snapshot of the current candidate addresses.
    ///
    /// The resolver may swap the list at any time; callers that iterate
    /// must work from a snapshot so a mid-loop update cannot shift indexes
    /// under them.
    pub fn addresses(&self) -> Vec<BalancerAddress> {
        self.shared.lock().unwrap().addresses.clone()
    }

    /// Replaces the candidate address list.
    pub fn update_addresses(&self, addresses: Vec<BalancerAddress>) {
        let mut shared = self.shared.lock().unwrap();
        debug!(subchannel_id = %self.id, count = addresses.len(), "updated addresses");
        shared.addresses = addresses;
    }

    /// The most recently published connectivity state.
    pub fn state(&self) -> ConnectivityState {
        self.shared.lock().unwrap().state
    }

    /// Registers an observer for connectivity-state transitions.
    ///
    /// Every transition published after this call is delivered, in order,
    /// on the returned receiver. Dropped receivers are pruned lazily.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<StateTransition> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared.lock().unwrap().observers.push(tx);
        rx
    }

    /// Publishes a connectivity-state transition.
    pub fn update_connectivity_state(&self, state: ConnectivityState, reason: impl Into<String>) {
        self.publish(state, reason.into(), None);
    }

    /// Publishes a failure-driven transition carrying its cause.
    pub fn update_connectivity_state_with_cause(
        &self,
        state: ConnectivityState,
        reason: impl Into<String>,
        cause: &BeamrpcError,
    ) {
        self.publish(state, reason.into(), Some(cause.to_string()));
    }

    /// Moves the subchannel to `Shutdown`. Terminal: later updates are
    /// discarded.
    pub fn shutdown(&self, reason: impl Into<String>) {
        self.publish(ConnectivityState::Shutdown, reason.into(), None);
    }

    fn publish(&self, state: ConnectivityState, reason: String, error: Option<String>) {
        let mut shared = self.shared.lock().unwrap();
        if shared.state == ConnectivityState::Shutdown || shared.state == state {
            return;
        }
        shared.state = state;
        debug!(
            subchannel_id = %self.id,
            state = %state,
            reason = %reason,
            "connectivity state changed"
        );
        let transition = StateTransition {
            state,
            reason,
            error,
        };
        shared
            .observers
            .retain(|tx| tx.send(transition.clone()).is_ok());
    }
}

impl fmt::Debug for Subchannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subchannel")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> BalancerAddress {
        BalancerAddress::new(([127, 0, 0, 1], port).into())
    }

    #[test]
    fn test_subchannel_ids_are_unique() {
        let a = Subchannel::new(vec![]);
        let b = Subchannel::new(vec![]);
        assert_ne!(a.id(), b.id());
        assert!(a.id().to_string().starts_with("subchannel-"));
    }

    #[test]
    fn test_initial_state_is_idle() {
        let subchannel = Subchannel::new(vec![addr(9001)]);
        assert_eq!(subchannel.state(), ConnectivityState::Idle);
    }

    #[test]
    fn test_addresses_snapshot_and_update() {
        let subchannel = Subchannel::new(vec![addr(9001), addr(9002)]);
        let snapshot = subchannel.addresses();
        assert_eq!(snapshot.len(), 2);

        subchannel.update_addresses(vec![addr(9003)]);
        // The old snapshot is unaffected
        assert_eq!(snapshot.len(), 2);
        assert_eq!(subchannel.addresses(), vec![addr(9003)]);
    }

    #[tokio::test]
    async fn test_transitions_are_delivered_in_order() {
        let subchannel = Subchannel::new(vec![addr(9001)]);
        let mut rx = subchannel.subscribe();

        subchannel.update_connectivity_state(ConnectivityState::Connecting, "connection requested");
        subchannel.update_connectivity_state(ConnectivityState::Ready, "connected");
        subchannel.update_connectivity_state(ConnectivityState::Idle, "disconnected");

        assert_eq!(rx.recv().await.unwrap().state, ConnectivityState::Connecting);
        assert_eq!(rx.recv().await.unwrap().state, ConnectivityState::Ready);
        let idle = rx.recv().await.unwrap();
        assert_eq!(idle.state, ConnectivityState::Idle);
        assert_eq!(idle.reason, "disconnected");
        assert!(idle.error.is_none());
    }

    #[tokio::test]
    async fn test_same_state_updates_are_suppressed() {
        let subchannel = Subchannel::new(vec![addr(9001)]);
        let mut rx = subchannel.subscribe();

        subchannel.update_connectivity_state(ConnectivityState::Idle, "already idle");
        subchannel.update_connectivity_state(ConnectivityState::Connecting, "connection requested");
        subchannel.update_connectivity_state(ConnectivityState::Connecting, "again");

        assert_eq!(rx.recv().await.unwrap().state, ConnectivityState::Connecting);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_nothing_published_after_shutdown() {
        let subchannel = Subchannel::new(vec![addr(9001)]);
        let mut rx = subchannel.subscribe();

        subchannel.shutdown("channel closing");
        subchannel.update_connectivity_state(ConnectivityState::Connecting, "too late");

        assert_eq!(rx.recv().await.unwrap().state, ConnectivityState::Shutdown);
        assert!(rx.try_recv().is_err());
        assert_eq!(subchannel.state(), ConnectivityState::Shutdown);
    }

    #[tokio::test]
    async fn test_failure_transition_carries_cause() {
        let subchannel = Subchannel::new(vec![addr(9001)]);
        let mut rx = subchannel.subscribe();

        let cause = BeamrpcError::Connect("127.0.0.1:9001: connection refused".to_string());
        subchannel.update_connectivity_state_with_cause(
            ConnectivityState::TransientFailure,
            "connect failed",
            &cause,
        );

        let transition = rx.recv().await.unwrap();
        assert_eq!(transition.state, ConnectivityState::TransientFailure);
        assert!(transition.error.unwrap().contains("connection refused"));
    }
}

use std::fmt;

/// Connectivity state of a subchannel.
///
/// The transport drives the first four states; `Shutdown` is entered only
/// when the subchannel itself is being torn down and is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectivityState {
    /// No connection and no connection attempt in progress
    Idle,
    /// A connection attempt is in progress
    Connecting,
    /// A connection is established and streams can be created
    Ready,
    /// The last connection attempt failed; the policy decides when to retry
    TransientFailure,
    /// The subchannel is being torn down; no further transitions are published
    Shutdown,
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectivityState::Idle => "Idle",
            ConnectivityState::Connecting => "Connecting",
            ConnectivityState::Ready => "Ready",
            ConnectivityState::TransientFailure => "TransientFailure",
            ConnectivityState::Shutdown => "Shutdown",
        };
        f.write_str(name)
    }
}

/// A single published connectivity-state change.
///
/// `error` carries the stringified cause for failure-driven transitions
/// (`TransientFailure`, or `Idle` after a probe detected a dead socket).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateTransition {
    pub state: ConnectivityState,
    pub reason: String,
    pub error: Option<String>,
}

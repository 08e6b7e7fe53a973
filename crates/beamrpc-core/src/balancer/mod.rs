//! Subchannel and connectivity primitives.
//!
//! A subchannel represents one backend endpoint (or a set of equivalent
//! endpoints) from the load balancer's point of view. It owns the candidate
//! address list and publishes [`ConnectivityState`] transitions that the
//! balancing policy reacts to. The transport layer mutates that state as it
//! connects, probes and tears down sockets.

pub mod address;
pub mod state;
pub mod subchannel;

pub use address::BalancerAddress;
pub use state::{ConnectivityState, StateTransition};
pub use subchannel::{Subchannel, SubchannelId};

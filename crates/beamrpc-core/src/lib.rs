//! BeamRPC Core Types
//!
//! This crate provides the shared building blocks of the BeamRPC
//! client-side load-balanced RPC stack.
//!
//! # Overview
//!
//! BeamRPC clients spread RPC traffic over a set of backend endpoints.
//! Each backend (or group of equivalent backends) is represented by a
//! [`balancer::Subchannel`], which owns the endpoint address list and the
//! connectivity state that the load-balancing policy reacts to. The
//! subchannel's connection itself is driven by the transport layer in the
//! `beamrpc-transport` crate.
//!
//! # Components
//!
//! - [`balancer`] - Subchannel, balancer addresses, connectivity states
//! - [`error`] - Error types shared across the stack

pub mod balancer;
pub mod error;

pub use balancer::{
    BalancerAddress, ConnectivityState, StateTransition, Subchannel, SubchannelId,
};
pub use error::{BeamrpcError, Result};

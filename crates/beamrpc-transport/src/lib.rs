//! BeamRPC Subchannel Transport
//!
//! This crate owns the TCP connection of a single subchannel and drives it
//! through the connectivity lifecycle that the load-balancing policy reacts
//! to.
//!
//! # Overview
//!
//! The upper HTTP layer of the stack does not expose connection health, so
//! the transport has to manage the socket itself:
//!
//! - [`SocketTransport::try_connect`] walks the subchannel's ranked address
//!   list with failover and parks the connected socket until the upper
//!   layer attaches.
//! - While the socket is parked, a periodic health probe drains any bytes
//!   the peer sent early (replayed to the upper layer later) and detects
//!   peer closure without disturbing the connection.
//! - [`SocketTransport::get_stream`] hands the socket and any buffered
//!   bytes to the upper layer exactly once, as a [`TransportStream`].
//! - When the last active stream closes, the transport disconnects and the
//!   subchannel goes [`Idle`](beamrpc_core::ConnectivityState::Idle);
//!   the balancing policy decides whether to reconnect.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use beamrpc_core::balancer::{BalancerAddress, Subchannel};
//! use beamrpc_transport::{ConnectResult, SocketTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let address = BalancerAddress::new("127.0.0.1:9001".parse()?);
//!     let subchannel = Subchannel::new(vec![address.clone()]);
//!     let transport = SocketTransport::new(Arc::clone(&subchannel));
//!
//!     if transport.try_connect().await == ConnectResult::Success {
//!         let stream = transport.get_stream(&address).await?;
//!         // hand `stream` to the HTTP/2 layer
//!         drop(stream);
//!     }
//!     Ok(())
//! }
//! ```

pub mod connect;
pub mod probe;
pub mod stream;
pub mod transport;

pub use connect::{default_connector, ConnectFuture, ConnectResult, Connector};
pub use probe::MAX_INITIAL_SOCKET_BYTES;
pub use stream::TransportStream;
pub use transport::{SocketTransport, TransportOptions};

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;

use tokio::net::TcpStream;

/// Future produced by a [`Connector`].
pub type ConnectFuture = Pin<Box<dyn Future<Output = io::Result<TcpStream>> + Send>>;

/// The function the transport uses to establish TCP connections.
///
/// This is a configuration point, not an abstraction over transports: its
/// sole purpose is letting tests substitute scripted outcomes for real
/// connects. Production code uses [`default_connector`].
pub type Connector = Arc<dyn Fn(SocketAddr) -> ConnectFuture + Send + Sync>;

/// Connects a real TCP socket with Nagle's algorithm disabled.
///
/// Small writes (HTTP/2 frames, RPC headers) must not wait for coalescing,
/// so every socket the transport creates runs with `TCP_NODELAY` set.
pub fn default_connector() -> Connector {
    Arc::new(|endpoint| {
        Box::pin(async move {
            let stream = TcpStream::connect(endpoint).await?;
            stream.set_nodelay(true)?;
            Ok(stream)
        })
    })
}

/// Outcome of [`SocketTransport::try_connect`](crate::SocketTransport::try_connect).
///
/// `Timeout` is reported only when the configured connect timeout elapsed;
/// per-address failures are folded into `Failure` with the first error as
/// the published cause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectResult {
    Success,
    Failure,
    Timeout,
}

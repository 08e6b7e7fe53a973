use std::net::TcpStream as StdTcpStream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use beamrpc_core::balancer::{BalancerAddress, ConnectivityState, Subchannel};
use beamrpc_core::error::{BeamrpcError, Result};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::connect::{default_connector, ConnectResult, Connector};
use crate::probe::{drain_parked_socket, is_socket_in_bad_state};
use crate::stream::TransportStream;

/// Configuration for a [`SocketTransport`].
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Time between health probes on a parked socket.
    pub probe_interval: Duration,
    /// Deadline for a whole `try_connect` call (all addresses together).
    /// `None` means the caller's cancellation is the only bound.
    pub connect_timeout: Option<Duration>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(5),
            connect_timeout: None,
        }
    }
}

/// A connected socket waiting for the upper layer to attach.
///
/// Held as a non-blocking std handle so the probe can read it under the
/// transport lock without ever blocking; converted back to a tokio stream
/// when handed over.
struct ParkedSocket {
    socket: StdTcpStream,
    address: BalancerAddress,
}

struct ActiveStream {
    id: u64,
    address: BalancerAddress,
}

struct TransportInner {
    current_address: Option<BalancerAddress>,
    last_endpoint_index: usize,
    initial_socket: Option<ParkedSocket>,
    initial_data: Vec<Vec<u8>>,
    active_streams: Vec<ActiveStream>,
    probe: Option<AbortHandle>,
    disposed: bool,
}

/// The socket transport of one subchannel.
///
/// Owns the TCP connection to the subchannel's backend, drives the
/// connectivity lifecycle, and hands out [`TransportStream`]s to the upper
/// protocol layer. All methods may be called from any task; mutable state
/// sits behind a single mutex and every connectivity transition the
/// transport publishes is ordered by it, so a `Ready` transition and the
/// observability of the parked socket are one atomic step. No I/O that can
/// block is ever performed while the mutex is held.
pub struct SocketTransport {
    subchannel: Arc<Subchannel>,
    options: TransportOptions,
    connector: Connector,
    next_stream_id: AtomicU64,
    // Handed to probe tasks and streams so neither keeps the transport alive.
    weak_self: Weak<SocketTransport>,
    inner: Mutex<TransportInner>,
}

impl SocketTransport {
    /// Creates a transport with default options and a real TCP connector.
    pub fn new(subchannel: Arc<Subchannel>) -> Arc<Self> {
        Self::with_options(subchannel, TransportOptions::default())
    }

    /// Creates a transport with custom options.
    pub fn with_options(subchannel: Arc<Subchannel>, options: TransportOptions) -> Arc<Self> {
        Self::with_connector(subchannel, options, default_connector())
    }

    /// Creates a transport with a custom connect function.
    ///
    /// The connector exists for test substitution; see
    /// [`default_connector`](crate::connect::default_connector).
    pub fn with_connector(
        subchannel: Arc<Subchannel>,
        options: TransportOptions,
        connector: Connector,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            subchannel,
            options,
            connector,
            next_stream_id: AtomicU64::new(1),
            weak_self: weak_self.clone(),
            inner: Mutex::new(TransportInner {
                current_address: None,
                last_endpoint_index: 0,
                initial_socket: None,
                initial_data: Vec::new(),
                active_streams: Vec::new(),
                probe: None,
                disposed: false,
            }),
        })
    }

    /// The address currently connected to, if any.
    pub fn current_address(&self) -> Option<BalancerAddress> {
        self.inner.lock().unwrap().current_address.clone()
    }

    /// Whether a connected socket is parked awaiting the upper layer.
    pub fn has_parked_socket(&self) -> bool {
        self.inner.lock().unwrap().initial_socket.is_some()
    }

    /// Total bytes buffered from the parked socket so far.
    pub fn parked_data_len(&self) -> usize {
        self.inner.lock().unwrap().initial_data.iter().map(Vec::len).sum()
    }

    /// Number of streams handed out and not yet dropped.
    pub fn active_stream_count(&self) -> usize {
        self.inner.lock().unwrap().active_streams.len()
    }

    /// Whether the health probe is armed.
    pub fn is_probe_armed(&self) -> bool {
        self.inner.lock().unwrap().probe.is_some()
    }

    /// Connects to one of the subchannel's addresses, with failover.
    ///
    /// Walks the address list starting at the index of the last successful
    /// connect, so retries resume where they left off instead of hammering
    /// the first endpoint. On success the socket is parked, the health
    /// probe is armed and `Ready` is published; on failure the first error
    /// is published with `TransientFailure`.
    ///
    /// The caller (the balancing policy) must only call this while
    /// disconnected. Cancelling is done by dropping the returned future;
    /// only the configured `connect_timeout` produces
    /// [`ConnectResult::Timeout`].
    pub async fn try_connect(&self) -> ConnectResult {
        {
            let inner = self.inner.lock().unwrap();
            if inner.disposed {
                return ConnectResult::Failure;
            }
            debug_assert!(
                inner.current_address.is_none(),
                "try_connect requires a disconnected transport"
            );
        }

        let addresses = self.subchannel.addresses();
        if addresses.is_empty() {
            let cause = BeamrpcError::Unavailable("no resolved addresses".to_string());
            self.subchannel.update_connectivity_state_with_cause(
                ConnectivityState::TransientFailure,
                "connect failed",
                &cause,
            );
            return ConnectResult::Failure;
        }

        self.subchannel
            .update_connectivity_state(ConnectivityState::Connecting, "connection requested");

        let first_error: Mutex<Option<BeamrpcError>> = Mutex::new(None);
        let attempt = self.connect_to_any(&addresses, &first_error);
        match self.options.connect_timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => {
                    let cause = first_error
                        .lock()
                        .unwrap()
                        .take()
                        .map(|e| e.to_string())
                        .unwrap_or_else(|| "connect attempt cancelled".to_string());
                    let err = BeamrpcError::ConnectTimeout {
                        timeout_ms: limit.as_millis() as u64,
                        cause,
                    };
                    warn!(subchannel_id = %self.subchannel.id(), error = %err, "connect timed out");
                    self.subchannel.update_connectivity_state_with_cause(
                        ConnectivityState::TransientFailure,
                        "connect timed out",
                        &err,
                    );
                    ConnectResult::Timeout
                }
            },
            None => attempt.await,
        }
    }

    async fn connect_to_any(
        &self,
        addresses: &[BalancerAddress],
        first_error: &Mutex<Option<BeamrpcError>>,
    ) -> ConnectResult {
        let start_index = self.inner.lock().unwrap().last_endpoint_index;

        for i in 0..addresses.len() {
            let index = (i + start_index) % addresses.len();
            let address = &addresses[index];
            debug!(subchannel_id = %self.subchannel.id(), addr = %address, "connecting");

            match (self.connector)(address.endpoint()).await {
                Ok(socket) => match self.park_connected_socket(socket, address.clone(), index) {
                    Ok(()) => {
                        debug!(subchannel_id = %self.subchannel.id(), addr = %address, "connected");
                        return ConnectResult::Success;
                    }
                    Err(BeamrpcError::Disposed) => {
                        // Disposed mid-connect: drop the socket silently,
                        // no transitions after dispose.
                        return ConnectResult::Failure;
                    }
                    Err(e) => {
                        record_first_error(first_error, e);
                    }
                },
                Err(e) => {
                    debug!(
                        subchannel_id = %self.subchannel.id(),
                        addr = %address,
                        error = %e,
                        "connect attempt failed"
                    );
                    record_first_error(
                        first_error,
                        BeamrpcError::Connect(format!("{}: {}", address, e)),
                    );
                }
            }
        }

        let cause = first_error
            .lock()
            .unwrap()
            .take()
            .unwrap_or_else(|| BeamrpcError::Unavailable("all connect attempts failed".to_string()));
        warn!(subchannel_id = %self.subchannel.id(), error = %cause, "all connect attempts failed");
        self.subchannel.update_connectivity_state_with_cause(
            ConnectivityState::TransientFailure,
            "connect failed",
            &cause,
        );
        ConnectResult::Failure
    }

    /// Parks a freshly connected socket and publishes `Ready`.
    ///
    /// The publication happens on the same lock acquisition that makes the
    /// socket observable, so the balancer can never see `Ready` without a
    /// parked socket (or vice versa).
    fn park_connected_socket(
        &self,
        socket: tokio::net::TcpStream,
        address: BalancerAddress,
        index: usize,
    ) -> Result<()> {
        let std_socket = socket.into_std()?;
        std_socket.set_nonblocking(true)?;

        let mut inner = self.inner.lock().unwrap();
        if inner.disposed {
            return Err(BeamrpcError::Disposed);
        }
        inner.current_address = Some(address.clone());
        inner.last_endpoint_index = index;
        inner.initial_data.clear();
        inner.initial_socket = Some(ParkedSocket {
            socket: std_socket,
            address,
        });
        self.arm_probe(&mut inner);
        self.subchannel
            .update_connectivity_state(ConnectivityState::Ready, "connected");
        Ok(())
    }

    /// Hands a byte stream for `address` to the upper layer.
    ///
    /// Consumes the parked socket (and any buffered bytes) if it matches
    /// the requested address and is still alive; otherwise connects fresh.
    /// The fresh connect is not bounded by `connect_timeout` - dropping the
    /// future is the caller's cancellation. Connect errors propagate to the
    /// caller.
    pub async fn get_stream(&self, address: &BalancerAddress) -> Result<TransportStream> {
        let captured = {
            let mut inner = self.inner.lock().unwrap();
            if inner.disposed {
                return Err(BeamrpcError::Disposed);
            }
            match inner.initial_socket.take() {
                Some(parked) => {
                    let data = std::mem::take(&mut inner.initial_data);
                    if let Some(probe) = inner.probe.take() {
                        probe.abort();
                    }
                    if parked.address == *address {
                        Some((parked.socket, data))
                    } else {
                        debug!(
                            subchannel_id = %self.subchannel.id(),
                            parked = %parked.address,
                            requested = %address,
                            "discarding parked socket for a different address"
                        );
                        None
                    }
                }
                None => None,
            }
        };

        // The peer may have closed since the last probe tick; the upper
        // layer's handshake must not race a half-closed socket.
        let captured = captured.filter(|(socket, _)| {
            if is_socket_in_bad_state(socket) {
                debug!(
                    subchannel_id = %self.subchannel.id(),
                    addr = %address,
                    "parked socket is no longer usable, reconnecting"
                );
                false
            } else {
                true
            }
        });

        let (socket, initial_data) = match captured {
            Some((std_socket, data)) => (tokio::net::TcpStream::from_std(std_socket)?, data),
            None => ((self.connector)(address.endpoint()).await?, Vec::new()),
        };

        let id = self.next_stream_id.fetch_add(1, Ordering::Relaxed);
        let stream =
            TransportStream::new(id, address.clone(), socket, initial_data, self.weak_self.clone());
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.disposed {
                return Err(BeamrpcError::Disposed);
            }
            inner.active_streams.push(ActiveStream {
                id,
                address: address.clone(),
            });
        }
        debug!(subchannel_id = %self.subchannel.id(), addr = %address, stream_id = id, "created stream");
        Ok(stream)
    }

    /// Releases the parked socket and publishes `Idle`.
    ///
    /// Active streams are untouched: the upper layer owns their lifetime.
    /// No-op once disposed.
    pub fn disconnect(&self) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.disposed {
                return;
            }
            self.release_parked_socket(&mut inner);
        }
        self.subchannel
            .update_connectivity_state(ConnectivityState::Idle, "disconnected");
    }

    /// Tears the transport down. Idempotent and terminal: afterwards every
    /// operation is a no-op or returns [`BeamrpcError::Disposed`], and no
    /// connectivity transitions are published.
    pub fn dispose(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.disposed {
            return;
        }
        debug!(subchannel_id = %self.subchannel.id(), "disposing transport");
        self.release_parked_socket(&mut inner);
        inner.disposed = true;
    }

    /// Closes the parked socket and disarms the probe. Caller holds the lock.
    fn release_parked_socket(&self, inner: &mut TransportInner) {
        inner.initial_socket = None;
        inner.initial_data.clear();
        inner.current_address = None;
        if let Some(probe) = inner.probe.take() {
            probe.abort();
        }
    }

    /// Arms the health probe for the parked socket. Caller holds the lock.
    ///
    /// The probe is a task that sleeps, runs one tick under the lock, and
    /// only then sleeps again - ticks can never overlap, even if one
    /// stalls. The task holds only a weak reference so an abandoned
    /// transport can still drop.
    fn arm_probe(&self, inner: &mut TransportInner) {
        if let Some(probe) = inner.probe.take() {
            probe.abort();
        }
        let transport = self.weak_self.clone();
        let interval = self.options.probe_interval;
        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(transport) = transport.upgrade() else {
                    break;
                };
                if !transport.probe_tick() {
                    break;
                }
            }
        });
        inner.probe = Some(handle.abort_handle());
    }

    /// One probe tick. Returns false when the probe should stop.
    ///
    /// Runs entirely under the lock; the only socket operations are
    /// non-blocking, so nothing here can stall other callers for long.
    fn probe_tick(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.disposed {
            return false;
        }
        let inner_ref = &mut *inner;
        let Some(parked) = inner_ref.initial_socket.as_mut() else {
            return false;
        };

        let verdict = drain_parked_socket(&mut parked.socket, &mut inner_ref.initial_data);
        if !verdict.close {
            return true;
        }

        let address = parked.address.clone();
        self.release_parked_socket(inner_ref);
        drop(inner);

        let cause = verdict
            .cause
            .unwrap_or_else(|| BeamrpcError::Unavailable("socket closed by peer".to_string()));
        warn!(
            subchannel_id = %self.subchannel.id(),
            addr = %address,
            error = %cause,
            "health probe detected a dead socket"
        );
        self.subchannel.update_connectivity_state_with_cause(
            ConnectivityState::Idle,
            "lost connection to socket",
            &cause,
        );
        false
    }

    /// Called from [`TransportStream`]'s drop hook.
    ///
    /// Removes the registry entry (scanning from the tail - streams mostly
    /// close in LIFO order) and disconnects when the last stream is gone,
    /// which publishes `Idle`. The balancing policy decides what happens
    /// next: pick-first stays idle, round-robin reconnects.
    pub(crate) fn release_stream(&self, stream_id: u64) {
        let became_empty = {
            let mut inner = self.inner.lock().unwrap();
            let removed = match inner
                .active_streams
                .iter()
                .rposition(|s| s.id == stream_id)
            {
                Some(position) => {
                    let entry = inner.active_streams.remove(position);
                    debug!(
                        subchannel_id = %self.subchannel.id(),
                        addr = %entry.address,
                        stream_id,
                        "stream closed"
                    );
                    true
                }
                None => false,
            };
            removed && inner.active_streams.is_empty()
        };
        if became_empty {
            debug!(subchannel_id = %self.subchannel.id(), "last stream closed");
            self.disconnect();
        }
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn record_first_error(slot: &Mutex<Option<BeamrpcError>>, error: BeamrpcError) {
    let mut slot = slot.lock().unwrap();
    if slot.is_none() {
        *slot = Some(error);
    }
}

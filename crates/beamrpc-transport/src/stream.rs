use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::Weak;
use std::task::{Context, Poll};

use beamrpc_core::balancer::BalancerAddress;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

use crate::transport::SocketTransport;

/// A byte stream handed to the upper protocol layer.
///
/// Owns the socket. Reads first replay any bytes the peer sent while the
/// socket was parked (in the order they were received), then continue with
/// live socket bytes. Writes go straight to the socket.
///
/// Dropping the stream closes the socket and deregisters it from the
/// transport; when the last stream of a transport is dropped the
/// subchannel transitions to idle.
pub struct TransportStream {
    id: u64,
    address: BalancerAddress,
    socket: TcpStream,
    initial_data: VecDeque<Vec<u8>>,
    transport: Weak<SocketTransport>,
}

impl TransportStream {
    pub(crate) fn new(
        id: u64,
        address: BalancerAddress,
        socket: TcpStream,
        initial_data: Vec<Vec<u8>>,
        transport: Weak<SocketTransport>,
    ) -> Self {
        Self {
            id,
            address,
            socket,
            initial_data: initial_data.into(),
            transport,
        }
    }

    /// Identity assigned at creation, used to match the registry entry
    /// when the stream is dropped.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The address this stream is connected to.
    pub fn address(&self) -> &BalancerAddress {
        &self.address
    }

    /// Bytes still waiting to be replayed before live reads resume.
    pub fn buffered_len(&self) -> usize {
        self.initial_data.iter().map(Vec::len).sum()
    }
}

impl AsyncRead for TransportStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        while let Some(front) = this.initial_data.front_mut() {
            if front.is_empty() {
                this.initial_data.pop_front();
                continue;
            }
            if buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }
            let n = front.len().min(buf.remaining());
            buf.put_slice(&front[..n]);
            front.drain(..n);
            if front.is_empty() {
                this.initial_data.pop_front();
            }
            return Poll::Ready(Ok(()));
        }
        Pin::new(&mut this.socket).poll_read(cx, buf)
    }
}

impl AsyncWrite for TransportStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().socket).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().socket).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().socket).poll_shutdown(cx)
    }
}

impl Drop for TransportStream {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.upgrade() {
            transport.release_stream(self.id);
        }
    }
}

//! Liveness checks for a parked socket.
//!
//! The socket API only reports peer closure as a side effect of a read.
//! A readable socket with pending bytes is indistinguishable from a closed
//! socket with unread bytes, so the prober has to actually drain: whatever
//! it reads becomes the initial data replayed to the upper layer when it
//! attaches.

use std::io::{self, Read};
use std::net::TcpStream;

use beamrpc_core::error::BeamrpcError;

/// Maximum bytes buffered from a parked socket before the upper layer
/// attaches. A peer that sends more than this before the connection is
/// considered established is misbehaving and gets disconnected.
pub const MAX_INITIAL_SOCKET_BYTES: usize = 16 * 1024;

const DRAIN_CHUNK_SIZE: usize = 4096;

/// Returns true if the socket is unusable.
///
/// Zero-timeout readability check via a non-blocking `peek`:
/// - `WouldBlock`: healthy, nothing pending and not closed.
/// - pending bytes: healthy; closed-with-unread-bytes cannot be told apart
///   here and is resolved by the prober's drain.
/// - zero-length read: the peer closed cleanly.
/// - any other error: unusable.
pub fn is_socket_in_bad_state(socket: &TcpStream) -> bool {
    let mut probe = [0u8; 1];
    match socket.peek(&mut probe) {
        Ok(0) => true,
        Ok(_) => false,
        Err(e) if e.kind() == io::ErrorKind::WouldBlock => false,
        Err(_) => true,
    }
}

/// What a drain pass decided about the parked socket.
pub(crate) struct DrainVerdict {
    /// The socket must be closed and the subchannel moved to idle.
    pub close: bool,
    /// The error that triggered the close, if there was one.
    pub cause: Option<BeamrpcError>,
}

/// Drains every byte currently pending on a parked socket into `chunks`.
///
/// The socket is in non-blocking mode, so reads cannot stall the caller
/// even though this runs under the transport lock. Buffered bytes are
/// bounded by [`MAX_INITIAL_SOCKET_BYTES`]; exceeding the bound closes the
/// connection. A socket that looks bad while nothing was read is treated
/// as dead once the pending bytes are exhausted.
pub(crate) fn drain_parked_socket(socket: &mut TcpStream, chunks: &mut Vec<Vec<u8>>) -> DrainVerdict {
    let mut verdict = DrainVerdict {
        close: false,
        cause: None,
    };
    let mut buffered: usize = chunks.iter().map(Vec::len).sum();

    loop {
        let bad = is_socket_in_bad_state(socket);
        let mut chunk = [0u8; DRAIN_CHUNK_SIZE];
        let mut read_any = false;

        match socket.read(&mut chunk) {
            Ok(0) => {
                verdict.close = true;
            }
            Ok(n) => {
                if buffered + n > MAX_INITIAL_SOCKET_BYTES {
                    verdict.close = true;
                    verdict.cause = Some(BeamrpcError::InitialDataLimit {
                        received: buffered + n,
                        limit: MAX_INITIAL_SOCKET_BYTES,
                    });
                } else {
                    chunks.push(chunk[..n].to_vec());
                    buffered += n;
                    read_any = true;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => {
                verdict.close = true;
                verdict.cause = Some(e.into());
            }
        }

        if verdict.close {
            break;
        }
        if !read_any {
            if bad {
                verdict.close = true;
            }
            break;
        }
    }

    verdict
}

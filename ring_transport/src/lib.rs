// SPDX-License-Identifier: BSD-3-Clause

//! The datagram transport the ring engine consumes. `spec.md` treats the transport itself as an
//! external collaborator with a generic send/receive "port" interface; this crate supplies that
//! interface ([`RingPort`]) plus a concrete UDP implementation ([`UdpRingPort`]) and an in-memory
//! one ([`ChannelRingPort`]) used by tests, mirroring the way the teacher abstracts
//! `TcpListener`/`UnixListener` behind one `Listener<S>` trait and backs its own tests with a
//! `socketpair`-based pipe instead of real sockets.

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::time::Duration;

use log::warn;

/// How long a `recv` call blocks before giving the caller a chance to observe a stop request.
/// Short enough that `stop()` is honored promptly, per the suspension-point contract in
/// `spec.md` §5.
pub const RECEIVE_DEADLINE: Duration = Duration::from_millis(200);

/// Maximum datagram size this transport will send or accept.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

/// The generic send/receive port the ring engine's node loop consumes. A node sends only to its
/// one downstream neighbour and receives only from its one listen endpoint.
pub trait RingPort: Send + Sync {
    /// Sends `bytes` downstream. Errors are surfaced to the caller; the port never retries.
    fn send(&self, bytes: &[u8]) -> io::Result<()>;

    /// Waits up to the port's receive deadline for a datagram. Returns `Ok(None)` if the deadline
    /// elapses with nothing received (the caller should then check whether it was asked to stop),
    /// `Ok(Some(n))` with `buf[..n]` filled in otherwise.
    fn recv(&self, buf: &mut [u8]) -> io::Result<Option<usize>>;
}

/// A UDP-backed ring port: binds the node's derived listen port and sends to its downstream
/// neighbour's `host:port`.
pub struct UdpRingPort {
    socket: UdpSocket,
    downstream: SocketAddr,
}

impl UdpRingPort {
    pub fn bind(listen_port: u16, downstream: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", listen_port))?;
        socket.set_read_timeout(Some(RECEIVE_DEADLINE))?;
        let downstream = downstream
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no downstream address resolved"))?;
        Ok(Self { socket, downstream })
    }
}

impl RingPort for UdpRingPort {
    fn send(&self, bytes: &[u8]) -> io::Result<()> {
        if bytes.len() > MAX_DATAGRAM_SIZE {
            warn!("datagram of {} bytes exceeds {} byte cap, sending anyway", bytes.len(), MAX_DATAGRAM_SIZE);
        }
        let sent = self.socket.send_to(bytes, self.downstream)?;
        if sent != bytes.len() {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "short UDP send"));
        }
        Ok(())
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.socket.recv(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// An in-memory ring port backed by `mpsc` channels, standing in for a real socket in tests the
/// way the teacher's `socketpair`-based `pipe` module does for `rpc_protocol`'s tests.
pub struct ChannelRingPort {
    outbound: Sender<Vec<u8>>,
    inbound: Mutex<Receiver<Vec<u8>>>,
}

impl ChannelRingPort {
    pub fn new(outbound: Sender<Vec<u8>>, inbound: Receiver<Vec<u8>>) -> Self {
        Self {
            outbound,
            inbound: Mutex::new(inbound),
        }
    }
}

impl RingPort for ChannelRingPort {
    fn send(&self, bytes: &[u8]) -> io::Result<()> {
        self.outbound
            .send(bytes.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "downstream channel closed"))
    }

    fn recv(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        let rx = self.inbound.lock().expect("channel port lock poisoned");
        match rx.recv_timeout(RECEIVE_DEADLINE) {
            Ok(bytes) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                Ok(Some(n))
            }
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "upstream channel closed"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::channel;

    #[test]
    fn channel_port_round_trips_a_datagram() {
        let (tx_a, rx_a) = channel();
        let (tx_b, rx_b) = channel();
        let a = ChannelRingPort::new(tx_a, rx_b);
        let b = ChannelRingPort::new(tx_b, rx_a);

        a.send(b"1000").unwrap();
        let mut buf = [0u8; 64];
        let n = b.recv(&mut buf).unwrap().expect("datagram expected");
        assert_eq!(&buf[..n], b"1000");
    }

    #[test]
    fn channel_port_recv_times_out_when_idle() {
        let (tx, _rx_unused) = channel();
        let (_tx_unused, rx) = channel();
        let port = ChannelRingPort::new(tx, rx);
        let mut buf = [0u8; 64];
        assert_eq!(port.recv(&mut buf).unwrap(), None);
    }
}

//! LE ATT channel establishment.
//!
//! # Sequence
//!
//! ```text
//!   allocate ──> bind(local, CID 4) ──> BT_SECURITY ──> connect(peer, CID 4) ──> non-blocking
//!      │               │                     │                   │                    │
//!   Resource          Bind                Security            Connect              Resource
//! ```
//!
//! Each step either advances or fails with the error class shown beneath
//! it. A failed attempt drops (and so closes) the partially configured
//! socket. There is no retry; that is the caller's policy.
//!
//! The socket operations are behind [`Transport`] so the sequence can run
//! against [`KernelTransport`] in production and a scripted transport in
//! tests.

use std::io;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, RawFd};

use mio::event::Source;
use mio::{Interest, Registry, Token};

use crate::net::{DeviceAddress, L2capSocket, PeerAddress, SecurityLevel};
use crate::trace::{debug, error, info};

/// Parameters for a single connect attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectParams {
    /// Local adapter address, or [`DeviceAddress::ANY`].
    pub local: DeviceAddress,
    /// Remote device and its address type.
    pub peer: PeerAddress,
    /// Security level applied before connecting.
    pub security: SecurityLevel,
    /// ATT MTU requested by the user, passed through to higher layers.
    pub mtu: Option<u16>,
}

/// Error establishing a channel.
#[derive(Debug, thiserror::Error)]
pub enum ConnectError {
    /// The transport endpoint could not be allocated or configured.
    #[error("failed to create L2CAP socket: {0}")]
    Resource(#[source] io::Error),
    /// Binding the local address failed.
    #[error("failed to bind L2CAP socket: {0}")]
    Bind(#[source] io::Error),
    /// The transport rejected the requested security level.
    #[error("failed to set L2CAP security level {level}: {source}")]
    Security {
        level: SecurityLevel,
        #[source]
        source: io::Error,
    },
    /// The peer rejected the connection, was unreachable, or timed out.
    #[error("failed to connect to {peer}: {source}")]
    Connect {
        peer: PeerAddress,
        #[source]
        source: io::Error,
    },
}

impl ConnectError {
    /// The underlying OS error.
    #[must_use]
    pub fn io_error(&self) -> &io::Error {
        match self {
            Self::Resource(e) | Self::Bind(e) => e,
            Self::Security { source, .. } | Self::Connect { source, .. } => source,
        }
    }
}

/// Socket operations the connector sequences.
pub trait Transport {
    /// Endpoint type produced by [`allocate`](Self::allocate).
    type Socket;

    fn allocate(&mut self) -> io::Result<Self::Socket>;

    fn bind(&mut self, socket: &Self::Socket, local: DeviceAddress) -> io::Result<()>;

    fn set_security(&mut self, socket: &Self::Socket, level: SecurityLevel) -> io::Result<()>;

    /// Blocking connect.
    fn connect(&mut self, socket: &Self::Socket, peer: PeerAddress) -> io::Result<()>;

    /// Prepares a connected socket for readiness-driven I/O.
    fn prepare(&mut self, socket: &Self::Socket) -> io::Result<()>;
}

/// Production transport over kernel L2CAP sockets.
#[derive(Debug, Default, Clone, Copy)]
pub struct KernelTransport;

impl Transport for KernelTransport {
    type Socket = L2capSocket;

    fn allocate(&mut self) -> io::Result<L2capSocket> {
        L2capSocket::open()
    }

    fn bind(&mut self, socket: &L2capSocket, local: DeviceAddress) -> io::Result<()> {
        socket.bind(local)
    }

    fn set_security(&mut self, socket: &L2capSocket, level: SecurityLevel) -> io::Result<()> {
        socket.set_security(level)
    }

    fn connect(&mut self, socket: &L2capSocket, peer: PeerAddress) -> io::Result<()> {
        socket.connect(peer)
    }

    fn prepare(&mut self, socket: &L2capSocket) -> io::Result<()> {
        socket.set_nonblocking(true)
    }
}

/// An open ATT channel.
///
/// Exclusively owned. Closed on drop or by [`close`](Channel::close).
#[derive(Debug)]
pub struct Channel<S = L2capSocket> {
    socket: S,
    peer: PeerAddress,
    mtu: Option<u16>,
}

impl<S> Channel<S> {
    /// The remote device.
    #[must_use]
    pub const fn peer(&self) -> PeerAddress {
        self.peer
    }

    /// ATT MTU requested at connect time, if any.
    #[must_use]
    pub const fn mtu(&self) -> Option<u16> {
        self.mtu
    }

    /// Borrows the underlying socket.
    #[must_use]
    pub const fn socket(&self) -> &S {
        &self.socket
    }

    /// Consumes the channel, returning the socket.
    #[must_use]
    pub fn into_socket(self) -> S {
        self.socket
    }

    /// Closes the channel.
    pub fn close(self) {
        info!(peer = %self.peer, "closing channel");
    }
}

impl Channel<L2capSocket> {
    /// Sends one ATT packet. See [`L2capSocket::send`].
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or `WouldBlock`.
    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        self.socket.send(buf)
    }

    /// Receives one ATT packet. See [`L2capSocket::recv`].
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or `WouldBlock`.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        self.socket.recv(buf)
    }

    /// Receives, returning `Ok(None)` instead of `WouldBlock`.
    pub fn try_recv(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        self.socket.try_recv(buf)
    }

    /// Sends, returning `Ok(None)` instead of `WouldBlock`.
    pub fn try_send(&self, buf: &[u8]) -> io::Result<Option<usize>> {
        self.socket.try_send(buf)
    }
}

impl<S: AsFd> AsFd for Channel<S> {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.socket.as_fd()
    }
}

impl<S: AsRawFd> AsRawFd for Channel<S> {
    fn as_raw_fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }
}

impl<S: Source> Source for Channel<S> {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.socket.register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        self.socket.reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        self.socket.deregister(registry)
    }
}

/// Runs the connect sequence over a [`Transport`].
#[derive(Debug, Default)]
pub struct Connector<T = KernelTransport> {
    transport: T,
}

impl Connector<KernelTransport> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            transport: KernelTransport,
        }
    }
}

impl<T: Transport> Connector<T> {
    #[must_use]
    pub const fn with_transport(transport: T) -> Self {
        Self { transport }
    }

    /// Borrows the transport.
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Makes one connect attempt.
    ///
    /// Blocks for the duration of the peer handshake. On success the
    /// returned channel is ready for registration with an event loop.
    ///
    /// # Errors
    ///
    /// Returns the [`ConnectError`] class of the first failing step.
    pub fn connect(&mut self, params: &ConnectParams) -> Result<Channel<T::Socket>, ConnectError> {
        debug!(
            src = %params.local,
            dest = %params.peer.addr,
            dest_type = %params.peer.kind,
            security = %params.security,
            "opening L2CAP LE connection on ATT channel"
        );

        let socket = self.transport.allocate().map_err(|e| {
            error!(error = %e, "failed to create L2CAP socket");
            ConnectError::Resource(e)
        })?;

        self.transport.bind(&socket, params.local).map_err(|e| {
            error!(src = %params.local, error = %e, "failed to bind L2CAP socket");
            ConnectError::Bind(e)
        })?;

        self.transport
            .set_security(&socket, params.security)
            .map_err(|source| {
                error!(security = %params.security, error = %source, "failed to set L2CAP security level");
                ConnectError::Security {
                    level: params.security,
                    source,
                }
            })?;

        info!(dest = %params.peer, "connecting to device...");
        self.transport
            .connect(&socket, params.peer)
            .map_err(|source| {
                error!(dest = %params.peer, error = %source, "failed to connect");
                ConnectError::Connect {
                    peer: params.peer,
                    source,
                }
            })?;

        self.transport
            .prepare(&socket)
            .map_err(ConnectError::Resource)?;
        info!(dest = %params.peer, "connected");

        Ok(Channel {
            socket,
            peer: params.peer,
            mtu: params.mtu,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::AddressType;

    /// Step of the connect sequence, for scripting failures.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Step {
        Allocate,
        Bind,
        Security,
        Connect,
        Prepare,
    }

    /// Records calls and fails at a chosen step.
    #[derive(Default)]
    struct ScriptedTransport {
        fail_at: Option<Step>,
        calls: Vec<Step>,
        bound: Option<DeviceAddress>,
        level: Option<SecurityLevel>,
        peer: Option<PeerAddress>,
    }

    impl ScriptedTransport {
        fn failing_at(step: Step) -> Self {
            Self {
                fail_at: Some(step),
                ..Self::default()
            }
        }

        fn step(&mut self, step: Step) -> io::Result<()> {
            self.calls.push(step);
            if self.fail_at == Some(step) {
                Err(io::Error::from_raw_os_error(libc::EACCES))
            } else {
                Ok(())
            }
        }
    }

    impl Transport for ScriptedTransport {
        type Socket = u32;

        fn allocate(&mut self) -> io::Result<u32> {
            self.step(Step::Allocate).map(|()| 7)
        }

        fn bind(&mut self, _socket: &u32, local: DeviceAddress) -> io::Result<()> {
            self.bound = Some(local);
            self.step(Step::Bind)
        }

        fn set_security(&mut self, _socket: &u32, level: SecurityLevel) -> io::Result<()> {
            self.level = Some(level);
            self.step(Step::Security)
        }

        fn connect(&mut self, _socket: &u32, peer: PeerAddress) -> io::Result<()> {
            self.peer = Some(peer);
            self.step(Step::Connect)
        }

        fn prepare(&mut self, _socket: &u32) -> io::Result<()> {
            self.step(Step::Prepare)
        }
    }

    fn params() -> ConnectParams {
        ConnectParams {
            local: DeviceAddress::ANY,
            peer: PeerAddress::new("AA:BB:CC:DD:EE:FF".parse().unwrap(), AddressType::Public),
            security: SecurityLevel::Medium,
            mtu: Some(185),
        }
    }

    #[test]
    fn success_runs_every_step_in_order() {
        let mut connector = Connector::with_transport(ScriptedTransport::default());
        let channel = connector.connect(&params()).unwrap();

        assert_eq!(*channel.socket(), 7);
        assert_eq!(channel.peer(), params().peer);
        assert_eq!(channel.mtu(), Some(185));

        let transport = connector.transport();
        assert_eq!(
            transport.calls,
            [Step::Allocate, Step::Bind, Step::Security, Step::Connect, Step::Prepare]
        );
        assert_eq!(transport.bound, Some(DeviceAddress::ANY));
        assert_eq!(transport.level, Some(SecurityLevel::Medium));
        assert_eq!(transport.peer, Some(params().peer));
    }

    #[test]
    fn each_failing_step_maps_to_its_error_class() {
        let cases = [
            (Step::Allocate, "Resource"),
            (Step::Bind, "Bind"),
            (Step::Security, "Security"),
            (Step::Connect, "Connect"),
            (Step::Prepare, "Resource"),
        ];

        for (step, class) in cases {
            let mut connector = Connector::with_transport(ScriptedTransport::failing_at(step));
            let err = connector.connect(&params()).unwrap_err();
            let got = match err {
                ConnectError::Resource(_) => "Resource",
                ConnectError::Bind(_) => "Bind",
                ConnectError::Security { .. } => "Security",
                ConnectError::Connect { .. } => "Connect",
            };
            assert_eq!(got, class, "failure at {step:?}");
            assert_eq!(err.io_error().raw_os_error(), Some(libc::EACCES));

            // Nothing runs after the failing step.
            assert_eq!(connector.transport().calls.last(), Some(&step));
        }
    }

    #[test]
    fn security_failure_does_not_downgrade_or_connect() {
        let mut connector =
            Connector::with_transport(ScriptedTransport::failing_at(Step::Security));
        let err = connector.connect(&params()).unwrap_err();

        assert!(matches!(
            err,
            ConnectError::Security {
                level: SecurityLevel::Medium,
                ..
            }
        ));
        let transport = connector.transport();
        assert_eq!(transport.calls.iter().filter(|s| **s == Step::Security).count(), 1);
        assert!(transport.peer.is_none());
    }

    #[test]
    fn connect_error_names_peer() {
        let mut connector = Connector::with_transport(ScriptedTransport::failing_at(Step::Connect));
        let err = connector.connect(&params()).unwrap_err();
        assert!(err.to_string().contains("AA:BB:CC:DD:EE:FF (public)"));
    }
}

//! L2CAP socket wrapper for mio-based I/O.
//!
//! Provides a thin wrapper around a raw `AF_BLUETOOTH`/`SOCK_SEQPACKET`
//! socket speaking on the LE Attribute Protocol fixed channel. Socket
//! creation and byte I/O go through rustix; the Bluetooth-specific socket
//! address and socket option have no rustix binding and use libc directly.

use std::io::{self, ErrorKind};
use std::mem::size_of;
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use mio::event::Source;
use mio::unix::SourceFd;
use mio::{Interest, Registry, Token};
use rustix::net::{AddressFamily, SocketFlags, SocketType};

use super::{DeviceAddress, PeerAddress, SecurityLevel};

/// Fixed L2CAP channel identifier of the Attribute Protocol.
pub const ATT_CID: u16 = 4;

/// `BDADDR_BREDR`: address type used for the local side of the bind.
const LOCAL_ADDRESS_TYPE: u8 = 0;

const AF_BLUETOOTH: libc::sa_family_t = 31;
const SOL_BLUETOOTH: libc::c_int = 274;
const BT_SECURITY: libc::c_int = 4;

/// `struct sockaddr_l2` from `<bluetooth/l2cap.h>`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SockaddrL2 {
    l2_family: libc::sa_family_t,
    /// PSM, little-endian. Unused (zero) for fixed channels.
    l2_psm: u16,
    l2_bdaddr: [u8; 6],
    /// Channel identifier, little-endian.
    l2_cid: u16,
    l2_bdaddr_type: u8,
}

impl SockaddrL2 {
    /// Socket address for the ATT fixed channel.
    pub(crate) fn att(addr: DeviceAddress, addr_type: u8) -> Self {
        Self {
            l2_family: AF_BLUETOOTH,
            l2_psm: 0,
            l2_bdaddr: addr.kernel_bytes(),
            l2_cid: ATT_CID.to_le(),
            l2_bdaddr_type: addr_type,
        }
    }

    fn as_ptr(&self) -> *const libc::sockaddr {
        (self as *const Self).cast()
    }

    const fn len() -> libc::socklen_t {
        size_of::<Self>() as libc::socklen_t
    }
}

/// `struct bt_security` from `<bluetooth/bluetooth.h>`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct BtSecurity {
    level: u8,
    key_size: u8,
}

/// Maps a `-1` libc return to the current `errno`.
fn cvt(ret: libc::c_int) -> io::Result<()> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// An L2CAP sequenced-packet socket.
///
/// Blocking on creation so that [`connect`](Self::connect) waits for the
/// peer; switch to non-blocking with [`set_nonblocking`](Self::set_nonblocking)
/// before registering with a [`Poll`](mio::Poll).
#[derive(Debug)]
pub struct L2capSocket {
    fd: OwnedFd,
}

impl L2capSocket {
    /// Allocates a new, unbound L2CAP socket.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel has no Bluetooth support or the
    /// process lacks the resources to open a socket.
    pub fn open() -> io::Result<Self> {
        // BTPROTO_L2CAP is protocol 0.
        let fd = rustix::net::socket_with(
            AddressFamily::BLUETOOTH,
            SocketType::SEQPACKET,
            SocketFlags::CLOEXEC,
            None,
        )?;
        Ok(Self { fd })
    }

    /// Binds the socket to a local adapter address on the ATT channel.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is not a local adapter or is in use.
    pub fn bind(&self, local: DeviceAddress) -> io::Result<()> {
        let addr = SockaddrL2::att(local, LOCAL_ADDRESS_TYPE);
        // SAFETY: `addr` is a valid, initialized sockaddr_l2 and the length
        // passed matches its size.
        cvt(unsafe { libc::bind(self.fd.as_raw_fd(), addr.as_ptr(), SockaddrL2::len()) })
    }

    /// Sets the `BT_SECURITY` level required before data is exchanged.
    ///
    /// # Errors
    ///
    /// Returns an error if the kernel rejects the level.
    pub fn set_security(&self, level: SecurityLevel) -> io::Result<()> {
        let sec = BtSecurity {
            level: level.kernel_level(),
            key_size: 0,
        };
        // SAFETY: `sec` is a valid bt_security for the duration of the call
        // and the length passed matches its size.
        cvt(unsafe {
            libc::setsockopt(
                self.fd.as_raw_fd(),
                SOL_BLUETOOTH,
                BT_SECURITY,
                (&sec as *const BtSecurity).cast(),
                size_of::<BtSecurity>() as libc::socklen_t,
            )
        })
    }

    /// Connects to `peer` on the ATT channel.
    ///
    /// Blocks until the peer accepts, rejects, or the kernel times out the
    /// attempt.
    ///
    /// # Errors
    ///
    /// Returns the OS reason on failure (unreachable, refused, timed out,
    /// permission denied for insufficient security).
    pub fn connect(&self, peer: PeerAddress) -> io::Result<()> {
        let addr = SockaddrL2::att(peer.addr, peer.kind.kernel_code());
        // SAFETY: as in `bind`.
        cvt(unsafe { libc::connect(self.fd.as_raw_fd(), addr.as_ptr(), SockaddrL2::len()) })
    }

    /// Switches the socket between blocking and non-blocking mode.
    ///
    /// # Errors
    ///
    /// Returns an error if the mode cannot be changed.
    pub fn set_nonblocking(&self, nonblocking: bool) -> io::Result<()> {
        rustix::io::ioctl_fionbio(&self.fd, nonblocking)?;
        Ok(())
    }

    /// Sends one packet.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or `WouldBlock` if the socket is not
    /// ready for writing.
    pub fn send(&self, buf: &[u8]) -> io::Result<usize> {
        Ok(rustix::io::write(&self.fd, buf)?)
    }

    /// Receives one packet. `Ok(0)` means the peer closed the link.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or `WouldBlock` if nothing is queued.
    pub fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(rustix::io::read(&self.fd, buf)?)
    }

    /// Attempts to send, returning `Ok(None)` instead of `WouldBlock`.
    pub fn try_send(&self, buf: &[u8]) -> io::Result<Option<usize>> {
        match self.send(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Attempts to receive, returning `Ok(None)` instead of `WouldBlock`.
    ///
    /// Useful in readiness callbacks.
    pub fn try_recv(&self, buf: &mut [u8]) -> io::Result<Option<usize>> {
        match self.recv(buf) {
            Ok(n) => Ok(Some(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl AsFd for L2capSocket {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }
}

impl AsRawFd for L2capSocket {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Source for L2capSocket {
    fn register(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        SourceFd(&self.fd.as_raw_fd()).register(registry, token, interests)
    }

    fn reregister(
        &mut self,
        registry: &Registry,
        token: Token,
        interests: Interest,
    ) -> io::Result<()> {
        SourceFd(&self.fd.as_raw_fd()).reregister(registry, token, interests)
    }

    fn deregister(&mut self, registry: &Registry) -> io::Result<()> {
        SourceFd(&self.fd.as_raw_fd()).deregister(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::AddressType;

    #[test]
    fn sockaddr_l2_matches_kernel_layout() {
        assert_eq!(size_of::<SockaddrL2>(), 14);
        assert_eq!(size_of::<BtSecurity>(), 2);
    }

    #[test]
    fn att_sockaddr_fields() {
        let peer = PeerAddress::new(
            "AA:BB:CC:DD:EE:FF".parse().unwrap(),
            AddressType::Random,
        );
        let addr = SockaddrL2::att(peer.addr, peer.kind.kernel_code());
        assert_eq!(addr.l2_family, AF_BLUETOOTH);
        assert_eq!(addr.l2_psm, 0);
        assert_eq!(addr.l2_bdaddr, [0xFF, 0xEE, 0xDD, 0xCC, 0xBB, 0xAA]);
        assert_eq!(u16::from_le(addr.l2_cid), ATT_CID);
        assert_eq!(addr.l2_bdaddr_type, 2);
    }

    #[test]
    fn open_reports_io_error_without_bluetooth() {
        // Containers and CI hosts usually lack AF_BLUETOOTH; either outcome
        // is fine, but an error must be a plain OS error.
        match L2capSocket::open() {
            Ok(socket) => assert!(socket.as_raw_fd() >= 0),
            Err(e) => assert!(e.raw_os_error().is_some()),
        }
    }
}

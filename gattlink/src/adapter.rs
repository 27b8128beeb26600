//! Local adapter resolution.
//!
//! Maps an adapter identifier from the command line to the device address
//! the connector binds to. Index lookups query the kernel's HCI device table
//! with `HCIGETDEVINFO` on a raw HCI socket.

use std::fmt;
use std::io;
use std::mem::{MaybeUninit, size_of};
use std::num::NonZeroU32;
use std::os::fd::{AsRawFd, OwnedFd};
use std::str::FromStr;

use rustix::net::{AddressFamily, Protocol, SocketFlags, SocketType};

use crate::net::DeviceAddress;
use crate::trace::debug;

const BTPROTO_HCI: u32 = 1;

/// `_IOR('H', 210, int)`.
const HCIGETDEVLIST: libc::c_ulong = 0x8004_48d2;
/// `_IOR('H', 211, int)`.
const HCIGETDEVINFO: libc::c_ulong = 0x8004_48d3;

/// `HCI_MAX_DEV` from `<bluetooth/hci.h>`.
const HCI_MAX_DEV: usize = 16;

/// Bit index of `HCI_UP` in `hci_dev_info.flags`.
const HCI_UP: u32 = 0;

/// How the user named the local adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AdapterId {
    /// Let the kernel choose (`BDADDR_ANY`).
    #[default]
    Any,
    /// Adapter index, from `hciN` or `N`.
    Index(u16),
    /// Adapter given directly by its address.
    Address(DeviceAddress),
}

impl fmt::Display for AdapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any"),
            Self::Index(idx) => write!(f, "hci{idx}"),
            Self::Address(addr) => addr.fmt(f),
        }
    }
}

/// Error parsing an [`AdapterId`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid adapter `{0}` (expected hciN, N, an address, or any)")]
pub struct AdapterIdParseError(String);

impl FromStr for AdapterId {
    type Err = AdapterIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "any" {
            return Ok(Self::Any);
        }
        if let Ok(addr) = s.parse::<DeviceAddress>() {
            return Ok(Self::Address(addr));
        }

        let digits = s.strip_prefix("hci").unwrap_or(s);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AdapterIdParseError(s.to_string()));
        }
        digits
            .parse::<u16>()
            .map(Self::Index)
            .map_err(|_| AdapterIdParseError(s.to_string()))
    }
}

/// Error resolving an adapter.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The HCI control socket could not be opened.
    #[error("failed to open HCI socket: {0}")]
    Socket(#[source] io::Error),
    /// No adapter with this index.
    #[error("adapter hci{index} not available: {source}")]
    NotFound {
        index: u16,
        #[source]
        source: io::Error,
    },
    /// No local adapter has this address.
    #[error("no local adapter with address {addr}")]
    UnknownAddress { addr: DeviceAddress },
    /// Listing the local adapters failed.
    #[error("failed to list adapters: {0}")]
    List(#[source] io::Error),
    /// The adapter exists but is not powered up.
    #[error("adapter hci{index} is down")]
    Down { index: u16 },
}

/// `struct hci_dev_req` from `<bluetooth/hci.h>`.
#[allow(dead_code)]
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct HciDevReq {
    dev_id: u16,
    dev_opt: u32,
}

/// `struct hci_dev_list_req` with room for `HCI_MAX_DEV` entries.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
struct HciDevListReq {
    dev_num: u16,
    dev_req: [HciDevReq; HCI_MAX_DEV],
}

/// `struct hci_dev_stats` from `<bluetooth/hci.h>`.
#[allow(dead_code)]
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct HciDevStats {
    err_rx: u32,
    err_tx: u32,
    cmd_tx: u32,
    evt_rx: u32,
    acl_tx: u32,
    acl_rx: u32,
    sco_tx: u32,
    sco_rx: u32,
    byte_rx: u32,
    byte_tx: u32,
}

/// `struct hci_dev_info` from `<bluetooth/hci.h>`.
#[allow(dead_code)]
#[repr(C)]
#[derive(Debug, Clone, Copy)]
struct HciDevInfo {
    dev_id: u16,
    name: [u8; 8],
    bdaddr: [u8; 6],
    flags: u32,
    dev_type: u8,
    features: [u8; 8],
    pkt_type: u32,
    link_policy: u32,
    link_mode: u32,
    acl_mtu: u16,
    acl_pkts: u16,
    sco_mtu: u16,
    sco_pkts: u16,
    stat: HciDevStats,
}

impl HciDevInfo {
    fn is_up(&self) -> bool {
        self.flags & (1 << HCI_UP) != 0
    }
}

/// Resolves `id` to the address the connector should bind.
///
/// `Any` resolves without touching the kernel. An index or an address must
/// name a local adapter that is up.
///
/// # Errors
///
/// Returns an [`AdapterError`] if the adapter is missing or down.
pub fn resolve(id: AdapterId) -> Result<DeviceAddress, AdapterError> {
    let info = match id {
        AdapterId::Any => return Ok(DeviceAddress::ANY),
        AdapterId::Index(index) => {
            let sock = hci_socket()?;
            device_info(&sock, index)?
        }
        AdapterId::Address(addr) => {
            let sock = hci_socket()?;
            find_by_address(&sock, addr)?
        }
    };

    if !info.is_up() {
        return Err(AdapterError::Down {
            index: info.dev_id,
        });
    }
    let addr = DeviceAddress::from_kernel_bytes(info.bdaddr);
    debug!(adapter = %id, index = info.dev_id, addr = %addr, "resolved adapter");
    Ok(addr)
}

/// Opens a raw HCI control socket.
fn hci_socket() -> Result<OwnedFd, AdapterError> {
    rustix::net::socket_with(
        AddressFamily::BLUETOOTH,
        SocketType::RAW,
        SocketFlags::CLOEXEC,
        NonZeroU32::new(BTPROTO_HCI).map(Protocol::from_raw),
    )
    .map_err(|e| AdapterError::Socket(e.into()))
}

/// Indices of every registered adapter.
fn device_list(sock: &OwnedFd) -> Result<Vec<u16>, AdapterError> {
    let mut req = HciDevListReq {
        dev_num: HCI_MAX_DEV as u16,
        ..HciDevListReq::default()
    };
    // SAFETY: `req` has room for `dev_num` entries, which is all the kernel
    // writes.
    let ret = unsafe {
        libc::ioctl(
            sock.as_raw_fd(),
            HCIGETDEVLIST as _,
            &mut req as *mut HciDevListReq,
        )
    };
    if ret < 0 {
        return Err(AdapterError::List(io::Error::last_os_error()));
    }
    let count = usize::from(req.dev_num).min(HCI_MAX_DEV);
    Ok(req.dev_req[..count].iter().map(|r| r.dev_id).collect())
}

fn find_by_address(sock: &OwnedFd, addr: DeviceAddress) -> Result<HciDevInfo, AdapterError> {
    for index in device_list(sock)? {
        // Adapters can disappear between the list and the lookup.
        let Ok(info) = device_info(sock, index) else {
            continue;
        };
        if DeviceAddress::from_kernel_bytes(info.bdaddr) == addr {
            return Ok(info);
        }
    }
    Err(AdapterError::UnknownAddress { addr })
}

fn device_info(sock: &OwnedFd, index: u16) -> Result<HciDevInfo, AdapterError> {
    let mut info = MaybeUninit::<HciDevInfo>::zeroed();
    // SAFETY: the kernel reads `dev_id` and fills in the rest; a zeroed
    // HciDevInfo is a valid value of the type.
    let ret = unsafe {
        (*info.as_mut_ptr()).dev_id = index;
        libc::ioctl(sock.as_raw_fd(), HCIGETDEVINFO as _, info.as_mut_ptr())
    };
    if ret < 0 {
        return Err(AdapterError::NotFound {
            index,
            source: io::Error::last_os_error(),
        });
    }
    // SAFETY: zero-initialized and then written by the kernel.
    Ok(unsafe { info.assume_init() })
}

const _: () = assert!(size_of::<HciDevInfo>() == 92);
const _: () = assert!(size_of::<HciDevListReq>() == 4 + 8 * HCI_MAX_DEV);

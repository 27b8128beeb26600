//! Bluetooth device addresses.
//!
//! The kernel stores addresses (`bdaddr_t`) least significant octet first,
//! while the textual form `AA:BB:CC:DD:EE:FF` is most significant first.
//! [`DeviceAddress`] keeps the kernel order internally so it can be copied
//! straight into a socket address.

use std::fmt;
use std::str::FromStr;

/// Length of the textual form, `XX:XX:XX:XX:XX:XX`.
const TEXT_LEN: usize = 17;

/// A 6-byte Bluetooth device address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceAddress([u8; 6]);

impl DeviceAddress {
    /// The wildcard address (`00:00:00:00:00:00`), letting the kernel pick
    /// the adapter.
    pub const ANY: Self = Self([0; 6]);

    /// Creates an address from octets in display order (most significant
    /// first), e.g. `[0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]` for
    /// `AA:BB:CC:DD:EE:FF`.
    #[must_use]
    pub const fn new(octets: [u8; 6]) -> Self {
        let [a, b, c, d, e, f] = octets;
        Self([f, e, d, c, b, a])
    }

    /// Creates an address from octets in kernel (`bdaddr_t`) order.
    #[must_use]
    pub const fn from_kernel_bytes(bytes: [u8; 6]) -> Self {
        Self(bytes)
    }

    /// Returns the octets in kernel (`bdaddr_t`) order.
    #[must_use]
    pub const fn kernel_bytes(&self) -> [u8; 6] {
        self.0
    }

    /// Returns the octets in display order.
    #[must_use]
    pub const fn octets(&self) -> [u8; 6] {
        let [f, e, d, c, b, a] = self.0;
        [a, b, c, d, e, f]
    }

    /// Returns `true` for the wildcard address.
    #[must_use]
    pub fn is_any(&self) -> bool {
        *self == Self::ANY
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.octets();
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")
    }
}

/// Error parsing a [`DeviceAddress`] from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid device address `{input}`")]
pub struct AddressParseError {
    input: String,
}

impl FromStr for DeviceAddress {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || AddressParseError {
            input: s.to_string(),
        };

        if s.len() != TEXT_LEN {
            return Err(err());
        }

        let mut octets = [0u8; 6];
        for (i, group) in s.split(':').enumerate() {
            // Reject a seventh group, and single/triple-digit groups that the
            // length check alone would let through.
            if i >= octets.len() || group.len() != 2 {
                return Err(err());
            }
            if !group.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(err());
            }
            octets[i] = u8::from_str_radix(group, 16).map_err(|_| err())?;
        }

        Ok(Self::new(octets))
    }
}

/// LE address type of a remote device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AddressType {
    /// Public (IEEE-assigned) address.
    #[default]
    Public,
    /// Random (static or private) address.
    Random,
}

impl AddressType {
    /// Kernel `BDADDR_LE_*` code used in `sockaddr_l2.l2_bdaddr_type`.
    #[must_use]
    pub const fn kernel_code(self) -> u8 {
        match self {
            Self::Public => 1,
            Self::Random => 2,
        }
    }

    /// Name as accepted on the command line.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Random => "random",
        }
    }
}

impl fmt::Display for AddressType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing an [`AddressType`] name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown address type `{0}` (allowed types: random, public)")]
pub struct AddressTypeParseError(String);

impl FromStr for AddressType {
    type Err = AddressTypeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Self::Public),
            "random" => Ok(Self::Random),
            other => Err(AddressTypeParseError(other.to_string())),
        }
    }
}

/// A remote device: address plus LE address type.
///
/// Two peers are equal only when both the address and the type match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerAddress {
    pub addr: DeviceAddress,
    pub kind: AddressType,
}

impl PeerAddress {
    #[must_use]
    pub const fn new(addr: DeviceAddress, kind: AddressType) -> Self {
        Self { addr, kind }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.addr, self.kind)
    }
}

//! Bluetooth transport primitives.
//!
//! Addresses, security levels and the L2CAP socket the connector drives.
//! The socket is mio-compatible so an open channel can be registered with
//! the event loop directly.

pub mod address;
pub mod security;
pub mod socket;

pub use address::{AddressType, DeviceAddress, PeerAddress};
pub use security::SecurityLevel;
pub use socket::{ATT_CID, L2capSocket};

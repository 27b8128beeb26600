//! Command-line configuration.
//!
//! [`Cli`] is the raw clap surface; [`ClientConfig`] is the validated form
//! the binary runs with. Validation happens before any socket is opened so
//! that a bad argument never reaches the connector.

use clap::Parser;

use crate::adapter::{AdapterId, AdapterIdParseError};
use crate::connector::ConnectParams;
use crate::net::address::{AddressParseError, AddressTypeParseError};
use crate::net::security::SecurityLevelParseError;
use crate::net::{AddressType, DeviceAddress, PeerAddress, SecurityLevel};

/// Command-line arguments.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "gattlink-client",
    about = "Open an LE ATT channel to a remote device and run an interactive console",
    version
)]
pub struct Cli {
    /// Local adapter, e.g. hci0 (default: any)
    #[arg(short = 'i', long = "index", value_name = "ID")]
    pub index: Option<String>,

    /// Destination device address
    #[arg(short = 'd', long = "dest", value_name = "ADDR")]
    pub dest: Option<String>,

    /// LE address type of the destination [random|public]
    #[arg(short = 't', long = "type", value_name = "TYPE", default_value = "public")]
    pub addr_type: String,

    /// ATT MTU to use (1-65535)
    #[arg(short = 'm', long = "mtu", value_name = "MTU", allow_negative_numbers = true)]
    pub mtu: Option<String>,

    /// Security level [low|medium|high]
    #[arg(short = 's', long = "security-level", value_name = "SEC", default_value = "low")]
    pub security_level: String,

    /// Enable extra logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,
}

/// Invalid configuration. Reported before any connection attempt.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid remote address: {0}")]
    InvalidAddress(#[from] AddressParseError),
    #[error(transparent)]
    InvalidAddressType(#[from] AddressTypeParseError),
    #[error(transparent)]
    InvalidSecurityLevel(#[from] SecurityLevelParseError),
    #[error(transparent)]
    InvalidAdapter(#[from] AdapterIdParseError),
    #[error("invalid MTU: {0}")]
    InvalidMtu(String),
    #[error("MTU too large: {0}")]
    MtuTooLarge(u64),
    #[error("destination address required")]
    MissingDestination,
}

/// Validated client configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientConfig {
    pub adapter: AdapterId,
    pub peer: PeerAddress,
    pub security: SecurityLevel,
    pub mtu: Option<u16>,
    pub verbose: bool,
}

impl ClientConfig {
    /// Connect parameters for a resolved local address.
    #[must_use]
    pub fn connect_params(&self, local: DeviceAddress) -> ConnectParams {
        ConnectParams {
            local,
            peer: self.peer,
            security: self.security,
            mtu: self.mtu,
        }
    }
}

impl TryFrom<Cli> for ClientConfig {
    type Error = ConfigError;

    fn try_from(cli: Cli) -> Result<Self, ConfigError> {
        let security: SecurityLevel = cli.security_level.parse()?;
        let mtu = cli.mtu.as_deref().map(parse_mtu).transpose()?;
        let kind: AddressType = cli.addr_type.parse()?;
        let adapter = match cli.index.as_deref() {
            Some(id) => id.parse()?,
            None => AdapterId::Any,
        };
        let addr: DeviceAddress = cli
            .dest
            .as_deref()
            .ok_or(ConfigError::MissingDestination)?
            .parse()?;

        Ok(Self {
            adapter,
            peer: PeerAddress::new(addr, kind),
            security,
            mtu,
            verbose: cli.verbose,
        })
    }
}

/// Parses an ATT MTU in `1..=65535`.
fn parse_mtu(s: &str) -> Result<u16, ConfigError> {
    let value: i64 = s
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidMtu(s.to_string()))?;
    if value <= 0 {
        return Err(ConfigError::InvalidMtu(s.to_string()));
    }
    u16::try_from(value).map_err(|_| ConfigError::MtuTooLarge(value.unsigned_abs()))
}

//! Link security levels.

use std::fmt;
use std::str::FromStr;

/// Minimum encryption/authentication requirement for the link.
///
/// Ordered: `Low < Medium < High`. Selected once at connect time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum SecurityLevel {
    /// No encryption required.
    #[default]
    Low,
    /// Encryption without MITM protection.
    Medium,
    /// Encryption with MITM protection.
    High,
}

impl SecurityLevel {
    /// Kernel `BT_SECURITY_*` value for the `BT_SECURITY` socket option.
    #[must_use]
    pub const fn kernel_level(self) -> u8 {
        match self {
            Self::Low => 1,
            Self::Medium => 2,
            Self::High => 3,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error parsing a [`SecurityLevel`] name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid security level `{0}` (expected low, medium or high)")]
pub struct SecurityLevelParseError(String);

impl FromStr for SecurityLevel {
    type Err = SecurityLevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            other => Err(SecurityLevelParseError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_are_ordered() {
        assert!(SecurityLevel::Low < SecurityLevel::Medium);
        assert!(SecurityLevel::Medium < SecurityLevel::High);
    }

    #[test]
    fn kernel_levels_match_bt_security_constants() {
        assert_eq!(SecurityLevel::Low.kernel_level(), 1);
        assert_eq!(SecurityLevel::Medium.kernel_level(), 2);
        assert_eq!(SecurityLevel::High.kernel_level(), 3);
    }

    #[test]
    fn parse_names() {
        for level in [SecurityLevel::Low, SecurityLevel::Medium, SecurityLevel::High] {
            assert_eq!(level.as_str().parse::<SecurityLevel>(), Ok(level));
        }
        assert!("fips".parse::<SecurityLevel>().is_err());
        assert!("HIGH".parse::<SecurityLevel>().is_err());
    }
}

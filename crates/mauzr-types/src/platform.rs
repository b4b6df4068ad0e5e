//! Image architectures.

use crate::error::{ReleaseError, ReleaseResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Architectures images are published for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// 64 bit x86 hosts.
    Amd64,
    /// 32 bit ARM boards (Raspberry Pi and friends).
    Arm,
}

impl Arch {
    /// Map a machine name (`uname -m` style) to an image architecture.
    pub fn from_machine(machine: &str) -> ReleaseResult<Self> {
        match machine {
            "x86_64" | "amd64" => Ok(Self::Amd64),
            "armv7l" | "arm" => Ok(Self::Arm),
            other => Err(ReleaseError::UnsupportedArch(other.to_string())),
        }
    }

    /// Architecture of the running host.
    pub fn current() -> ReleaseResult<Self> {
        Self::from_machine(std::env::consts::ARCH)
    }

    /// Docker platform string, e.g. `linux/amd64`.
    pub fn platform(&self) -> String {
        format!("linux/{self}")
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Amd64 => write!(f, "amd64"),
            Self::Arm => write!(f, "arm"),
        }
    }
}

impl std::str::FromStr for Arch {
    type Err = ReleaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_machine(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_mapping() {
        assert_eq!(Arch::from_machine("x86_64").unwrap(), Arch::Amd64);
        assert_eq!(Arch::from_machine("armv7l").unwrap(), Arch::Arm);
        assert_eq!(Arch::from_machine("arm").unwrap(), Arch::Arm);
    }

    #[test]
    fn test_unknown_machine() {
        assert!(matches!(
            Arch::from_machine("riscv64"),
            Err(ReleaseError::UnsupportedArch(m)) if m == "riscv64"
        ));
    }

    #[test]
    fn test_platform_string() {
        assert_eq!(Arch::Amd64.platform(), "linux/amd64");
        assert_eq!(Arch::Arm.platform(), "linux/arm");
    }
}

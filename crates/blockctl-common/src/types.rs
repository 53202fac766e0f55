//! Core type definitions for blockctl
//!
//! Status and export-mode enums shared by every crate, plus the size
//! constants that govern backing-file layout.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One mebibyte
pub const MB: u64 = 1024 * 1024;

/// One gibibyte
pub const GB: u64 = 1024 * MB;

/// Space reserved at the end of every backing file for LVM metadata
pub const LVM_HEADER_LENGTH: u64 = 4 * MB;

/// Lifecycle status of a volume or snapshot record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeStatus {
    /// Fully provisioned and usable
    Available,
    /// Backing data went missing; the record is kept for inspection
    Failed,
}

impl VolumeStatus {
    /// Wire representation used in status replies
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for VolumeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network block export flavour, fixed for the lifetime of a controller
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportMode {
    /// iSCSI targets served by the tgt daemon
    #[default]
    Iscsi,
    /// ATA-over-Ethernet exports served by vblade
    Aoe,
}

impl ExportMode {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Iscsi => "iscsi",
            Self::Aoe => "aoe",
        }
    }
}

impl fmt::Display for ExportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "iscsi" => Ok(Self::Iscsi),
            "aoe" => Ok(Self::Aoe),
            other => Err(format!("unknown export mode: {other}")),
        }
    }
}

/// Whole gibibytes contained in `bytes`, rounded down
#[must_use]
pub const fn bytes_to_gb(bytes: u64) -> u64 {
    bytes / GB
}

//! Stored types for metadata persistence.
//!
//! These types are serialized to redb via bincode, so they avoid serde
//! attributes that need a self-describing format.

use blockctl_common::{ExportMode, VolumeStatus};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One volume or snapshot tracked by the controller
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub volume_id: String,
    /// Loop device the backing file is attached to (`/dev/loopN`)
    pub lo_dev_name: Option<String>,
    /// Backing file, when it does not live at `<root>/<volume_id>`
    pub lo_file_name: Option<PathBuf>,
    pub pv_name: Option<String>,
    pub vg_name: Option<String>,
    pub lv_name: Option<String>,
    pub size_gb: u64,
    pub status: VolumeStatus,
    /// Network export, `None` until the volume has been exported
    pub export: Option<ExportDescriptor>,
    pub created_at: i64,
}

impl VolumeRecord {
    /// A bare available record with nothing provisioned
    #[must_use]
    pub fn new(volume_id: impl Into<String>, size_gb: u64) -> Self {
        Self {
            volume_id: volume_id.into(),
            lo_dev_name: None,
            lo_file_name: None,
            pv_name: None,
            vg_name: None,
            lv_name: None,
            size_gb,
            status: VolumeStatus::Available,
            export: None,
            created_at: chrono::Utc::now().timestamp(),
        }
    }

    /// A snapshot record that only references a standalone backing file
    #[must_use]
    pub fn snapshot(volume_id: impl Into<String>, file: PathBuf, size_gb: u64) -> Self {
        Self {
            lo_file_name: Some(file),
            ..Self::new(volume_id, size_gb)
        }
    }

    /// True when the record owns a loopback → PV → VG → LV chain
    #[must_use]
    pub const fn is_provisioned(&self) -> bool {
        self.vg_name.is_some() && self.lv_name.is_some()
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.status == VolumeStatus::Available
    }

    /// Absolute device path of the logical volume, if any
    #[must_use]
    pub fn lv_path(&self, lvm_root: &Path) -> Option<PathBuf> {
        match (&self.vg_name, &self.lv_name) {
            (Some(vg), Some(lv)) => Some(lvm_root.join(vg).join(lv)),
            _ => None,
        }
    }

    /// Backing file location given the storage root
    #[must_use]
    pub fn backing_file(&self, root_dir: &Path) -> PathBuf {
        self.lo_file_name
            .clone()
            .unwrap_or_else(|| root_dir.join(&self.volume_id))
    }
}

/// How a volume is reachable over the network
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportDescriptor {
    Aoe(AoeExport),
    Iscsi(IscsiExport),
}

impl ExportDescriptor {
    #[must_use]
    pub const fn mode(&self) -> ExportMode {
        match self {
            Self::Aoe(_) => ExportMode::Aoe,
            Self::Iscsi(_) => ExportMode::Iscsi,
        }
    }
}

/// AoE shelf/slot pair plus the vblade process serving it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AoeExport {
    pub major: u32,
    pub minor: u32,
    pub pid: Option<u32>,
}

/// iSCSI target coordinates and the sealed CHAP secret
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IscsiExport {
    pub tid: u32,
    pub lun: u32,
    pub store_name: String,
    pub store_user: String,
    pub encrypted_password: String,
}

/// Last AoE pair handed out
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AoeCounter {
    pub major: u32,
    pub minor: u32,
}

/// Next iSCSI store number and target id to hand out
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IscsiCounter {
    pub store_prefix: String,
    pub store_number: u64,
    pub tid: u32,
    pub store_user: String,
}

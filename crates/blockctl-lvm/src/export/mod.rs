//! Network export backends
//!
//! One backend is chosen when the controller is built and stays fixed for
//! its lifetime. Each backend only accepts descriptors of its own kind.

pub mod aoe;
pub mod iscsi;

pub use aoe::AoeExporter;
pub use iscsi::IscsiExporter;

use crate::error::{BlockError, BlockResult};
use blockctl_common::ExportMode;
use blockctl_meta_store::ExportDescriptor;
use std::path::Path;

/// The export backend of a controller
pub enum ExportBackend {
    Aoe(AoeExporter),
    Iscsi(IscsiExporter),
}

impl ExportBackend {
    #[must_use]
    pub const fn mode(&self) -> ExportMode {
        match self {
            Self::Aoe(_) => ExportMode::Aoe,
            Self::Iscsi(_) => ExportMode::Iscsi,
        }
    }

    /// Expose `lv_path` on the network
    pub fn export_volume(&self, lv_path: &Path) -> BlockResult<ExportDescriptor> {
        match self {
            Self::Aoe(aoe) => aoe.export_volume(lv_path).map(ExportDescriptor::Aoe),
            Self::Iscsi(iscsi) => iscsi.export_volume(lv_path).map(ExportDescriptor::Iscsi),
        }
    }

    /// Bring an existing export back after a restart, updating `descriptor`
    pub fn reexport(&self, lv_path: &Path, descriptor: &mut ExportDescriptor) -> BlockResult<()> {
        match (self, descriptor) {
            (Self::Aoe(aoe), ExportDescriptor::Aoe(desc)) => aoe.reexport(lv_path, desc),
            (Self::Iscsi(iscsi), ExportDescriptor::Iscsi(desc)) => iscsi.reexport(lv_path, desc),
            (_, other) => Err(self.mismatch(other)),
        }
    }

    /// Withdraw an export
    pub fn unexport_volume(&self, descriptor: &ExportDescriptor) -> BlockResult<()> {
        match (self, descriptor) {
            (Self::Aoe(aoe), ExportDescriptor::Aoe(desc)) => aoe.unexport_volume(desc),
            (Self::Iscsi(iscsi), ExportDescriptor::Iscsi(desc)) => iscsi.unexport_volume(desc),
            (_, other) => Err(self.mismatch(other)),
        }
    }

    /// What a compute host needs to attach the export
    pub fn connection_string(&self, descriptor: &ExportDescriptor) -> BlockResult<String> {
        match (self, descriptor) {
            (Self::Aoe(aoe), ExportDescriptor::Aoe(desc)) => Ok(aoe.connection_string(desc)),
            (Self::Iscsi(iscsi), ExportDescriptor::Iscsi(desc)) => {
                Ok(iscsi.connection_string(desc))
            }
            (_, other) => Err(self.mismatch(other)),
        }
    }

    /// Verify the export daemon tooling is installed
    pub fn check_preconditions(&self) -> BlockResult<()> {
        match self {
            Self::Aoe(aoe) => aoe.check_preconditions(),
            Self::Iscsi(iscsi) => iscsi.check_preconditions(),
        }
    }

    /// Change the interface future AoE exports bind to; iSCSI ignores it
    pub fn set_storage_interface(&self, interface: &str) {
        if let Self::Aoe(aoe) = self {
            aoe.set_interface(interface);
        }
    }

    fn mismatch(&self, descriptor: &ExportDescriptor) -> BlockError {
        BlockError::InvalidArgument(format!(
            "{} export descriptor on a {} controller",
            descriptor.mode(),
            self.mode()
        ))
    }
}

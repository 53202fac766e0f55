//! LVM2 command wrappers
//!
//! Thin typed layer over `pvcreate`/`vgcreate`/`lvcreate` and friends. The
//! creating and removing tools print the affected object on success, so
//! they go through [`RootWrap::run`]; activation and block copies only
//! report through their exit status.

use crate::error::BlockResult;
use crate::runner::RootWrap;
use std::path::{Path, PathBuf};

/// Block size used for `dd` copies between volumes and files
const COPY_BLOCK_SIZE: &str = "1M";

/// Typed LVM2 operations
#[derive(Debug, Clone)]
pub struct LvmTools {
    wrap: RootWrap,
    lvm_root: PathBuf,
}

impl LvmTools {
    pub fn new(wrap: RootWrap, lvm_root: impl Into<PathBuf>) -> Self {
        Self {
            wrap,
            lvm_root: lvm_root.into(),
        }
    }

    /// Device path of `<vg>/<lv>` under the LVM root
    #[must_use]
    pub fn lv_path(&self, vg_name: &str, lv_name: &str) -> PathBuf {
        self.lvm_root.join(vg_name).join(lv_name)
    }

    #[must_use]
    pub fn lvm_root(&self) -> &Path {
        &self.lvm_root
    }

    pub fn version(&self) -> BlockResult<String> {
        self.wrap.run(&["lvm", "version"])
    }

    pub fn create_physical_volume(&self, device: &str) -> BlockResult<String> {
        self.wrap.run(&["pvcreate", device])
    }

    pub fn create_volume_group(&self, vg_name: &str, pv_name: &str) -> BlockResult<String> {
        self.wrap.run(&["vgcreate", vg_name, pv_name])
    }

    pub fn extend_volume_group(&self, vg_name: &str, pv_name: &str) -> BlockResult<String> {
        self.wrap.run(&["vgextend", vg_name, pv_name])
    }

    pub fn reduce_volume_group(&self, vg_name: &str, pv_name: &str) -> BlockResult<String> {
        self.wrap.run(&["vgreduce", vg_name, pv_name])
    }

    /// Carve one logical volume out of all free extents of `vg_name`
    pub fn create_logical_volume(&self, vg_name: &str, lv_name: &str) -> BlockResult<String> {
        self.wrap
            .run(&["lvcreate", "-n", lv_name, "-l", "100%FREE", vg_name])
    }

    /// Snapshot `origin` into a new LV using all free extents of its group
    pub fn create_snapshot_volume(&self, origin: &Path, snap_name: &str) -> BlockResult<String> {
        self.wrap.run(&[
            "lvcreate",
            "-n",
            snap_name,
            "-s",
            "-l",
            "100%FREE",
            &origin.to_string_lossy(),
        ])
    }

    pub fn remove_logical_volume(&self, lv_path: &Path) -> BlockResult<String> {
        self.wrap.run(&["lvremove", "-f", &lv_path.to_string_lossy()])
    }

    pub fn remove_volume_group(&self, vg_name: &str) -> BlockResult<String> {
        self.wrap.run(&["vgremove", vg_name])
    }

    pub fn remove_physical_volume(&self, device: &str) -> BlockResult<String> {
        self.wrap.run(&["pvremove", device])
    }

    /// Activate a logical volume after a host restart
    pub fn activate(&self, lv_path: &Path) -> BlockResult<()> {
        self.wrap
            .run_status(&["lvchange", "-ay", &lv_path.to_string_lossy()])?;
        Ok(())
    }

    /// Byte-level copy between block devices and/or files
    pub fn copy(&self, source: &Path, target: &Path) -> BlockResult<()> {
        let input = format!("if={}", source.display());
        let output = format!("of={}", target.display());
        let block_size = format!("bs={COPY_BLOCK_SIZE}");
        self.wrap.run_status(&["dd", &input, &output, &block_size])?;
        Ok(())
    }
}

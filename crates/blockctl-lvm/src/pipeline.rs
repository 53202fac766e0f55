//! Compensating rollback for provisioning pipelines
//!
//! Each completed step is recorded on a [`Rollback`] stack. Dropping the
//! stack without disarming it undoes the recorded steps in reverse order;
//! an undo that fails is logged and the remaining undos still run.

use crate::error::BlockResult;
use crate::export::ExportBackend;
use crate::loopback::LoopbackAllocator;
use crate::lvm::LvmTools;
use blockctl_meta_store::ExportDescriptor;
use std::path::PathBuf;
use tracing::{debug, warn};

/// A provisioning step that can be reversed
#[derive(Debug, Clone)]
pub enum Step {
    /// File created under the storage root
    File(PathBuf),
    /// Loop device bound to a file
    Loopback(String),
    PhysicalVolume(String),
    VolumeGroup(String),
    /// Physical volume added to an existing group
    ExtendedGroup { vg_name: String, pv_name: String },
    LogicalVolume(PathBuf),
    Export(ExportDescriptor),
}

/// Tools needed to reverse a [`Step`]
pub struct Undo<'a> {
    pub lvm: &'a LvmTools,
    pub loopback: &'a LoopbackAllocator,
    pub exporter: &'a ExportBackend,
}

impl Undo<'_> {
    fn undo(&self, step: &Step) -> BlockResult<()> {
        match step {
            Step::File(path) => match std::fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            },
            Step::Loopback(device) => self.loopback.detach(device),
            Step::PhysicalVolume(device) => self.lvm.remove_physical_volume(device).map(drop),
            Step::VolumeGroup(vg_name) => self.lvm.remove_volume_group(vg_name).map(drop),
            Step::ExtendedGroup { vg_name, pv_name } => {
                self.lvm.reduce_volume_group(vg_name, pv_name).map(drop)
            }
            Step::LogicalVolume(lv_path) => self.lvm.remove_logical_volume(lv_path).map(drop),
            Step::Export(descriptor) => self.exporter.unexport_volume(descriptor),
        }
    }
}

/// Stack of completed steps, undone on drop unless disarmed
pub struct Rollback<'a> {
    undo: Undo<'a>,
    steps: Vec<Step>,
}

impl<'a> Rollback<'a> {
    pub const fn new(undo: Undo<'a>) -> Self {
        Self {
            undo,
            steps: Vec::new(),
        }
    }

    pub fn push(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn depth(&self) -> usize {
        self.steps.len()
    }

    /// Undo steps above `depth` as part of the normal flow.
    ///
    /// Stops at the first failure and leaves that step on the stack, so the
    /// drop-time unwind retries it.
    pub fn unwind_to(&mut self, depth: usize) -> BlockResult<()> {
        while self.steps.len() > depth {
            if let Some(step) = self.steps.last() {
                self.undo.undo(step)?;
                debug!("Released {:?}", step);
            }
            self.steps.pop();
        }
        Ok(())
    }

    /// Keep everything that was provisioned
    pub fn disarm(mut self) {
        self.steps.clear();
    }
}

impl Drop for Rollback<'_> {
    fn drop(&mut self) {
        while let Some(step) = self.steps.pop() {
            match self.undo.undo(&step) {
                Ok(()) => debug!("Rolled back {:?}", step),
                Err(e) => warn!("Rollback of {:?} failed: {}", step, e),
            }
        }
    }
}

//! blockctl LVM - volume controller
//!
//! Provides block volumes backed by files under a storage root:
//! - Loopback device allocation over sparse or zero-filled files
//! - LVM physical volume, volume group and logical volume chains
//! - Snapshot extraction into plain files and volumes built from them
//! - Export over AoE (vblade) or iSCSI (tgt)
//! - Compensating rollback when any step of a pipeline fails
//! - Restart-time reconciliation of devices and exports
//!
//! Every external tool runs through a privileged helper via [`RootWrap`].

pub mod controller;
pub mod error;
pub mod export;
pub mod loopback;
pub mod lvm;
pub mod numbering;
pub mod pipeline;
pub mod runner;
pub mod sealer;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::VolumeController;
pub use error::{BlockError, BlockResult};
pub use export::ExportBackend;
pub use runner::{CommandOutput, CommandRunner, RootWrap, SystemRunner};
pub use sealer::{AesGcmSealer, PasswordSealer};

#[cfg(any(test, feature = "insecure-passthrough"))]
pub use sealer::PassthroughSealer;

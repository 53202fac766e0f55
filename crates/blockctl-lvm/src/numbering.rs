//! Export number allocation
//!
//! AoE shelf/slot pairs and iSCSI target ids come from singleton counter
//! rows in the metadata store. Each allocation is a read-modify-write in
//! its own store write transaction, behind a process-wide lock, and commits
//! independently of the caller's volume transaction: a number handed out
//! to a pipeline that later fails is simply skipped.

use crate::error::BlockResult;
use blockctl_common::config::IscsiConfig;
use blockctl_meta_store::tables::{AOE_COUNTER_KEY, ISCSI_COUNTER_KEY};
use blockctl_meta_store::{AoeCounter, IscsiCounter, MetaStore};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Slots per AoE shelf
pub const MAX_MINOR_NUMBER: u32 = 16;

/// Step `counter` to the next pair, wrapping minor into the next major.
///
/// Pairs for which `taken` returns true are skipped.
pub fn advance_aoe(counter: &mut AoeCounter, taken: impl Fn(u32, u32) -> bool) {
    loop {
        if counter.minor >= MAX_MINOR_NUMBER - 1 {
            counter.major += 1;
        }
        counter.minor = (counter.minor + 1) % MAX_MINOR_NUMBER;
        if !taken(counter.major, counter.minor) {
            break;
        }
        debug!("AoE e{}.{} is in use, skipping", counter.major, counter.minor);
    }
}

/// AoE (major, minor) allocator
pub struct AoeNumbering {
    store: Arc<MetaStore>,
    etherd_dir: PathBuf,
    lock: Mutex<()>,
}

impl AoeNumbering {
    pub fn new(store: Arc<MetaStore>, etherd_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            etherd_dir: etherd_dir.into(),
            lock: Mutex::new(()),
        }
    }

    /// Hand out the next free pair
    pub fn allocate(&self) -> BlockResult<(u32, u32)> {
        let _guard = self.lock.lock();
        let etherd_dir = &self.etherd_dir;
        let counter = self
            .store
            .update_counter(AOE_COUNTER_KEY, AoeCounter::default, |counter| {
                advance_aoe(counter, |major, minor| {
                    etherd_dir.join(format!("e{major}.{minor}")).exists()
                });
                *counter
            })?;
        debug!("Allocated AoE e{}.{}", counter.major, counter.minor);
        Ok((counter.major, counter.minor))
    }
}

/// iSCSI target assignment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IscsiTarget {
    pub tid: u32,
    pub lun: u32,
    pub store_name: String,
    pub store_user: String,
}

/// iSCSI target allocator
pub struct IscsiNumbering {
    store: Arc<MetaStore>,
    seed: IscsiCounter,
    lock: Mutex<()>,
}

impl IscsiNumbering {
    /// The counter row is seeded from configuration the first time it is used
    pub fn new(store: Arc<MetaStore>, config: &IscsiConfig) -> Self {
        Self {
            store,
            seed: IscsiCounter {
                store_prefix: config.store_prefix.clone(),
                store_number: 0,
                tid: 1,
                store_user: config.store_user.clone(),
            },
            lock: Mutex::new(()),
        }
    }

    pub fn allocate(&self) -> BlockResult<IscsiTarget> {
        let _guard = self.lock.lock();
        let seed = self.seed.clone();
        let target = self
            .store
            .update_counter(ISCSI_COUNTER_KEY, || seed, |counter| {
                let target = IscsiTarget {
                    tid: counter.tid,
                    lun: 0,
                    store_name: format!("{}{}", counter.store_prefix, counter.store_number),
                    store_user: counter.store_user.clone(),
                };
                counter.store_number += 1;
                counter.tid += 1;
                target
            })?;
        debug!("Allocated iSCSI target {} ({})", target.tid, target.store_name);
        Ok(target)
    }
}

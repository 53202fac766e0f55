//! Volume lifecycle controller
//!
//! Every operation opens one metadata transaction, drives the provisioning
//! pipeline (loopback → PV → VG → LV → export) and commits only when the
//! whole pipeline succeeded. Failures unwind the completed steps through a
//! [`Rollback`] stack and leave the store untouched.

use crate::error::{BlockError, BlockResult};
use crate::export::{AoeExporter, ExportBackend, IscsiExporter};
use crate::loopback::LoopbackAllocator;
use crate::lvm::LvmTools;
use crate::numbering::{AoeNumbering, IscsiNumbering};
use crate::pipeline::{Rollback, Step, Undo};
use crate::runner::{CommandRunner, RootWrap};
use crate::sealer::{AesGcmSealer, PasswordSealer};
use blockctl_common::{Config, ExportMode, GB, LVM_HEADER_LENGTH, VolumeStatus, bytes_to_gb};
use blockctl_meta_store::{MetaStore, VolumeRecord};
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Random `<prefix><hex>` name with `bytes` bytes of entropy
fn random_name(prefix: &str, bytes: usize) -> String {
    let mut raw = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut raw);
    format!("{prefix}{}", hex::encode(raw))
}

/// Backing file length for a volume of `size_gb`, LVM metadata included
fn backing_size(size_gb: u64) -> BlockResult<u64> {
    size_gb
        .checked_mul(GB)
        .and_then(|bytes| bytes.checked_add(LVM_HEADER_LENGTH))
        .ok_or_else(|| BlockError::InvalidArgument(format!("size {size_gb} GB is too large")))
}

/// Ids double as file names under the storage root
fn validate_id(id: &str) -> BlockResult<()> {
    if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\0']) {
        return Err(BlockError::InvalidArgument(format!("invalid volume id {id:?}")));
    }
    Ok(())
}

fn file_len(path: &Path, id: &str) -> BlockResult<u64> {
    match std::fs::metadata(path) {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BlockError::NotFound(format!(
            "backing file {} of {id}",
            path.display()
        ))),
        Err(e) => Err(e.into()),
    }
}

/// A freshly provisioned loopback → PV → VG → LV chain
struct Chain {
    lo_dev_name: String,
    vg_name: String,
    lv_name: String,
    lv_path: PathBuf,
}

impl Chain {
    fn into_record(self, volume_id: &str, size_gb: u64) -> VolumeRecord {
        VolumeRecord {
            pv_name: Some(self.lo_dev_name.clone()),
            lo_dev_name: Some(self.lo_dev_name),
            vg_name: Some(self.vg_name),
            lv_name: Some(self.lv_name),
            ..VolumeRecord::new(volume_id, size_gb)
        }
    }
}

/// Ids reserved by in-flight operations, released on drop
struct IdLease<'a> {
    busy: &'a Mutex<HashSet<String>>,
    ids: Vec<String>,
}

impl Drop for IdLease<'_> {
    fn drop(&mut self) {
        let mut busy = self.busy.lock();
        for id in &self.ids {
            busy.remove(id);
        }
    }
}

/// Pick the password sealer for `config`.
///
/// An explicit sealer wins; otherwise a configured key file yields an
/// AES-GCM sealer. iSCSI mode without either is refused.
fn resolve_sealer(
    config: &Config,
    sealer: Option<Arc<dyn PasswordSealer>>,
) -> BlockResult<Option<Arc<dyn PasswordSealer>>> {
    if sealer.is_some() {
        return Ok(sealer);
    }
    if let Some(key_file) = &config.export.iscsi.password_key_file {
        return Ok(Some(Arc::new(AesGcmSealer::from_key_file(key_file)?)));
    }
    if config.export.mode == ExportMode::Iscsi {
        return Err(BlockError::Precondition(
            "iscsi mode needs export.iscsi.password_key_file".into(),
        ));
    }
    Ok(None)
}

/// Orchestrates volume and snapshot lifecycles on one host
pub struct VolumeController {
    root_dir: PathBuf,
    run_dir: PathBuf,
    wrap: RootWrap,
    lvm: LvmTools,
    loopback: LoopbackAllocator,
    exporter: ExportBackend,
    store: Arc<MetaStore>,
    busy: Mutex<HashSet<String>>,
}

impl VolumeController {
    /// Build the controller, verify host preconditions and open the store.
    pub fn new(
        config: &Config,
        runner: Arc<dyn CommandRunner>,
        sealer: Option<Arc<dyn PasswordSealer>>,
    ) -> BlockResult<Self> {
        config
            .validate()
            .map_err(|e| BlockError::Precondition(e.to_string()))?;
        let sealer = resolve_sealer(config, sealer)?;

        let wrap = RootWrap::new(&config.system.root_wrapper, runner);
        let lvm = LvmTools::new(wrap.clone(), &config.storage.lvm_root);
        let loopback = LoopbackAllocator::new(wrap.clone(), config.storage.zero_fill_volumes);
        Self::check_host(&wrap, &lvm, &config.system.run_dir)?;
        std::fs::create_dir_all(&config.storage.root_dir)?;

        let mode = config.export.mode;
        let store = Arc::new(MetaStore::open(&config.storage.db_path, mode)?);
        let exporter = match (mode, sealer) {
            (ExportMode::Aoe, _) => ExportBackend::Aoe(AoeExporter::new(
                wrap.clone(),
                lvm.clone(),
                AoeNumbering::new(store.clone(), &config.export.aoe.etherd_dir),
                &config.export.aoe,
                &config.system.run_dir,
            )),
            (ExportMode::Iscsi, Some(sealer)) => ExportBackend::Iscsi(IscsiExporter::new(
                wrap.clone(),
                IscsiNumbering::new(store.clone(), &config.export.iscsi),
                sealer,
                &config.export.iscsi.storage_host,
            )),
            (ExportMode::Iscsi, None) => {
                return Err(BlockError::Precondition("no password sealer".into()));
            }
        };
        exporter.check_preconditions()?;

        info!(
            "Volume controller ready ({} mode, root {})",
            mode,
            config.storage.root_dir.display()
        );
        Ok(Self {
            root_dir: config.storage.root_dir.clone(),
            run_dir: config.system.run_dir.clone(),
            wrap,
            lvm,
            loopback,
            exporter,
            store,
            busy: Mutex::new(HashSet::new()),
        })
    }

    fn check_host(wrap: &RootWrap, lvm: &LvmTools, run_dir: &Path) -> BlockResult<()> {
        if !wrap.helper().exists() {
            return Err(BlockError::Precondition(format!(
                "root wrapper {} does not exist",
                wrap.helper().display()
            )));
        }
        std::fs::create_dir_all(run_dir).map_err(|e| {
            BlockError::Precondition(format!("cannot create {}: {e}", run_dir.display()))
        })?;
        let version = lvm
            .version()
            .map_err(|e| BlockError::Precondition(format!("is lvm installed? {e}")))?;
        info!("{}", version.lines().next().unwrap_or_default().trim());
        Ok(())
    }

    /// Re-run the startup checks against the live host
    pub fn check_preconditions(&self) -> BlockResult<()> {
        Self::check_host(&self.wrap, &self.lvm, &self.run_dir)?;
        self.exporter.check_preconditions()
    }

    #[must_use]
    pub const fn mode(&self) -> ExportMode {
        self.exporter.mode()
    }

    #[must_use]
    pub fn store(&self) -> &Arc<MetaStore> {
        &self.store
    }

    pub fn set_storage_interface(&self, interface: &str) {
        self.exporter.set_storage_interface(interface);
    }

    fn claim(&self, ids: &[&str]) -> BlockResult<IdLease<'_>> {
        let mut busy = self.busy.lock();
        if let Some(id) = ids.iter().find(|id| busy.contains(**id)) {
            return Err(BlockError::Busy((*id).to_string()));
        }
        let ids: Vec<String> = ids.iter().map(|id| (*id).to_string()).collect();
        busy.extend(ids.iter().cloned());
        Ok(IdLease {
            busy: &self.busy,
            ids,
        })
    }

    fn rollback(&self) -> Rollback<'_> {
        Rollback::new(Undo {
            lvm: &self.lvm,
            loopback: &self.loopback,
            exporter: &self.exporter,
        })
    }

    /// Backing file → loopback → PV → VG → LV, each step recorded on `guard`
    fn provision(&self, guard: &mut Rollback<'_>, file: &Path, size: u64) -> BlockResult<Chain> {
        let vg_name = random_name("vg-", 4);
        let lv_name = random_name("lv-", 4);

        self.loopback.create_file(file, size)?;
        guard.push(Step::File(file.to_path_buf()));
        let lo_dev_name = self.loopback.create_loopback(file)?;
        guard.push(Step::Loopback(lo_dev_name.clone()));

        self.lvm.create_physical_volume(&lo_dev_name)?;
        guard.push(Step::PhysicalVolume(lo_dev_name.clone()));
        self.lvm.create_volume_group(&vg_name, &lo_dev_name)?;
        guard.push(Step::VolumeGroup(vg_name.clone()));
        self.lvm.create_logical_volume(&vg_name, &lv_name)?;
        let lv_path = self.lvm.lv_path(&vg_name, &lv_name);
        guard.push(Step::LogicalVolume(lv_path.clone()));

        Ok(Chain {
            lo_dev_name,
            vg_name,
            lv_name,
            lv_path,
        })
    }

    /// Export the chain's LV and build the final record
    fn finish(
        &self,
        guard: &mut Rollback<'_>,
        chain: Chain,
        volume_id: &str,
        size_gb: u64,
    ) -> BlockResult<VolumeRecord> {
        let export = self.exporter.export_volume(&chain.lv_path)?;
        guard.push(Step::Export(export.clone()));
        let mut record = chain.into_record(volume_id, size_gb);
        record.export = Some(export);
        Ok(record)
    }

    /// Provision and export a new empty volume of `size_gb` GiB
    pub fn create_volume(&self, volume_id: &str, size_gb: u64) -> BlockResult<()> {
        validate_id(volume_id)?;
        if size_gb == 0 {
            return Err(BlockError::InvalidArgument("size must be at least 1 GB".into()));
        }
        let size = backing_size(size_gb)?;
        let _lease = self.claim(&[volume_id])?;
        let mut tx = self.store.begin()?;
        if tx.get(volume_id)?.is_some() {
            return Err(BlockError::AlreadyExists(volume_id.to_string()));
        }

        let mut guard = self.rollback();
        let file = self.root_dir.join(volume_id);
        let chain = self.provision(&mut guard, &file, size)?;
        let record = self.finish(&mut guard, chain, volume_id, size_gb)?;

        tx.add(record).map_err(BlockError::from_meta)?;
        tx.commit().map_err(BlockError::from_meta)?;
        guard.disarm();
        info!("Created volume {} ({} GB)", volume_id, size_gb);
        Ok(())
    }

    /// Provision a volume holding a copy of a snapshot; returns its size in GB
    pub fn create_volume_from_snapshot(
        &self,
        volume_id: &str,
        snapshot_id: &str,
    ) -> BlockResult<u64> {
        validate_id(volume_id)?;
        let _lease = self.claim(&[volume_id])?;
        let mut tx = self.store.begin()?;
        let snapshot = tx
            .get(snapshot_id)?
            .ok_or_else(|| BlockError::NotFound(snapshot_id.to_string()))?;
        if !snapshot.is_available() {
            return Err(BlockError::invalid_state(snapshot_id, snapshot.status));
        }
        if tx.get(volume_id)?.is_some() {
            return Err(BlockError::AlreadyExists(volume_id.to_string()));
        }

        let snapshot_file = snapshot.backing_file(&self.root_dir);
        let snapshot_len = file_len(&snapshot_file, snapshot_id)?;
        let size_gb = bytes_to_gb(snapshot_len);

        let mut guard = self.rollback();
        let file = self.root_dir.join(volume_id);
        let size = snapshot_len.checked_add(LVM_HEADER_LENGTH).ok_or_else(|| {
            BlockError::InvalidArgument(format!("snapshot {snapshot_id} is too large"))
        })?;
        let chain = self.provision(&mut guard, &file, size)?;
        self.lvm.copy(&snapshot_file, &chain.lv_path)?;
        let record = self.finish(&mut guard, chain, volume_id, size_gb)?;

        tx.add(record).map_err(BlockError::from_meta)?;
        tx.commit().map_err(BlockError::from_meta)?;
        guard.disarm();
        info!(
            "Created volume {} from snapshot {} ({} GB)",
            volume_id, snapshot_id, size_gb
        );
        Ok(size_gb)
    }

    /// Extract a point-in-time copy of a volume into `<root>/<snapshot_id>`.
    ///
    /// A temporary PV is added to the volume's group to hold the LVM
    /// snapshot while it is copied out; it is removed again before commit.
    /// Returns the volume group and the transient snapshot LV name.
    pub fn create_snapshot(
        &self,
        volume_id: &str,
        snapshot_id: &str,
    ) -> BlockResult<(String, String)> {
        validate_id(snapshot_id)?;
        let _lease = self.claim(&[volume_id, snapshot_id])?;
        let mut tx = self.store.begin()?;
        let volume = tx
            .get(volume_id)?
            .ok_or_else(|| BlockError::NotFound(volume_id.to_string()))?;
        if !volume.is_available() {
            return Err(BlockError::invalid_state(volume_id, volume.status));
        }
        let (Some(vg_name), Some(origin)) =
            (volume.vg_name.clone(), volume.lv_path(self.lvm.lvm_root()))
        else {
            return Err(BlockError::InvalidState {
                id: volume_id.to_string(),
                status: "not a provisioned volume".into(),
            });
        };
        if tx.get(snapshot_id)?.is_some() {
            return Err(BlockError::AlreadyExists(snapshot_id.to_string()));
        }
        let snapshot_file = self.root_dir.join(snapshot_id);
        if snapshot_file.exists() {
            return Err(BlockError::AlreadyExists(snapshot_file.display().to_string()));
        }

        let snap_lv_name = random_name("lv-snap-", 4);
        let snap_lv_path = self.lvm.lv_path(&vg_name, &snap_lv_name);
        let temp_file = self
            .root_dir
            .join(random_name(volume_id, 6));

        let mut guard = self.rollback();
        guard.push(Step::File(snapshot_file.clone()));
        let keep = guard.depth();

        self.loopback.create_file(&temp_file, backing_size(volume.size_gb)? / 2)?;
        guard.push(Step::File(temp_file.clone()));
        let lo_dev_name = self.loopback.create_loopback(&temp_file)?;
        guard.push(Step::Loopback(lo_dev_name.clone()));
        self.lvm.create_physical_volume(&lo_dev_name)?;
        guard.push(Step::PhysicalVolume(lo_dev_name.clone()));
        self.lvm.extend_volume_group(&vg_name, &lo_dev_name)?;
        guard.push(Step::ExtendedGroup {
            vg_name: vg_name.clone(),
            pv_name: lo_dev_name,
        });
        self.lvm.create_snapshot_volume(&origin, &snap_lv_name)?;
        guard.push(Step::LogicalVolume(snap_lv_path.clone()));

        self.lvm.copy(&snap_lv_path, &snapshot_file)?;
        // lvremove, vgreduce, pvremove, losetup -d, temp file
        guard.unwind_to(keep)?;

        let record = VolumeRecord::snapshot(snapshot_id, snapshot_file, volume.size_gb);
        tx.add(record).map_err(BlockError::from_meta)?;
        tx.commit().map_err(BlockError::from_meta)?;
        guard.disarm();
        info!("Created snapshot {} of {}", snapshot_id, volume_id);
        Ok((vg_name, snap_lv_name))
    }

    /// Register a snapshot file already present at `<root>/<snapshot_id>`
    pub fn add_snapshot(&self, snapshot_id: &str) -> BlockResult<()> {
        validate_id(snapshot_id)?;
        let file = self.root_dir.join(snapshot_id);
        let len = file_len(&file, snapshot_id)?;

        let mut tx = self.store.begin()?;
        tx.add(VolumeRecord::snapshot(snapshot_id, file, bytes_to_gb(len)))
            .map_err(BlockError::from_meta)?;
        tx.commit().map_err(BlockError::from_meta)?;
        info!("Added snapshot {}", snapshot_id);
        Ok(())
    }

    /// Attach existing snapshot files to loop devices and record them
    pub fn load_snapshots(&self, snapshot_ids: &[String], files: &[PathBuf]) -> BlockResult<()> {
        if snapshot_ids.len() != files.len() {
            return Err(BlockError::InvalidArgument(format!(
                "{} snapshot ids but {} files",
                snapshot_ids.len(),
                files.len()
            )));
        }
        let ids: Vec<&str> = snapshot_ids.iter().map(String::as_str).collect();
        let _lease = self.claim(&ids)?;
        let mut tx = self.store.begin()?;
        let mut guard = self.rollback();

        for (snapshot_id, file) in snapshot_ids.iter().zip(files) {
            validate_id(snapshot_id)?;
            if tx.get(snapshot_id)?.is_some() {
                return Err(BlockError::AlreadyExists(snapshot_id.clone()));
            }
            let len = file_len(file, snapshot_id)?;
            let lo_dev_name = self.loopback.create_loopback(file)?;
            guard.push(Step::Loopback(lo_dev_name.clone()));

            let mut record = VolumeRecord::snapshot(snapshot_id, file.clone(), bytes_to_gb(len));
            record.lo_dev_name = Some(lo_dev_name);
            tx.add(record).map_err(BlockError::from_meta)?;
        }

        tx.commit().map_err(BlockError::from_meta)?;
        guard.disarm();
        info!("Loaded {} snapshot(s)", snapshot_ids.len());
        Ok(())
    }

    /// Clone a volume into a new, exported volume of the same size
    pub fn dup_volume(&self, volume_id: &str, dup_volume_id: &str) -> BlockResult<()> {
        validate_id(dup_volume_id)?;
        let _lease = self.claim(&[volume_id, dup_volume_id])?;
        let mut tx = self.store.begin()?;
        let source = tx
            .get(volume_id)?
            .ok_or_else(|| BlockError::NotFound(volume_id.to_string()))?;
        let Some(source_lv) = source.lv_path(self.lvm.lvm_root()) else {
            return Err(BlockError::InvalidState {
                id: volume_id.to_string(),
                status: "not a provisioned volume".into(),
            });
        };
        if tx.get(dup_volume_id)?.is_some() {
            return Err(BlockError::AlreadyExists(dup_volume_id.to_string()));
        }
        let source_len = file_len(&source.backing_file(&self.root_dir), volume_id)?;

        let mut guard = self.rollback();
        let file = self.root_dir.join(dup_volume_id);
        let chain = self.provision(&mut guard, &file, source_len)?;
        self.lvm.copy(&source_lv, &chain.lv_path)?;
        let record = self.finish(&mut guard, chain, dup_volume_id, source.size_gb)?;

        tx.add(record).map_err(BlockError::from_meta)?;
        tx.commit().map_err(BlockError::from_meta)?;
        guard.disarm();
        info!("Duplicated volume {} as {}", volume_id, dup_volume_id);
        Ok(())
    }

    /// Tear down a record's devices in reverse provisioning order.
    ///
    /// Strict mode stops at the first failure; best-effort mode logs it and
    /// carries on. Loop device detach is always best-effort.
    fn teardown(&self, record: &VolumeRecord, best_effort: bool) -> BlockResult<()> {
        let check = |what: &str, result: BlockResult<()>| -> BlockResult<()> {
            match result {
                Err(e) if best_effort => {
                    warn!("{} for {} failed: {}", what, record.volume_id, e);
                    Ok(())
                }
                other => other,
            }
        };

        if let Some(export) = &record.export {
            check("Unexport", self.exporter.unexport_volume(export))?;
        }
        if let Some(lv_path) = record.lv_path(self.lvm.lvm_root()) {
            check("lvremove", self.lvm.remove_logical_volume(&lv_path).map(drop))?;
        }
        if let Some(vg_name) = &record.vg_name {
            check("vgremove", self.lvm.remove_volume_group(vg_name).map(drop))?;
        }
        if let Some(pv_name) = &record.pv_name {
            check("pvremove", self.lvm.remove_physical_volume(pv_name).map(drop))?;
        }
        if let Some(lo_dev_name) = &record.lo_dev_name
            && let Err(e) = self.loopback.detach(lo_dev_name)
        {
            warn!("Detach of {} for {} failed: {}", lo_dev_name, record.volume_id, e);
        }
        Ok(())
    }

    fn remove_backing_file(&self, record: &VolumeRecord) {
        let file = record.backing_file(&self.root_dir);
        match std::fs::remove_file(&file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove {}: {}", file.display(), e),
        }
    }

    /// Unexport and dismantle a volume, delete its backing file and record
    pub fn delete_volume(&self, volume_id: &str) -> BlockResult<()> {
        let _lease = self.claim(&[volume_id])?;
        let mut tx = self.store.begin()?;
        let record = tx
            .get(volume_id)?
            .ok_or_else(|| BlockError::NotFound(volume_id.to_string()))?;

        self.teardown(&record, false)?;
        if record.is_provisioned() {
            self.remove_backing_file(&record);
        }
        tx.remove(volume_id).map_err(BlockError::from_meta)?;
        tx.commit().map_err(BlockError::from_meta)?;
        info!("Deleted volume {}", volume_id);
        Ok(())
    }

    /// Forget a snapshot; its file under the storage root is left in place
    pub fn delete_snapshot(&self, snapshot_id: &str) -> BlockResult<()> {
        let _lease = self.claim(&[snapshot_id])?;
        let mut tx = self.store.begin()?;
        let record = tx
            .get(snapshot_id)?
            .ok_or_else(|| BlockError::NotFound(snapshot_id.to_string()))?;

        self.teardown(&record, false)?;
        tx.remove(snapshot_id).map_err(BlockError::from_meta)?;
        tx.commit().map_err(BlockError::from_meta)?;
        info!("Deleted snapshot {}", snapshot_id);
        Ok(())
    }

    /// Best-effort removal of a volume and its record; silent when absent
    pub fn clean_volume(&self, volume_id: &str) {
        let result = (|| -> BlockResult<()> {
            let _lease = self.claim(&[volume_id])?;
            let mut tx = self.store.begin()?;
            let Some(record) = tx.get(volume_id)? else {
                return Ok(());
            };
            self.teardown(&record, true)?;
            if record.is_provisioned() {
                self.remove_backing_file(&record);
            }
            tx.remove(volume_id)?;
            tx.commit()?;
            info!("Cleaned volume {}", volume_id);
            Ok(())
        })();
        if let Err(e) = result {
            warn!("Cleaning volume {} failed: {}", volume_id, e);
        }
    }

    /// Drop a snapshot record if present
    pub fn clean_snapshot(&self, snapshot_id: &str) {
        let result = (|| -> BlockResult<()> {
            let mut tx = self.store.begin()?;
            if tx.get(snapshot_id)?.is_some() {
                tx.remove(snapshot_id)?;
                tx.commit()?;
                info!("Cleaned snapshot {}", snapshot_id);
            }
            Ok(())
        })();
        if let Err(e) = result {
            warn!("Cleaning snapshot {} failed: {}", snapshot_id, e);
        }
    }

    /// Restart-time reconciliation.
    ///
    /// Re-attaches loop devices whose backing file still exists, marks the
    /// others failed, then re-exports every available exported record.
    /// Per-record failures are logged and skipped.
    pub fn reload(&self) -> BlockResult<()> {
        let mut tx = self.store.begin()?;

        for mut record in tx.get_all()? {
            let Some(lo_dev_name) = record.lo_dev_name.clone() else {
                continue;
            };
            let file = record.backing_file(&self.root_dir);
            if !file.exists() {
                error!(
                    "Backing file {} of {} not found, marking failed",
                    file.display(),
                    record.volume_id
                );
                if record.status != VolumeStatus::Failed {
                    record.status = VolumeStatus::Failed;
                    tx.update(record)?;
                }
                continue;
            }
            match self.loopback.status(&lo_dev_name) {
                Ok(status) if status.is_empty() => {
                    if let Err(e) = self.loopback.attach(&file, &lo_dev_name) {
                        error!("Unable to re-attach {}: {}", record.volume_id, e);
                    }
                }
                Ok(_) => {}
                Err(e) => error!("Unable to query {}: {}", lo_dev_name, e),
            }
        }

        for mut record in tx.get_all()? {
            if !record.is_available() {
                continue;
            }
            let (Some(mut export), Some(lv_path)) =
                (record.export.clone(), record.lv_path(self.lvm.lvm_root()))
            else {
                continue;
            };
            match self.exporter.reexport(&lv_path, &mut export) {
                Ok(()) if record.export.as_ref() != Some(&export) => {
                    record.export = Some(export);
                    tx.update(record)?;
                }
                Ok(()) => {}
                Err(e) => error!("Unable to reload volume {}: {}", record.volume_id, e),
            }
        }

        tx.commit()?;
        info!("Reload complete");
        Ok(())
    }

    /// Statuses for every id, or `NotFound` for the first unknown one
    pub fn get_status(&self, ids: &[String]) -> BlockResult<Vec<VolumeStatus>> {
        let tx = self.store.begin()?;
        ids.iter()
            .map(|id| {
                tx.get(id)?
                    .map(|record| record.status)
                    .ok_or_else(|| BlockError::NotFound(id.clone()))
            })
            .collect()
    }

    /// Connection string of an exported volume
    pub fn get_volume_property(&self, volume_id: &str) -> BlockResult<String> {
        let tx = self.store.begin()?;
        let record = tx
            .get(volume_id)?
            .ok_or_else(|| BlockError::NotFound(volume_id.to_string()))?;
        let Some(export) = &record.export else {
            return Err(BlockError::InvalidState {
                id: volume_id.to_string(),
                status: "not exported".into(),
            });
        };
        self.exporter.connection_string(export)
    }

    /// Path of the snapshot's backing file for transfer off-host
    pub fn prepare_for_transfer(&self, snapshot_id: &str) -> BlockResult<PathBuf> {
        let tx = self.store.begin()?;
        let record = tx
            .get(snapshot_id)?
            .ok_or_else(|| BlockError::NotFound(snapshot_id.to_string()))?;
        Ok(record.backing_file(&self.root_dir))
    }

    /// `[vg, lv]` of a record in AoE mode, empty otherwise
    pub fn get_snapshot_values(&self, snapshot_id: &str) -> BlockResult<Vec<String>> {
        if self.mode() != ExportMode::Aoe {
            return Ok(Vec::new());
        }
        let tx = self.store.begin()?;
        Ok(match tx.get(snapshot_id)? {
            Some(VolumeRecord {
                vg_name: Some(vg),
                lv_name: Some(lv),
                ..
            }) => vec![vg, lv],
            _ => Vec::new(),
        })
    }

    /// Recorded size in GB, 0 for unknown ids
    pub fn get_snapshot_size(&self, snapshot_id: &str) -> BlockResult<u64> {
        let tx = self.store.begin()?;
        Ok(tx.get(snapshot_id)?.map_or(0, |record| record.size_gb))
    }
}

//! iSCSI export through the tgt daemon

use crate::error::{BlockError, BlockResult};
use crate::numbering::IscsiNumbering;
use crate::runner::RootWrap;
use crate::sealer::{PasswordSealer, generate_password};
use blockctl_meta_store::IscsiExport;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

const ALREADY_EXISTS: &str = "already exists";
const NOT_FOUND: &str = "can't find";

/// Serves logical volumes as tgt targets with CHAP authentication
pub struct IscsiExporter {
    wrap: RootWrap,
    numbering: IscsiNumbering,
    sealer: Arc<dyn PasswordSealer>,
    storage_host: String,
}

impl IscsiExporter {
    pub fn new(
        wrap: RootWrap,
        numbering: IscsiNumbering,
        sealer: Arc<dyn PasswordSealer>,
        storage_host: impl Into<String>,
    ) -> Self {
        Self {
            wrap,
            numbering,
            sealer,
            storage_host: storage_host.into(),
        }
    }

    /// Run `tgtadm --lld iscsi <args>`; a failure whose stderr contains
    /// `tolerated` counts as done
    fn tgtadm(&self, args: &[&str], tolerated: Option<&str>) -> BlockResult<()> {
        let mut argv = vec!["tgtadm", "--lld", "iscsi"];
        argv.extend_from_slice(args);
        match self.wrap.run_status(&argv) {
            Ok(_) => Ok(()),
            Err(BlockError::CommandFailure { stderr, .. })
                if tolerated.is_some_and(|msg| stderr.contains(msg)) =>
            {
                debug!("tgtadm {:?}: {}", args, stderr.trim());
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn export_target(
        &self,
        export: &IscsiExport,
        lv_path: &Path,
        password: &str,
        reexport: bool,
    ) -> BlockResult<()> {
        let tid = export.tid.to_string();
        let lun = export.lun.to_string();
        let lv = lv_path.to_string_lossy();
        let user = export.store_user.as_str();
        let existing = reexport.then_some(ALREADY_EXISTS);

        self.tgtadm(
            &["--op", "new", "--mode", "target", "--tid", &tid, "-T", &export.store_name],
            existing,
        )?;
        self.tgtadm(
            &["--op", "new", "--mode", "logicalunit", "--tid", &tid, "--lun", &lun, "-b", &lv],
            existing,
        )?;
        // Accounts are shared by every target of the store user
        self.tgtadm(
            &["--op", "new", "--mode", "account", "--user", user, "--password", password],
            Some(ALREADY_EXISTS),
        )?;
        self.tgtadm(
            &["--op", "bind", "--mode", "account", "--tid", &tid, "--user", user],
            existing,
        )?;
        self.tgtadm(
            &["--op", "bind", "--mode", "target", "--tid", &tid, "-I", "ALL"],
            existing,
        )?;
        Ok(())
    }

    /// Delete the logical unit, then the target; the target delete runs even
    /// when the first step fails and the first error is returned. Units or
    /// targets tgtd no longer knows count as removed.
    fn remove_target(&self, export: &IscsiExport) -> BlockResult<()> {
        let tid = export.tid.to_string();
        let lun = export.lun.to_string();
        let unit = self.tgtadm(
            &["--op", "delete", "--mode", "logicalunit", "--tid", &tid, "--lun", &lun],
            Some(NOT_FOUND),
        );
        if let Err(e) = &unit {
            warn!("Failed to delete logical unit {} of target {}: {}", lun, tid, e);
        }
        self.tgtadm(
            &["--op", "delete", "--mode", "target", "--tid", &tid],
            Some(NOT_FOUND),
        )?;
        unit
    }

    pub fn export_volume(&self, lv_path: &Path) -> BlockResult<IscsiExport> {
        let target = self.numbering.allocate()?;
        let password = generate_password();
        let export = IscsiExport {
            tid: target.tid,
            lun: target.lun,
            store_name: target.store_name,
            store_user: target.store_user,
            encrypted_password: self.sealer.seal(&password)?,
        };

        if let Err(e) = self.export_target(&export, lv_path, &password, false) {
            if let Err(cleanup) = self.remove_target(&export) {
                warn!("Failed to clean up target {}: {}", export.tid, cleanup);
            }
            return Err(e);
        }
        info!(
            "Exported {} as {} (tid {})",
            lv_path.display(),
            export.store_name,
            export.tid
        );
        Ok(export)
    }

    /// Re-create the target with a fresh secret
    pub fn reexport(&self, lv_path: &Path, export: &mut IscsiExport) -> BlockResult<()> {
        let password = generate_password();
        let sealed = self.sealer.seal(&password)?;
        self.export_target(export, lv_path, &password, true)?;
        export.encrypted_password = sealed;
        debug!("Re-exported {} (tid {})", export.store_name, export.tid);
        Ok(())
    }

    pub fn unexport_volume(&self, export: &IscsiExport) -> BlockResult<()> {
        self.remove_target(export)?;
        info!("Removed target {} (tid {})", export.store_name, export.tid);
        Ok(())
    }

    /// `<host>,<store>,<sealed password>`
    #[must_use]
    pub fn connection_string(&self, export: &IscsiExport) -> String {
        format!(
            "{},{},{}",
            self.storage_host, export.store_name, export.encrypted_password
        )
    }

    pub fn check_preconditions(&self) -> BlockResult<()> {
        self.wrap
            .run(&["which", "tgtadm"])
            .map_err(|e| BlockError::Precondition(format!("tgtadm is not available: {e}")))?;
        Ok(())
    }
}

//! ATA-over-Ethernet export through `vblade`

use crate::error::{BlockError, BlockResult};
use crate::lvm::LvmTools;
use crate::numbering::AoeNumbering;
use crate::runner::RootWrap;
use blockctl_common::config::AoeConfig;
use blockctl_meta_store::AoeExport;
use parking_lot::RwLock;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Serves logical volumes with one `vblade` daemon per volume
pub struct AoeExporter {
    wrap: RootWrap,
    lvm: LvmTools,
    numbering: AoeNumbering,
    interface: RwLock<String>,
    etherd_dir: PathBuf,
    run_dir: PathBuf,
    poll_attempts: u32,
    initial_backoff: Duration,
    backoff_step: Duration,
}

impl AoeExporter {
    pub fn new(
        wrap: RootWrap,
        lvm: LvmTools,
        numbering: AoeNumbering,
        config: &AoeConfig,
        run_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            wrap,
            lvm,
            numbering,
            interface: RwLock::new(config.interface.clone()),
            etherd_dir: config.etherd_dir.clone(),
            run_dir: run_dir.into(),
            poll_attempts: config.poll_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            backoff_step: Duration::from_millis(config.backoff_step_ms),
        }
    }

    pub fn set_interface(&self, interface: &str) {
        info!("AoE exports now bind to {}", interface);
        *self.interface.write() = interface.to_string();
    }

    #[must_use]
    pub fn interface(&self) -> String {
        self.interface.read().clone()
    }

    /// `vblade-<major>.<minor>.pid` under the run directory
    #[must_use]
    pub fn pid_file(&self, major: u32, minor: u32) -> PathBuf {
        self.run_dir.join(format!("vblade-{major}.{minor}.pid"))
    }

    fn is_alive(&self, pid: u32) -> bool {
        !self.wrap.process_cmdline(pid).is_empty()
    }

    /// Start vblade and wait for it to stay up
    fn serve(&self, major: u32, minor: u32, lv_path: &Path) -> BlockResult<u32> {
        let interface = self.interface();
        let pid = self.wrap.spawn(&[
            "vblade",
            &major.to_string(),
            &minor.to_string(),
            &interface,
            &lv_path.to_string_lossy(),
        ])?;

        let mut backoff = self.initial_backoff;
        for attempt in 1..=self.poll_attempts {
            if self.is_alive(pid) {
                self.write_pid_file(major, minor, pid);
                info!(
                    "Exported {} as e{}.{} on {} (pid {})",
                    lv_path.display(),
                    major,
                    minor,
                    interface,
                    pid
                );
                return Ok(pid);
            }
            if attempt < self.poll_attempts {
                debug!("vblade pid {} not up yet, retrying in {:?}", pid, backoff);
                std::thread::sleep(backoff);
                backoff += self.backoff_step;
            }
        }

        Err(BlockError::ExportFailed(format!(
            "vblade for {} as e{major}.{minor} on {interface} (pid {pid}) did not start",
            lv_path.display()
        )))
    }

    fn write_pid_file(&self, major: u32, minor: u32, pid: u32) {
        let path = self.pid_file(major, minor);
        if let Err(e) = std::fs::write(&path, pid.to_string()) {
            warn!("Could not write pid file {}: {}", path.display(), e);
        }
    }

    pub fn export_volume(&self, lv_path: &Path) -> BlockResult<AoeExport> {
        let (major, minor) = self.numbering.allocate()?;
        let pid = self.serve(major, minor, lv_path)?;
        Ok(AoeExport {
            major,
            minor,
            pid: Some(pid),
        })
    }

    /// Reactivate the LV and respawn vblade unless the recorded one still runs
    pub fn reexport(&self, lv_path: &Path, export: &mut AoeExport) -> BlockResult<()> {
        self.lvm.activate(lv_path)?;
        if let Some(pid) = export.pid
            && self.is_alive(pid)
        {
            debug!("e{}.{} still served by pid {}", export.major, export.minor, pid);
            return Ok(());
        }
        export.pid = Some(self.serve(export.major, export.minor, lv_path)?);
        Ok(())
    }

    pub fn unexport_volume(&self, export: &AoeExport) -> BlockResult<()> {
        let Some(pid) = export.pid else {
            return Ok(());
        };
        if self.is_alive(pid) {
            self.wrap.run_status(&["kill", &pid.to_string()])?;
            info!("Stopped vblade pid {} for e{}.{}", pid, export.major, export.minor);
        }
        let pid_file = self.pid_file(export.major, export.minor);
        match std::fs::remove_file(&pid_file) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove pid file {}: {}", pid_file.display(), e),
        }
        Ok(())
    }

    /// Device node a compute host sees, e.g. `/dev/etherd/e0.1`
    #[must_use]
    pub fn connection_string(&self, export: &AoeExport) -> String {
        self.etherd_dir
            .join(format!("e{}.{}", export.major, export.minor))
            .display()
            .to_string()
    }

    pub fn check_preconditions(&self) -> BlockResult<()> {
        self.wrap
            .run(&["which", "vblade"])
            .map_err(|e| BlockError::Precondition(format!("vblade is not available: {e}")))?;
        Ok(())
    }
}

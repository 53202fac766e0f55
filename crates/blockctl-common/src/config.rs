//! Configuration types for blockctl
//!
//! Every section falls back to its `Default` when absent from the TOML
//! file, so an empty file (or no file at all) yields a usable iSCSI setup.

use crate::error::{Error, Result};
use crate::types::ExportMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration for blockctl
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backing-file and metadata locations
    pub storage: StorageConfig,
    /// Privileged helper and runtime directories
    pub system: SystemConfig,
    /// Export backend selection and settings
    pub export: ExportConfig,
    /// Log settings
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// A missing file is not an error and yields the defaults; a file that
    /// exists but fails to parse is.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| Error::ReadConfig {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| Error::ParseConfig {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse configuration from TOML text
    pub fn from_toml(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Sanity-check values that serde cannot express
    pub fn validate(&self) -> Result<()> {
        if self.storage.root_dir.as_os_str().is_empty() {
            return Err(Error::configuration("storage.root_dir must not be empty"));
        }
        if self.export.aoe.poll_attempts == 0 {
            return Err(Error::configuration("export.aoe.poll_attempts must be at least 1"));
        }
        if self.export.mode == ExportMode::Aoe && self.export.aoe.interface.is_empty() {
            return Err(Error::configuration("export.aoe.interface is required in aoe mode"));
        }
        if self.export.mode == ExportMode::Iscsi && self.export.iscsi.storage_host.is_empty() {
            return Err(Error::configuration(
                "export.iscsi.storage_host is required in iscsi mode",
            ));
        }
        Ok(())
    }
}

/// Storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory holding volume and snapshot backing files
    pub root_dir: PathBuf,
    /// Directory under which LVM exposes `<vg>/<lv>` device nodes
    pub lvm_root: PathBuf,
    /// Write zeros over the whole backing file instead of allocating it sparse
    pub zero_fill_volumes: bool,
    /// Metadata database file
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("/var/lib/blockctl/volumes"),
            lvm_root: PathBuf::from("/dev"),
            zero_fill_volumes: false,
            db_path: PathBuf::from("/var/lib/blockctl/blockctl.db"),
        }
    }
}

/// Host integration settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemConfig {
    /// Privileged helper every external command is routed through
    pub root_wrapper: PathBuf,
    /// Runtime directory for export pid files
    pub run_dir: PathBuf,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            root_wrapper: PathBuf::from("/usr/lib/blockctl/blockctl-rootwrap"),
            run_dir: PathBuf::from("/var/run/blockctl"),
        }
    }
}

/// Export backend configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Which backend serves volumes
    pub mode: ExportMode,
    /// AoE settings (used when `mode = "aoe"`)
    pub aoe: AoeConfig,
    /// iSCSI settings (used when `mode = "iscsi"`)
    pub iscsi: IscsiConfig,
}

/// ATA-over-Ethernet settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AoeConfig {
    /// Network interface vblade binds to
    pub interface: String,
    /// Directory holding `e<major>.<minor>` device nodes
    pub etherd_dir: PathBuf,
    /// Liveness probes after spawning vblade
    pub poll_attempts: u32,
    /// Sleep before the second probe
    pub initial_backoff_ms: u64,
    /// Added to the sleep after every failed probe
    pub backoff_step_ms: u64,
}

impl Default for AoeConfig {
    fn default() -> Self {
        Self {
            interface: "eth0".to_string(),
            etherd_dir: PathBuf::from("/dev/etherd"),
            poll_attempts: 5,
            initial_backoff_ms: 300,
            backoff_step_ms: 300,
        }
    }
}

/// iSCSI settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct IscsiConfig {
    /// Host advertised to initiators in connection strings
    pub storage_host: String,
    /// Prefix of generated target names
    pub store_prefix: String,
    /// CHAP user bound to every target
    pub store_user: String,
    /// File containing a base64 AES-256 key used to seal target passwords
    pub password_key_file: Option<PathBuf>,
}

impl Default for IscsiConfig {
    fn default() -> Self {
        Self {
            storage_host: "localhost".to_string(),
            store_prefix: "iqn.2009-06.org.blockctl:store".to_string(),
            store_user: "blockctl".to_string(),
            password_key_file: None,
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

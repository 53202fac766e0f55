//! blockctl - Block Volume Controller CLI
//!
//! Runs one volume or snapshot operation against the local host and the
//! metadata database, then exits.

use anyhow::{Context, Result};
use blockctl_common::{Config, ExportMode};
use blockctl_lvm::{AesGcmSealer, SystemRunner, VolumeController};
use blockctl_meta_store::ExportDescriptor;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "blockctl")]
#[command(about = "LVM-on-loopback block volume controller")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "BLOCKCTL_CONFIG", default_value = "/etc/blockctl/blockctl.toml")]
    config: PathBuf,

    /// Log level (overrides the config file, RUST_LOG overrides both)
    #[arg(long)]
    log_level: Option<String>,

    /// Export mode (iscsi or aoe)
    #[arg(long)]
    mode: Option<ExportMode>,

    /// Directory holding backing files
    #[arg(long)]
    root_dir: Option<PathBuf>,

    /// Metadata database path
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Network interface for AoE exports
    #[arg(long)]
    interface: Option<String>,

    /// Print results as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Volume operations
    Volume {
        #[command(subcommand)]
        action: VolumeCommands,
    },
    /// Snapshot operations
    Snapshot {
        #[command(subcommand)]
        action: SnapshotCommands,
    },
    /// Status of one or more volumes or snapshots
    Status {
        /// Volume or snapshot IDs
        #[arg(required = true)]
        ids: Vec<String>,
    },
    /// List every record in the metadata store
    List,
    /// Re-attach loop devices and re-export volumes after a restart
    Reload,
    /// Verify the host has everything the controller needs
    Check,
    /// Write a new password sealing key
    GenKey {
        /// Key file to create
        path: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum VolumeCommands {
    /// Create and export an empty volume
    Create {
        /// Volume ID
        volume_id: String,
        /// Size in GB
        size_gb: u64,
    },
    /// Create a volume holding a copy of a snapshot
    FromSnapshot {
        /// New volume ID
        volume_id: String,
        /// Source snapshot ID
        snapshot_id: String,
    },
    /// Clone a volume
    Dup {
        /// Source volume ID
        volume_id: String,
        /// New volume ID
        dup_volume_id: String,
    },
    /// Unexport and delete a volume
    Delete {
        /// Volume ID
        volume_id: String,
    },
    /// Best-effort removal, ignoring failures
    Clean {
        /// Volume ID
        volume_id: String,
    },
    /// Connection string of an exported volume
    Property {
        /// Volume ID
        volume_id: String,
    },
}

#[derive(Subcommand, Debug)]
enum SnapshotCommands {
    /// Copy a volume into a snapshot file
    Create {
        /// Source volume ID
        volume_id: String,
        /// Snapshot ID
        snapshot_id: String,
    },
    /// Register a snapshot file already in the storage root
    Add {
        /// Snapshot ID
        snapshot_id: String,
    },
    /// Attach snapshot files and register them
    Load {
        /// Snapshot IDs, paired in order with --file
        #[arg(long = "id", required = true)]
        ids: Vec<String>,
        /// Snapshot files
        #[arg(long = "file", required = true)]
        files: Vec<PathBuf>,
    },
    /// Forget a snapshot, leaving its file in place
    Delete {
        /// Snapshot ID
        snapshot_id: String,
    },
    /// Drop a snapshot record if present
    Clean {
        /// Snapshot ID
        snapshot_id: String,
    },
    /// Path of the snapshot file for transfer
    Transfer {
        /// Snapshot ID
        snapshot_id: String,
    },
    /// Volume group and logical volume of a record (AoE mode)
    Values {
        /// Volume or snapshot ID
        snapshot_id: String,
    },
    /// Recorded size in GB
    Size {
        /// Snapshot ID
        snapshot_id: String,
    },
}

fn load_config(args: &Args) -> Result<Config> {
    let mut config = Config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(level) = &args.log_level {
        config.logging.level.clone_from(level);
    }
    if let Some(mode) = args.mode {
        config.export.mode = mode;
    }
    if let Some(root_dir) = &args.root_dir {
        config.storage.root_dir.clone_from(root_dir);
    }
    if let Some(db_path) = &args.db_path {
        config.storage.db_path.clone_from(db_path);
    }
    Ok(config)
}

fn describe_export(export: &ExportDescriptor) -> String {
    match export {
        ExportDescriptor::Aoe(aoe) => format!("aoe e{}.{}", aoe.major, aoe.minor),
        ExportDescriptor::Iscsi(iscsi) => format!("iscsi {} tid {}", iscsi.store_name, iscsi.tid),
    }
}

fn print_value(json: bool, value: &serde_json::Value) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else if let Some(text) = value.as_str() {
        println!("{text}");
    } else {
        println!("{value}");
    }
    Ok(())
}

fn run(args: &Args, config: &Config) -> Result<()> {
    if let Commands::GenKey { path } = &args.command {
        AesGcmSealer::write_key_file(path)
            .with_context(|| format!("writing key to {}", path.display()))?;
        println!("Wrote sealing key to {}", path.display());
        return Ok(());
    }

    let controller = VolumeController::new(config, Arc::new(SystemRunner), None)
        .context("starting volume controller")?;
    if let Some(interface) = &args.interface {
        controller.set_storage_interface(interface);
    }
    debug!("Running {:?}", args.command);

    match &args.command {
        Commands::Volume { action } => match action {
            VolumeCommands::Create { volume_id, size_gb } => {
                controller.create_volume(volume_id, *size_gb)?;
                println!("Created volume {volume_id}");
            }
            VolumeCommands::FromSnapshot {
                volume_id,
                snapshot_id,
            } => {
                let size_gb = controller.create_volume_from_snapshot(volume_id, snapshot_id)?;
                print_value(args.json, &serde_json::json!(size_gb))?;
            }
            VolumeCommands::Dup {
                volume_id,
                dup_volume_id,
            } => {
                controller.dup_volume(volume_id, dup_volume_id)?;
                println!("Duplicated {volume_id} as {dup_volume_id}");
            }
            VolumeCommands::Delete { volume_id } => {
                controller.delete_volume(volume_id)?;
                println!("Deleted volume {volume_id}");
            }
            VolumeCommands::Clean { volume_id } => controller.clean_volume(volume_id),
            VolumeCommands::Property { volume_id } => {
                let property = controller.get_volume_property(volume_id)?;
                print_value(args.json, &serde_json::json!(property))?;
            }
        },
        Commands::Snapshot { action } => match action {
            SnapshotCommands::Create {
                volume_id,
                snapshot_id,
            } => {
                let (vg_name, lv_name) = controller.create_snapshot(volume_id, snapshot_id)?;
                print_value(args.json, &serde_json::json!([vg_name, lv_name]))?;
            }
            SnapshotCommands::Add { snapshot_id } => {
                controller.add_snapshot(snapshot_id)?;
                println!("Added snapshot {snapshot_id}");
            }
            SnapshotCommands::Load { ids, files } => {
                controller.load_snapshots(ids, files)?;
                println!("Loaded {} snapshot(s)", ids.len());
            }
            SnapshotCommands::Delete { snapshot_id } => {
                controller.delete_snapshot(snapshot_id)?;
                println!("Deleted snapshot {snapshot_id}");
            }
            SnapshotCommands::Clean { snapshot_id } => controller.clean_snapshot(snapshot_id),
            SnapshotCommands::Transfer { snapshot_id } => {
                let path = controller.prepare_for_transfer(snapshot_id)?;
                print_value(args.json, &serde_json::json!(path))?;
            }
            SnapshotCommands::Values { snapshot_id } => {
                let values = controller.get_snapshot_values(snapshot_id)?;
                print_value(args.json, &serde_json::json!(values))?;
            }
            SnapshotCommands::Size { snapshot_id } => {
                let size_gb = controller.get_snapshot_size(snapshot_id)?;
                print_value(args.json, &serde_json::json!(size_gb))?;
            }
        },
        Commands::Status { ids } => {
            let statuses = controller.get_status(ids)?;
            if args.json {
                let map: serde_json::Map<String, serde_json::Value> = ids
                    .iter()
                    .zip(&statuses)
                    .map(|(id, status)| (id.clone(), status.as_str().into()))
                    .collect();
                print_value(true, &map.into())?;
            } else {
                for (id, status) in ids.iter().zip(&statuses) {
                    println!("{id}\t{status}");
                }
            }
        }
        Commands::List => {
            let records = controller.store().begin()?.get_all()?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                println!("{:<24} {:>6} {:<10} {:<12} EXPORT", "ID", "GB", "STATUS", "LOOP");
                for record in &records {
                    println!(
                        "{:<24} {:>6} {:<10} {:<12} {}",
                        record.volume_id,
                        record.size_gb,
                        record.status,
                        record.lo_dev_name.as_deref().unwrap_or("-"),
                        record.export.as_ref().map_or_else(|| "-".to_string(), describe_export),
                    );
                }
            }
        }
        Commands::Reload => {
            controller.reload()?;
            println!("Reload complete");
        }
        Commands::Check => {
            controller.check_preconditions()?;
            println!("Host ready ({} mode)", controller.mode());
        }
        Commands::GenKey { .. } => {}
    }
    Ok(())
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();
    let config = load_config(&args)?;

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    run(&args, &config)
}

//! Driver configuration shared by every NFS service.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{error, info};

use crate::types::{AccessMode, ControllerCapability, PluginCapability};

/// Name reported by `GetPluginInfo` unless overridden.
pub const DRIVER_NAME: &str = "csi-nfs";
/// Version reported by `GetPluginInfo`.
pub const DRIVER_VERSION: &str = env!("CARGO_PKG_VERSION");
/// Suffix of snapshot archives.
pub const SNAPSHOT_EXT: &str = ".tar.gz";

const KIB: f64 = 1024.0;
const MIB: f64 = KIB * 1024.0;
const GIB: f64 = MIB * 1024.0;
const TIB: f64 = GIB * 1024.0;
const PIB: f64 = TIB * 1024.0;
const EIB: f64 = PIB * 1024.0;

/// Capacity limit used when the configured value cannot be parsed.
pub const DEFAULT_MAX_STORAGE_CAPACITY: u64 = 50 * 1024 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
#[error(
    "invalid byte quantity {0:?}: expected a positive number with a unit like M, MB, MiB, G, GB or GiB"
)]
pub struct CapacityParseError(pub String);

/// Parse a human readable byte quantity such as `50G`, `512MiB` or `1.5T`.
///
/// Units are powers of 1024 regardless of spelling (`G`, `GB` and `GiB` are
/// equal) and are matched case-insensitively.  A unit is mandatory.
pub fn parse_capacity(input: &str) -> Result<u64, CapacityParseError> {
    let invalid = || CapacityParseError(input.to_owned());

    let trimmed = input.trim().to_ascii_uppercase();
    let split = trimmed
        .find(|c: char| c.is_ascii_alphabetic())
        .ok_or_else(invalid)?;
    let (number, unit) = trimmed.split_at(split);

    let value: f64 = number.trim().parse().map_err(|_| invalid())?;
    if !value.is_finite() || value < 0.0 {
        return Err(invalid());
    }

    let multiplier = match unit {
        "E" | "EB" | "EIB" => EIB,
        "P" | "PB" | "PIB" => PIB,
        "T" | "TB" | "TIB" => TIB,
        "G" | "GB" | "GIB" => GIB,
        "M" | "MB" | "MIB" => MIB,
        "K" | "KB" | "KIB" => KIB,
        "B" => 1.0,
        _ => return Err(invalid()),
    };

    let bytes = value * multiplier;
    if bytes >= u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(bytes as u64)
}

/// Immutable driver configuration.
///
/// Built once by the binary and shared as `Arc<DriverConfig>`.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub name: String,
    pub version: String,
    pub node_id: String,
    pub endpoint: String,

    /// Requests at or above this many bytes are rejected.
    pub max_storage_capacity: u64,
    /// Remote NFS host.
    pub nfs_server: String,
    /// Export path on the remote host that holds every volume.
    pub nfs_share_point: String,
    /// Where the export is mounted on the controller host.
    pub local_mount_point: PathBuf,
    pub local_mount_options: String,
    /// Snapshot directory, relative to `local_mount_point`.
    pub snapshot_sub_path: String,

    pub enable_identity: bool,
    pub enable_controller: bool,
    pub enable_node: bool,

    /// tar-compatible archiver.
    pub tar_program: PathBuf,

    pub volume_access_modes: Vec<AccessMode>,
    pub controller_capabilities: Vec<ControllerCapability>,
    pub plugin_capabilities: Vec<PluginCapability>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            name: DRIVER_NAME.to_owned(),
            version: DRIVER_VERSION.to_owned(),
            node_id: String::new(),
            endpoint: "unix:///csi/csi.sock".to_owned(),
            max_storage_capacity: DEFAULT_MAX_STORAGE_CAPACITY,
            nfs_server: String::new(),
            nfs_share_point: "/".to_owned(),
            local_mount_point: PathBuf::from("/nfs"),
            local_mount_options: "rw,vers=4,soft,timeo=10,retry=3".to_owned(),
            snapshot_sub_path: "/snapshot".to_owned(),
            enable_identity: false,
            enable_controller: false,
            enable_node: false,
            tar_program: PathBuf::from("tar"),
            volume_access_modes: vec![AccessMode::MultiNodeMultiWriter],
            controller_capabilities: vec![
                ControllerCapability::CreateDeleteVolume,
                ControllerCapability::CreateDeleteSnapshot,
            ],
            plugin_capabilities: vec![PluginCapability::ControllerService],
        }
    }
}

impl DriverConfig {
    /// Set the capacity limit from a human readable quantity, falling back to
    /// [`DEFAULT_MAX_STORAGE_CAPACITY`] when it cannot be parsed.
    pub fn with_max_storage_capacity(mut self, quantity: &str) -> Self {
        self.max_storage_capacity = match parse_capacity(quantity) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "failed to parse max storage capacity, using default of 50G");
                DEFAULT_MAX_STORAGE_CAPACITY
            }
        };
        self
    }

    /// Snapshot directory relative to the local mount point.
    pub fn snapshot_dir(&self) -> &Path {
        Path::new(self.snapshot_sub_path.trim_start_matches('/'))
    }

    /// Archive path of `snapshot_id`, relative to the local mount point.
    pub fn snapshot_archive(&self, snapshot_id: &str) -> PathBuf {
        self.snapshot_dir()
            .join(format!("{snapshot_id}{SNAPSHOT_EXT}"))
    }

    /// Export path of volume `name` on the NFS server.
    pub fn share_for(&self, name: &str) -> String {
        if self.nfs_share_point.is_empty() {
            return name.to_owned();
        }
        format!("{}/{name}", self.nfs_share_point.trim_end_matches('/'))
    }

    /// Log the effective driver settings once at startup.
    pub fn log_summary(&self) {
        info!(
            name = %self.name,
            version = %self.version,
            node_id = %self.node_id,
            endpoint = %self.endpoint,
            "driver configured"
        );
        for mode in &self.volume_access_modes {
            info!(?mode, "enabling volume access mode");
        }
        for cap in &self.controller_capabilities {
            info!(?cap, "enabling controller service capability");
        }
    }
}

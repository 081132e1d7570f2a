use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use libcsi::backend::nfs::DriverConfig;
use libcsi::backend::nfs::config::DRIVER_NAME;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// CSI based NFS driver.
#[derive(Debug, Parser)]
#[command(name = "csi-nfs", version, about)]
pub struct Cli {
    /// Enable debug logging and per-call request/response logs
    #[arg(long)]
    pub debug: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Enable the Identity service
    #[arg(long)]
    pub enable_identity_server: bool,

    /// Enable the Controller service
    #[arg(long)]
    pub enable_controller_server: bool,

    /// Enable the Node service
    #[arg(long)]
    pub enable_node_server: bool,

    /// CSI node ID
    #[arg(long = "nodeid", env = "CSI_NODE_ID")]
    pub node_id: String,

    /// CSI server endpoint (unix:///path or tcp://host:port)
    #[arg(long, env = "CSI_ENDPOINT", default_value = "unix:///csi/csi.sock")]
    pub endpoint: String,

    /// CSI driver name
    #[arg(long, hide = true, default_value = DRIVER_NAME)]
    pub name: String,

    /// NFS server address
    #[arg(long, default_value = "")]
    pub nfs_server: String,

    /// Export path on the NFS server
    #[arg(long = "nfs-server-share-point", default_value = "/")]
    pub nfs_share_point: String,

    /// Where the controller mounts the export locally
    #[arg(long, default_value = "/nfs")]
    pub nfs_local_mount_point: PathBuf,

    /// Options for the local export mount
    #[arg(long, default_value = "rw,vers=4,soft,timeo=10,retry=3")]
    pub nfs_local_mount_options: String,

    /// Snapshot directory below the local mount point
    #[arg(long = "nfs-local-snapshot-mount-point", default_value = "/snapshot")]
    pub nfs_snapshot_path: String,

    /// Maximum size of a single volume, e.g. 50G or 512M
    #[arg(long, default_value = "50G")]
    pub max_storage_capacity: String,

    /// tar-compatible program used for snapshots
    #[arg(long, default_value = "tar")]
    pub tar_path: PathBuf,
}

impl Cli {
    pub fn into_config(self) -> DriverConfig {
        DriverConfig {
            name: self.name,
            node_id: self.node_id,
            endpoint: self.endpoint,
            nfs_server: self.nfs_server,
            nfs_share_point: self.nfs_share_point,
            local_mount_point: self.nfs_local_mount_point,
            local_mount_options: self.nfs_local_mount_options,
            snapshot_sub_path: self.nfs_snapshot_path,
            enable_identity: self.enable_identity_server,
            enable_controller: self.enable_controller_server,
            enable_node: self.enable_node_server,
            tar_program: self.tar_path,
            ..Default::default()
        }
        .with_max_storage_capacity(&self.max_storage_capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_driver_defaults() {
        let cli = Cli::try_parse_from(["csi-nfs", "--nodeid", "node-a"]).unwrap();
        assert!(!cli.debug);
        assert_eq!(cli.log_format, LogFormat::Text);
        let config = cli.into_config();
        let defaults = DriverConfig::default();
        assert_eq!(config.node_id, "node-a");
        assert_eq!(config.endpoint, defaults.endpoint);
        assert_eq!(config.name, defaults.name);
        assert_eq!(config.local_mount_point, defaults.local_mount_point);
        assert_eq!(config.local_mount_options, defaults.local_mount_options);
        assert_eq!(config.snapshot_sub_path, defaults.snapshot_sub_path);
        assert_eq!(config.max_storage_capacity, defaults.max_storage_capacity);
        assert!(!config.enable_controller);
    }

    #[test]
    fn flags_reach_the_config() {
        let cli = Cli::try_parse_from([
            "csi-nfs",
            "--nodeid",
            "node-b",
            "--endpoint",
            "tcp://0.0.0.0:10000",
            "--enable-controller-server",
            "--enable-identity-server",
            "--nfs-server",
            "10.0.0.5",
            "--nfs-server-share-point",
            "/exports",
            "--nfs-local-snapshot-mount-point",
            "snaps",
            "--max-storage-capacity",
            "1G",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
        let config = cli.into_config();
        assert!(config.enable_controller && config.enable_identity && !config.enable_node);
        assert_eq!(config.nfs_server, "10.0.0.5");
        assert_eq!(config.share_for("v"), "/exports/v");
        assert_eq!(config.snapshot_sub_path, "snaps");
        assert_eq!(config.max_storage_capacity, 1024 * 1024 * 1024);
    }

    #[test]
    fn node_id_is_required() {
        if std::env::var_os("CSI_NODE_ID").is_none() {
            assert!(Cli::try_parse_from(["csi-nfs"]).is_err());
        }
    }
}

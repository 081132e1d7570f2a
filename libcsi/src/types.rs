//! Core CSI types: volumes, snapshots, capabilities and requests.
//!
//! These types form the data model shared by the CSI traits, transport layer,
//! and backend implementations.  They are all [`Serialize`]/[`Deserialize`] so
//! they can be transmitted over the socket transport as JSON.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Volume context key holding the NFS server host.
pub const CONTEXT_SERVER: &str = "server";
/// Volume context key holding the export path of the volume on the server.
pub const CONTEXT_SHARE: &str = "share";

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identifier of a volume.  For the NFS backend this is the name given at
/// creation time.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VolumeId(pub String);

impl fmt::Display for VolumeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for VolumeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for VolumeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Identifier of a snapshot, generated by the controller.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SnapshotId(pub String);

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SnapshotId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Access mode & capabilities
// ---------------------------------------------------------------------------

/// Describes how a volume may be accessed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Read-write on a single node.
    SingleNodeWriter,
    /// Read-only on a single node.
    SingleNodeReaderOnly,
    /// Read-only on many nodes.
    MultiNodeReaderOnly,
    /// Many readers, one writer.
    MultiNodeSingleWriter,
    /// Read-write on many nodes.
    MultiNodeMultiWriter,
}

/// How the volume is presented to the workload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum AccessType {
    /// Mounted filesystem.
    Mount {
        /// Filesystem type, e.g. `"nfs"`.
        #[serde(default)]
        fs_type: String,
        /// Additional mount flags (e.g. `"noatime"`).
        #[serde(default)]
        mount_flags: Vec<String>,
    },
    /// Raw block device.
    Block,
}

/// Describes the capabilities required from a volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCapability {
    /// Mount or block presentation.
    pub access_type: AccessType,
    /// Requested access mode.
    pub access_mode: AccessMode,
}

impl VolumeCapability {
    /// A filesystem capability with no extra mount flags.
    pub fn mount(access_mode: AccessMode) -> Self {
        Self {
            access_type: AccessType::Mount {
                fs_type: "nfs".to_owned(),
                mount_flags: Vec::new(),
            },
            access_mode,
        }
    }

    /// A raw block capability.
    pub fn block(access_mode: AccessMode) -> Self {
        Self {
            access_type: AccessType::Block,
            access_mode,
        }
    }

    /// Whether this capability asks for block access.
    pub fn is_block(&self) -> bool {
        matches!(self.access_type, AccessType::Block)
    }

    /// Mount flags of a filesystem capability; empty for block.
    pub fn mount_flags(&self) -> &[String] {
        match &self.access_type {
            AccessType::Mount { mount_flags, .. } => mount_flags,
            AccessType::Block => &[],
        }
    }
}

impl Default for VolumeCapability {
    fn default() -> Self {
        Self::mount(AccessMode::MultiNodeMultiWriter)
    }
}

/// Requested size bounds for a volume.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapacityRange {
    /// Volume must be at least this big.
    pub required_bytes: u64,
    /// Volume must not be bigger than this; `0` means unbounded.
    #[serde(default)]
    pub limit_bytes: u64,
}

/// Pre-population source for a new volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum VolumeContentSource {
    /// Restore from a snapshot archive.
    Snapshot {
        /// Snapshot to restore from.
        snapshot_id: SnapshotId,
    },
    /// Clone an existing volume.
    Volume {
        /// Volume to clone.
        volume_id: VolumeId,
    },
}

// ---------------------------------------------------------------------------
// Volume & snapshot metadata
// ---------------------------------------------------------------------------

/// A provisioned volume as returned by `CreateVolume`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Volume {
    /// Unique volume identifier.
    pub volume_id: VolumeId,
    /// Provisioned capacity in bytes.  Advisory only.
    pub capacity_bytes: u64,
    /// Opaque context passed from Controller to Node operations.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
    /// The source the volume was populated from, if any.
    #[serde(default)]
    pub content_source: Option<VolumeContentSource>,
}

/// A point-in-time archive of a volume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Generated snapshot identifier.
    pub snapshot_id: SnapshotId,
    /// The volume the snapshot was taken from.
    pub source_volume_id: VolumeId,
    /// Size of the archive in bytes.
    pub size_bytes: u64,
    /// When the snapshot was cut.
    pub creation_time: DateTime<Utc>,
    /// Whether the snapshot can be used as a content source.
    pub ready_to_use: bool,
}

// ---------------------------------------------------------------------------
// Controller requests & responses
// ---------------------------------------------------------------------------

/// Request to create a new volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateVolumeRequest {
    /// Name for the volume; doubles as its ID.
    pub name: String,
    /// Requested size bounds.
    #[serde(default)]
    pub capacity_range: Option<CapacityRange>,
    /// Required capabilities.
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Storage class parameters, echoed into the volume context.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    /// Credentials; never logged.
    #[serde(default)]
    pub secrets: HashMap<String, String>,
    /// Optional pre-population source.
    #[serde(default)]
    pub volume_content_source: Option<VolumeContentSource>,
}

/// Request to delete a volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteVolumeRequest {
    /// Volume to delete.
    pub volume_id: VolumeId,
    /// Credentials; never logged.
    #[serde(default)]
    pub secrets: HashMap<String, String>,
}

/// Request to attach a volume to a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerPublishVolumeRequest {
    /// Volume to attach.
    pub volume_id: VolumeId,
    /// Node to attach to.
    pub node_id: String,
    /// Capability the node will use.
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    /// Attach read-only.
    #[serde(default)]
    pub readonly: bool,
    /// Credentials; never logged.
    #[serde(default)]
    pub secrets: HashMap<String, String>,
    /// Context from `CreateVolume`.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
}

/// Request to detach a volume from a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerUnpublishVolumeRequest {
    /// Volume to detach.
    pub volume_id: VolumeId,
    /// Node to detach from.
    pub node_id: String,
    /// Credentials; never logged.
    #[serde(default)]
    pub secrets: HashMap<String, String>,
}

/// Request to check capabilities against an existing volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidateVolumeCapabilitiesRequest {
    /// Volume to check.
    pub volume_id: VolumeId,
    /// Capabilities the caller intends to use.
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Context from `CreateVolume`.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
}

/// Answer to `ValidateVolumeCapabilities`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationResult {
    /// Access modes the plugin confirms for the volume.
    pub confirmed_access_modes: Vec<AccessMode>,
    /// Human readable note.
    #[serde(default)]
    pub message: String,
}

/// Paged volume listing request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListVolumesRequest {
    /// Page size; `0` lets the plugin choose.
    #[serde(default)]
    pub max_entries: u32,
    /// Token from a previous page.
    #[serde(default)]
    pub starting_token: String,
}

/// One page of volumes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListVolumesResponse {
    /// Volumes on this page.
    pub entries: Vec<Volume>,
    /// Token for the next page; empty on the last page.
    #[serde(default)]
    pub next_token: String,
}

/// Capacity query.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetCapacityRequest {
    /// Capabilities the capacity must satisfy.
    #[serde(default)]
    pub volume_capabilities: Vec<VolumeCapability>,
    /// Storage class parameters.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// Request to snapshot a volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSnapshotRequest {
    /// Volume to snapshot.
    pub source_volume_id: VolumeId,
    /// Caller-suggested name; informational for this driver.
    #[serde(default)]
    pub name: String,
    /// Snapshot class parameters.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    /// Credentials; never logged.
    #[serde(default)]
    pub secrets: HashMap<String, String>,
}

/// Request to delete a snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteSnapshotRequest {
    /// Snapshot to delete.
    pub snapshot_id: SnapshotId,
    /// Credentials; never logged.
    #[serde(default)]
    pub secrets: HashMap<String, String>,
}

/// Paged snapshot listing request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListSnapshotsRequest {
    /// Page size; `0` lets the plugin choose.
    #[serde(default)]
    pub max_entries: u32,
    /// Token from a previous page.
    #[serde(default)]
    pub starting_token: String,
    /// Restrict to snapshots of this volume.
    #[serde(default)]
    pub source_volume_id: Option<VolumeId>,
    /// Restrict to this snapshot.
    #[serde(default)]
    pub snapshot_id: Option<SnapshotId>,
    /// Credentials; never logged.
    #[serde(default)]
    pub secrets: HashMap<String, String>,
}

/// One page of snapshots.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListSnapshotsResponse {
    /// Snapshots on this page.
    pub entries: Vec<Snapshot>,
    /// Token for the next page; empty on the last page.
    #[serde(default)]
    pub next_token: String,
}

/// Request to grow a volume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerExpandVolumeRequest {
    /// Volume to grow.
    pub volume_id: VolumeId,
    /// New size bounds.
    #[serde(default)]
    pub capacity_range: Option<CapacityRange>,
    /// Credentials; never logged.
    #[serde(default)]
    pub secrets: HashMap<String, String>,
}

/// Result of a volume expansion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControllerExpandVolumeResponse {
    /// Size after expansion.
    pub capacity_bytes: u64,
    /// Whether the node must also grow the filesystem.
    #[serde(default)]
    pub node_expansion_required: bool,
}

/// Controller RPCs a plugin advertises.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ControllerCapability {
    /// `CreateVolume` / `DeleteVolume`.
    CreateDeleteVolume,
    /// `ControllerPublishVolume` / `ControllerUnpublishVolume`.
    PublishUnpublishVolume,
    /// `ListVolumes`.
    ListVolumes,
    /// `GetCapacity`.
    GetCapacity,
    /// `CreateSnapshot` / `DeleteSnapshot`.
    CreateDeleteSnapshot,
    /// `ListSnapshots`.
    ListSnapshots,
    /// `ControllerExpandVolume`.
    ExpandVolume,
}

// ---------------------------------------------------------------------------
// Node requests
// ---------------------------------------------------------------------------

/// Request to stage (globally mount) a volume on a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeStageVolumeRequest {
    /// Volume to stage.
    pub volume_id: VolumeId,
    /// Global staging mount point.
    pub staging_target_path: String,
    /// Requested capability.
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    /// Credentials; never logged.
    #[serde(default)]
    pub secrets: HashMap<String, String>,
    /// Opaque context carried from `CreateVolume`.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
}

/// Request to publish (mount) a volume at a workload path.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodePublishVolumeRequest {
    /// Volume to publish.
    pub volume_id: VolumeId,
    /// Staging path, unused by drivers without staging.
    #[serde(default)]
    pub staging_target_path: String,
    /// Target path inside the workload's filesystem.
    pub target_path: String,
    /// Requested capability.
    #[serde(default)]
    pub volume_capability: Option<VolumeCapability>,
    /// Whether the mount should be read-only.
    #[serde(default)]
    pub readonly: bool,
    /// Credentials; never logged.
    #[serde(default)]
    pub secrets: HashMap<String, String>,
    /// Opaque context carried from `CreateVolume`.
    #[serde(default)]
    pub volume_context: HashMap<String, String>,
}

/// Node RPCs a plugin advertises.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum NodeCapability {
    /// `NodeStageVolume` / `NodeUnstageVolume`.
    StageUnstageVolume,
    /// `NodeGetVolumeStats`.
    GetVolumeStats,
    /// `NodeExpandVolume`.
    ExpandVolume,
}

// ---------------------------------------------------------------------------
// Plugin & node info
// ---------------------------------------------------------------------------

/// Information about the CSI plugin.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PluginInfo {
    /// Plugin name, e.g. `"csi-nfs"`.
    pub name: String,
    /// Vendor-provided version string.
    pub vendor_version: String,
}

/// Capabilities advertised by the CSI plugin.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum PluginCapability {
    /// Plugin provides a Controller service.
    ControllerService,
    /// Plugin supports volume topology constraints.
    VolumeAccessibilityConstraints,
}

/// Information about the node on which the CSI Node service runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeInfo {
    /// Unique node identifier.
    pub node_id: String,
    /// Maximum number of volumes the node can host; `0` means unlimited.
    pub max_volumes_per_node: u64,
}

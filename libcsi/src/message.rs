//! CSI protocol messages transmitted over the socket transport.
//!
//! [`CsiMessage`] is the top-level envelope for all request and response
//! variants exchanged between a CSI client (the orchestrator side) and the
//! CSI server (the plugin).  On the wire every message travels inside a
//! [`Frame`], whose `id` lets one connection carry many concurrent calls.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::CsiError;
use crate::types::*;

/// Service group a request belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceGroup {
    /// Plugin discovery and health.
    Identity,
    /// Volume and snapshot lifecycle.
    Controller,
    /// Host-local mounts.
    Node,
}

impl std::fmt::Display for ServiceGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Identity => "identity",
            Self::Controller => "controller",
            Self::Node => "node",
        })
    }
}

/// Top-level message envelope.
///
/// The client sends a *request* variant and the server replies with the
/// corresponding *response* variant (or [`CsiMessage::Error`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CsiMessage {
    // ----- Identity requests ----------------------------------------------
    /// Query plugin info.
    GetPluginInfo,
    /// Query plugin capabilities.
    GetPluginCapabilities,
    /// Health probe.
    Probe,

    // ----- Controller requests --------------------------------------------
    /// Create a new volume.
    CreateVolume(CreateVolumeRequest),
    /// Delete a volume.
    DeleteVolume(DeleteVolumeRequest),
    /// Attach a volume to a node.
    ControllerPublishVolume(ControllerPublishVolumeRequest),
    /// Detach a volume from a node.
    ControllerUnpublishVolume(ControllerUnpublishVolumeRequest),
    /// Validate volume capabilities.
    ValidateVolumeCapabilities(ValidateVolumeCapabilitiesRequest),
    /// List volumes.
    ListVolumes(ListVolumesRequest),
    /// Query available capacity.
    GetCapacity(GetCapacityRequest),
    /// Query controller capabilities.
    ControllerGetCapabilities,
    /// Snapshot a volume.
    CreateSnapshot(CreateSnapshotRequest),
    /// Delete a snapshot.
    DeleteSnapshot(DeleteSnapshotRequest),
    /// List snapshots.
    ListSnapshots(ListSnapshotsRequest),
    /// Grow a volume.
    ControllerExpandVolume(ControllerExpandVolumeRequest),
    /// Describe a volume.
    ControllerGetVolume(VolumeId),

    // ----- Node requests --------------------------------------------------
    /// Stage a volume at a global path.
    NodeStageVolume(NodeStageVolumeRequest),
    /// Unstage a previously staged volume.
    NodeUnstageVolume {
        volume_id: VolumeId,
        staging_target_path: String,
    },
    /// Mount a volume at a workload path.
    NodePublishVolume(NodePublishVolumeRequest),
    /// Unmount a volume from a workload path.
    NodeUnpublishVolume {
        volume_id: VolumeId,
        target_path: String,
    },
    /// Query node capabilities.
    NodeGetCapabilities,
    /// Query node info.
    NodeGetInfo,

    // ----- Responses ------------------------------------------------------
    /// Plugin information.
    PluginInfoResponse(PluginInfo),
    /// Plugin capabilities.
    PluginCapabilitiesResponse(Vec<PluginCapability>),
    /// Probe result.
    ProbeResult(bool),
    /// A volume was created (or already existed).
    VolumeCreated(Volume),
    /// Publish context for a controller-attached volume.
    PublishContext(HashMap<String, String>),
    /// Capability validation outcome.
    CapabilitiesValidated(ValidationResult),
    /// A page of volumes.
    VolumeList(ListVolumesResponse),
    /// Available capacity in bytes.
    Capacity(u64),
    /// Controller capabilities.
    ControllerCapabilitiesResponse(Vec<ControllerCapability>),
    /// A snapshot was created.
    SnapshotCreated(Snapshot),
    /// A page of snapshots.
    SnapshotList(ListSnapshotsResponse),
    /// Expansion result.
    VolumeExpanded(ControllerExpandVolumeResponse),
    /// A single volume description.
    VolumeResponse(Volume),
    /// Node capabilities.
    NodeCapabilitiesResponse(Vec<NodeCapability>),
    /// Node information.
    NodeInfoResponse(NodeInfo),

    /// Generic success acknowledgement (no payload).
    Ok,
    /// An error occurred.
    Error(CsiError),
}

impl CsiMessage {
    /// Fully qualified method name of a request, in gRPC path form.
    /// Response variants report the name of the reply type.
    pub fn method(&self) -> &'static str {
        match self {
            Self::GetPluginInfo => "/csi.v1.Identity/GetPluginInfo",
            Self::GetPluginCapabilities => "/csi.v1.Identity/GetPluginCapabilities",
            Self::Probe => "/csi.v1.Identity/Probe",
            Self::CreateVolume(_) => "/csi.v1.Controller/CreateVolume",
            Self::DeleteVolume(_) => "/csi.v1.Controller/DeleteVolume",
            Self::ControllerPublishVolume(_) => "/csi.v1.Controller/ControllerPublishVolume",
            Self::ControllerUnpublishVolume(_) => "/csi.v1.Controller/ControllerUnpublishVolume",
            Self::ValidateVolumeCapabilities(_) => "/csi.v1.Controller/ValidateVolumeCapabilities",
            Self::ListVolumes(_) => "/csi.v1.Controller/ListVolumes",
            Self::GetCapacity(_) => "/csi.v1.Controller/GetCapacity",
            Self::ControllerGetCapabilities => "/csi.v1.Controller/ControllerGetCapabilities",
            Self::CreateSnapshot(_) => "/csi.v1.Controller/CreateSnapshot",
            Self::DeleteSnapshot(_) => "/csi.v1.Controller/DeleteSnapshot",
            Self::ListSnapshots(_) => "/csi.v1.Controller/ListSnapshots",
            Self::ControllerExpandVolume(_) => "/csi.v1.Controller/ControllerExpandVolume",
            Self::ControllerGetVolume(_) => "/csi.v1.Controller/ControllerGetVolume",
            Self::NodeStageVolume(_) => "/csi.v1.Node/NodeStageVolume",
            Self::NodeUnstageVolume { .. } => "/csi.v1.Node/NodeUnstageVolume",
            Self::NodePublishVolume(_) => "/csi.v1.Node/NodePublishVolume",
            Self::NodeUnpublishVolume { .. } => "/csi.v1.Node/NodeUnpublishVolume",
            Self::NodeGetCapabilities => "/csi.v1.Node/NodeGetCapabilities",
            Self::NodeGetInfo => "/csi.v1.Node/NodeGetInfo",
            Self::PluginInfoResponse(_) => "PluginInfoResponse",
            Self::PluginCapabilitiesResponse(_) => "PluginCapabilitiesResponse",
            Self::ProbeResult(_) => "ProbeResult",
            Self::VolumeCreated(_) => "VolumeCreated",
            Self::PublishContext(_) => "PublishContext",
            Self::CapabilitiesValidated(_) => "CapabilitiesValidated",
            Self::VolumeList(_) => "VolumeList",
            Self::Capacity(_) => "Capacity",
            Self::ControllerCapabilitiesResponse(_) => "ControllerCapabilitiesResponse",
            Self::SnapshotCreated(_) => "SnapshotCreated",
            Self::SnapshotList(_) => "SnapshotList",
            Self::VolumeExpanded(_) => "VolumeExpanded",
            Self::VolumeResponse(_) => "VolumeResponse",
            Self::NodeCapabilitiesResponse(_) => "NodeCapabilitiesResponse",
            Self::NodeInfoResponse(_) => "NodeInfoResponse",
            Self::Ok => "Ok",
            Self::Error(_) => "Error",
        }
    }

    /// The service group a request variant is routed to; `None` for
    /// response variants.
    pub fn service_group(&self) -> Option<ServiceGroup> {
        match self {
            Self::GetPluginInfo | Self::GetPluginCapabilities | Self::Probe => {
                Some(ServiceGroup::Identity)
            }
            Self::CreateVolume(_)
            | Self::DeleteVolume(_)
            | Self::ControllerPublishVolume(_)
            | Self::ControllerUnpublishVolume(_)
            | Self::ValidateVolumeCapabilities(_)
            | Self::ListVolumes(_)
            | Self::GetCapacity(_)
            | Self::ControllerGetCapabilities
            | Self::CreateSnapshot(_)
            | Self::DeleteSnapshot(_)
            | Self::ListSnapshots(_)
            | Self::ControllerExpandVolume(_)
            | Self::ControllerGetVolume(_) => Some(ServiceGroup::Controller),
            Self::NodeStageVolume(_)
            | Self::NodeUnstageVolume { .. }
            | Self::NodePublishVolume(_)
            | Self::NodeUnpublishVolume { .. }
            | Self::NodeGetCapabilities
            | Self::NodeGetInfo => Some(ServiceGroup::Node),
            _ => None,
        }
    }

    /// Turn an [`CsiMessage::Error`] reply into `Err`, passing every other
    /// variant through.
    pub fn into_result(self) -> Result<CsiMessage, CsiError> {
        match self {
            Self::Error(e) => Err(e),
            other => Ok(other),
        }
    }
}

impl std::fmt::Display for CsiMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateVolume(req) => write!(f, "CreateVolume(name={})", req.name),
            Self::DeleteVolume(req) => write!(f, "DeleteVolume({})", req.volume_id),
            Self::ValidateVolumeCapabilities(req) => {
                write!(f, "ValidateVolumeCapabilities({})", req.volume_id)
            }
            Self::CreateSnapshot(req) => write!(f, "CreateSnapshot({})", req.source_volume_id),
            Self::DeleteSnapshot(req) => write!(f, "DeleteSnapshot({})", req.snapshot_id),
            Self::NodePublishVolume(req) => write!(f, "NodePublishVolume({})", req.volume_id),
            Self::NodeUnpublishVolume { volume_id, .. } => {
                write!(f, "NodeUnpublishVolume({})", volume_id)
            }
            Self::VolumeCreated(v) => write!(f, "VolumeCreated({})", v.volume_id),
            Self::SnapshotCreated(s) => write!(f, "SnapshotCreated({})", s.snapshot_id),
            Self::ProbeResult(ok) => write!(f, "ProbeResult({})", ok),
            Self::Error(e) => write!(f, "Error({})", e),
            other => {
                let method = other.method();
                f.write_str(method.rsplit('/').next().unwrap_or(method))
            }
        }
    }
}

/// Wire frame carrying one message of a multiplexed connection.
///
/// Replies reuse the `id` of the request they answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    /// Caller-chosen correlation id.  `0` is reserved for replies to frames
    /// that could not be decoded.
    pub id: u64,
    /// Per-call deadline in milliseconds, requests only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Payload.
    pub message: CsiMessage,
}

impl Frame {
    /// A frame without a deadline.
    pub fn new(id: u64, message: CsiMessage) -> Self {
        Self {
            id,
            timeout_ms: None,
            message,
        }
    }
}

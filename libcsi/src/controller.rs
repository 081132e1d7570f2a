//! CSI Controller service trait.
//!
//! The Controller service manages the centralized volume lifecycle: creation,
//! deletion, snapshots and capability validation.  It is invoked by the
//! orchestrator's provisioner, never on the node that consumes the volume.
//!
//! Every verb of the protocol is a required method.  A plugin that does not
//! support a verb answers [`CsiError::Unimplemented`] explicitly, which callers
//! treat as a permanent absence rather than a transient failure.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::*;

/// Controller service: centralized volume management.
#[async_trait]
pub trait CsiController: Send + Sync {
    /// Provision a new volume.
    ///
    /// The returned [`Volume`] contains the `volume_id` and `volume_context`
    /// that must be forwarded to subsequent Node operations.
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError>;

    /// Delete a previously provisioned volume.  Deleting an absent volume
    /// succeeds.
    async fn delete_volume(&self, req: DeleteVolumeRequest) -> Result<(), CsiError>;

    /// Attach a volume to a node, returning the publish context.
    async fn controller_publish_volume(
        &self,
        req: ControllerPublishVolumeRequest,
    ) -> Result<HashMap<String, String>, CsiError>;

    /// Detach a volume from a node.
    async fn controller_unpublish_volume(
        &self,
        req: ControllerUnpublishVolumeRequest,
    ) -> Result<(), CsiError>;

    /// Check whether the given capabilities are compatible with the volume.
    async fn validate_volume_capabilities(
        &self,
        req: ValidateVolumeCapabilitiesRequest,
    ) -> Result<ValidationResult, CsiError>;

    /// List volumes known to this controller.
    async fn list_volumes(&self, req: ListVolumesRequest)
    -> Result<ListVolumesResponse, CsiError>;

    /// Return the available capacity in bytes.
    async fn get_capacity(&self, req: GetCapacityRequest) -> Result<u64, CsiError>;

    /// Advertise the controller RPCs this plugin supports.
    async fn controller_get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError>;

    /// Cut a snapshot of a volume.
    async fn create_snapshot(&self, req: CreateSnapshotRequest) -> Result<Snapshot, CsiError>;

    /// Delete a snapshot.
    async fn delete_snapshot(&self, req: DeleteSnapshotRequest) -> Result<(), CsiError>;

    /// List snapshots known to this controller.
    async fn list_snapshots(
        &self,
        req: ListSnapshotsRequest,
    ) -> Result<ListSnapshotsResponse, CsiError>;

    /// Grow a volume.
    async fn controller_expand_volume(
        &self,
        req: ControllerExpandVolumeRequest,
    ) -> Result<ControllerExpandVolumeResponse, CsiError>;

    /// Describe a single volume.
    async fn controller_get_volume(&self, volume_id: &VolumeId) -> Result<Volume, CsiError>;
}

//! CSI Node service trait.
//!
//! The Node service runs on each worker node and handles the local filesystem
//! operations required to make a volume available to a workload:
//!
//! 1. **Stage**: mount the volume once at a global path (optional).
//! 2. **Publish**: mount the volume into the workload's target path.
//! 3. **Unpublish**: remove that mount.
//! 4. **Unstage**: undo the global mount.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{
    NodeCapability, NodeInfo, NodePublishVolumeRequest, NodeStageVolumeRequest, VolumeId,
};

/// Node service: local mount / unmount operations.
#[async_trait]
pub trait CsiNode: Send + Sync {
    /// Stage a volume at the global staging path.
    async fn stage_volume(&self, req: NodeStageVolumeRequest) -> Result<(), CsiError>;

    /// Undo [`Self::stage_volume`].
    async fn unstage_volume(
        &self,
        volume_id: &VolumeId,
        staging_target_path: &str,
    ) -> Result<(), CsiError>;

    /// Publish a volume at the workload target path.
    ///
    /// This is idempotent; calling it again for the same `target_path` should
    /// succeed without error.
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError>;

    /// Unpublish a volume from the workload target path.
    ///
    /// This is idempotent.
    async fn unpublish_volume(&self, volume_id: &VolumeId, target_path: &str)
    -> Result<(), CsiError>;

    /// Advertise the node RPCs this plugin supports.
    async fn get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError>;

    /// Return information about the node on which this service is running.
    async fn get_info(&self) -> Result<NodeInfo, CsiError>;
}

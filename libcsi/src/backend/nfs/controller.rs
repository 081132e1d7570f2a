//! Controller service on a shared NFS export.
//!
//! Volumes and snapshots live entirely on the export mounted at
//! [`DriverConfig::local_mount_point`]:
//!
//! ```text
//! <local_mount_point>/
//!   <volume-name>/                 # one directory per volume
//!   <snapshot_sub_path>/
//!     <snapshot-id>.tar.gz         # one archive per snapshot
//! ```
//!
//! The controller keeps no state of its own.  Duplicate creates of the same
//! name are resolved by the directory creation itself, which is the only
//! coordination between concurrent calls.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::archive::TarArchiver;
use super::config::DriverConfig;
use super::path_component;
use super::store::{LocalStore, VolumeStore};
use crate::controller::CsiController;
use crate::error::CsiError;
use crate::types::*;

pub struct NfsController {
    config: Arc<DriverConfig>,
    store: Arc<dyn VolumeStore>,
}

impl NfsController {
    pub fn new(config: Arc<DriverConfig>, store: Arc<dyn VolumeStore>) -> Self {
        Self { config, store }
    }

    /// Controller over a [`LocalStore`] rooted at the configured local mount
    /// point, archiving with the configured tar program.
    pub fn from_config(config: Arc<DriverConfig>) -> Self {
        let store = LocalStore::new(
            config.local_mount_point.clone(),
            TarArchiver::new(config.tar_program.clone()),
        );
        Self::new(config, Arc::new(store))
    }

    /// Fail with Internal unless the snapshot directory exists.  It is never
    /// created implicitly.
    async fn require_snapshot_dir(&self) -> Result<&Path, CsiError> {
        let dir = self.config.snapshot_dir();
        if !self.store.exists(dir).await? {
            return Err(CsiError::Internal(format!(
                "snapshot directory {} does not exist",
                self.config.local_mount_point.join(dir).display()
            )));
        }
        Ok(dir)
    }

    async fn restore_snapshot(
        &self,
        snapshot_id: &SnapshotId,
        volume_dir: &Path,
    ) -> Result<(), CsiError> {
        path_component("snapshot ID", &snapshot_id.0)?;
        self.require_snapshot_dir().await?;

        let archive = self.config.snapshot_archive(&snapshot_id.0);
        if !self.store.exists(&archive).await? {
            return Err(CsiError::Internal(format!(
                "snapshot archive {} does not exist",
                self.config.local_mount_point.join(&archive).display()
            )));
        }

        info!(%snapshot_id, "restoring volume from snapshot");
        self.store.read_archive(&archive, volume_dir).await?;
        Ok(())
    }
}

#[async_trait]
impl CsiController for NfsController {
    #[instrument(skip_all, fields(name = %req.name))]
    async fn create_volume(&self, req: CreateVolumeRequest) -> Result<Volume, CsiError> {
        if req.name.is_empty() {
            return Err(CsiError::InvalidArgument("name missing in request".into()));
        }
        let volume_dir = path_component("volume name", &req.name)?;
        if req.volume_capabilities.is_empty() {
            return Err(CsiError::InvalidArgument(
                "volume capabilities missing in request".into(),
            ));
        }
        if req.volume_capabilities.iter().any(VolumeCapability::is_block) {
            return Err(CsiError::Unimplemented(
                "block volumes are not supported".into(),
            ));
        }

        let capacity = req.capacity_range.map_or(0, |range| range.required_bytes);
        if capacity >= self.config.max_storage_capacity {
            return Err(CsiError::OutOfRange(format!(
                "requested capacity {capacity} exceeds maximum allowed {}",
                self.config.max_storage_capacity
            )));
        }

        info!(capacity, "creating volume");
        if !self.store.create_dir(volume_dir).await? {
            debug!("volume directory already exists, treating as provisioned");
        }

        let mut volume_context = req.parameters;
        volume_context.insert(CONTEXT_SERVER.to_owned(), self.config.nfs_server.clone());
        volume_context.insert(CONTEXT_SHARE.to_owned(), self.config.share_for(&req.name));

        let content_source = match req.volume_content_source {
            Some(VolumeContentSource::Snapshot { snapshot_id }) => {
                self.restore_snapshot(&snapshot_id, volume_dir).await?;
                Some(VolumeContentSource::Snapshot { snapshot_id })
            }
            Some(VolumeContentSource::Volume { volume_id }) => {
                warn!(%volume_id, "volume cloning is not supported, ignoring content source");
                None
            }
            None => None,
        };

        Ok(Volume {
            volume_id: VolumeId(req.name),
            capacity_bytes: capacity,
            volume_context,
            content_source,
        })
    }

    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    async fn delete_volume(&self, req: DeleteVolumeRequest) -> Result<(), CsiError> {
        if req.volume_id.0.is_empty() {
            return Err(CsiError::InvalidArgument("volume ID missing in request".into()));
        }
        let volume_dir = path_component("volume ID", &req.volume_id.0)?;

        if !self.store.exists(volume_dir).await? {
            info!("volume already deleted");
            return Ok(());
        }
        info!("deleting volume");
        self.store.remove_tree(volume_dir).await?;
        Ok(())
    }

    async fn controller_publish_volume(
        &self,
        _req: ControllerPublishVolumeRequest,
    ) -> Result<HashMap<String, String>, CsiError> {
        Err(CsiError::unimplemented("ControllerPublishVolume"))
    }

    async fn controller_unpublish_volume(
        &self,
        _req: ControllerUnpublishVolumeRequest,
    ) -> Result<(), CsiError> {
        Err(CsiError::unimplemented("ControllerUnpublishVolume"))
    }

    /// Confirms the driver's whole access-mode set for any existing volume.
    /// The requested capabilities are checked for presence only.
    #[instrument(skip_all, fields(volume_id = %req.volume_id))]
    async fn validate_volume_capabilities(
        &self,
        req: ValidateVolumeCapabilitiesRequest,
    ) -> Result<ValidationResult, CsiError> {
        if req.volume_id.0.is_empty() {
            return Err(CsiError::InvalidArgument("volume ID missing in request".into()));
        }
        if req.volume_capabilities.is_empty() {
            return Err(CsiError::InvalidArgument(
                "volume capabilities missing in request".into(),
            ));
        }
        let volume_dir = path_component("volume ID", &req.volume_id.0)?;
        if !self.store.exists(volume_dir).await? {
            return Err(CsiError::NotFound(format!(
                "volume {} does not exist",
                req.volume_id
            )));
        }

        Ok(ValidationResult {
            confirmed_access_modes: self.config.volume_access_modes.clone(),
            message: String::new(),
        })
    }

    async fn list_volumes(
        &self,
        _req: ListVolumesRequest,
    ) -> Result<ListVolumesResponse, CsiError> {
        Err(CsiError::unimplemented("ListVolumes"))
    }

    async fn get_capacity(&self, _req: GetCapacityRequest) -> Result<u64, CsiError> {
        Err(CsiError::unimplemented("GetCapacity"))
    }

    async fn controller_get_capabilities(&self) -> Result<Vec<ControllerCapability>, CsiError> {
        Ok(self.config.controller_capabilities.clone())
    }

    #[instrument(skip_all, fields(source_volume_id = %req.source_volume_id))]
    async fn create_snapshot(&self, req: CreateSnapshotRequest) -> Result<Snapshot, CsiError> {
        if req.source_volume_id.0.is_empty() {
            return Err(CsiError::InvalidArgument(
                "source volume ID missing in request".into(),
            ));
        }
        let volume_dir = path_component("source volume ID", &req.source_volume_id.0)?;
        if !self.store.exists(volume_dir).await? {
            return Err(CsiError::Internal(format!(
                "source volume {} does not exist",
                req.source_volume_id
            )));
        }
        self.require_snapshot_dir().await?;

        let snapshot_id = SnapshotId(Uuid::new_v4().to_string());
        let archive = self.config.snapshot_archive(&snapshot_id.0);
        info!(%snapshot_id, "creating snapshot");

        let size_bytes = self.store.write_archive(volume_dir, &archive).await?;
        debug!(%snapshot_id, size_bytes, "snapshot archive written");

        Ok(Snapshot {
            snapshot_id,
            source_volume_id: req.source_volume_id,
            size_bytes,
            creation_time: Utc::now(),
            ready_to_use: true,
        })
    }

    #[instrument(skip_all, fields(snapshot_id = %req.snapshot_id))]
    async fn delete_snapshot(&self, req: DeleteSnapshotRequest) -> Result<(), CsiError> {
        if req.snapshot_id.0.is_empty() {
            return Err(CsiError::InvalidArgument(
                "snapshot ID missing in request".into(),
            ));
        }
        path_component("snapshot ID", &req.snapshot_id.0)?;
        self.require_snapshot_dir().await?;

        info!("deleting snapshot");
        let archive = self.config.snapshot_archive(&req.snapshot_id.0);
        self.store.remove_file(&archive).await?;
        Ok(())
    }

    async fn list_snapshots(
        &self,
        _req: ListSnapshotsRequest,
    ) -> Result<ListSnapshotsResponse, CsiError> {
        Err(CsiError::unimplemented("ListSnapshots"))
    }

    async fn controller_expand_volume(
        &self,
        _req: ControllerExpandVolumeRequest,
    ) -> Result<ControllerExpandVolumeResponse, CsiError> {
        Err(CsiError::unimplemented("ControllerExpandVolume"))
    }

    async fn controller_get_volume(&self, _volume_id: &VolumeId) -> Result<Volume, CsiError> {
        Err(CsiError::unimplemented("ControllerGetVolume"))
    }
}

//! Node service: mounts a volume's export directly at the workload target.
//!
//! There is no staging step.  `NodePublishVolume` mounts
//! `<server>:<share>` from the volume context at the target path and
//! `NodeUnpublishVolume` unmounts it and removes the directory.

use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::config::DriverConfig;
use super::mount::{is_mountpoint, mount_nfs, unmount};
use crate::error::CsiError;
use crate::node::CsiNode;
use crate::types::*;

pub struct NfsNode {
    config: Arc<DriverConfig>,
}

impl NfsNode {
    pub fn new(config: Arc<DriverConfig>) -> Self {
        Self { config }
    }
}

fn context_value<'a>(req: &'a NodePublishVolumeRequest, key: &str) -> Result<&'a str, CsiError> {
    req.volume_context
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| CsiError::InvalidArgument(format!("volume context is missing {key}")))
}

#[async_trait]
impl CsiNode for NfsNode {
    async fn stage_volume(&self, _req: NodeStageVolumeRequest) -> Result<(), CsiError> {
        Err(CsiError::unimplemented("NodeStageVolume"))
    }

    async fn unstage_volume(
        &self,
        _volume_id: &VolumeId,
        _staging_target_path: &str,
    ) -> Result<(), CsiError> {
        Err(CsiError::unimplemented("NodeUnstageVolume"))
    }

    #[instrument(skip_all, fields(volume_id = %req.volume_id, target_path = %req.target_path))]
    async fn publish_volume(&self, req: NodePublishVolumeRequest) -> Result<(), CsiError> {
        if req.volume_id.0.is_empty() {
            return Err(CsiError::InvalidArgument("volume ID missing in request".into()));
        }
        if req.target_path.is_empty() {
            return Err(CsiError::InvalidArgument("target path missing in request".into()));
        }
        let capability = req.volume_capability.as_ref().ok_or_else(|| {
            CsiError::InvalidArgument("volume capability missing in request".into())
        })?;
        if capability.is_block() {
            return Err(CsiError::Unimplemented("block volumes are not supported".into()));
        }
        let server = context_value(&req, CONTEXT_SERVER)?;
        let share = context_value(&req, CONTEXT_SHARE)?;

        let target = Path::new(&req.target_path);
        if is_mountpoint(target).await {
            debug!("target already mounted, assuming idempotent retry");
            return Ok(());
        }

        tokio::fs::create_dir_all(target).await.map_err(|e| {
            CsiError::Internal(format!("create target {}: {e}", target.display()))
        })?;

        let mut options = capability.mount_flags().to_vec();
        if req.readonly {
            options.push("ro".to_owned());
        }
        let source = format!("{server}:{share}");
        mount_nfs(&source, target, &options).await?;

        info!(%source, readonly = req.readonly, "volume published");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn unpublish_volume(
        &self,
        volume_id: &VolumeId,
        target_path: &str,
    ) -> Result<(), CsiError> {
        if volume_id.0.is_empty() {
            return Err(CsiError::InvalidArgument("volume ID missing in request".into()));
        }
        if target_path.is_empty() {
            return Err(CsiError::InvalidArgument("target path missing in request".into()));
        }

        let target = Path::new(target_path);
        if is_mountpoint(target).await {
            unmount(target).await?;
        } else {
            debug!("target not mounted");
        }

        match tokio::fs::remove_dir(target).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(CsiError::Internal(format!(
                    "remove target {target_path}: {e}"
                )));
            }
        }

        info!("volume unpublished");
        Ok(())
    }

    async fn get_capabilities(&self) -> Result<Vec<NodeCapability>, CsiError> {
        Ok(Vec::new())
    }

    async fn get_info(&self) -> Result<NodeInfo, CsiError> {
        Ok(NodeInfo {
            node_id: self.config.node_id.clone(),
            max_volumes_per_node: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn node() -> NfsNode {
        NfsNode::new(Arc::new(DriverConfig {
            node_id: "node-a".into(),
            ..Default::default()
        }))
    }

    fn publish_req(target: &str) -> NodePublishVolumeRequest {
        NodePublishVolumeRequest {
            volume_id: "pvc-1".into(),
            target_path: target.into(),
            volume_capability: Some(VolumeCapability::default()),
            volume_context: HashMap::from([
                (CONTEXT_SERVER.to_owned(), "10.0.0.5".to_owned()),
                (CONTEXT_SHARE.to_owned(), "/exports/pvc-1".to_owned()),
            ]),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn publish_validates_arguments() {
        let node = node();

        let mut req = publish_req("/tmp/target");
        req.volume_id = VolumeId::default();
        assert!(matches!(
            node.publish_volume(req).await,
            Err(CsiError::InvalidArgument(_))
        ));

        assert!(matches!(
            node.publish_volume(publish_req("")).await,
            Err(CsiError::InvalidArgument(_))
        ));

        let mut req = publish_req("/tmp/target");
        req.volume_capability = None;
        assert!(matches!(
            node.publish_volume(req).await,
            Err(CsiError::InvalidArgument(_))
        ));

        let mut req = publish_req("/tmp/target");
        req.volume_context.remove(CONTEXT_SHARE);
        assert!(matches!(
            node.publish_volume(req).await,
            Err(CsiError::InvalidArgument(_))
        ));

        let mut req = publish_req("/tmp/target");
        req.volume_capability = Some(VolumeCapability::block(AccessMode::SingleNodeWriter));
        assert!(matches!(
            node.publish_volume(req).await,
            Err(CsiError::Unimplemented(_))
        ));
    }

    #[tokio::test]
    async fn unpublish_of_unmounted_target_removes_directory() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        std::fs::create_dir(&target).unwrap();
        let target = target.to_str().unwrap();

        let node = node();
        node.unpublish_volume(&"pvc-1".into(), target).await.unwrap();
        assert!(!Path::new(target).exists());
        node.unpublish_volume(&"pvc-1".into(), target).await.unwrap();
    }

    #[tokio::test]
    async fn staging_is_unimplemented() {
        let node = node();
        assert!(matches!(
            node.stage_volume(NodeStageVolumeRequest::default()).await,
            Err(CsiError::Unimplemented(_))
        ));
        assert!(matches!(
            node.unstage_volume(&"pvc-1".into(), "/staging").await,
            Err(CsiError::Unimplemented(_))
        ));
        assert!(node.get_capabilities().await.unwrap().is_empty());
        assert_eq!(node.get_info().await.unwrap().node_id, "node-a");
    }
}

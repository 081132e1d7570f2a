use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::config::DriverConfig;
use crate::error::CsiError;
use crate::identity::CsiIdentity;
use crate::types::{PluginCapability, PluginInfo};

/// Identity service answering from the driver configuration.
pub struct NfsIdentity {
    config: Arc<DriverConfig>,
}

impl NfsIdentity {
    pub fn new(config: Arc<DriverConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CsiIdentity for NfsIdentity {
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError> {
        if self.config.name.is_empty() {
            return Err(CsiError::Unavailable("driver name not configured".into()));
        }
        if self.config.version.is_empty() {
            return Err(CsiError::Unavailable("driver is missing version".into()));
        }
        info!(name = %self.config.name, version = %self.config.version, "plugin info");
        Ok(PluginInfo {
            name: self.config.name.clone(),
            vendor_version: self.config.version.clone(),
        })
    }

    async fn probe(&self) -> Result<bool, CsiError> {
        debug!("probe");
        Ok(true)
    }

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError> {
        Ok(self.config.plugin_capabilities.clone())
    }
}

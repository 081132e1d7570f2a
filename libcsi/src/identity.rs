//! Identity verbs: who the plugin is and whether it is ready.

use async_trait::async_trait;

use crate::error::CsiError;
use crate::types::{PluginCapability, PluginInfo};

/// Plugin discovery and readiness.
///
/// Served by every driver that registers an identity group with
/// [`Services`](crate::Services); a server without one answers
/// `UNIMPLEMENTED` for these verbs.
#[async_trait]
pub trait CsiIdentity: Send + Sync {
    /// Driver name and version. Fails with `UNAVAILABLE` while either is
    /// unconfigured.
    async fn get_plugin_info(&self) -> Result<PluginInfo, CsiError>;

    /// Readiness. `Ok(false)` means the plugin is alive but not ready to
    /// serve controller or node verbs yet.
    async fn probe(&self) -> Result<bool, CsiError>;

    async fn get_plugin_capabilities(&self) -> Result<Vec<PluginCapability>, CsiError>;
}

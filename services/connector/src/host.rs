//! Host platform bridge
//!
//! The embedding document platform owns navigation once a configuration is
//! saved. When no platform is present the bridge runs standalone: commits
//! are logged and kept for inspection instead.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{error, info};

use crate::{
    error::{WorkflowError, WorkflowResult},
    models::ConfigurationDraft,
};

/// Result of a platform's ready handshake
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostReadiness {
    Ready,
    Failed(String),
}

/// An embedding platform SDK
#[async_trait]
pub trait HostPlatform: Send + Sync {
    /// Platform name for logs
    fn name(&self) -> &str;

    /// Resolves once the platform has finished initializing
    async fn ready(&self) -> HostReadiness;

    /// Persist the configuration and let the platform move on
    async fn save_config_and_go_next(&self, payload: &Value) -> Result<(), String>;
}

/// Bridge between the workflow and the (optional) host platform
#[derive(Clone)]
pub struct HostBridge {
    platform: Option<Arc<dyn HostPlatform>>,
    committed: Arc<Mutex<Vec<Value>>>,
}

impl HostBridge {
    /// Perform the ready handshake with the platform, if any
    pub async fn detect(platform: Option<Arc<dyn HostPlatform>>) -> WorkflowResult<Self> {
        let Some(platform) = platform else {
            info!("No host platform detected, running standalone");
            return Ok(Self::standalone());
        };

        match platform.ready().await {
            HostReadiness::Ready => {
                info!("Host platform {} is ready", platform.name());
                Ok(Self {
                    platform: Some(platform),
                    committed: Arc::default(),
                })
            }
            HostReadiness::Failed(reason) => {
                error!("Host platform {} failed to initialize: {}", platform.name(), reason);
                Err(WorkflowError::HostUnavailable(reason))
            }
        }
    }

    pub fn standalone() -> Self {
        Self {
            platform: None,
            committed: Arc::default(),
        }
    }

    pub fn is_hosted(&self) -> bool {
        self.platform.is_some()
    }

    /// Hand the draft to the host
    pub async fn commit(&self, draft: &ConfigurationDraft) -> WorkflowResult<()> {
        let payload = draft.to_payload()?;

        match &self.platform {
            Some(platform) => {
                info!(
                    "Committing {} configuration to {}",
                    draft.query_mode(),
                    platform.name()
                );
                platform
                    .save_config_and_go_next(&payload)
                    .await
                    .map_err(|reason| {
                        error!("Host {} rejected the configuration: {}", platform.name(), reason);
                        WorkflowError::HostCommit(reason)
                    })
            }
            None => {
                info!("Standalone commit: {}", payload);
                self.committed
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(payload);
                Ok(())
            }
        }
    }

    /// Payloads recorded by standalone commits
    pub fn committed(&self) -> Vec<Value> {
        self.committed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

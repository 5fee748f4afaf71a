use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::{info, warn};

use super::{Tool, ToolSet};
use crate::error::AdapterError;

/// Something that can list callable tools, typically an external server.
#[async_trait]
pub trait ToolSource: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<Arc<dyn Tool>>>;
}

/// Best-effort access to external tools.
///
/// Failures never propagate: the agent is built without external tools and
/// the next build tries again.
#[derive(Clone, Default)]
pub struct ToolProvisioner {
    source: Option<Arc<dyn ToolSource>>,
}

impl ToolProvisioner {
    pub fn new(source: Arc<dyn ToolSource>) -> Self {
        Self {
            source: Some(source),
        }
    }

    /// A provisioner that never offers tools.
    pub fn disabled() -> Self {
        Self { source: None }
    }

    pub async fn get_tools(&self) -> ToolSet {
        let Some(source) = &self.source else {
            return ToolSet::default();
        };
        match source.list_tools().await {
            Ok(tools) => {
                let set = ToolSet::new(tools);
                info!("Provisioned {} external tool(s): {:?}", set.len(), set.names());
                set
            }
            Err(e) => {
                warn!("{}; continuing without external tools", AdapterError::ToolProvision(e));
                ToolSet::default()
            }
        }
    }
}

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::Tool;
use crate::agent::memory::MemoryStore;

/// Lets the agent rewrite the current subject's working memory.
///
/// Built per generation so the subject id is fixed for the call.
pub struct UpdateWorkingMemoryTool {
    store: Arc<MemoryStore>,
    resource_id: String,
}

impl UpdateWorkingMemoryTool {
    pub fn new(store: Arc<MemoryStore>, resource_id: impl Into<String>) -> Self {
        Self {
            store,
            resource_id: resource_id.into(),
        }
    }
}

#[async_trait]
impl Tool for UpdateWorkingMemoryTool {
    fn name(&self) -> &str {
        "update_working_memory"
    }

    fn description(&self) -> &str {
        "Replace the student's working memory profile. Pass the complete updated profile, \
         keeping the template's headings and every fact that is still true."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "memory": {
                    "type": "string",
                    "description": "Full replacement text for the working memory profile",
                    "minLength": 1
                }
            },
            "required": ["memory"]
        })
    }

    async fn execute(&self, params: serde_json::Value) -> Result<String> {
        let memory = params
            .get("memory")
            .and_then(|m| m.as_str())
            .unwrap_or("");
        if memory.trim().is_empty() {
            return Ok("Error: memory is required".into());
        }
        self.store.update_working_memory(&self.resource_id, memory)?;
        Ok("Working memory updated.".into())
    }
}

//! MCP tool server client.
//!
//! Spawns the configured server as a child process speaking MCP over stdio,
//! keeps one connection per process, and exposes each advertised tool as a
//! [`Tool`].

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use rmcp::model::{CallToolRequestParams, RawContent};
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::TokioChildProcess;
use rmcp::ServiceExt;
use serde_json::Value;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{Tool, ToolSource};

type McpPeer = RunningService<RoleClient, ()>;

pub struct McpToolSource {
    command: String,
    args: Vec<String>,
    env: HashMap<String, String>,
    peer: Mutex<Option<Arc<McpPeer>>>,
}

impl McpToolSource {
    pub fn new(command: impl Into<String>, args: Vec<String>, env: HashMap<String, String>) -> Self {
        Self {
            command: command.into(),
            args,
            env,
            peer: Mutex::new(None),
        }
    }

    /// Reuse the live connection, or spawn the server once.
    async fn connect(&self) -> Result<Arc<McpPeer>> {
        let mut guard = self.peer.lock().await;
        if let Some(peer) = guard.as_ref() {
            return Ok(peer.clone());
        }

        let mut command = Command::new(&self.command);
        command.args(&self.args).envs(&self.env);
        info!("Starting MCP tool server: {} {}", self.command, self.args.join(" "));

        let transport = TokioChildProcess::new(command)?;
        let peer: McpPeer = ().serve(transport).await?;
        let peer = Arc::new(peer);
        *guard = Some(peer.clone());
        Ok(peer)
    }
}

#[async_trait]
impl ToolSource for McpToolSource {
    async fn list_tools(&self) -> Result<Vec<Arc<dyn Tool>>> {
        let peer = self.connect().await?;
        let listed = match peer.list_all_tools().await {
            Ok(tools) => tools,
            Err(e) => {
                // Drop the connection so the next build reconnects.
                *self.peer.lock().await = None;
                return Err(anyhow::anyhow!("listing MCP tools failed: {e}"));
            }
        };

        Ok(listed
            .iter()
            .map(|t| Arc::new(McpTool::from_listing(peer.clone(), t)) as Arc<dyn Tool>)
            .collect())
    }
}

/// One tool advertised by the MCP server.
pub struct McpTool {
    peer: Arc<McpPeer>,
    name: String,
    description: String,
    schema: Value,
}

impl McpTool {
    fn from_listing(peer: Arc<McpPeer>, tool: &rmcp::model::Tool) -> Self {
        Self {
            peer,
            name: tool.name.to_string(),
            description: tool
                .description
                .as_ref()
                .map(|d| d.to_string())
                .unwrap_or_default(),
            schema: Value::Object((*tool.input_schema).clone()),
        }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        self.schema.clone()
    }

    async fn execute(&self, params: Value) -> Result<String> {
        let request = call_params(&self.name, params)?;
        let result = self
            .peer
            .call_tool(request)
            .await
            .map_err(|e| anyhow::anyhow!("mcp call failed: {e}"))?;
        let text = extract_text(&result.content);
        debug!("MCP tool '{}' returned {} chars", self.name, text.len());

        if result.is_error == Some(true) {
            Ok(format!("Error executing {}: {text}", self.name))
        } else {
            Ok(text)
        }
    }
}

/// Build a `tools/call` request. Null means no arguments.
fn call_params(name: &str, params: Value) -> Result<CallToolRequestParams> {
    let request = CallToolRequestParams::new(name.to_string());
    match params {
        Value::Object(map) => Ok(request.with_arguments(map)),
        Value::Null => Ok(request),
        other => anyhow::bail!("tool arguments must be a JSON object, got {other}"),
    }
}

fn extract_text(content: &[rmcp::model::Content]) -> String {
    content
        .iter()
        .filter_map(|c| match &c.raw {
            RawContent::Text(t) => Some(t.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n")
}

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub agent: AgentConfig,
    pub memory: MemoryConfig,
    pub tools: ToolServerConfig,
    pub stream: StreamConfig,
}

/// Upstream model provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    /// Falls back to the `OPENAI_API_KEY` env var when unset.
    pub api_key: Option<String>,
    pub api_base: String,
    /// Prefix every well-formed key starts with. Checked before any network call.
    pub key_prefix: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://api.openai.com/v1".into(),
            key_prefix: "sk-".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgentConfig {
    pub name: String,
    pub model: String,
    pub embedding_model: String,
    pub temperature: f64,
    pub max_tokens: u64,
    /// Upper bound on model calls (tool round-trips) per generation.
    pub max_steps: usize,
    /// Replaces the built-in tutor instructions when set.
    pub instructions: Option<String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "mentor".into(),
            model: "gpt-4o-mini".into(),
            embedding_model: "text-embedding-3-small".into(),
            temperature: 0.7,
            max_tokens: 2048,
            max_steps: 10,
            instructions: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryConfig {
    /// SQLite file. Default: `<temp_dir>/mentor/memory.db`.
    pub path: Option<String>,
    pub last_messages: usize,
    pub top_k: usize,
    pub message_range: usize,
    pub working_memory_template: Option<String>,
    pub default_resource_id: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            path: None,
            last_messages: 15,
            top_k: 5,
            message_range: 3,
            working_memory_template: None,
            default_resource_id: "default-student".into(),
        }
    }
}

/// External MCP tool server, spawned as a child process speaking stdio.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ToolServerConfig {
    pub enabled: bool,
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl Default for ToolServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            command: "npx".into(),
            args: vec![
                "-y".into(),
                "@modelcontextprotocol/server-everything".into(),
            ],
            env: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamConfig {
    pub chunk_size: usize,
    pub delay_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: 50,
            delay_ms: 50,
        }
    }
}

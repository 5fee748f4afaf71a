//! Caller-facing entry point: credential validation and streaming sessions.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::agent::context::DEFAULT_INSTRUCTIONS;
use crate::agent::lifecycle::{AgentManager, AgentSettings};
use crate::agent::model::{ModelBackend, OpenAiBackend};
use crate::agent::r#loop::{GenerateOptions, GenerationResult};
use crate::agent::recall::{MemoryOptions, DEFAULT_WORKING_MEMORY_TEMPLATE};
use crate::credential::{check_format, Credential};
use crate::error::{AdapterError, Result};
use crate::loader::ModuleLoader;
use crate::message::Message;
use crate::stream::{ChunkStream, StreamEmitter};
use crate::tools::mcp::McpToolSource;
use crate::tools::ToolProvisioner;

#[derive(Debug, Clone)]
pub struct ToolServerSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

/// Resolved runtime configuration for a [`Provider`].
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Fallback credential when a session supplies none.
    pub api_key: Option<String>,
    pub api_base: String,
    pub key_prefix: String,
    pub embedding_model: String,
    pub agent: AgentSettings,
    pub memory_path: PathBuf,
    /// `None` disables the external tool server.
    pub tools: Option<ToolServerSpec>,
    pub chunk_size: usize,
    pub stream_delay: Duration,
}

impl AdapterConfig {
    pub fn from_config(config: &mentor_config::Config) -> Self {
        let agent = &config.agent;
        let memory = &config.memory;
        Self {
            api_key: mentor_config::resolve_api_key(config),
            api_base: config.provider.api_base.clone(),
            key_prefix: config.provider.key_prefix.clone(),
            embedding_model: agent.embedding_model.clone(),
            agent: AgentSettings {
                name: agent.name.clone(),
                model: agent.model.clone(),
                instructions: agent
                    .instructions
                    .clone()
                    .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
                temperature: agent.temperature,
                max_tokens: agent.max_tokens,
                max_steps: agent.max_steps,
                default_resource_id: memory.default_resource_id.clone(),
                memory: MemoryOptions {
                    last_messages: memory.last_messages,
                    top_k: memory.top_k,
                    message_range: memory.message_range,
                    working_memory_template: memory
                        .working_memory_template
                        .clone()
                        .unwrap_or_else(|| DEFAULT_WORKING_MEMORY_TEMPLATE.to_string()),
                },
            },
            memory_path: mentor_config::resolve_memory_path(config),
            tools: config.tools.enabled.then(|| ToolServerSpec {
                command: config.tools.command.clone(),
                args: config.tools.args.clone(),
                env: config.tools.env.clone(),
            }),
            chunk_size: config.stream.chunk_size,
            stream_delay: Duration::from_millis(config.stream.delay_ms),
        }
    }
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self::from_config(&mentor_config::Config::default())
    }
}

/// Outcome of [`Provider::validate_credential`]. Never an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialCheck {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CredentialCheck {
    fn ok() -> Self {
        Self {
            success: true,
            error: None,
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
        }
    }
}

/// Options for one streaming session.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    pub credential: Option<String>,
    /// Accepted for compatibility; the agent model is fixed by configuration.
    pub model: Option<String>,
    pub temperature: Option<f64>,
    pub max_tokens: Option<u64>,
    pub resource_id: Option<String>,
    pub thread_id: Option<String>,
    pub max_steps: Option<usize>,
}

/// Owns the agent lifecycle for one process (or one test).
pub struct Provider {
    config: AdapterConfig,
    agents: Arc<AgentManager>,
    emitter: StreamEmitter,
    http: reqwest::Client,
}

impl Provider {
    /// Production wiring: OpenAI-compatible backend and the configured MCP server.
    pub fn new(config: AdapterConfig) -> Self {
        let backend = Arc::new(OpenAiBackend::new(
            config.api_base.clone(),
            config.embedding_model.clone(),
        ));
        let provisioner = match &config.tools {
            Some(spec) => ToolProvisioner::new(Arc::new(McpToolSource::new(
                spec.command.clone(),
                spec.args.clone(),
                spec.env.clone(),
            ))),
            None => ToolProvisioner::disabled(),
        };
        Self::with_parts(config, backend, provisioner)
    }

    pub fn with_parts(
        config: AdapterConfig,
        backend: Arc<dyn ModelBackend>,
        provisioner: ToolProvisioner,
    ) -> Self {
        let agents = Arc::new(AgentManager::new(
            ModuleLoader::new(config.memory_path.clone()),
            provisioner,
            backend,
            config.agent.clone(),
        ));
        let emitter = StreamEmitter::new(config.chunk_size, config.stream_delay);
        Self {
            config,
            agents,
            emitter,
            http: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &AdapterConfig {
        &self.config
    }

    pub fn agents(&self) -> &AgentManager {
        &self.agents
    }

    /// Format-check `key` locally, then confirm it against the provider's
    /// model listing. Network problems are reported, not raised.
    pub async fn validate_credential(&self, key: &str) -> CredentialCheck {
        if let Err(reason) = check_format(key, &self.config.key_prefix) {
            return CredentialCheck::failed(reason);
        }

        let url = format!("{}/models", self.config.api_base.trim_end_matches('/'));
        match self.http.get(&url).bearer_auth(key.trim()).send().await {
            Ok(resp) if resp.status().is_success() => CredentialCheck::ok(),
            Ok(resp) if resp.status() == StatusCode::UNAUTHORIZED => {
                CredentialCheck::failed("Invalid API key")
            }
            Ok(resp) => CredentialCheck::failed(format!("API error: {}", resp.status().as_u16())),
            Err(e) => {
                warn!("Credential check could not reach {url}: {e}");
                CredentialCheck::failed("Network error: unable to reach the provider")
            }
        }
    }

    /// Make sure an agent is ready, then return a session bound to `session`'s
    /// routing and sampling options.
    ///
    /// A session credential always wins and may rotate the cached agent.
    /// Without one, an existing agent is reused, or the configured key is used
    /// to build the first one.
    pub async fn create_session(&self, session: SessionConfig) -> Result<ChatSession> {
        let explicit = session.credential.as_deref().filter(|k| !k.trim().is_empty());
        match explicit {
            Some(key) => {
                let credential = Credential::parse(key, &self.config.key_prefix)?;
                self.agents.ensure_ready(&credential).await?;
            }
            None if self.agents.is_ready().await => {}
            None => {
                let key = self
                    .config
                    .api_key
                    .as_deref()
                    .ok_or(AdapterError::MissingCredential)?;
                let credential = Credential::parse(key, &self.config.key_prefix)?;
                self.agents.ensure_ready(&credential).await?;
            }
        }

        if let Some(model) = session.model.as_deref() {
            if model != self.config.agent.model {
                debug!(
                    "Ignoring session model '{model}'; agent uses '{}'",
                    self.config.agent.model
                );
            }
        }

        Ok(ChatSession {
            agents: self.agents.clone(),
            emitter: self.emitter.clone(),
            options: GenerateOptions {
                resource_id: session.resource_id,
                thread_id: session.thread_id,
                max_steps: session.max_steps,
                temperature: session.temperature,
                max_tokens: session.max_tokens,
            },
        })
    }
}

/// A configured conversation endpoint. Cheap to clone.
#[derive(Clone)]
pub struct ChatSession {
    agents: Arc<AgentManager>,
    emitter: StreamEmitter,
    options: GenerateOptions,
}

impl ChatSession {
    pub fn options(&self) -> &GenerateOptions {
        &self.options
    }

    /// Run one generation without streaming.
    pub async fn chat(&self, conversation: &[Message]) -> Result<GenerationResult> {
        self.agents.generate(conversation, &self.options).await
    }

    /// Run one generation and stream the reply.
    ///
    /// Generation finishes before this returns, so upstream failures surface
    /// here and never as a partial stream.
    pub async fn stream_chat(&self, conversation: &[Message]) -> Result<ChunkStream> {
        let result = self.chat(conversation).await?;
        Ok(self.emitter.emit(&result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(api_base: &str, dir: &tempfile::TempDir) -> Provider {
        let config = AdapterConfig {
            api_base: api_base.to_string(),
            memory_path: dir.path().join("memory.db"),
            tools: None,
            api_key: None,
            ..AdapterConfig::default()
        };
        Provider::new(config)
    }

    #[tokio::test]
    async fn test_valid_key_accepted() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .and(header("Authorization", "Bearer sk-good"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let check = provider(&server.uri(), &dir).validate_credential("sk-good").await;
        assert_eq!(check, CredentialCheck::ok());
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_invalid_key() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let check = provider(&server.uri(), &dir).validate_credential("sk-revoked").await;
        assert!(!check.success);
        assert_eq!(check.error.as_deref(), Some("Invalid API key"));
    }

    #[tokio::test]
    async fn test_other_status_reported() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let check = provider(&server.uri(), &dir).validate_credential("sk-any").await;
        assert_eq!(check.error.as_deref(), Some("API error: 503"));
    }

    #[tokio::test]
    async fn test_malformed_key_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let p = provider(&server.uri(), &dir);
        for key in ["", "pk-123", "sk-", "sk-has space"] {
            let check = p.validate_credential(key).await;
            assert!(!check.success, "{key:?} should be rejected");
            assert!(check.error.is_some());
        }
    }

    #[tokio::test]
    async fn test_network_failure_is_a_result() {
        // Bind then release a port so nothing is listening on it.
        let addr = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap();
        let dir = tempfile::tempdir().unwrap();
        let check = provider(&format!("http://{addr}"), &dir)
            .validate_credential("sk-offline")
            .await;
        assert_eq!(
            check.error.as_deref(),
            Some("Network error: unable to reach the provider")
        );
    }

    #[tokio::test]
    async fn test_session_without_any_key_is_missing_credential() {
        let dir = tempfile::tempdir().unwrap();
        let err = provider("http://127.0.0.1:9", &dir)
            .create_session(SessionConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AdapterError::MissingCredential));
    }

    #[tokio::test]
    async fn test_session_rejects_malformed_credential() {
        let dir = tempfile::tempdir().unwrap();
        let err = provider("http://127.0.0.1:9", &dir)
            .create_session(SessionConfig {
                credential: Some("not-a-key".into()),
                ..Default::default()
            })
            .await
            .err()
            .unwrap();
        assert!(matches!(err, AdapterError::InvalidCredential(_)));
    }

    #[test]
    fn test_session_config_from_camel_case() {
        let cfg: SessionConfig = serde_json::from_value(serde_json::json!({
            "credential": "sk-x",
            "maxTokens": 512,
            "resourceId": "student-7",
            "threadId": "t-1",
            "maxSteps": 4
        }))
        .unwrap();
        assert_eq!(cfg.max_tokens, Some(512));
        assert_eq!(cfg.resource_id.as_deref(), Some("student-7"));
        assert_eq!(cfg.max_steps, Some(4));
        assert!(cfg.temperature.is_none());
    }

    #[test]
    fn test_adapter_config_from_defaults() {
        let config = mentor_config::Config::default();
        let adapter = AdapterConfig::from_config(&config);
        assert_eq!(adapter.chunk_size, 50);
        assert_eq!(adapter.stream_delay, Duration::from_millis(50));
        assert_eq!(adapter.agent.max_steps, 10);
        assert_eq!(adapter.agent.memory.top_k, 5);
        assert!(adapter.memory_path.ends_with("mentor/memory.db"));
        assert!(adapter.tools.is_some());
    }

    #[test]
    fn test_check_serializes_without_null_error() {
        let json = serde_json::to_value(CredentialCheck::ok()).unwrap();
        assert_eq!(json, serde_json::json!({"success": true}));
    }
}

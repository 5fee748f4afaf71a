use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::agent::context::DEFAULT_INSTRUCTIONS;
use crate::agent::model::{ChatModel, ModelBackend};
use crate::agent::r#loop::{GenerateOptions, GenerationResult};
use crate::agent::recall::{MemoryBinding, MemoryOptions};
use crate::credential::Credential;
use crate::error::{AdapterError, Result};
use crate::loader::ModuleLoader;
use crate::message::Message;
use crate::tools::{ToolProvisioner, ToolSet};

/// Fixed parameters for every agent the manager builds.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub name: String,
    pub model: String,
    pub instructions: String,
    pub temperature: f64,
    pub max_tokens: u64,
    pub max_steps: usize,
    pub default_resource_id: String,
    pub memory: MemoryOptions,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            name: "mentor".into(),
            model: "gpt-4o-mini".into(),
            instructions: DEFAULT_INSTRUCTIONS.into(),
            temperature: 0.7,
            max_tokens: 2048,
            max_steps: 10,
            default_resource_id: "default-student".into(),
            memory: MemoryOptions::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct GenerationDefaults {
    pub resource_id: String,
    pub max_steps: usize,
    pub temperature: f64,
    pub max_tokens: u64,
}

/// A built agent bound to one credential.
///
/// Everything here is fixed at build time; a credential change produces a
/// new handle rather than mutating this one.
pub struct AgentHandle {
    pub(crate) credential: Credential,
    pub(crate) model_id: String,
    pub(crate) instructions: String,
    pub(crate) model: Arc<dyn ChatModel>,
    pub(crate) tools: ToolSet,
    pub(crate) memory: MemoryBinding,
    pub(crate) defaults: GenerationDefaults,
}

impl AgentHandle {
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }
}

/// Owns the cached agent and rebuilds it when the credential changes.
///
/// The check, rebuild and cache sequence runs under one async mutex, so
/// concurrent callers never race two builds or observe a half-built handle.
pub struct AgentManager {
    loader: ModuleLoader,
    provisioner: ToolProvisioner,
    backend: Arc<dyn ModelBackend>,
    settings: AgentSettings,
    slot: Mutex<Option<Arc<AgentHandle>>>,
    builds: AtomicUsize,
}

impl AgentManager {
    pub fn new(
        loader: ModuleLoader,
        provisioner: ToolProvisioner,
        backend: Arc<dyn ModelBackend>,
        settings: AgentSettings,
    ) -> Self {
        Self {
            loader,
            provisioner,
            backend,
            settings,
            slot: Mutex::new(None),
            builds: AtomicUsize::new(0),
        }
    }

    pub fn settings(&self) -> &AgentSettings {
        &self.settings
    }

    /// Return the cached agent for `credential`, building it if needed.
    pub async fn ensure_ready(&self, credential: &Credential) -> Result<Arc<AgentHandle>> {
        let mut slot = self.slot.lock().await;

        if let Some(handle) = slot.as_ref() {
            if handle.credential() == credential {
                debug!("Reusing cached agent '{}'", self.settings.name);
                return Ok(handle.clone());
            }
            info!("Credential changed, discarding cached agent '{}'", self.settings.name);
            *slot = None;
        }

        let handle = Arc::new(self.build(credential).await?);
        let n = self.builds.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "Agent '{}' ready (build #{n}): model={}, {} tool(s)",
            self.settings.name,
            handle.model_id,
            handle.tools.len()
        );
        *slot = Some(handle.clone());
        Ok(handle)
    }

    async fn build(&self, credential: &Credential) -> Result<AgentHandle> {
        let modules = self.loader.load().await?;
        let tools = self.provisioner.get_tools().await;

        let model = self
            .backend
            .chat_model(credential, &self.settings.model)
            .map_err(AdapterError::AgentInit)?;
        let embedder = self
            .backend
            .embedder(credential)
            .map_err(AdapterError::AgentInit)?;
        let memory = MemoryBinding::new(
            modules.store.clone(),
            embedder,
            self.settings.memory.clone(),
        );

        Ok(AgentHandle {
            credential: credential.clone(),
            model_id: self.settings.model.clone(),
            instructions: self.settings.instructions.clone(),
            model,
            tools,
            memory,
            defaults: GenerationDefaults {
                resource_id: self.settings.default_resource_id.clone(),
                max_steps: self.settings.max_steps,
                temperature: self.settings.temperature,
                max_tokens: self.settings.max_tokens,
            },
        })
    }

    /// The cached agent, or `NotInitialized` if none has been built.
    pub async fn current(&self) -> Result<Arc<AgentHandle>> {
        self.slot
            .lock()
            .await
            .clone()
            .ok_or(AdapterError::NotInitialized)
    }

    pub async fn is_ready(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    /// Number of successful builds since construction.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub async fn generate(
        &self,
        conversation: &[Message],
        options: &GenerateOptions,
    ) -> Result<GenerationResult> {
        let handle = self.current().await?;
        handle.generate(conversation, options).await
    }
}

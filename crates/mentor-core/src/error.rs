use thiserror::Error;

/// Errors surfaced across the adapter boundary.
///
/// Tool provisioning failures are the one infrastructure error that never
/// reaches a caller: the provisioner logs them and degrades to an empty
/// tool set.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("failed to load agent dependencies: {0:#}")]
    DependencyLoad(#[source] anyhow::Error),

    #[error("tool provisioning failed: {0:#}")]
    ToolProvision(#[source] anyhow::Error),

    #[error("agent initialization failed: {0:#}")]
    AgentInit(#[source] anyhow::Error),

    #[error("agent is not initialized; a credential must be accepted before generating")]
    NotInitialized,

    #[error("no credential configured")]
    MissingCredential,

    #[error("invalid credential: {0}")]
    InvalidCredential(String),

    #[error("invalid conversation: {0}")]
    InvalidConversation(String),

    #[error("generation failed: {0:#}")]
    UpstreamGeneration(#[source] anyhow::Error),

    #[error("memory store error: {0:#}")]
    Memory(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AdapterError>;

pub mod agent;
pub mod credential;
pub mod error;
pub mod loader;
pub mod message;
pub mod provider;
pub mod stream;
pub mod tools;

// Re-export key types
pub use agent::{AgentHandle, AgentManager, GenerateOptions, GenerationResult};
pub use credential::Credential;
pub use error::{AdapterError, Result};
pub use loader::ModuleLoader;
pub use message::{Content, ContentPart, Message, Role};
pub use provider::{AdapterConfig, ChatSession, CredentialCheck, Provider, SessionConfig};
pub use stream::{into_sse, ChunkStream, StreamChunk, StreamEmitter};
pub use tools::{Tool, ToolProvisioner, ToolRegistry, ToolSet, ToolSource};

pub mod context;
pub mod lifecycle;
pub mod r#loop;
pub mod memory;
pub mod model;
pub mod recall;

pub use context::ContextBuilder;
pub use lifecycle::{AgentHandle, AgentManager, AgentSettings};
pub use memory::{MemoryStore, StoredMessage};
pub use model::{ChatModel, Embedder, ModelBackend, OpenAiBackend};
pub use r#loop::{GenerateOptions, GenerationResult, Step, ToolCallRecord};
pub use recall::{MemoryBinding, MemoryContext, MemoryOptions};

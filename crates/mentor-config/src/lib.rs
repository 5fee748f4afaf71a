pub mod loader;
pub mod schema;

pub use loader::{find_config_path, load_config, resolve_api_key, resolve_memory_path, resolve_path};
pub use schema::{AgentConfig, Config, MemoryConfig, ProviderConfig, StreamConfig, ToolServerConfig};

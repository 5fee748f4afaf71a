use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::Config;

/// Expand a leading `~` to the home directory.
pub fn resolve_path(path: &str) -> PathBuf {
    if path.starts_with("~/") || path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home.join(path.strip_prefix("~/").unwrap_or(""));
        }
    }
    PathBuf::from(path)
}

/// Location of the memory database: the configured path, or a fixed
/// subpath of the process temp directory.
pub fn resolve_memory_path(config: &Config) -> PathBuf {
    match config.memory.path.as_deref().filter(|p| !p.is_empty()) {
        Some(p) => resolve_path(p),
        None => std::env::temp_dir().join("mentor").join("memory.db"),
    }
}

/// Find the config file by searching standard locations.
pub fn find_config_path() -> PathBuf {
    let local = Path::new("config.json");
    if local.exists() {
        return local.to_path_buf();
    }

    if let Some(home) = dirs::home_dir() {
        let home_config = home.join(".mentor").join("config.json");
        if home_config.exists() {
            return home_config;
        }
    }

    // Default: ~/.mentor/config.json (will use defaults if missing)
    dirs::home_dir()
        .map(|h| h.join(".mentor").join("config.json"))
        .unwrap_or_else(|| PathBuf::from("config.json"))
}

/// Load configuration from a JSON file. A missing file yields defaults.
pub fn load_config(path: &Path) -> Result<Config> {
    if path.exists() {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config '{}'", path.display()))?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse config '{}'", path.display()))?;
        Ok(config)
    } else {
        Ok(Config::default())
    }
}

/// Resolve the provider key: config first, then `OPENAI_API_KEY`.
pub fn resolve_api_key(config: &Config) -> Option<String> {
    config
        .provider
        .api_key
        .clone()
        .filter(|k| !k.is_empty())
        .or_else(|| std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = load_config(&dir.path().join("nope.json")).unwrap();
        assert_eq!(cfg.agent.model, "gpt-4o-mini");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn memory_path_defaults_under_temp_dir() {
        let cfg = Config::default();
        let path = resolve_memory_path(&cfg);
        assert!(path.starts_with(std::env::temp_dir()));
        assert!(path.ends_with("mentor/memory.db"));
    }

    #[test]
    fn memory_path_honours_override() {
        let mut cfg = Config::default();
        cfg.memory.path = Some("/var/lib/mentor/mem.db".into());
        assert_eq!(
            resolve_memory_path(&cfg),
            PathBuf::from("/var/lib/mentor/mem.db")
        );
    }

    #[test]
    fn configured_key_wins() {
        let mut cfg = Config::default();
        cfg.provider.api_key = Some("sk-from-config".into());
        assert_eq!(resolve_api_key(&cfg).as_deref(), Some("sk-from-config"));
    }
}

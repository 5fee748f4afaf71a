use std::fmt;

use crate::error::{AdapterError, Result};

/// An upstream provider API key.
///
/// Compared by value so a rotated key is detected as a different credential.
/// `Debug` only shows the prefix.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    /// Accept `key` if it is well-formed for a provider whose keys start with `prefix`.
    pub fn parse(key: &str, prefix: &str) -> Result<Self> {
        check_format(key, prefix).map_err(AdapterError::InvalidCredential)?;
        Ok(Self(key.trim().to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let visible: String = self.0.chars().take(3).collect();
        write!(f, "Credential({visible}…)")
    }
}

/// Local, network-free format check. Returns the user-facing reason on failure.
pub fn check_format(key: &str, prefix: &str) -> std::result::Result<(), String> {
    let key = key.trim();
    if key.is_empty() {
        return Err("API key is required".into());
    }
    if !key.starts_with(prefix) || key.len() <= prefix.len() {
        return Err(format!("Invalid API key format. Keys start with \"{prefix}\""));
    }
    if key.chars().any(char::is_whitespace) {
        return Err("API key must not contain whitespace".into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_prefixed_key() {
        let cred = Credential::parse("sk-abc123", "sk-").unwrap();
        assert_eq!(cred.expose(), "sk-abc123");
    }

    #[test]
    fn trims_surrounding_whitespace() {
        let cred = Credential::parse("  sk-abc123\n", "sk-").unwrap();
        assert_eq!(cred.expose(), "sk-abc123");
    }

    #[test]
    fn rejects_empty_and_bare_prefix() {
        assert!(check_format("", "sk-").is_err());
        assert!(check_format("   ", "sk-").is_err());
        assert!(check_format("sk-", "sk-").is_err());
    }

    #[test]
    fn rejects_wrong_prefix() {
        let err = Credential::parse("pk-abc123", "sk-").unwrap_err();
        assert!(matches!(err, AdapterError::InvalidCredential(_)));
    }

    #[test]
    fn rejects_inner_whitespace() {
        assert!(check_format("sk-abc 123", "sk-").is_err());
    }

    #[test]
    fn debug_redacts_secret() {
        let cred = Credential::parse("sk-supersecret", "sk-").unwrap();
        let shown = format!("{cred:?}");
        assert!(!shown.contains("supersecret"));
    }

    #[test]
    fn equality_is_by_value() {
        let a = Credential::parse("sk-one", "sk-").unwrap();
        let b = Credential::parse("sk-one", "sk-").unwrap();
        let c = Credential::parse("sk-two", "sk-").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}

//! API key handling.
//!
//! A key is wrapped in a [`SecretString`] as soon as it is read and is only
//! exposed when the request header is written.

use secrecy::{ExposeSecret, SecretString};
use std::fmt;

use super::ProviderError;

/// Where an [`ApiKey`] came from, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOrigin {
    ConfigFile,
    Env(String),
    Inline,
}

impl fmt::Display for KeyOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyOrigin::ConfigFile => f.write_str("config file"),
            KeyOrigin::Env(var) => write!(f, "${var}"),
            KeyOrigin::Inline => f.write_str("inline"),
        }
    }
}

/// A provider API key. Never printed.
pub struct ApiKey {
    secret: SecretString,
    origin: KeyOrigin,
}

impl ApiKey {
    pub fn inline(value: impl Into<String>) -> Self {
        Self {
            secret: SecretString::from(value.into()),
            origin: KeyOrigin::Inline,
        }
    }

    /// The configured key if one is set, otherwise `env_var`. Blank values
    /// count as unset.
    pub fn resolve(configured: Option<&str>, env_var: &str) -> Result<Self, ProviderError> {
        if let Some(value) = configured.map(str::trim).filter(|v| !v.is_empty()) {
            return Ok(Self {
                secret: SecretString::from(value.to_string()),
                origin: KeyOrigin::ConfigFile,
            });
        }

        match std::env::var(env_var) {
            Ok(value) if !value.trim().is_empty() => Ok(Self {
                secret: SecretString::from(value.trim().to_string()),
                origin: KeyOrigin::Env(env_var.to_string()),
            }),
            _ => Err(ProviderError::NotConfigured(format!(
                "no API key: set provider.api_key or ${env_var}"
            ))),
        }
    }

    pub fn origin(&self) -> &KeyOrigin {
        &self.origin
    }

    pub(crate) fn expose(&self) -> &str {
        self.secret.expose_secret()
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ApiKey(<redacted> from {})", self.origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNSET: &str = "CRCHECK_TEST_KEY_THAT_IS_NEVER_SET";

    #[test]
    fn test_debug_is_redacted() {
        let key = ApiKey::inline("sk-ant-very-secret");
        let shown = format!("{:?}", key);
        assert!(!shown.contains("very-secret"));
        assert_eq!(shown, "ApiKey(<redacted> from inline)");
    }

    #[test]
    fn test_configured_key_wins() {
        let key = ApiKey::resolve(Some("  from-config \n"), UNSET).unwrap();
        assert_eq!(key.expose(), "from-config");
        assert_eq!(key.origin(), &KeyOrigin::ConfigFile);
    }

    #[test]
    fn test_blank_config_and_no_env_is_an_error() {
        let err = ApiKey::resolve(Some(" "), UNSET).unwrap_err();
        match err {
            ProviderError::NotConfigured(message) => assert!(message.contains(UNSET)),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}

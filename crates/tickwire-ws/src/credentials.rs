//! API token handling
//!
//! # Security
//!
//! The token is held in a `secrecy::SecretString`:
//! - Zeroized on drop
//! - Redacted in `Debug` output, so it cannot leak through logs
//! - Readable only through `expose_secret()`

use crate::config::ConfigError;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use tickwire_types::AuthFrame;

/// Environment variables checked by [`Credentials::from_env`], in order
pub const TOKEN_ENV_VARS: [&str; 2] = ["TICKWIRE_TOKEN", "KEY"];

/// Opaque provider token
pub struct Credentials {
    token: SecretString,
}

impl Credentials {
    /// Wrap a token
    pub fn new(token: impl Into<String>) -> Result<Self, ConfigError> {
        let token: String = token.into();
        if token.trim().is_empty() {
            return Err(ConfigError::EmptyToken);
        }

        Ok(Self {
            token: SecretString::from(token),
        })
    }

    /// Read the token from `TICKWIRE_TOKEN`, falling back to `KEY`
    pub fn from_env() -> Result<Self, ConfigError> {
        for var in TOKEN_ENV_VARS {
            if let Ok(token) = std::env::var(var) {
                if !token.trim().is_empty() {
                    return Self::new(token);
                }
            }
        }

        Err(ConfigError::MissingToken {
            vars: TOKEN_ENV_VARS.to_vec(),
        })
    }

    /// Serialized auth frame. The result contains the token; do not log it.
    pub(crate) fn auth_frame(&self) -> Result<String, serde_json::Error> {
        AuthFrame::new(self.token.expose_secret()).to_json()
    }
}

impl Clone for Credentials {
    fn clone(&self) -> Self {
        Self {
            token: SecretString::from(self.token.expose_secret().to_string()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_redacts_token() {
        let creds = Credentials::new("super-secret-token").unwrap();
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("super-secret-token"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn test_empty_token_rejected() {
        assert_eq!(Credentials::new("  ").unwrap_err(), ConfigError::EmptyToken);
    }

    #[test]
    fn test_auth_frame() {
        let creds = Credentials::new("abc123").unwrap();
        assert_eq!(creds.clone().auth_frame().unwrap(), r#"{"token":"abc123"}"#);
    }
}

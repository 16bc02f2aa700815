//! Token validation with constant-time comparison.

use std::path::Path;

use ring::hmac;
use ring::rand::SystemRandom;

use crate::config::SecurityConfig;
use crate::error::{AuthErrorKind, WireError};

/// Decides whether a presented token is acceptable.
///
/// Implemented by [`StaticTokens`] and by any `Fn(&str) -> bool` closure,
/// which lets an embedding application plug in its own credential store.
pub trait TokenValidator: Send + Sync {
    fn is_valid(&self, token: &str) -> bool;
}

impl<F> TokenValidator for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_valid(&self, token: &str) -> bool {
        self(token)
    }
}

/// An immutable set of plain-secret tokens.
///
/// Tokens are never held in the clear: each one is stored as an HMAC tag
/// under a per-process random key, and candidates are checked with
/// `hmac::verify`, which compares in constant time. Every stored tag is
/// checked on every attempt.
pub struct StaticTokens {
    key: hmac::Key,
    tags: Vec<hmac::Tag>,
}

impl StaticTokens {
    /// Create a token set from plain tokens.
    pub fn new<I, S>(tokens: I) -> Result<Self, WireError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let rng = SystemRandom::new();
        let key = hmac::Key::generate(hmac::HMAC_SHA256, &rng).map_err(|_| WireError::Auth {
            kind: AuthErrorKind::TokenSourceError {
                message: "Failed to generate token key".to_string(),
            },
        })?;

        let tags = tokens
            .into_iter()
            .filter(|t| !t.as_ref().is_empty())
            .map(|t| hmac::sign(&key, t.as_ref().as_bytes()))
            .collect();

        Ok(Self { key, tags })
    }

    /// Build the token set from the security configuration.
    ///
    /// Fails if neither inline tokens nor a token file yield any token: a
    /// server with no credentials would deny everything.
    pub fn from_config(security: &SecurityConfig) -> Result<Self, WireError> {
        let mut tokens = security.tokens.clone();
        if let Some(path) = &security.token_file {
            tokens.extend(Self::load_token_file(path)?);
        }

        if tokens.is_empty() {
            return Err(WireError::Auth {
                kind: AuthErrorKind::TokenSourceError {
                    message: "No tokens configured".to_string(),
                },
            });
        }

        Self::new(tokens)
    }

    /// Load tokens from a file, one per line.
    ///
    /// Blank lines and lines starting with `#` are ignored.
    /// Security: verifies the file has restrictive permissions (0600 or 0400)
    /// before loading to prevent secrets from being readable by other users.
    pub fn load_token_file(path: &Path) -> Result<Vec<String>, WireError> {
        // Check file permissions first
        let metadata = std::fs::metadata(path).map_err(|e| WireError::Auth {
            kind: AuthErrorKind::TokenSourceError {
                message: format!(
                    "Failed to read token file metadata from {}: {}",
                    path.display(),
                    e
                ),
            },
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = metadata.permissions().mode();
            // Group and world bits must all be zero
            if mode & 0o077 != 0 {
                return Err(WireError::Auth {
                    kind: AuthErrorKind::TokenSourceError {
                        message: format!(
                            "Token file {} has insecure permissions {:04o}, expected 0600 or 0400",
                            path.display(),
                            mode & 0o777
                        ),
                    },
                });
            }
        }
        #[cfg(not(unix))]
        let _ = metadata;

        let content = std::fs::read_to_string(path).map_err(|e| WireError::Auth {
            kind: AuthErrorKind::TokenSourceError {
                message: format!("Failed to read token file {}: {}", path.display(), e),
            },
        })?;

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect())
    }

    /// Number of configured tokens.
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

impl TokenValidator for StaticTokens {
    fn is_valid(&self, token: &str) -> bool {
        self.tags.iter().fold(false, |matched, tag| {
            let ok = hmac::verify(&self.key, token.as_bytes(), tag.as_ref()).is_ok();
            matched | ok
        })
    }
}

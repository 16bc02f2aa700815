//! Per-frame authentication gate.

use std::sync::Arc;

use crate::error::{AuthErrorKind, WireError};

use super::TokenValidator;

/// Checks the token of every incoming frame before dispatch.
///
/// Authentication is never cached on the connection: each frame must carry
/// a valid token of its own.
#[derive(Clone)]
pub struct AuthGate {
    validator: Arc<dyn TokenValidator>,
}

impl AuthGate {
    pub fn new(validator: Arc<dyn TokenValidator>) -> Self {
        Self { validator }
    }

    /// Validate the token of one frame.
    pub fn authenticate(&self, token: Option<&str>) -> Result<(), WireError> {
        let token = token.ok_or(WireError::Auth {
            kind: AuthErrorKind::MissingToken,
        })?;

        if self.validator.is_valid(token) {
            Ok(())
        } else {
            Err(WireError::Auth {
                kind: AuthErrorKind::InvalidToken,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::StaticTokens;

    fn gate() -> AuthGate {
        AuthGate::new(Arc::new(StaticTokens::new(["right"]).unwrap()))
    }

    #[test]
    fn test_valid_token() {
        assert!(gate().authenticate(Some("right")).is_ok());
    }

    #[test]
    fn test_invalid_token() {
        assert!(matches!(
            gate().authenticate(Some("wrong")),
            Err(WireError::Auth {
                kind: AuthErrorKind::InvalidToken
            })
        ));
    }

    #[test]
    fn test_missing_token() {
        assert!(matches!(
            gate().authenticate(None),
            Err(WireError::Auth {
                kind: AuthErrorKind::MissingToken
            })
        ));
    }

    #[test]
    fn test_every_frame_is_checked() {
        let gate = gate();
        assert!(gate.authenticate(Some("right")).is_ok());
        assert!(gate.authenticate(Some("wrong")).is_err());
        assert!(gate.authenticate(Some("right")).is_ok());
    }
}

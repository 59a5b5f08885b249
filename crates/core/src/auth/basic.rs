use std::sync::Arc;

use base64::prelude::{BASE64_STANDARD, Engine as _};
use subtle::ConstantTimeEq;

use super::credentials::CredentialStore;
use super::{AuthChallenge, AuthError, AuthProvider, split_scheme};

/// HTTP Basic authentication (RFC 7617).
///
/// ```text
/// WWW-Authenticate: Basic realm="BeyondTheWall", charset="UTF-8"
/// Authorization:    Basic YWxpY2U6c2VjcmV0
/// ```
pub struct BasicAuth {
    realm: String,
    credentials: Arc<CredentialStore>,
}

impl BasicAuth {
    pub fn new(realm: &str, credentials: Arc<CredentialStore>) -> Self {
        Self {
            realm: realm.to_string(),
            credentials,
        }
    }

    pub(super) fn challenge_value(&self) -> String {
        format!("Basic realm=\"{}\", charset=\"UTF-8\"", self.realm)
    }

    /// Check a `Basic` credential token (the part after the scheme).
    pub(super) fn verify(&self, token: &str) -> Result<(), AuthError> {
        let token = token.split([' ', '\t', ',']).next().unwrap_or("");
        let decoded = BASE64_STANDARD
            .decode(token)
            .map_err(|_| AuthError::MalformedChallenge)?;
        let decoded = String::from_utf8(decoded).map_err(|_| AuthError::MalformedChallenge)?;
        let (username, password) = decoded
            .split_once(':')
            .ok_or(AuthError::MalformedChallenge)?;

        let expected = self
            .credentials
            .password(username)
            .ok_or(AuthError::InvalidCredentials)?;

        if bool::from(expected.as_bytes().ct_eq(password.as_bytes())) {
            tracing::debug!(username, "basic credentials accepted");
            Ok(())
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }
}

impl AuthProvider for BasicAuth {
    fn new_challenge(&self, _stale: bool) -> AuthChallenge {
        AuthChallenge {
            values: vec![self.challenge_value()],
            realm: self.realm.clone(),
            nonce: None,
        }
    }

    fn authorize(
        &self,
        authorization: &str,
        _challenge: &AuthChallenge,
        _method: &str,
    ) -> Result<(), AuthError> {
        match split_scheme(authorization) {
            Some((scheme, token)) if scheme.eq_ignore_ascii_case("Basic") => self.verify(token),
            _ => Err(AuthError::InvalidCredentials),
        }
    }
}

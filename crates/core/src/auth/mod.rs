//! RTSP client authentication (RFC 2326 §16.3, RFC 2617).
//!
//! The server asks for credentials with `401 Unauthorized` plus one
//! `WWW-Authenticate` header per offered scheme; the client retries with an
//! `Authorization` header that an [`AuthProvider`] checks against the
//! challenge it issued on that connection.
//!
//! | Scheme | Provider | Notes |
//! |--------|----------|-------|
//! | Basic  | [`BasicAuth`] | base64 `user:password` |
//! | Digest | [`DigestAuth`] | MD5 and SHA-256, no `qop` |
//! | Both   | [`BasicOrDigest`] | dispatches on the `Authorization` scheme |

pub mod basic;
pub mod credentials;
pub mod digest;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

pub use basic::BasicAuth;
pub use credentials::CredentialStore;
pub use digest::{DigestAlgorithm, DigestAuth};

/// Realm used when none is configured.
pub const DEFAULT_REALM: &str = "BeyondTheWall";

/// Credential verification failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// Unknown user, wrong password, or a response that doesn't match the challenge.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// A required parameter is missing from the challenge or the client response.
    #[error("malformed authorization")]
    MalformedChallenge,
    /// The Digest nonce outlived its lifetime.
    #[error("stale nonce")]
    StaleNonce,
}

/// Which schemes the server offers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Basic,
    Digest,
    Both,
}

impl FromStr for AuthScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "basic" => Ok(Self::Basic),
            "digest" => Ok(Self::Digest),
            "both" => Ok(Self::Both),
            other => Err(format!("unknown auth scheme `{other}` (basic, digest, both)")),
        }
    }
}

impl fmt::Display for AuthScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic => write!(f, "basic"),
            Self::Digest => write!(f, "digest"),
            Self::Both => write!(f, "both"),
        }
    }
}

/// A challenge as sent to one client, kept to verify its next request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthChallenge {
    /// `WWW-Authenticate` header values, one per offered scheme/algorithm.
    pub values: Vec<String>,
    pub realm: String,
    /// Digest nonce; `None` for Basic-only challenges.
    pub nonce: Option<String>,
}

/// Issues challenges and verifies `Authorization` headers.
///
/// Providers are shared by every connection of a server, so they hold no
/// per-client state; the session keeps the last [`AuthChallenge`] it sent.
pub trait AuthProvider: Send + Sync {
    /// Build a fresh challenge. `stale` marks a retry after an expired nonce.
    fn new_challenge(&self, stale: bool) -> AuthChallenge;

    /// Verify an `Authorization` header value against the challenge this
    /// client received. `method` is the RTSP method of the request.
    fn authorize(
        &self,
        authorization: &str,
        challenge: &AuthChallenge,
        method: &str,
    ) -> Result<(), AuthError>;
}

/// Offers Basic and Digest together and verifies whichever the client picked.
pub struct BasicOrDigest {
    basic: BasicAuth,
    digest: DigestAuth,
}

impl BasicOrDigest {
    pub fn new(basic: BasicAuth, digest: DigestAuth) -> Self {
        Self { basic, digest }
    }
}

impl AuthProvider for BasicOrDigest {
    fn new_challenge(&self, stale: bool) -> AuthChallenge {
        let mut challenge = self.digest.new_challenge(stale);
        challenge.values.insert(0, self.basic.challenge_value());
        challenge
    }

    fn authorize(
        &self,
        authorization: &str,
        challenge: &AuthChallenge,
        method: &str,
    ) -> Result<(), AuthError> {
        match split_scheme(authorization) {
            Some((scheme, params)) if scheme.eq_ignore_ascii_case("Digest") => {
                self.digest.verify(params, challenge, method)
            }
            Some((scheme, token)) if scheme.eq_ignore_ascii_case("Basic") => {
                self.basic.verify(token)
            }
            _ => Err(AuthError::InvalidCredentials),
        }
    }
}

/// Build the provider for `scheme`.
pub fn provider(
    scheme: AuthScheme,
    realm: &str,
    credentials: Arc<CredentialStore>,
    nonce_lifetime: Option<Duration>,
) -> Arc<dyn AuthProvider> {
    match scheme {
        AuthScheme::Basic => Arc::new(BasicAuth::new(realm, credentials)),
        AuthScheme::Digest => {
            Arc::new(DigestAuth::new(realm, credentials).with_nonce_lifetime(nonce_lifetime))
        }
        AuthScheme::Both => Arc::new(BasicOrDigest::new(
            BasicAuth::new(realm, credentials.clone()),
            DigestAuth::new(realm, credentials).with_nonce_lifetime(nonce_lifetime),
        )),
    }
}

/// Split `Scheme rest` into its two parts.
pub(crate) fn split_scheme(authorization: &str) -> Option<(&str, &str)> {
    let authorization = authorization.trim();
    match authorization.split_once(char::is_whitespace) {
        Some((scheme, rest)) => Some((scheme, rest.trim_start())),
        None if !authorization.is_empty() => Some((authorization, "")),
        None => None,
    }
}

/// Parse comma-separated `name=value` / `name="value"` pairs. Names are
/// lowercased; quoted values may contain commas and `\"` escapes.
pub(crate) fn parse_params(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    let mut rest = input.trim();

    while let Some(eq) = rest.find('=') {
        let name = rest[..eq].trim().trim_start_matches(',').trim().to_ascii_lowercase();
        rest = rest[eq + 1..].trim_start();

        let value = if let Some(quoted) = rest.strip_prefix('"') {
            let mut value = String::new();
            let mut escaped = false;
            let mut end = quoted.len();
            for (i, c) in quoted.char_indices() {
                if escaped {
                    value.push(c);
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    end = i + 1;
                    break;
                } else {
                    value.push(c);
                }
            }
            rest = &quoted[end..];
            value
        } else {
            let end = rest.find(',').unwrap_or(rest.len());
            let value = rest[..end].trim().to_string();
            rest = &rest[end..];
            value
        };

        rest = rest.trim_start().trim_start_matches(',').trim_start();
        if !name.is_empty() {
            params.insert(name, value);
        }
    }

    params
}

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use md5::Md5;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use super::credentials::CredentialStore;
use super::{AuthChallenge, AuthError, AuthProvider, parse_params, split_scheme};

/// Hash function of a Digest exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Sha256,
}

impl DigestAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha256 => "SHA-256",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        if name.eq_ignore_ascii_case("MD5") {
            Some(Self::Md5)
        } else if name.eq_ignore_ascii_case("SHA-256") {
            Some(Self::Sha256)
        } else {
            None
        }
    }

    /// Lowercase hex digest of `input`.
    pub fn hex_digest(self, input: &str) -> String {
        match self {
            Self::Md5 => hex::encode(Md5::digest(input.as_bytes())),
            Self::Sha256 => hex::encode(Sha256::digest(input.as_bytes())),
        }
    }
}

/// RFC 2617 §3.2.2.1 request-digest without `qop`:
///
/// ```text
/// HA1      = H(username ":" realm ":" password)
/// HA2      = H(method ":" digest-uri)
/// response = H(HA1 ":" nonce ":" HA2)
/// ```
pub fn compute_response(
    algorithm: DigestAlgorithm,
    username: &str,
    realm: &str,
    password: &str,
    method: &str,
    uri: &str,
    nonce: &str,
) -> String {
    let ha1 = algorithm.hex_digest(&format!("{username}:{realm}:{password}"));
    let ha2 = algorithm.hex_digest(&format!("{method}:{uri}"));
    algorithm.hex_digest(&format!("{ha1}:{nonce}:{ha2}"))
}

/// Length of the raw nonce; the trailing 8 bytes carry the issue time.
const NONCE_LEN: usize = 24;

/// HTTP Digest authentication (RFC 2617), MD5 and SHA-256.
///
/// Each challenge offers both algorithms over one shared nonce, SHA-256
/// first:
///
/// ```text
/// WWW-Authenticate: Digest realm="R", nonce="…", algorithm=SHA-256, charset="UTF-8", stale=FALSE
/// WWW-Authenticate: Digest realm="R", nonce="…", algorithm=MD5, charset="UTF-8", stale=FALSE
/// ```
///
/// The nonce is 24 random bytes, hex encoded, whose last 8 bytes hold the
/// issue time in 100 ns units since the Unix epoch. With a nonce lifetime
/// configured, responses to an older nonce fail with
/// [`AuthError::StaleNonce`].
pub struct DigestAuth {
    realm: String,
    credentials: Arc<CredentialStore>,
    nonce_lifetime: Option<Duration>,
}

impl DigestAuth {
    pub fn new(realm: &str, credentials: Arc<CredentialStore>) -> Self {
        Self {
            realm: realm.to_string(),
            credentials,
            nonce_lifetime: None,
        }
    }

    pub fn with_nonce_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.nonce_lifetime = lifetime;
        self
    }

    pub(super) fn new_nonce() -> String {
        let mut nonce = [0u8; NONCE_LEN];
        nonce[..8].copy_from_slice(&rand::random::<u64>().to_be_bytes());
        nonce[8..16].copy_from_slice(&rand::random::<u64>().to_be_bytes());
        nonce[16..].copy_from_slice(&now_hns().to_be_bytes());
        hex::encode(nonce)
    }

    pub(super) fn challenge_values(&self, nonce: &str, stale: bool) -> Vec<String> {
        let stale = if stale { "TRUE" } else { "FALSE" };
        [DigestAlgorithm::Sha256, DigestAlgorithm::Md5]
            .iter()
            .map(|algorithm| {
                format!(
                    "Digest realm=\"{}\", nonce=\"{}\", algorithm={}, charset=\"UTF-8\", stale={}",
                    self.realm,
                    nonce,
                    algorithm.name(),
                    stale
                )
            })
            .collect()
    }

    /// Check the parameters of a `Digest` credential (the part after the scheme).
    pub(super) fn verify(
        &self,
        params: &str,
        challenge: &AuthChallenge,
        method: &str,
    ) -> Result<(), AuthError> {
        let params = parse_params(params);
        let issued_nonce = challenge.nonce.as_deref().ok_or(AuthError::MalformedChallenge)?;

        let field = |name: &str| params.get(name).map(String::as_str);
        let username = field("username").ok_or(AuthError::MalformedChallenge)?;
        let nonce = field("nonce").ok_or(AuthError::MalformedChallenge)?;
        let uri = field("uri").ok_or(AuthError::MalformedChallenge)?;
        let response = field("response").ok_or(AuthError::MalformedChallenge)?;

        if let Some(realm) = field("realm")
            && realm != challenge.realm
        {
            return Err(AuthError::InvalidCredentials);
        }
        if nonce != issued_nonce {
            return Err(AuthError::InvalidCredentials);
        }
        if let Some(lifetime) = self.nonce_lifetime
            && nonce_age(nonce).is_none_or(|age| age > lifetime)
        {
            return Err(AuthError::StaleNonce);
        }

        let algorithm = match field("algorithm") {
            Some(name) => DigestAlgorithm::parse(name).ok_or(AuthError::MalformedChallenge)?,
            None if response.len() == 64 => DigestAlgorithm::Sha256,
            None => DigestAlgorithm::Md5,
        };

        let password = self
            .credentials
            .password(username)
            .ok_or(AuthError::InvalidCredentials)?;
        let expected = compute_response(
            algorithm,
            username,
            &challenge.realm,
            &password,
            method,
            uri,
            issued_nonce,
        );

        let received = response.to_ascii_lowercase();
        if bool::from(expected.as_bytes().ct_eq(received.as_bytes())) {
            tracing::debug!(username, algorithm = algorithm.name(), "digest credentials accepted");
            Ok(())
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }
}

impl AuthProvider for DigestAuth {
    fn new_challenge(&self, stale: bool) -> AuthChallenge {
        let nonce = Self::new_nonce();
        AuthChallenge {
            values: self.challenge_values(&nonce, stale),
            realm: self.realm.clone(),
            nonce: Some(nonce),
        }
    }

    fn authorize(
        &self,
        authorization: &str,
        challenge: &AuthChallenge,
        method: &str,
    ) -> Result<(), AuthError> {
        match split_scheme(authorization) {
            Some((scheme, params)) if scheme.eq_ignore_ascii_case("Digest") => {
                self.verify(params, challenge, method)
            }
            _ => Err(AuthError::InvalidCredentials),
        }
    }
}

fn now_hns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| (d.as_nanos() / 100) as u64)
        .unwrap_or(0)
}

/// Age of a nonce from its embedded issue time.
fn nonce_age(nonce: &str) -> Option<Duration> {
    let raw = hex::decode(nonce).ok()?;
    let issued: [u8; 8] = raw.get(NONCE_LEN - 8..NONCE_LEN)?.try_into().ok()?;
    let issued = u64::from_be_bytes(issued);
    let age_hns = now_hns().checked_sub(issued)?;
    Some(Duration::from_nanos(age_hns.saturating_mul(100)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> Arc<CredentialStore> {
        let store = Arc::new(CredentialStore::new("test"));
        store.add_user("alice", "secret");
        store
    }

    fn challenge(realm: &str, nonce: &str) -> AuthChallenge {
        AuthChallenge {
            values: Vec::new(),
            realm: realm.to_string(),
            nonce: Some(nonce.to_string()),
        }
    }

    #[test]
    fn rfc2617_md5_vector() {
        let response = compute_response(
            DigestAlgorithm::Md5,
            "alice",
            "R",
            "secret",
            "DESCRIBE",
            "/stream1",
            "abc",
        );
        assert_eq!(response, "7a7610ccab2776849dc76d4dd93dd21a");
    }

    #[test]
    fn sha256_vector() {
        let response = compute_response(
            DigestAlgorithm::Sha256,
            "alice",
            "R",
            "secret",
            "DESCRIBE",
            "/stream1",
            "abc",
        );
        assert_eq!(
            response,
            "53f4685565ff9cfc8a9f07a332eda78a6c8d6190e1edd48a8c32af910f2d0437"
        );
    }

    #[test]
    fn challenge_offers_sha256_then_md5_with_shared_nonce() {
        let auth = DigestAuth::new("BeyondTheWall", store());
        let c = auth.new_challenge(false);
        let nonce = c.nonce.clone().unwrap();
        assert_eq!(nonce.len(), NONCE_LEN * 2);
        assert_eq!(c.values.len(), 2);
        assert_eq!(
            c.values[0],
            format!(
                "Digest realm=\"BeyondTheWall\", nonce=\"{nonce}\", algorithm=SHA-256, charset=\"UTF-8\", stale=FALSE"
            )
        );
        assert!(c.values[1].contains("algorithm=MD5"));
        assert!(c.values[1].contains(&nonce));

        assert!(auth.new_challenge(true).values[0].ends_with("stale=TRUE"));
        assert_ne!(auth.new_challenge(false).nonce, c.nonce);
    }

    #[test]
    fn accepts_md5_by_algorithm_or_length() {
        let auth = DigestAuth::new("R", store());
        let c = challenge("R", "abc");
        let header = "Digest username=\"alice\", realm=\"R\", nonce=\"abc\", \
                      uri=\"/stream1\", response=\"7a7610ccab2776849dc76d4dd93dd21a\"";
        assert!(auth.authorize(header, &c, "DESCRIBE").is_ok());

        let with_alg = format!("{header}, algorithm=MD5");
        assert!(auth.authorize(&with_alg, &c, "DESCRIBE").is_ok());
    }

    #[test]
    fn accepts_sha256_inferred_from_length() {
        let auth = DigestAuth::new("R", store());
        let c = challenge("R", "abc");
        let header = "Digest username=\"alice\", realm=\"R\", nonce=\"abc\", uri=\"/stream1\", \
                      response=\"53f4685565ff9cfc8a9f07a332eda78a6c8d6190e1edd48a8c32af910f2d0437\"";
        assert!(auth.authorize(header, &c, "DESCRIBE").is_ok());
    }

    #[test]
    fn rejects_wrong_method_nonce_realm_user() {
        let auth = DigestAuth::new("R", store());
        let c = challenge("R", "abc");
        let ok = "Digest username=\"alice\", realm=\"R\", nonce=\"abc\", \
                  uri=\"/stream1\", response=\"7a7610ccab2776849dc76d4dd93dd21a\"";
        assert_eq!(
            auth.authorize(ok, &c, "PLAY"),
            Err(AuthError::InvalidCredentials)
        );
        assert_eq!(
            auth.authorize(ok, &challenge("R", "other"), "DESCRIBE"),
            Err(AuthError::InvalidCredentials)
        );
        assert_eq!(
            auth.authorize(ok, &challenge("Elsewhere", "abc"), "DESCRIBE"),
            Err(AuthError::InvalidCredentials)
        );
        let mallory = ok.replace("alice", "mallory");
        assert_eq!(
            auth.authorize(&mallory, &c, "DESCRIBE"),
            Err(AuthError::InvalidCredentials)
        );
    }

    #[test]
    fn missing_fields_are_malformed() {
        let auth = DigestAuth::new("R", store());
        let c = challenge("R", "abc");
        assert_eq!(
            auth.authorize("Digest username=\"alice\", nonce=\"abc\"", &c, "DESCRIBE"),
            Err(AuthError::MalformedChallenge)
        );
        let no_nonce = AuthChallenge {
            values: Vec::new(),
            realm: "R".into(),
            nonce: None,
        };
        let header = "Digest username=\"alice\", nonce=\"abc\", uri=\"/s\", response=\"00\"";
        assert_eq!(
            auth.authorize(header, &no_nonce, "DESCRIBE"),
            Err(AuthError::MalformedChallenge)
        );
    }

    #[test]
    fn expired_nonce_is_stale() {
        let auth = DigestAuth::new("R", store()).with_nonce_lifetime(Some(Duration::from_secs(60)));

        // Issue time zero: issued in 1970.
        let old = hex::encode([0u8; NONCE_LEN]);
        let response =
            compute_response(DigestAlgorithm::Md5, "alice", "R", "secret", "PLAY", "/s", &old);
        let header = format!(
            "Digest username=\"alice\", realm=\"R\", nonce=\"{old}\", uri=\"/s\", response=\"{response}\""
        );
        assert_eq!(
            auth.authorize(&header, &challenge("R", &old), "PLAY"),
            Err(AuthError::StaleNonce)
        );

        let fresh = DigestAuth::new_nonce();
        let response =
            compute_response(DigestAlgorithm::Md5, "alice", "R", "secret", "PLAY", "/s", &fresh);
        let header = format!(
            "Digest username=\"alice\", realm=\"R\", nonce=\"{fresh}\", uri=\"/s\", response=\"{response}\""
        );
        assert!(auth.authorize(&header, &challenge("R", &fresh), "PLAY").is_ok());
    }
}

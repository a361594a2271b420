//! Run identity tokens and the trust anchor that verifies them
//!
//! A token is `hex(claims_json).hex(hmac_sha256(secret, hex(claims_json)))`.
//! The coordinator mints one per run; the broker only issues credentials to
//! bearers of a valid token for the same run.

use crate::config::schema::CredentialsConfig;
use crate::error::{RollgateError, RollgateResult};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Signs `payload` with HMAC-SHA256, hex encoded
pub(crate) fn sign(secret: &[u8], payload: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature
pub(crate) fn verify_signature(secret: &[u8], payload: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.verify_slice(&signature).is_ok()
}

/// Claims carried by a run identity token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunIdentity {
    pub iss: String,
    pub run_id: Uuid,
    pub iat: i64,
    pub exp: i64,
}

/// Signed run identity token presented to the broker
#[derive(Clone, PartialEq, Eq)]
pub struct TrustAssertion(String);

impl TrustAssertion {
    /// Wrap a token received from elsewhere
    pub fn from_token(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token text
    pub fn token(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for TrustAssertion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TrustAssertion(<redacted>)")
    }
}

/// Why an assertion failed verification
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssertionError {
    #[error("malformed token")]
    Malformed,
    #[error("signature mismatch")]
    BadSignature,
    #[error("unexpected issuer {0}")]
    WrongIssuer(String),
    #[error("token expired")]
    Expired,
}

/// Verifies run identity tokens against a shared secret
pub struct TrustAnchor {
    issuer: String,
    secret: Vec<u8>,
}

impl TrustAnchor {
    /// Create an anchor for `issuer` with a shared secret
    pub fn new(issuer: impl Into<String>, secret: impl AsRef<[u8]>) -> Self {
        Self {
            issuer: issuer.into(),
            secret: secret.as_ref().to_vec(),
        }
    }

    /// Build from config, requiring a trust secret
    pub fn from_config(config: &CredentialsConfig) -> RollgateResult<Self> {
        let secret = config
            .resolve_trust_secret()
            .ok_or(RollgateError::TrustSecretMissing)?;
        Ok(Self::new(config.issuer.clone(), secret))
    }

    /// Issuer name
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Mint a token asserting the identity of `run_id`
    pub fn mint(&self, run_id: Uuid, ttl: Duration) -> TrustAssertion {
        self.mint_at(run_id, ttl, Utc::now())
    }

    fn mint_at(&self, run_id: Uuid, ttl: Duration, now: DateTime<Utc>) -> TrustAssertion {
        let claims = RunIdentity {
            iss: self.issuer.clone(),
            run_id,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };
        // Serializing plain strings and integers cannot fail
        let json = serde_json::to_vec(&claims).unwrap_or_default();
        let body = hex::encode(json);
        let signature = sign(&self.secret, body.as_bytes());
        TrustAssertion(format!("{}.{}", body, signature))
    }

    /// Verify a token and return its claims
    pub fn verify(&self, assertion: &TrustAssertion) -> Result<RunIdentity, AssertionError> {
        self.verify_at(assertion, Utc::now())
    }

    pub(crate) fn verify_at(
        &self,
        assertion: &TrustAssertion,
        now: DateTime<Utc>,
    ) -> Result<RunIdentity, AssertionError> {
        let (body, signature) = assertion
            .0
            .split_once('.')
            .ok_or(AssertionError::Malformed)?;

        if !verify_signature(&self.secret, body.as_bytes(), signature) {
            return Err(AssertionError::BadSignature);
        }

        let json = hex::decode(body).map_err(|_| AssertionError::Malformed)?;
        let claims: RunIdentity =
            serde_json::from_slice(&json).map_err(|_| AssertionError::Malformed)?;

        if claims.iss != self.issuer {
            return Err(AssertionError::WrongIssuer(claims.iss));
        }
        if now.timestamp() >= claims.exp {
            return Err(AssertionError::Expired);
        }

        Ok(claims)
    }
}

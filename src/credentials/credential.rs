//! Short-lived scoped credentials

use crate::credentials::scope::{Scope, Subject};
use chrono::{DateTime, Utc};
use std::fmt;

/// Short-lived authorization for one run acting on one environment
///
/// Deliberately not `Serialize`: credentials live only in process memory.
/// `Debug` omits the signature.
#[derive(Clone)]
pub struct Credential {
    pub(crate) subject: Subject,
    pub(crate) scope: Scope,
    pub(crate) issued_at: DateTime<Utc>,
    pub(crate) expires_at: DateTime<Utc>,
    pub(crate) signature: String,
}

impl Credential {
    /// Who the credential was issued to
    pub fn subject(&self) -> &Subject {
        &self.subject
    }

    /// Granted actions
    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    /// Issue time
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    /// Expiry time
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Whether the credential is unusable at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Whether the credential is unusable now
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Canonical bytes covered by the signature
    pub(crate) fn signing_payload(
        subject: &Subject,
        scope: &Scope,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> String {
        format!(
            "{}|{}|{}|{}",
            subject,
            scope,
            issued_at.timestamp_millis(),
            expires_at.timestamp_millis()
        )
    }

    /// Opaque bearer token handed to deploy executors
    pub fn bearer_token(&self) -> String {
        let payload =
            Self::signing_payload(&self.subject, &self.scope, self.issued_at, self.expires_at);
        format!("{}.{}", hex::encode(payload), self.signature)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("subject", &self.subject)
            .field("scope", &self.scope)
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .field("signature", &"<redacted>")
            .finish()
    }
}

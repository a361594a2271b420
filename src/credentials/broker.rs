//! Credential broker
//!
//! Issues credentials scoped to `requested ∩ policy(environment)` to runs that
//! present a valid identity token. Expiry is embedded in the credential and
//! checked by consumers; there is no revocation channel.

use crate::audit::AuditLog;
use crate::config::schema::CredentialsConfig;
use crate::credentials::credential::Credential;
use crate::credentials::scope::{Action, PolicySet, Scope, Subject};
use crate::credentials::trust::{sign, verify_signature, AssertionError, TrustAnchor, TrustAssertion};
use crate::error::{RollgateError, RollgateResult};
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Why an issuance was denied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DenyReason {
    NoPolicyBound,
    InvalidAssertion(AssertionError),
    SubjectMismatch,
    ScopeNotPermitted,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPolicyBound => f.write_str("no policy bound"),
            Self::InvalidAssertion(e) => write!(f, "invalid trust assertion: {}", e),
            Self::SubjectMismatch => f.write_str("assertion subject mismatch"),
            Self::ScopeNotPermitted => f.write_str("requested scope not permitted"),
        }
    }
}

/// Seconds as a chrono duration, capped at one year
pub(crate) fn clamped_seconds(secs: u64) -> Duration {
    const ONE_YEAR: u64 = 365 * 24 * 3600;
    Duration::seconds(secs.min(ONE_YEAR) as i64)
}

/// Issues and validates short-lived credentials
pub struct CredentialBroker {
    anchor: Arc<TrustAnchor>,
    policies: PolicySet,
    signing_key: Vec<u8>,
    lifetime: Duration,
    max_lifetime: Duration,
    audit: Arc<AuditLog>,
}

impl CredentialBroker {
    /// Create a broker
    ///
    /// `lifetime` is clamped to `max_lifetime` and to at least one second.
    pub fn new(
        anchor: Arc<TrustAnchor>,
        policies: PolicySet,
        lifetime: Duration,
        max_lifetime: Duration,
        audit: Arc<AuditLog>,
    ) -> Self {
        let max_lifetime = max_lifetime.max(Duration::seconds(1));
        let lifetime = lifetime.clamp(Duration::seconds(1), max_lifetime);

        // Credentials never outlive the process, so a per-process key suffices
        let signing_key = [Uuid::new_v4().into_bytes(), Uuid::new_v4().into_bytes()].concat();

        Self {
            anchor,
            policies,
            signing_key,
            lifetime,
            max_lifetime,
            audit,
        }
    }

    /// Create a broker from the `[credentials]` config section
    pub fn from_config(
        config: &CredentialsConfig,
        anchor: Arc<TrustAnchor>,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self::new(
            anchor,
            PolicySet::from_config(config),
            clamped_seconds(config.lifetime_secs),
            clamped_seconds(config.max_lifetime_secs),
            audit,
        )
    }

    /// Upper bound on credential lifetime
    pub fn max_lifetime(&self) -> Duration {
        self.max_lifetime
    }

    /// Issue a credential for `subject`
    ///
    /// Grants exactly the intersection of `requested` and the environment's
    /// policy. Every call, granted or denied, appends one audit record.
    pub async fn issue(
        &self,
        subject: &Subject,
        requested: &Scope,
        assertion: &TrustAssertion,
    ) -> RollgateResult<Credential> {
        let now = Utc::now();

        match self.decide(subject, requested, assertion, now) {
            Ok(granted) => {
                let expires_at = now + self.lifetime;
                let payload = Credential::signing_payload(subject, &granted, now, expires_at);
                let credential = Credential {
                    subject: subject.clone(),
                    scope: granted,
                    issued_at: now,
                    expires_at,
                    signature: sign(&self.signing_key, payload.as_bytes()),
                };

                self.audit
                    .log(
                        "credential.issued",
                        serde_json::json!({
                            "subject": subject,
                            "requested": requested,
                            "granted": credential.scope,
                            "outcome": "granted",
                            "expires_at": expires_at.to_rfc3339(),
                        }),
                    )
                    .await;
                info!(
                    "Issued credential for {} with scope [{}]",
                    subject, credential.scope
                );
                Ok(credential)
            }
            Err(reason) => {
                self.audit
                    .log(
                        "credential.denied",
                        serde_json::json!({
                            "subject": subject,
                            "requested": requested,
                            "granted": Scope::empty(),
                            "outcome": "denied",
                            "reason": reason.to_string(),
                        }),
                    )
                    .await;
                warn!("Denied credential for {}: {}", subject, reason);
                Err(RollgateError::denied(subject.to_string(), reason.to_string()))
            }
        }
    }

    fn decide(
        &self,
        subject: &Subject,
        requested: &Scope,
        assertion: &TrustAssertion,
        now: DateTime<Utc>,
    ) -> Result<Scope, DenyReason> {
        let identity = self
            .anchor
            .verify_at(assertion, now)
            .map_err(DenyReason::InvalidAssertion)?;

        if identity.run_id != subject.run_id {
            return Err(DenyReason::SubjectMismatch);
        }

        let allowed = self
            .policies
            .allowed(&subject.environment)
            .ok_or(DenyReason::NoPolicyBound)?;

        let granted = requested.intersect(allowed);
        if granted.is_empty() {
            return Err(DenyReason::ScopeNotPermitted);
        }

        debug!(
            "Policy for {} allows [{}], requested [{}]",
            subject.environment, allowed, requested
        );
        Ok(granted)
    }

    /// Consumer-side check before using a credential for `action`
    pub fn validate(&self, credential: &Credential, action: Action) -> RollgateResult<()> {
        self.validate_at(credential, action, Utc::now())
    }

    /// [`validate`](Self::validate) at an explicit instant
    pub fn validate_at(
        &self,
        credential: &Credential,
        action: Action,
        now: DateTime<Utc>,
    ) -> RollgateResult<()> {
        let payload = Credential::signing_payload(
            &credential.subject,
            &credential.scope,
            credential.issued_at,
            credential.expires_at,
        );
        if !verify_signature(&self.signing_key, payload.as_bytes(), &credential.signature) {
            return Err(RollgateError::CredentialInvalid(
                "signature mismatch".to_string(),
            ));
        }
        if credential.is_expired_at(now) {
            return Err(RollgateError::CredentialExpired {
                subject: credential.subject.to_string(),
            });
        }
        if !credential.scope.allows(action) {
            return Err(RollgateError::CredentialInvalid(format!(
                "{} not in scope [{}]",
                action, credential.scope
            )));
        }
        Ok(())
    }
}

//! Credential broker
//!
//! Runs never hold standing secrets. Each deploy or rollback action asks the
//! broker for a short-lived credential, proving its identity with a token
//! minted by the coordinator's [`TrustAnchor`]. The broker grants the
//! intersection of the requested scope and the environment's policy, or
//! nothing when no policy is bound.

pub mod broker;
pub mod credential;
pub mod scope;
pub mod trust;

pub use broker::{CredentialBroker, DenyReason};
pub use credential::Credential;
pub use scope::{Action, PolicySet, Scope, Subject};
pub use trust::{AssertionError, RunIdentity, TrustAnchor, TrustAssertion};

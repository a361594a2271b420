//! Actions, scopes and policies

use crate::config::schema::CredentialsConfig;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

/// Something a credential may authorize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Read,
    Deploy,
    Rollback,
    Approve,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Read => "read",
            Self::Deploy => "deploy",
            Self::Rollback => "rollback",
            Self::Approve => "approve",
        };
        f.write_str(name)
    }
}

/// Set of permitted actions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(BTreeSet<Action>);

impl Scope {
    /// Empty scope
    pub fn empty() -> Self {
        Self::default()
    }

    /// Actions present in both scopes
    pub fn intersect(&self, other: &Scope) -> Scope {
        Scope(self.0.intersection(&other.0).copied().collect())
    }

    /// Whether `action` is permitted
    pub fn allows(&self, action: Action) -> bool {
        self.0.contains(&action)
    }

    /// Whether no action is permitted
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Permitted actions in stable order
    pub fn actions(&self) -> impl Iterator<Item = Action> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Action> for Scope {
    fn from_iter<I: IntoIterator<Item = Action>>(iter: I) -> Self {
        Scope(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[Action; N]> for Scope {
    fn from(actions: [Action; N]) -> Self {
        actions.into_iter().collect()
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.0.iter().map(ToString::to_string).collect();
        f.write_str(&names.join(","))
    }
}

/// Who a credential is issued to: one run acting on one environment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subject {
    pub run_id: Uuid,
    pub environment: String,
}

impl Subject {
    pub fn new(run_id: Uuid, environment: impl Into<String>) -> Self {
        Self {
            run_id,
            environment: environment.into(),
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.run_id, self.environment)
    }
}

/// Allowed scope per environment
///
/// An environment without an entry has no policy bound and is always denied.
#[derive(Debug, Clone, Default)]
pub struct PolicySet {
    environments: BTreeMap<String, Scope>,
}

impl PolicySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a policy for an environment
    pub fn bind(mut self, environment: impl Into<String>, scope: impl Into<Scope>) -> Self {
        self.environments.insert(environment.into(), scope.into());
        self
    }

    /// Policies from the `[credentials.policies]` table
    pub fn from_config(config: &CredentialsConfig) -> Self {
        Self {
            environments: config
                .policies
                .iter()
                .map(|(env, actions)| (env.clone(), actions.iter().copied().collect()))
                .collect(),
        }
    }

    /// Allowed scope for an environment, if a policy is bound
    pub fn allowed(&self, environment: &str) -> Option<&Scope> {
        self.environments.get(environment)
    }
}

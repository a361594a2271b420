//! Manual approval signals for gated stages
//!
//! Decisions are keyed by run and environment and are retained until the run
//! is forgotten, so an approval may arrive before the stage starts waiting.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Decision recorded for a gated stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
}

/// How a wait on the gate ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalWait {
    Decided(ApprovalDecision),
    TimedOut,
    Cancelled,
}

type GateKey = (Uuid, String);

/// Approval signals shared between the coordinator and running rollouts
#[derive(Default)]
pub struct ApprovalGate {
    slots: Mutex<HashMap<GateKey, watch::Sender<Option<ApprovalDecision>>>>,
}

impl ApprovalGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, run_id: Uuid, environment: &str) -> watch::Receiver<Option<ApprovalDecision>> {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots
            .entry((run_id, environment.to_string()))
            .or_insert_with(|| watch::channel(None).0)
            .subscribe()
    }

    /// Record a decision; the first decision for a stage sticks
    pub fn decide(&self, run_id: Uuid, environment: &str, decision: ApprovalDecision) -> bool {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        let sender = slots
            .entry((run_id, environment.to_string()))
            .or_insert_with(|| watch::channel(None).0);
        sender.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(decision);
            true
        })
    }

    pub fn approve(&self, run_id: Uuid, environment: &str) -> bool {
        self.decide(run_id, environment, ApprovalDecision::Approved)
    }

    pub fn reject(&self, run_id: Uuid, environment: &str) -> bool {
        self.decide(run_id, environment, ApprovalDecision::Rejected)
    }

    /// Wait for a decision, the timeout, or cancellation
    pub async fn wait(
        &self,
        run_id: Uuid,
        environment: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> ApprovalWait {
        let mut rx = self.slot(run_id, environment);
        let decided = async {
            loop {
                if let Some(decision) = *rx.borrow_and_update() {
                    return Some(decision);
                }
                if rx.changed().await.is_err() {
                    return None;
                }
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => ApprovalWait::Cancelled,
            result = tokio::time::timeout(timeout, decided) => match result {
                Ok(Some(decision)) => ApprovalWait::Decided(decision),
                _ => ApprovalWait::TimedOut,
            },
        }
    }

    /// Drop every slot belonging to a run
    pub fn forget_run(&self, run_id: Uuid) {
        let mut slots = self.slots.lock().unwrap_or_else(|e| e.into_inner());
        slots.retain(|(run, _), _| *run != run_id);
    }
}

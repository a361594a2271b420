//! rollgate - pipeline orchestrator core
//!
//! Builds an artifact once per input set through a content-addressed cache,
//! then promotes it through staged environments. Every deploy action runs
//! with a short-lived credential scoped to one run and one environment.

pub mod audit;
pub mod cache;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
mod process;
pub mod rollout;
pub mod run;
pub mod ui;

pub use error::{RollgateError, RollgateResult};

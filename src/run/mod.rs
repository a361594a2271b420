//! Pipeline runs
//!
//! A run sequences build, cache and rollout for one source reference. The
//! [`RunCoordinator`] owns every live run and enforces one live run per
//! concurrency group.
//!
//! # Run lifecycle
//!
//! | Status | Description |
//! |--------|-------------|
//! | Queued | Registered, task not started |
//! | Building | Cache lookup, build on miss, store |
//! | Deploying | Rollout in progress |
//! | Succeeded | Rollout promoted, or nothing to deploy |
//! | Failed | Build failed or rollout rolled back |
//! | Cancelled | Superseded or cancelled on request |

pub mod archive;
pub mod builder;
pub mod coordinator;
pub mod notify;
pub mod pipeline;
pub mod state;

pub use archive::RunArchive;
pub use builder::{BuildRequest, Builder, ShellBuilder};
pub use coordinator::{
    CoordinatorParts, CoordinatorSettings, RunCoordinator, RunRequest,
};
pub use notify::{FileSink, LogSink, NotificationSink, RunNotification};
pub use pipeline::PipelineFile;
pub use state::{FailureReport, PipelineRun, RunStatus};

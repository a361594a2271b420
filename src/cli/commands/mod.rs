//! CLI command implementations

pub mod audit;
pub mod cache;
pub mod config;
pub mod run;
pub mod runs;
pub mod show;

pub use audit::execute as audit;
pub use cache::execute as cache;
pub use config::execute as config;
pub use run::execute as run;
pub use runs::execute as runs;
pub use show::execute as show;

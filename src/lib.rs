//! Apply row-level-security migrations to a Supabase project
//!
//! The project exposes no general SQL endpoint, so every statement is sent
//! to a list of candidate endpoints (RPC functions such as
//! `execute_migration_sql` or `exec_sql`) until one accepts it. Statements
//! that no endpoint executes end up in a manual fallback: the dashboard URL
//! plus the full SQL, ready to paste into the SQL editor.
//!
//! ```no_run
//! use supabase_rls_migrate::prelude::*;
//!
//! # async fn apply() -> Result<(), supabase_rls_migrate::error::Error> {
//! let config = ProjectConfig::from_env()?;
//! let runner = MigrationRunner::new(config, RunnerOptions::default())?;
//! let report = runner
//!     .run(&builtin::outcome_policies_migration(), &mut ConsoleProgress)
//!     .await;
//! println!("{}", report);
//! if let Some(fallback) = report.manual_fallback(runner.config()) {
//!     println!("{}", fallback);
//! }
//! # Ok(())
//! # }
//! ```

pub mod builtin;
pub mod config;
pub mod credential;
pub mod endpoint;
pub mod error;
pub mod fetch;
pub mod probe;
pub mod progress;
pub mod report;
pub mod rls;
pub mod runner;
pub mod statement;

/// A convenience module for common imports
pub mod prelude {
    pub use crate::builtin;
    pub use crate::config::{ProjectConfig, RunnerOptions};
    pub use crate::endpoint::EndpointCandidate;
    pub use crate::error::Error;
    pub use crate::progress::{ConsoleProgress, Progress};
    pub use crate::report::{ManualFallback, RunReport};
    pub use crate::runner::{MigrationRunner, StatementOutcome};
    pub use crate::statement::{Migration, Statement};
}

//! Aggregate run report and manual fallback instructions

use std::fmt;

use chrono::{DateTime, Utc};

use crate::config::ProjectConfig;
use crate::runner::StatementResult;
use crate::statement::Migration;

const RULE: &str = "==================================================";

/// Outcome of one pass over a migration
#[derive(Debug, Clone)]
pub struct RunReport {
    migration: Migration,
    results: Vec<StatementResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn new(
        migration: Migration,
        results: Vec<StatementResult>,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        Self {
            migration,
            results,
            started_at,
            finished_at,
        }
    }

    pub fn migration(&self) -> &Migration {
        &self.migration
    }

    pub fn results(&self) -> &[StatementResult] {
        &self.results
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn succeeded(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.outcome.is_success())
            .count()
    }

    /// Every statement that did not succeed, in order
    pub fn failed(&self) -> impl Iterator<Item = &StatementResult> {
        self.results.iter().filter(|r| !r.outcome.is_success())
    }

    /// Statements no endpoint accepted at all
    pub fn unexecuted(&self) -> impl Iterator<Item = &StatementResult> {
        self.results.iter().filter(|r| r.outcome.is_unexecuted())
    }

    pub fn is_complete(&self) -> bool {
        self.succeeded() == self.total()
    }

    /// `"{ok}/{total} statements succeeded"`
    pub fn summary(&self) -> String {
        format!("{}/{} statements succeeded", self.succeeded(), self.total())
    }

    /// Instructions for finishing the migration by hand; `None` when complete.
    pub fn manual_fallback(&self, config: &ProjectConfig) -> Option<ManualFallback> {
        if self.is_complete() {
            return None;
        }
        Some(ManualFallback {
            migration: self.migration.name.clone(),
            dashboard_url: config.dashboard_sql_url(),
            project_url: config.url.to_string(),
            pending: self.failed().map(|r| r.position).collect(),
            sql: self.migration.full_sql(),
        })
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.summary())?;
        for result in self.failed() {
            write!(
                f,
                "\n  #{} {}\n     {}",
                result.position,
                result.statement.preview(),
                result.outcome
            )?;
        }
        Ok(())
    }
}

/// Copy-paste instructions for the dashboard SQL editor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManualFallback {
    pub migration: String,
    /// Dashboard SQL editor, when the project ref is known
    pub dashboard_url: Option<String>,
    pub project_url: String,
    /// Positions of statements that were not applied
    pub pending: Vec<usize>,
    /// The whole migration, since every statement is safe to re-run
    pub sql: String,
}

impl fmt::Display for ManualFallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "MANUAL APPLICATION REQUIRED: {}", self.migration)?;
        writeln!(f, "{}", RULE)?;
        match &self.dashboard_url {
            Some(url) => writeln!(f, "1. Open: {}", url)?,
            None => writeln!(
                f,
                "1. Open the dashboard SQL editor of the project at {}",
                self.project_url
            )?,
        }
        writeln!(f, "2. Sign in to your Supabase account")?;
        writeln!(f, "3. Go to Database > SQL Editor and create a new query")?;
        writeln!(f, "4. Paste the SQL below and click Run")?;
        let pending: Vec<String> = self.pending.iter().map(|p| p.to_string()).collect();
        writeln!(
            f,
            "   Statements not applied automatically: {}",
            pending.join(", ")
        )?;
        writeln!(
            f,
            "   The script drops before it creates, so already applied statements are safe to repeat."
        )?;
        writeln!(f, "{}", RULE)?;
        writeln!(f, "{}", self.sql)?;
        write!(f, "{}", RULE)
    }
}

//! The migration runner: deliver each statement through the first endpoint
//! candidate that accepts it.

use std::fmt;

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::config::{ProjectConfig, RunnerOptions};
use crate::endpoint::EndpointCandidate;
use crate::error::{Error, Result};
use crate::fetch::Fetch;
use crate::progress::Progress;
use crate::report::RunReport;
use crate::statement::{Migration, Statement};

const CLIENT_INFO: &str = concat!("supabase-rls-migrate/", env!("CARGO_PKG_VERSION"));

/// Final state of one statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatementOutcome {
    /// An endpoint answered 200 and did not report failure
    Succeeded {
        endpoint: String,
        message: Option<String>,
    },
    /// Every candidate answered 404; the statement never ran
    NotFound,
    /// An endpoint answered with an error status, or 200 with `success: false`
    Failed {
        endpoint: String,
        status: u16,
        message: String,
    },
    /// The request never got an HTTP answer
    Unreachable { endpoint: String, error: String },
}

impl StatementOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, StatementOutcome::Succeeded { .. })
    }

    /// The statement was never executed remotely
    pub fn is_unexecuted(&self) -> bool {
        matches!(self, StatementOutcome::NotFound)
    }
}

impl fmt::Display for StatementOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatementOutcome::Succeeded { endpoint, .. } => write!(f, "succeeded via {}", endpoint),
            StatementOutcome::NotFound => write!(f, "not executed: no endpoint accepted SQL"),
            StatementOutcome::Failed {
                endpoint,
                status,
                message,
            } => write!(f, "failed via {} (status {}): {}", endpoint, status, message),
            StatementOutcome::Unreachable { endpoint, error } => {
                write!(f, "unreachable via {}: {}", endpoint, error)
            }
        }
    }
}

/// One statement together with what happened to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementResult {
    /// 1-based position in the migration
    pub position: usize,
    pub statement: Statement,
    pub outcome: StatementOutcome,
    /// Candidates that answered 404 before the outcome was reached
    pub unsupported: Vec<String>,
}

/// Body returned by the SQL execution functions. Every field is optional;
/// `exec_sql` style functions return nothing useful at all.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct RpcResponse {
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub executed_at: Option<String>,
}

impl RpcResponse {
    /// Parse a 200 body; anything that is not a JSON object yields `None`.
    pub fn parse(body: &str) -> Option<Self> {
        match serde_json::from_str::<serde_json::Value>(body) {
            Ok(value @ serde_json::Value::Object(_)) => serde_json::from_value(value).ok(),
            _ => None,
        }
    }

    pub fn executed_at(&self) -> Option<DateTime<Utc>> {
        self.executed_at
            .as_deref()
            .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
            .map(|ts| ts.with_timezone(&Utc))
    }
}

/// PostgREST error body
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
struct ApiErrorDetails {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

impl fmt::Display for ApiErrorDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(code) = &self.code {
            parts.push(format!("Code: {}", code));
        }
        if let Some(message) = &self.message {
            parts.push(format!("Message: {}", message));
        }
        if let Some(details) = &self.details {
            parts.push(format!("Details: {}", details));
        }
        if let Some(hint) = &self.hint {
            parts.push(format!("Hint: {}", hint));
        }
        write!(f, "{}", parts.join(", "))
    }
}

fn error_message(status: StatusCode, body: &str) -> String {
    match serde_json::from_str::<ApiErrorDetails>(body) {
        Ok(details) if details.message.is_some() || details.code.is_some() => details.to_string(),
        _ if body.trim().is_empty() => status.to_string(),
        _ => body.trim().to_string(),
    }
}

/// What a single candidate said about a statement
enum Attempt {
    Unsupported,
    Final(StatementOutcome),
}

/// Applies migrations through the project's HTTP endpoints.
pub struct MigrationRunner {
    config: ProjectConfig,
    options: RunnerOptions,
    client: Client,
}

impl MigrationRunner {
    pub fn new(config: ProjectConfig, options: RunnerOptions) -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self::with_client(config, options, client))
    }

    pub fn with_client(config: ProjectConfig, options: RunnerOptions, client: Client) -> Self {
        Self {
            config,
            options,
            client,
        }
    }

    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    pub fn options(&self) -> &RunnerOptions {
        &self.options
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Attempt every statement in order. Never aborts: each statement gets
    /// its own outcome and the batch always runs to the end.
    pub async fn run(&self, migration: &Migration, progress: &mut dyn Progress) -> RunReport {
        let started_at = Utc::now();
        let total = migration.len();
        progress.migration_started(migration);
        log::info!(
            "applying migration {} ({} statements) to {}",
            migration.name,
            total,
            self.config.url
        );

        let mut results = Vec::with_capacity(total);
        for (idx, statement) in migration.statements().iter().enumerate() {
            let position = idx + 1;
            progress.statement_started(position, total, statement);
            let result = self.execute(position, statement, progress).await;
            progress.statement_finished(&result);
            results.push(result);
        }

        let report = RunReport::new(migration.clone(), results, started_at, Utc::now());
        log::info!("{}", report.summary());
        report
    }

    async fn execute(
        &self,
        position: usize,
        statement: &Statement,
        progress: &mut dyn Progress,
    ) -> StatementResult {
        let mut unsupported = Vec::new();

        for candidate in &self.options.candidates {
            match self.attempt(candidate, statement).await {
                Attempt::Unsupported => {
                    log::debug!("statement {}: {} answered 404", position, candidate);
                    progress.endpoint_unsupported(position, candidate);
                    unsupported.push(candidate.name.clone());
                }
                Attempt::Final(outcome) => {
                    if !outcome.is_success() {
                        log::warn!("statement {}: {}", position, outcome);
                    }
                    return StatementResult {
                        position,
                        statement: statement.clone(),
                        outcome,
                        unsupported,
                    };
                }
            }
        }

        log::warn!("statement {}: no endpoint accepted SQL", position);
        StatementResult {
            position,
            statement: statement.clone(),
            outcome: StatementOutcome::NotFound,
            unsupported,
        }
    }

    async fn attempt(&self, candidate: &EndpointCandidate, statement: &Statement) -> Attempt {
        let endpoint = candidate.name.clone();
        let unreachable_via = |error: String| {
            Attempt::Final(StatementOutcome::Unreachable {
                endpoint: endpoint.clone(),
                error,
            })
        };

        let url = match self.config.endpoint_url(&candidate.path) {
            Ok(url) => url,
            Err(err) => return unreachable_via(err.to_string()),
        };

        let response = match Fetch::post(&self.client, url)
            .service_auth(&self.config.credential)
            .header("X-Client-Info", CLIENT_INFO)
            .body(candidate.body_for(statement.sql()), candidate.content_type())
            .timeout(self.options.request_timeout)
            .execute_raw()
            .await
        {
            Ok(response) => response,
            Err(Error::Http(err)) if err.is_timeout() => {
                return unreachable_via(format!(
                    "timed out after {:?}",
                    self.options.request_timeout
                ))
            }
            Err(err) => return unreachable_via(err.to_string()),
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Attempt::Unsupported;
        }

        let body = match response.text().await {
            Ok(body) => body,
            Err(err) => return unreachable_via(err.to_string()),
        };

        if status != StatusCode::OK {
            return Attempt::Final(StatementOutcome::Failed {
                endpoint,
                status: status.as_u16(),
                message: error_message(status, &body),
            });
        }

        match RpcResponse::parse(&body) {
            Some(RpcResponse {
                success: Some(false),
                message,
                ..
            }) => Attempt::Final(StatementOutcome::Failed {
                endpoint,
                status: status.as_u16(),
                message: message.unwrap_or_else(|| "remote reported failure".to_string()),
            }),
            Some(reply) => {
                if let Some(at) = reply.executed_at() {
                    log::debug!("{} executed at {}", candidate, at);
                }
                Attempt::Final(StatementOutcome::Succeeded {
                    endpoint,
                    message: reply.message,
                })
            }
            None => Attempt::Final(StatementOutcome::Succeeded {
                endpoint,
                message: None,
            }),
        }
    }
}

//! Read-only checks against the project before or after a run

use std::fmt;

use crate::error::Result;
use crate::fetch::Fetch;
use crate::runner::MigrationRunner;

/// Result of reading one row from a table through PostgREST
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableCheck {
    pub table: String,
    pub status: u16,
    /// Rows returned when the read succeeded
    pub rows: Option<usize>,
    /// Response body when it did not
    pub detail: Option<String>,
}

impl TableCheck {
    pub fn is_reachable(&self) -> bool {
        self.rows.is_some()
    }
}

impl fmt::Display for TableCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.rows, &self.detail) {
            (Some(rows), _) => write!(f, "{}: reachable ({} row(s) sampled)", self.table, rows),
            (None, Some(detail)) => write!(f, "{}: status {}: {}", self.table, self.status, detail),
            (None, None) => write!(f, "{}: status {}", self.table, self.status),
        }
    }
}

impl MigrationRunner {
    /// `GET /rest/v1/{table}?select=id&limit=1`
    pub async fn check_table(&self, table: &str) -> Result<TableCheck> {
        let url = self.config().endpoint_url(&format!("rest/v1/{}", table))?;
        let response = Fetch::get(self.client(), url)
            .service_auth(&self.config().credential)
            .query("select", "id")
            .query("limit", "1")
            .timeout(self.options().probe_timeout)
            .execute_raw()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        log::debug!("probe {}: {} {}", table, status, body);

        let rows = if status.is_success() {
            serde_json::from_str::<Vec<serde_json::Value>>(&body)
                .ok()
                .map(|rows| rows.len())
        } else {
            None
        };
        let detail = match rows {
            Some(_) => None,
            None if body.trim().is_empty() => None,
            None => Some(body.trim().to_string()),
        };

        Ok(TableCheck {
            table: table.to_string(),
            status: status.as_u16(),
            rows,
            detail,
        })
    }

    /// Whether the PostgREST OpenAPI document at `/rest/v1/` lists
    /// `/rpc/{function}` under `paths`. A failed request or an unreadable
    /// document counts as "not found".
    pub async fn rpc_function_exists(&self, function: &str) -> Result<bool> {
        let url = self.config().endpoint_url("rest/v1/")?;
        let response = Fetch::get(self.client(), url)
            .service_auth(&self.config().credential)
            .timeout(self.options().probe_timeout)
            .execute_raw()
            .await?;

        if !response.status().is_success() {
            log::debug!("OpenAPI document unavailable: {}", response.status());
            return Ok(false);
        }
        let body = response.text().await?;
        let document: serde_json::Value = match serde_json::from_str(&body) {
            Ok(document) => document,
            Err(err) => {
                log::debug!("OpenAPI document is not JSON: {}", err);
                return Ok(false);
            }
        };
        Ok(document
            .get("paths")
            .and_then(|paths| paths.get(format!("/rpc/{}", function)))
            .is_some())
    }
}

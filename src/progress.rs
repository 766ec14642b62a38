//! Progress reporting while a migration runs

use crate::endpoint::EndpointCandidate;
use crate::runner::{StatementOutcome, StatementResult};
use crate::statement::{Migration, Statement};

/// Observer notified as the runner moves through a migration.
/// Every method defaults to doing nothing.
pub trait Progress {
    fn migration_started(&mut self, _migration: &Migration) {}

    fn statement_started(&mut self, _position: usize, _total: usize, _statement: &Statement) {}

    fn endpoint_unsupported(&mut self, _position: usize, _endpoint: &EndpointCandidate) {}

    fn statement_finished(&mut self, _result: &StatementResult) {}
}

/// Silent progress
impl Progress for () {}

/// Human-readable progress lines on stdout
#[derive(Debug, Default)]
pub struct ConsoleProgress;

impl Progress for ConsoleProgress {
    fn migration_started(&mut self, migration: &Migration) {
        println!(
            "Applying migration {} ({} statements)...",
            migration.name,
            migration.len()
        );
    }

    fn statement_started(&mut self, position: usize, total: usize, statement: &Statement) {
        println!("\n[{}/{}] {}", position, total, statement.preview());
    }

    fn endpoint_unsupported(&mut self, _position: usize, endpoint: &EndpointCandidate) {
        println!("      {} not available (404), trying next endpoint", endpoint);
    }

    fn statement_finished(&mut self, result: &StatementResult) {
        match &result.outcome {
            StatementOutcome::Succeeded {
                endpoint,
                message: Some(message),
            } => println!("  ok  via {}: {}", endpoint, message),
            StatementOutcome::Succeeded { endpoint, .. } => println!("  ok  via {}", endpoint),
            outcome => println!("  FAIL {}", outcome),
        }
    }
}

use std::time::Duration;

use serde_json::json;
use supabase_rls_migrate::builtin;
use supabase_rls_migrate::config::{ProjectConfig, RunnerOptions};
use supabase_rls_migrate::endpoint::EndpointCandidate;
use supabase_rls_migrate::progress::Progress;
use supabase_rls_migrate::rls::{RlsCommand, RlsPolicy};
use supabase_rls_migrate::runner::{MigrationRunner, StatementOutcome, StatementResult};
use supabase_rls_migrate::statement::{Migration, Statement};
use wiremock::matchers::{any, body_json, body_string, body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn runner_for(uri: &str, options: RunnerOptions) -> MigrationRunner {
    let config = ProjectConfig::new(uri, "test-service-key").unwrap();
    MigrationRunner::new(config, options).unwrap()
}

fn exec_sql_only() -> RunnerOptions {
    RunnerOptions::default().with_candidates(vec![EndpointCandidate::rpc("exec_sql", "query")])
}

/// Four DROP POLICY IF EXISTS statements followed by the four CREATE POLICY statements.
fn four_policy_migration() -> Migration {
    let policies: Vec<RlsPolicy> = ["alpha", "bravo", "charlie", "delta"]
        .iter()
        .map(|name| {
            RlsPolicy::new(&format!("policy_{}", name), "items", RlsCommand::Select)
                .with_using("tenant_id = auth.uid()")
        })
        .collect();

    let mut statements: Vec<String> = policies.iter().map(RlsPolicy::drop_policy_sql).collect();
    statements.extend(policies.iter().map(RlsPolicy::create_policy_sql));
    Migration::new("four_policies", statements)
}

#[derive(Default)]
struct Recorder {
    events: Vec<String>,
}

impl Progress for Recorder {
    fn statement_started(&mut self, position: usize, total: usize, _statement: &Statement) {
        self.events.push(format!("start {}/{}", position, total));
    }

    fn endpoint_unsupported(&mut self, position: usize, endpoint: &EndpointCandidate) {
        self.events.push(format!("404 {} {}", position, endpoint));
    }

    fn statement_finished(&mut self, result: &StatementResult) {
        self.events
            .push(format!("done {} {}", result.position, result.outcome.is_success()));
    }
}

#[tokio::test]
async fn test_partial_failure_reports_six_of_eight() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/exec_sql"))
        .and(body_string_contains("DROP POLICY IF EXISTS"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(4)
        .mount(&server)
        .await;

    for name in ["policy_alpha", "policy_bravo"] {
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/exec_sql"))
            .and(body_string_contains("CREATE POLICY"))
            .and(body_string_contains(name))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
            .expect(1)
            .mount(&server)
            .await;
    }

    for name in ["policy_charlie", "policy_delta"] {
        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/exec_sql"))
            .and(body_string_contains("CREATE POLICY"))
            .and(body_string_contains(name))
            .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
            .expect(1)
            .mount(&server)
            .await;
    }

    let runner = runner_for(&server.uri(), exec_sql_only());
    let migration = four_policy_migration();
    let report = runner.run(&migration, &mut ()).await;

    assert_eq!(report.total(), 8);
    assert_eq!(report.succeeded(), 6);
    assert!(!report.is_complete());

    let failed: Vec<usize> = report.failed().map(|r| r.position).collect();
    assert_eq!(failed, vec![7, 8]);

    let text = report.to_string();
    assert!(text.starts_with("6/8 statements succeeded"));
    assert!(text.contains("#7 CREATE POLICY \"policy_charlie\""));
    assert!(text.contains("#8 CREATE POLICY \"policy_delta\""));
    assert!(text.contains("failed via exec_sql (status 500): Internal Server Error"));

    let fallback = report.manual_fallback(runner.config()).unwrap();
    assert_eq!(fallback.pending, vec![7, 8]);
}

#[tokio::test]
async fn test_not_found_advances_to_next_candidate() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/execute_migration_sql"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "code": "PGRST202",
            "message": "Could not find the function public.execute_migration_sql(sql_query) in the schema cache"
        })))
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/exec_sql"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let options = RunnerOptions::default().with_candidates(vec![
        EndpointCandidate::rpc("execute_migration_sql", "sql_query"),
        EndpointCandidate::rpc("exec_sql", "query"),
        EndpointCandidate::rpc("execute_sql", "query"),
    ]);
    let runner = runner_for(&server.uri(), options);
    let migration = Migration::new("m", ["SELECT 1;", "SELECT 2;"]);

    let mut recorder = Recorder::default();
    let report = runner.run(&migration, &mut recorder).await;

    assert!(report.is_complete());
    for result in report.results() {
        assert_eq!(result.unsupported, vec!["execute_migration_sql".to_string()]);
        assert_eq!(
            result.outcome,
            StatementOutcome::Succeeded {
                endpoint: "exec_sql".into(),
                message: None
            }
        );
    }
    assert_eq!(
        recorder.events,
        vec![
            "start 1/2",
            "404 1 execute_migration_sql",
            "done 1 true",
            "start 2/2",
            "404 2 execute_migration_sql",
            "done 2 true",
        ]
    );
}

#[tokio::test]
async fn test_all_candidates_missing_leaves_statement_unexecuted() {
    let server = MockServer::start().await;

    Mock::given(any())
        .respond_with(ResponseTemplate::new(404))
        .expect(4)
        .mount(&server)
        .await;

    let runner = runner_for(&server.uri(), RunnerOptions::default());
    let sql = "DROP POLICY IF EXISTS \"legacy\" ON \"items\";";
    let migration = Migration::new("m", [sql]);

    let report = runner.run(&migration, &mut ()).await;

    let result = &report.results()[0];
    assert_eq!(result.outcome, StatementOutcome::NotFound);
    assert_eq!(
        result.unsupported,
        vec!["execute_migration_sql", "exec_sql", "execute_sql", "/sql"]
    );
    assert_eq!(report.unexecuted().count(), 1);

    let fallback = report.manual_fallback(runner.config()).unwrap().to_string();
    assert!(fallback.contains(sql));
}

#[tokio::test]
async fn test_error_status_is_final_and_batch_continues() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/execute_migration_sql"))
        .and(body_string_contains("broken"))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "code": "42601",
            "message": "syntax error at or near \"broken\""
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/execute_migration_sql"))
        .and(body_string_contains("SELECT 1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "message": "SQL executed successfully"
        })))
        .expect(1)
        .mount(&server)
        .await;

    // A remote error must not fall through to the next candidate
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/exec_sql"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let runner = runner_for(&server.uri(), RunnerOptions::default());
    let migration = Migration::new("m", ["broken statement;", "SELECT 1;"]);
    let report = runner.run(&migration, &mut ()).await;

    assert_eq!(
        report.results()[0].outcome,
        StatementOutcome::Failed {
            endpoint: "execute_migration_sql".into(),
            status: 400,
            message: "Code: 42601, Message: syntax error at or near \"broken\"".into()
        }
    );
    assert_eq!(
        report.results()[1].outcome,
        StatementOutcome::Succeeded {
            endpoint: "execute_migration_sql".into(),
            message: Some("SQL executed successfully".into())
        }
    );
    assert_eq!(report.summary(), "1/2 statements succeeded");
}

#[tokio::test]
async fn test_success_false_counts_as_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/exec_sql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "message": "permission denied for table items"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let runner = runner_for(&server.uri(), exec_sql_only());
    let report = runner
        .run(&Migration::new("m", ["ALTER TABLE items ENABLE ROW LEVEL SECURITY;"]), &mut ())
        .await;

    assert_eq!(
        report.results()[0].outcome,
        StatementOutcome::Failed {
            endpoint: "exec_sql".into(),
            status: 200,
            message: "permission denied for table items".into()
        }
    );
}

#[tokio::test]
async fn test_requests_carry_service_headers_and_body_shapes() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/execute_migration_sql"))
        .and(header("apikey", "test-service-key"))
        .and(header("Authorization", "Bearer test-service-key"))
        .and(header("Content-Type", "application/json"))
        .and(body_json(json!({ "sql_query": "SELECT 1;" })))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/sql"))
        .and(header("apikey", "test-service-key"))
        .and(header("Content-Type", "text/plain"))
        .and(body_string("SELECT 1;"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let options = RunnerOptions::default().with_candidates(vec![
        EndpointCandidate::rpc("execute_migration_sql", "sql_query"),
        EndpointCandidate::raw("/sql"),
    ]);
    let runner = runner_for(&server.uri(), options);
    let report = runner.run(&Migration::new("m", ["SELECT 1;"]), &mut ()).await;

    assert!(report.is_complete());
}

#[tokio::test]
async fn test_unreachable_host_does_not_abort_batch() {
    let runner = runner_for(
        "http://127.0.0.1:1",
        exec_sql_only().with_request_timeout(Duration::from_secs(2)),
    );
    let migration = Migration::new("m", ["SELECT 1;", "SELECT 2;"]);

    let mut recorder = Recorder::default();
    let report = runner.run(&migration, &mut recorder).await;

    assert_eq!(report.total(), 2);
    assert_eq!(report.succeeded(), 0);
    for result in report.results() {
        assert!(matches!(
            result.outcome,
            StatementOutcome::Unreachable { ref endpoint, .. } if endpoint == "exec_sql"
        ));
    }
    assert_eq!(recorder.events.len(), 4);
}

#[tokio::test]
async fn test_slow_endpoint_times_out() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/exec_sql"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let runner = runner_for(
        &server.uri(),
        exec_sql_only().with_request_timeout(Duration::from_millis(200)),
    );
    let report = runner.run(&Migration::new("m", ["SELECT 1;"]), &mut ()).await;

    match &report.results()[0].outcome {
        StatementOutcome::Unreachable { error, .. } => assert!(error.contains("timed out")),
        other => panic!("expected a timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_builtin_migration_can_run_twice() {
    let server = MockServer::start().await;
    let migration = builtin::outcome_policies_migration();
    let total = migration.len() as u64;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/execute_migration_sql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(total * 2)
        .mount(&server)
        .await;

    let runner = runner_for(&server.uri(), RunnerOptions::default());
    assert!(migration.check_idempotent().is_empty());

    for _ in 0..2 {
        let report = runner.run(&migration, &mut ()).await;
        assert!(report.is_complete());
        assert!(report.manual_fallback(runner.config()).is_none());
    }
}

#[tokio::test]
async fn test_parsed_endpoint_overrides_drive_the_run() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/run_sql"))
        .and(body_json(json!({ "statement": "SELECT 1;" })))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/exec_sql"))
        .and(body_json(json!({ "query": "SELECT 1;" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    // Not in the override list, so never called
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/execute_migration_sql"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let candidates = ["run_sql=statement", "exec_sql"]
        .iter()
        .map(|spec| spec.parse::<EndpointCandidate>())
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    let runner = runner_for(&server.uri(), RunnerOptions::default().with_candidates(candidates));
    let report = runner.run(&Migration::new("m", ["SELECT 1;"]), &mut ()).await;

    assert!(report.is_complete());
    assert_eq!(report.results()[0].unsupported, vec!["run_sql"]);
    assert_eq!(
        report.results()[0].outcome,
        StatementOutcome::Succeeded {
            endpoint: "exec_sql".into(),
            message: None
        }
    );
}

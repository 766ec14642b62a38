use serde_json::json;
use supabase_rls_migrate::config::{ProjectConfig, RunnerOptions};
use supabase_rls_migrate::runner::MigrationRunner;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn runner_for(server: &MockServer) -> MigrationRunner {
    let config = ProjectConfig::new(&server.uri(), "probe-key").unwrap();
    MigrationRunner::new(config, RunnerOptions::default()).unwrap()
}

#[tokio::test]
async fn test_check_table_reads_one_row() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/pipeline_outcome_reasons"))
        .and(query_param("select", "id"))
        .and(query_param("limit", "1"))
        .and(header("apikey", "probe-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": 7 }])))
        .expect(1)
        .mount(&server)
        .await;

    let check = runner_for(&server)
        .check_table("pipeline_outcome_reasons")
        .await
        .unwrap();

    assert!(check.is_reachable());
    assert_eq!(check.rows, Some(1));
    assert_eq!(
        check.to_string(),
        "pipeline_outcome_reasons: reachable (1 row(s) sampled)"
    );
}

#[tokio::test]
async fn test_check_table_reports_error_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/lead_outcome_history"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Invalid API key"))
        .mount(&server)
        .await;

    let check = runner_for(&server)
        .check_table("lead_outcome_history")
        .await
        .unwrap();

    assert!(!check.is_reachable());
    assert_eq!(check.status, 401);
    assert_eq!(check.detail.as_deref(), Some("Invalid API key"));
}

#[tokio::test]
async fn test_rpc_function_lookup_uses_openapi_document() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "swagger": "2.0",
            "paths": {
                "/": {},
                "/rpc/exec_sql": { "post": {} }
            }
        })))
        .mount(&server)
        .await;

    let runner = runner_for(&server);
    assert!(runner.rpc_function_exists("exec_sql").await.unwrap());
    assert!(!runner
        .rpc_function_exists("execute_migration_sql")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_rpc_function_lookup_treats_errors_as_missing() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    assert!(!runner_for(&server)
        .rpc_function_exists("execute_migration_sql")
        .await
        .unwrap());
}

#[tokio::test]
async fn test_rpc_function_lookup_requires_exact_path() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/rest/v1/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "swagger": "2.0",
            "paths": {
                "/rpc/execute_migration_sql_v2": { "post": {} }
            },
            "definitions": {
                "notes": { "description": "see /rpc/execute_migration_sql" }
            }
        })))
        .mount(&server)
        .await;

    let runner = runner_for(&server);
    assert!(!runner
        .rpc_function_exists("execute_migration_sql")
        .await
        .unwrap());
    assert!(runner
        .rpc_function_exists("execute_migration_sql_v2")
        .await
        .unwrap());
}

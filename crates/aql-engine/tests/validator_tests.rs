// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use aql_engine::{
    DataServiceClient, QueryService, ServiceConfig, ServiceError, ValidationOutcome,
};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ENDPOINT: &str = "/server/api/v3/database/query";
const VALIDATE_OPTIONS: &str = r#"{"format":"csv","stream":true,"validate":true}"#;
const EXECUTE_OPTIONS: &str = r#"{"format":"json","stream":true}"#;

fn client_for(server: &MockServer) -> DataServiceClient {
    let config = ServiceConfig {
        server: server.uri(),
        validate_timeout_secs: 1,
        execute_timeout_secs: 1,
        ..ServiceConfig::default()
    };
    DataServiceClient::new(&config).unwrap()
}

#[tokio::test]
async fn accepted_query_is_valid() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .and(query_param("select", "SELECT name"))
        .and(query_param("options", VALIDATE_OPTIONS))
        .and(header("authorization", "Basic cm9vdDpyb290"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "OK"})))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client_for(&server).validate("SELECT name").await;
    assert_eq!(outcome, ValidationOutcome::Valid);
}

#[tokio::test]
async fn rejected_query_carries_message_and_details() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "Error",
            "message": "Syntax error: unexpected FROM, expecting WHERE",
            "error": {"position": 12, "params": {"expecting": ["WHERE"], "token": "FROM"}}
        })))
        .mount(&server)
        .await;

    match client_for(&server).validate("SELECT name FROM files").await {
        ValidationOutcome::Invalid { message, details } => {
            assert_eq!(message, "Syntax error: unexpected FROM, expecting WHERE");
            assert_eq!(details["position"], 12);
            assert_eq!(details["params"]["token"], "FROM");
        }
        other => panic!("expected invalid outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn error_without_message_uses_default_text() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({"status": "Error"})))
        .mount(&server)
        .await;

    let outcome = client_for(&server).validate("SELECT").await;
    assert_eq!(
        outcome,
        ValidationOutcome::Invalid {
            message: "Unknown validation error".to_string(),
            details: json!({}),
        }
    );
}

#[tokio::test]
async fn server_error_is_retried_once_then_reported_as_transport_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(502).set_body_string("Bad Gateway"))
        .expect(2)
        .mount(&server)
        .await;

    let outcome = client_for(&server).validate("SELECT name").await;
    assert!(matches!(outcome, ValidationOutcome::TransportFailure { .. }));
}

#[tokio::test]
async fn transient_failure_recovers_on_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "OK"})))
        .with_priority(2)
        .mount(&server)
        .await;

    let outcome = client_for(&server).validate("SELECT name").await;
    assert_eq!(outcome, ValidationOutcome::Valid);
}

#[tokio::test]
async fn slow_service_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "OK"}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    match client_for(&server).validate("SELECT name").await {
        ValidationOutcome::TransportFailure { reason } => assert!(reason.contains("timed out")),
        other => panic!("expected transport failure, got {other:?}"),
    }
}

#[tokio::test]
async fn execute_applies_row_limit_and_parses_rows() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .and(query_param("select", "SELECT name, size LIMIT 25000"))
        .and(query_param("options", EXECUTE_OPTIONS))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"name": "report.pdf", "size": 1024},
            {"name": "notes.txt", "size": 12, "owner": "ops"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let rows = client_for(&server).execute("SELECT name, size").await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows.columns, vec!["name", "size", "owner"]);
    assert_eq!(rows.rows[0]["name"], "report.pdf");
}

#[tokio::test]
async fn execute_reports_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(401).set_body_string("Unauthorized"))
        .mount(&server)
        .await;

    let err = client_for(&server).execute("SELECT name").await.unwrap_err();
    assert_eq!(
        err,
        ServiceError::Status {
            status: 401,
            body: "Unauthorized".to_string()
        }
    );
}

#[tokio::test]
async fn execute_handles_empty_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let rows = client_for(&server).execute("SELECT name LIMIT 5").await.unwrap();
    assert!(rows.is_empty());
    assert!(rows.columns.is_empty());
}

#[tokio::test]
async fn connection_test_reports_success_and_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(ENDPOINT))
        .and(query_param("select", "SELECT 1 AS test LIMIT 25000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"test": 1}])))
        .mount(&server)
        .await;

    let status = client_for(&server).test_connection().await;
    assert!(status.ok);
    assert!(status.error.is_none());

    let unreachable = DataServiceClient::new(&ServiceConfig {
        server: "127.0.0.1:1".to_string(),
        execute_timeout_secs: 1,
        ..ServiceConfig::default()
    })
    .unwrap();
    let status = unreachable.test_connection().await;
    assert!(!status.ok);
    assert!(status.error.is_some());
}

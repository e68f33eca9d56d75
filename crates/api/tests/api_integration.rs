//! Integration tests for the HTTP surface.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use api::jwt::JwtManager;
use api::middleware::AuthState;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use common::UserId;
use metrics_exporter_prometheus::PrometheusHandle;
use report::NewReport;
use saga::CoordinatorConfig;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

const TEST_SECRET: &str = "test-secret";

fn setup() -> (axum::Router, Arc<api::InMemoryAppState>) {
    let (state, _outbox) = api::create_in_memory_state(CoordinatorConfig {
        max_retries: 0,
        retry_delay: Duration::from_millis(10),
        step_timeout: Duration::from_secs(5),
    });
    let auth = AuthState {
        jwt: Arc::new(JwtManager::new(TEST_SECRET)),
    };
    let app = api::create_app(state.clone(), get_metrics_handle(), auth);
    (app, state)
}

fn token_for(user_id: i64) -> String {
    JwtManager::new(TEST_SECRET)
        .issue(UserId::new(user_id))
        .unwrap()
}

fn authed(request: axum::http::request::Builder, token: &str) -> axum::http::request::Builder {
    request.header(header::AUTHORIZATION, format!("Bearer {token}"))
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

async fn create_report(app: &axum::Router, token: &str) -> serde_json::Value {
    let response = app
        .clone()
        .oneshot(
            authed(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/reports/")
                    .header("content-type", "application/json"),
                token,
            )
            .body(Body::from(
                serde_json::json!({
                    "name": "R1",
                    "template_id": 1,
                    "parameters": "{}"
                })
                .to_string(),
            ))
            .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    body_json(response).await
}

/// Polls the status endpoint until the report reaches the expected status.
async fn wait_for_report_status(
    app: &axum::Router,
    token: &str,
    id: i64,
    expected: &str,
) -> serde_json::Value {
    for _ in 0..500 {
        let response = app
            .clone()
            .oneshot(
                authed(
                    Request::builder().uri(format!("/api/v1/reports/{id}/status")),
                    token,
                )
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();

        if response.status() == StatusCode::OK {
            let json = body_json(response).await;
            if json["status"] == expected {
                return json;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("report {id} never reached status {expected}");
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup();

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["service"], "report-service");
}

#[tokio::test]
async fn test_requests_without_token_are_unauthorized() {
    let (app, _) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/reports/1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_requests_with_invalid_token_are_unauthorized() {
    let (app, _) = setup();

    let response = app
        .oneshot(
            authed(Request::builder().uri("/api/v1/reports/1"), "bogus-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_report_happy_path() {
    let (app, _) = setup();
    let token = token_for(7);

    let created = create_report(&app, &token).await;
    assert_eq!(created["status"], "pending");
    assert_eq!(
        created["message"],
        "Отчет создан и поставлен в очередь на генерацию"
    );
    let id = created["id"].as_i64().unwrap();

    // The saga runs in the background; the status endpoint converges.
    let status = wait_for_report_status(&app, &token, id, "completed").await;
    assert_eq!(status["file_path"], format!("/reports/report_{id}.pdf"));
    assert_eq!(status["progress"], 100);

    // The full aggregate carries the stored file metadata.
    let response = app
        .clone()
        .oneshot(
            authed(Request::builder().uri(format!("/api/v1/reports/{id}")), &token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await;
    assert_eq!(report["file_size"], 1_048_576);
    assert_eq!(report["md5_hash"], format!("hash_{id}"));
}

#[tokio::test]
async fn test_create_report_validation() {
    let (app, _) = setup();
    let token = token_for(7);

    for body in [
        serde_json::json!({"name": "", "template_id": 1}),
        serde_json::json!({"name": "R1", "template_id": 0}),
        serde_json::json!({"name": "R1", "template_id": 1, "parameters": "not json"}),
    ] {
        let response = app
            .clone()
            .oneshot(
                authed(
                    Request::builder()
                        .method("POST")
                        .uri("/api/v1/reports/")
                        .header("content-type", "application/json"),
                    &token,
                )
                .body(Body::from(body.to_string()))
                .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body {body}");
    }
}

#[tokio::test]
async fn test_get_nonexistent_report() {
    let (app, _) = setup();
    let token = token_for(7);

    let response = app
        .oneshot(
            authed(Request::builder().uri("/api/v1/reports/999"), &token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_report_id_format() {
    let (app, _) = setup();
    let token = token_for(7);

    let response = app
        .oneshot(
            authed(Request::builder().uri("/api/v1/reports/not-a-number"), &token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reports_are_scoped_to_their_owner() {
    let (app, _) = setup();
    let owner = token_for(7);
    let stranger = token_for(8);

    let created = create_report(&app, &owner).await;
    let id = created["id"].as_i64().unwrap();

    let response = app
        .oneshot(
            authed(Request::builder().uri(format!("/api/v1/reports/{id}")), &stranger)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_reports() {
    let (app, _) = setup();
    let token = token_for(7);

    create_report(&app, &token).await;
    create_report(&app, &token).await;

    let response = app
        .oneshot(
            authed(Request::builder().uri("/api/v1/reports/?page=1&limit=10"), &token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["total"], 2);
    assert_eq!(json["reports"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_download_requires_completion() {
    let (app, state) = setup();
    let token = token_for(7);

    // A report created directly, with no saga driving it to completion.
    let report = state
        .reports
        .create_report(
            UserId::new(7),
            NewReport {
                name: "stuck".to_string(),
                description: String::new(),
                template_id: common::TemplateId::new(1),
                parameters: "{}".to_string(),
            },
        )
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(
            authed(
                Request::builder().uri(format!("/api/v1/reports/{}/download", report.id)),
                &token,
            )
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_download_after_completion() {
    let (app, _) = setup();
    let token = token_for(7);

    let created = create_report(&app, &token).await;
    let id = created["id"].as_i64().unwrap();
    wait_for_report_status(&app, &token, id, "completed").await;

    let response = app
        .oneshot(
            authed(
                Request::builder().uri(format!("/api/v1/reports/{id}/download")),
                &token,
            )
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["report"]["file_path"], format!("/reports/report_{id}.pdf"));
}

#[tokio::test]
async fn test_export_csv() {
    let (app, _) = setup();
    let token = token_for(7);

    let created = create_report(&app, &token).await;
    let id = created["id"].as_i64().unwrap();
    wait_for_report_status(&app, &token, id, "completed").await;

    let response = app
        .oneshot(
            authed(
                Request::builder().uri(format!("/api/v1/reports/{id}/export/csv")),
                &token,
            )
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .get(header::CONTENT_TYPE)
            .unwrap()
            .to_str()
            .unwrap()
            .starts_with("text/csv")
    );

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let csv = String::from_utf8(body.to_vec()).unwrap();
    assert!(csv.starts_with("id,name,description"));
    assert!(csv.contains("R1"));
}

#[tokio::test]
async fn test_update_and_delete_report() {
    let (app, _) = setup();
    let token = token_for(7);

    let created = create_report(&app, &token).await;
    let id = created["id"].as_i64().unwrap();
    wait_for_report_status(&app, &token, id, "completed").await;

    let response = app
        .clone()
        .oneshot(
            authed(
                Request::builder()
                    .method("PUT")
                    .uri(format!("/api/v1/reports/{id}"))
                    .header("content-type", "application/json"),
                &token,
            )
            .body(Body::from(
                serde_json::json!({"name": "renamed"}).to_string(),
            ))
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["name"], "renamed");

    let response = app
        .clone()
        .oneshot(
            authed(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/v1/reports/{id}")),
                &token,
            )
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .oneshot(
            authed(Request::builder().uri(format!("/api/v1/reports/{id}")), &token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_saga_admin_flow() {
    let (app, _) = setup();
    let token = token_for(7);

    // Explicitly start a saga; no report row exists beforehand.
    let response = app
        .clone()
        .oneshot(
            authed(
                Request::builder()
                    .method("POST")
                    .uri("/api/v1/sagas/reports")
                    .header("content-type", "application/json"),
                &token,
            )
            .body(Body::from(
                serde_json::json!({
                    "template_id": "1",
                    "parameters": {"name": "admin report"}
                })
                .to_string(),
            ))
            .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let started = body_json(response).await;
    assert_eq!(started["status"], "started");
    let saga_id = started["saga_id"].as_str().unwrap().to_string();

    // Poll the saga endpoint until it completes.
    let mut saga = serde_json::Value::Null;
    for _ in 0..500 {
        let response = app
            .clone()
            .oneshot(
                authed(
                    Request::builder().uri(format!("/api/v1/sagas/{saga_id}")),
                    &token,
                )
                .body(Body::empty())
                .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        saga = body_json(response).await;
        if saga["status"] == "completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(saga["status"], "completed");
    assert_eq!(saga["steps"].as_array().unwrap().len(), 7);

    // Progress reflects a fully completed saga.
    let response = app
        .clone()
        .oneshot(
            authed(
                Request::builder().uri(format!("/api/v1/sagas/{saga_id}/progress")),
                &token,
            )
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let progress = body_json(response).await;
    assert_eq!(progress["total_steps"], 7);
    assert_eq!(progress["completed_steps"], 7);
    assert_eq!(progress["progress_percent"], 100.0);

    // Retrying a completed saga is an invalid transition.
    let response = app
        .clone()
        .oneshot(
            authed(
                Request::builder()
                    .method("POST")
                    .uri(format!("/api/v1/sagas/{saga_id}/retry")),
                &token,
            )
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // So is cancelling it.
    let response = app
        .oneshot(
            authed(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/v1/sagas/{saga_id}")),
                &token,
            )
            .body(Body::empty())
            .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_saga_is_not_found() {
    let (app, _) = setup();
    let token = token_for(7);

    let response = app
        .oneshot(
            authed(Request::builder().uri("/api/v1/sagas/no-such-saga"), &token)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_force_complete_needs_no_token_and_maps_errors_to_500() {
    let (app, _) = setup();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/sagas/no-such-saga/force-complete")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_force_complete_terminal_override() {
    let (app, state) = setup();
    let token = token_for(7);

    let created = create_report(&app, &token).await;
    let id = created["id"].as_i64().unwrap();
    wait_for_report_status(&app, &token, id, "completed").await;

    let saga_id = common::SagaId::for_report(common::ReportId::new(id));
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!("/api/v1/sagas/{saga_id}/force-complete"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let saga = state.coordinator.get_saga(&saga_id).await.unwrap();
    assert_eq!(saga.status, saga::SagaStatus::Completed);
}

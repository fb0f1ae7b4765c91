//! Job lifecycle through the HTTP router backed by the real job service.

mod support;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use firwatch_app::districts::DistrictDirectory;
use firwatch_app::paths::AppPaths;
use firwatch_app::pipeline::{ExtractionSettings, WatchOptions};
use firwatch_app::portal::PortalLauncher;
use firwatch_app::server::build_router;
use firwatch_app::services::{FirwatchService, ServiceSettings};
use firwatch_server::{JobService, ServerConfig};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use support::{FakeLauncher, FakePortal, FakeRow, PortalScript};
use tempfile::TempDir;
use tower::ServiceExt;

fn settings() -> ExtractionSettings {
    ExtractionSettings::builder()
        .base_url("https://portal.test/PublishedFIRs.aspx")
        .page_timeout(Duration::from_millis(300))
        .watch(
            WatchOptions::builder()
                .poll_interval(Duration::from_millis(10))
                .stable_checks(2)
                .timeout(Duration::from_millis(200))
                .build(),
        )
        .pacing_interval(Duration::ZERO)
        .pacing_jitter(Duration::ZERO)
        .build()
}

fn service(temp: &TempDir, script: PortalScript) -> Arc<FirwatchService> {
    let paths = AppPaths::new(temp.path()).expect("paths");
    let launcher: Arc<dyn PortalLauncher> = FakeLauncher::new(FakePortal::new(script));
    let service = FirwatchService::new(
        launcher,
        settings(),
        DistrictDirectory::builtin(),
        paths,
        ServiceSettings::default(),
    )
    .expect("service");
    Arc::new(service)
}

fn router(service: Arc<FirwatchService>) -> Router {
    let mut config = ServerConfig::with_listen_addr("127.0.0.1:0");
    config.rate_limit.enabled = false;
    build_router(&config, service).expect("router")
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>, axum::http::HeaderMap) {
    let response = app.clone().oneshot(request).await.expect("response");
    let status = response.status();
    let headers = response.headers().clone();
    let body = response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes()
        .to_vec();
    (status, body, headers)
}

fn submit(body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/v1/jobs")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

async fn wait_until_terminal(app: &Router, job_id: &str) -> Value {
    for _ in 0..200 {
        let (status, body, _) = send(app, get(&format!("/v1/jobs/{job_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).expect("status json");
        if value["status"] != "started" {
            return value;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("job {job_id} never finished");
}

#[tokio::test]
async fn submitted_job_completes_and_serves_archive() {
    let temp = TempDir::new().expect("temp dir");
    let svc = service(
        &temp,
        PortalScript::with_pages(vec![
            vec![FakeRow::matching("0001/2024"), FakeRow::other("0002/2024")],
            vec![FakeRow::matching("0003/2024")],
        ]),
    );
    let app = router(svc.clone());

    let (status, body, _) = send(
        &app,
        submit(json!({
            "fromDate": "01/01/2024",
            "toDate": "31/01/2024",
            "districtName": "pune city"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let ticket: Value = serde_json::from_slice(&body).expect("ticket json");
    assert_eq!(ticket["status"], "started");
    let job_id = ticket["jobId"].as_str().expect("job id").to_string();

    let done = wait_until_terminal(&app, &job_id).await;
    assert_eq!(done["status"], "completed", "{done}");
    assert_eq!(done["filesDownloaded"], 2);
    assert_eq!(done["rowsScanned"], 3);
    assert_eq!(done["currentPage"], 2);
    assert_eq!(done["endReason"], "exhausted");
    assert_eq!(done["downloadReady"], true);
    assert_eq!(done["districtName"], "PUNE CITY");

    let (status, body, headers) = send(&app, get(&format!("/v1/jobs/{job_id}/archive"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok()),
        Some("application/zip")
    );
    let disposition = headers
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .expect("content-disposition");
    assert!(
        disposition.contains("FIR_PUNE_CITY_01-01-2024_to_31-01-2024.zip"),
        "{disposition}"
    );
    let archive = zip::ZipArchive::new(std::io::Cursor::new(body)).expect("zip body");
    assert_eq!(archive.len(), 2);
}

#[tokio::test]
async fn invalid_submissions_are_rejected_with_distinct_reasons() {
    let temp = TempDir::new().expect("temp dir");
    let app = router(service(&temp, PortalScript::default()));

    let cases = [
        (
            json!({"fromDate": "01/01/2024", "toDate": "01/04/2024", "districtName": "PUNE CITY"}),
            StatusCode::BAD_REQUEST,
            "invalid_range",
        ),
        (
            json!({"fromDate": "2024-01-01", "toDate": "01/02/2024", "districtName": "PUNE CITY"}),
            StatusCode::BAD_REQUEST,
            "invalid_parameter",
        ),
        (
            json!({"fromDate": "01/01/2024", "toDate": "01/02/2024", "districtName": "GOTHAM"}),
            StatusCode::BAD_REQUEST,
            "unknown_district",
        ),
        (
            json!({"fromDate": "01/01/2024", "districtName": "PUNE CITY"}),
            StatusCode::BAD_REQUEST,
            "invalid_parameter",
        ),
    ];

    for (body, expected_status, expected_error) in cases {
        let (status, response, _) = send(&app, submit(body.clone())).await;
        assert_eq!(status, expected_status, "{body}");
        let value: Value = serde_json::from_slice(&response).expect("error json");
        assert_eq!(value["error"], expected_error, "{body}");
    }
}

#[tokio::test]
async fn failed_job_reports_reason_and_has_no_archive() {
    let temp = TempDir::new().expect("temp dir");
    let app = router(service(
        &temp,
        PortalScript {
            search_hangs: true,
            ..PortalScript::default()
        },
    ));

    let (status, body, _) = send(
        &app,
        submit(json!({
            "fromDate": "01/01/2024",
            "toDate": "02/01/2024",
            "districtName": "PUNE CITY"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let job_id = serde_json::from_slice::<Value>(&body).expect("ticket")["jobId"]
        .as_str()
        .expect("job id")
        .to_string();

    let done = wait_until_terminal(&app, &job_id).await;
    assert_eq!(done["status"], "failed");
    let message = done["message"].as_str().expect("message");
    assert!(message.contains("await_results"), "{message}");
    assert_eq!(done["downloadReady"], false);

    let (status, body, _) = send(&app, get(&format!("/v1/jobs/{job_id}/archive"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let value: Value = serde_json::from_slice(&body).expect("error json");
    assert_eq!(value["error"], "job_not_completed");
}

#[tokio::test]
async fn archive_removed_from_disk_is_gone() {
    let temp = TempDir::new().expect("temp dir");
    let svc = service(
        &temp,
        PortalScript::with_pages(vec![vec![FakeRow::matching("0001/2024")]]),
    );
    let app = router(svc.clone());

    let (_, body, _) = send(
        &app,
        submit(json!({
            "fromDate": "01/01/2024",
            "toDate": "02/01/2024",
            "districtName": "PUNE CITY"
        })),
    )
    .await;
    let job_id = serde_json::from_slice::<Value>(&body).expect("ticket")["jobId"]
        .as_str()
        .expect("job id")
        .to_string();
    let done = wait_until_terminal(&app, &job_id).await;
    assert_eq!(done["status"], "completed");

    std::fs::remove_file(svc.paths().archive_path(&job_id)).expect("remove archive");
    let (status, _, _) = send(&app, get(&format!("/v1/jobs/{job_id}/archive"))).await;
    assert_eq!(status, StatusCode::GONE);

    let (status, _, _) = send(&app, get("/v1/jobs/not-a-job")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn districts_endpoint_lists_the_directory() {
    let temp = TempDir::new().expect("temp dir");
    let svc = service(&temp, PortalScript::default());
    let expected = svc.districts();
    let app = router(svc);

    let (status, body, _) = send(&app, get("/v1/districts")).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<String> = serde_json::from_slice(&body).expect("names json");
    assert_eq!(names, expected);
    assert!(names.contains(&"PUNE CITY".to_string()));
}

//! HTTP-level tests of the submission, query, and worker surfaces.

mod support;

use serde_json::{Value, json};

use support::build_test_app;

#[tokio::test]
async fn errata_submission_round_trip() {
    let app = build_test_app();

    let response = app
        .server
        .post("/api/v1/errata/scans")
        .json(&json!({
            "id": "77",
            "errata_id": "1234",
            "target": "expat-2.5.0-2.el9",
            "base": "expat-2.5.0-1.el9",
            "release": "RHEL-9.2.0",
            "package_owner": "owner@example.com",
        }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "OK");
    let mapping_id = body["id"].as_str().expect("mapping id").to_string();

    // state stays queryable through the returned mapping id
    let response = app
        .server
        .get(&format!("/api/v1/errata/scans/{mapping_id}"))
        .await;
    response.assert_status_ok();
    let state: Value = response.json();
    assert_eq!(state["status"], "OK");
    assert_eq!(state["state"], "QUEUED");
}

#[tokio::test]
async fn errata_submission_never_propagates_errors() {
    let app = build_test_app();

    // malformed target: still a structured response, never a 4xx/5xx
    let response = app
        .server
        .post("/api/v1/errata/scans")
        .json(&json!({
            "id": "78",
            "errata_id": "1234",
            "target": "not-an-nvr",
            "base": "expat-2.5.0-1.el9",
            "release": "RHEL-9.2.0",
            "package_owner": "owner@example.com",
        }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "ERROR");
    assert!(
        body["message"]
            .as_str()
            .unwrap()
            .contains("Unable to submit the scan")
    );
    assert!(body["id"].is_string(), "mapping id is always returned");
}

#[tokio::test]
async fn container_packages_are_ineligible() {
    let app = build_test_app();

    let response = app
        .server
        .post("/api/v1/errata/scans")
        .json(&json!({
            "id": "79",
            "errata_id": "1234",
            "target": "foo-container-1.0-1.el9",
            "base": "foo-container-0.9-1.el9",
            "release": "RHEL-9.2.0",
            "package_owner": "owner@example.com",
        }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "INELIGIBLE");
}

#[tokio::test]
async fn user_scan_submission_is_accepted_and_findable() {
    let app = build_test_app();

    let response = app
        .server
        .post("/api/v1/scans/mock-build")
        .add_header("x-scanhub-user", "alice")
        .json(&json!({
            "source": { "build": { "nvr": "expat-2.5.0-1.el9" } },
            "environment": "rhel-9-x86_64",
            "comment": "one-off check",
        }))
        .await;
    response.assert_status(axum::http::StatusCode::ACCEPTED);
    let body: Value = response.json();
    assert_eq!(body["success"], true);
    assert!(body["data"]["job"].is_string());

    let response = app
        .server
        .post("/api/v1/tasks/find")
        .json(&json!({ "label": "expat-2.5.0-1.el9" }))
        .await;
    response.assert_status_ok();
    let ids: Vec<String> = response.json();
    assert_eq!(ids.len(), 1);

    let response = app
        .server
        .post("/api/v1/scans/find")
        .json(&json!({ "target": "expat-2.5.0-1.el9" }))
        .await;
    response.assert_status_ok();
    let list: Value = response.json();
    assert_eq!(list["status"], "OK");
    assert_eq!(list["count"], 1);
    assert_eq!(list["scans"][0]["scan_type"], "USER");
}

#[tokio::test]
async fn elevated_priority_is_rejected_for_plain_users() {
    let app = build_test_app();

    let response = app
        .server
        .post("/api/v1/scans/mock-build")
        .add_header("x-scanhub-user", "alice")
        .json(&json!({
            "source": { "build": { "nvr": "expat-2.5.0-1.el9" } },
            "environment": "rhel-9-x86_64",
            "priority": 25,
        }))
        .await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);

    // the same request with the elevated header succeeds
    let response = app
        .server
        .post("/api/v1/scans/mock-build")
        .add_header("x-scanhub-user", "alice")
        .add_header("x-scanhub-elevated", "1")
        .json(&json!({
            "source": { "build": { "nvr": "expat-2.5.0-1.el9" } },
            "environment": "rhel-9-x86_64",
            "priority": 25,
        }))
        .await;
    response.assert_status(axum::http::StatusCode::ACCEPTED);
}

#[tokio::test]
async fn analyzer_checks_and_listings() {
    let app = build_test_app();

    let response = app
        .server
        .post("/api/v1/analyzers/check")
        .json(&json!({ "analyzers": "cppcheck" }))
        .await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert!(body.is_null(), "all analyzers available");

    let response = app
        .server
        .post("/api/v1/analyzers/check")
        .json(&json!({ "analyzers": "cppcheck,sparse" }))
        .await;
    let body: Value = response.json();
    assert_eq!(body, json!("Analyzer sparse is not available."));

    let response = app.server.get("/api/v1/profiles").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["data"][0]["name"], "default");
}

#[tokio::test]
async fn worker_callbacks_drive_scan_state() {
    let app = build_test_app();

    let response = app
        .server
        .post("/api/v1/errata/scans")
        .json(&json!({
            "id": "80",
            "errata_id": "1234",
            "target": "expat-2.5.0-2.el9",
            "base": "expat-2.5.0-1.el9",
            "release": "RHEL-9.2.0",
            "package_owner": "owner@example.com",
        }))
        .await;
    let mapping_id: String =
        response.json::<Value>()["id"].as_str().unwrap().to_string();

    let response = app
        .server
        .post("/api/v1/scans/find")
        .json(&json!({ "target": "expat-2.5.0-2.el9" }))
        .await;
    let scan_id: String = response.json::<Value>()["scans"][0]["id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = app
        .server
        .post(&format!("/worker/scans/{scan_id}/scanning"))
        .await;
    response.assert_status(axum::http::StatusCode::NO_CONTENT);

    let response = app
        .server
        .get(&format!("/api/v1/errata/scans/{mapping_id}"))
        .await;
    let state: Value = response.json();
    assert_eq!(state["state"], "SCANNING");

    // worker reports a failure; the scan records it
    let response = app
        .server
        .post(&format!("/worker/scans/{scan_id}/fail"))
        .json(&json!({ "reason": "build did not finish" }))
        .await;
    response.assert_status(axum::http::StatusCode::NO_CONTENT);

    let response = app
        .server
        .get(&format!("/api/v1/errata/scans/{mapping_id}"))
        .await;
    let state: Value = response.json();
    assert_eq!(state["state"], "FAILED");
}

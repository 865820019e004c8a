mod common;

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum_test::TestServer;
use serde_json::Value;
use tower::ServiceExt;

use common::{json_body, multipart, zip_of, TestApp, PDF};

#[tokio::test]
async fn extract_returns_figures_and_tables() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(multipart("/extract", &[("file", "paper.pdf", PDF)]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let request_id = response.headers()["x-request-id"].to_str().unwrap().to_string();
    let body = json_body(response).await;

    assert_eq!(body["correlation_id"], request_id);
    assert_eq!(body["num_figures"], 2);
    assert_eq!(body["num_tables"], 1);
    assert_eq!(body["pages"], 1);
    assert_eq!(
        body["metadata_file"],
        format!("/download/{request_id}/paper.json")
    );
    assert_eq!(
        body["figures"][0],
        format!("/download/{request_id}/paper-Figure1-1.png")
    );
    assert_eq!(app.launcher.calls(), 1);
    assert!(app.state.registry().is_empty());
}

#[tokio::test]
async fn extracted_artifacts_are_downloadable() {
    let app = TestApp::new();
    let body = json_body(
        app.router()
            .oneshot(multipart("/extract", &[("file", "paper.pdf", PDF)]))
            .await
            .unwrap(),
    )
    .await;

    let server = TestServer::new(app.router()).unwrap();

    let figure = server.get(body["figures"][1].as_str().unwrap()).await;
    figure.assert_status_ok();
    assert_eq!(figure.header(header::CONTENT_TYPE), "image/png");
    assert_eq!(figure.as_bytes().as_ref(), b"\x89PNG\r\n");

    let metadata = server.get(body["metadata_file"].as_str().unwrap()).await;
    metadata.assert_status_ok();
    let records: Value = metadata.json();
    assert_eq!(records.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn non_pdf_is_rejected_before_the_engine() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(multipart(
            "/extract",
            &[("file", "notes.pdf", &b"plain text, not a pdf"[..])],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = json_body(response).await;
    assert_eq!(body["code"], "validation_error");
    assert!(body.get("correlation_id").is_none());
    assert_eq!(app.launcher.calls(), 0);

    let response = app
        .router()
        .oneshot(multipart("/extract", &[("file", "slides.pptx", PDF)]))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.launcher.calls(), 0);
}

#[tokio::test]
async fn missing_file_field_is_a_bad_request() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(multipart("/extract", &[("document", "paper.pdf", PDF)]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.launcher.calls(), 0);
}

#[tokio::test]
async fn engine_timeout_is_a_gateway_timeout() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(multipart("/extract", &[("file", "hang.pdf", PDF)]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    let body = json_body(response).await;
    assert_eq!(body["code"], "engine_timeout");

    let correlation_id = body["correlation_id"].as_str().unwrap();
    assert!(!app.output_path(correlation_id).exists());
    assert!(app.state.registry().is_empty());
    assert_eq!(app.state.invoker().available_slots(), 2);
}

#[tokio::test]
async fn engine_failure_carries_correlation_id() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(multipart("/extract", &[("file", "bad.pdf", PDF)]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let request_id = response.headers()["x-request-id"].to_str().unwrap().to_string();
    let body = json_body(response).await;
    assert_eq!(body["code"], "engine_failure");
    assert_eq!(body["correlation_id"], request_id);
}

#[tokio::test]
async fn output_dir_namespaces_results() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(multipart(
            "/extract?output_dir=team-a",
            &[("file", "paper.pdf", PDF)],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let correlation_id = body["correlation_id"].as_str().unwrap();
    assert_eq!(
        body["metadata_file"],
        format!("/download/team-a/{correlation_id}/paper.json")
    );
    assert!(app
        .output_path(&format!("team-a/{correlation_id}/paper.json"))
        .is_file());

    let response = app
        .router()
        .oneshot(multipart(
            "/extract?output_dir=../escape",
            &[("file", "paper.pdf", PDF)],
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.launcher.calls(), 1);
}

#[tokio::test]
async fn rate_limit_rejects_and_recovers() {
    let app = TestApp::with_config(|config| {
        config.limits.rate_limit_requests = 2;
        config.limits.rate_limit_window = Duration::from_secs(60);
    });

    let request = || {
        Request::builder()
            .uri("/download/nothing.png")
            .header("x-client-id", "lab-1")
            .body(Body::empty())
            .unwrap()
    };

    for _ in 0..2 {
        let response = app.router().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    let response = app.router().oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "60");
    assert_eq!(json_body(response).await["code"], "rate_limited");

    // Health sits outside the gate
    let server = TestServer::new(app.router()).unwrap();
    server.get("/health").await.assert_status_ok();

    app.clock.advance(chrono::Duration::seconds(60));
    let response = app.router().oneshot(request()).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn download_rejects_paths_outside_the_output_root() {
    let app = TestApp::new();
    std::fs::write(app.temp.path().join("secret.txt"), b"secret").unwrap();

    let server = TestServer::new(app.router()).unwrap();
    for path in [
        "/download/..%2Fsecret.txt",
        "/download/..%2F..%2Fetc%2Fpasswd",
        "/download/%2Fetc%2Fpasswd",
        "/download/missing/figure.png",
    ] {
        let response = server.get(path).expect_failure().await;
        assert_eq!(response.status_code(), StatusCode::NOT_FOUND, "{path}");
    }
}

#[tokio::test]
async fn batch_reports_every_document_in_name_order() {
    let app = TestApp::new();
    let archive = zip_of(&[("zeta.pdf", PDF), ("nested/alpha.pdf", PDF), ("readme.md", &b"#"[..])]);

    let response = app
        .router()
        .oneshot(multipart(
            "/extract_batch",
            &[
                ("files", "mid.pdf", PDF),
                ("files", "bad.pdf", PDF),
                ("files", "papers.zip", archive.as_slice()),
            ],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let batch_id = body["correlation_id"].as_str().unwrap().to_string();

    assert_eq!(body["num_documents"], 4);
    let documents = body["documents"].as_array().unwrap();
    let names: Vec<&str> = documents
        .iter()
        .map(|d| d["filename"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["alpha.pdf", "bad.pdf", "mid.pdf", "zeta.pdf"]);

    assert!(documents[1]["error"].is_string());
    assert!(documents[1].get("metadata_file").is_none());
    for index in [0, 2, 3] {
        assert!(documents[index].get("error").is_none());
        assert_eq!(documents[index]["figures"].as_array().unwrap().len(), 2);
        assert_eq!(
            documents[index]["correlation_id"],
            format!("{batch_id}-{index}")
        );
    }

    let stats = &body["processing_stats"];
    assert_eq!(stats["total_pages"], 3);
    assert_eq!(app.launcher.calls(), 4);
}

#[tokio::test]
async fn batch_rejects_escaping_archive_entries() {
    let app = TestApp::new();
    let archive = zip_of(&[("../../outside.pdf", PDF)]);

    let response = app
        .router()
        .oneshot(multipart("/extract_batch", &[("files", "evil.zip", archive.as_slice())]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(!app.temp.path().join("outside.pdf").exists());
    assert_eq!(app.launcher.calls(), 0);
}

#[tokio::test]
async fn batch_reports_unusable_file_names_as_failed_entries() {
    let app = TestApp::new();

    let response = app
        .router()
        .oneshot(multipart(
            "/extract_batch",
            &[("files", "@@@", PDF), ("files", "paper.pdf", PDF)],
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["num_documents"], 2);

    let documents = body["documents"].as_array().unwrap();
    assert_eq!(documents[0]["filename"], "@@@");
    assert!(documents[0]["error"].is_string());
    assert!(documents[1].get("error").is_none());
    assert_eq!(documents[1]["filename"], "paper.pdf");
    assert_eq!(app.launcher.calls(), 1);
}

#[tokio::test]
async fn batch_rejects_archives_that_unpack_past_the_size_limit() {
    let app = TestApp::with_config(|config| {
        config.storage.max_content_length = 16 * 1024;
    });
    let zeros = vec![0u8; 256 * 1024];
    let archive = zip_of(&[("huge.pdf", zeros.as_slice())]);

    let response = app
        .router()
        .oneshot(multipart("/extract_batch", &[("files", "huge.zip", archive.as_slice())]))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["code"], "validation_error");
    assert_eq!(app.launcher.calls(), 0);
}

#[tokio::test]
async fn health_reports_free_slots() {
    let app = TestApp::new();
    let server = TestServer::new(app.router()).unwrap();

    let response = server.get("/health").await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["available_slots"], 2);
    assert_eq!(app.launcher.calls(), 0);
}

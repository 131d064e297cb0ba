use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use common::{ClusterConfig, FileStatus, JobInfo, JobResults, JobStatus, NodeReport, WriteSummary};
use master::{handlers::build_router, AppState};
use serde::de::DeserializeOwned;
use tempfile::TempDir;
use tower::ServiceExt;

fn app() -> (TempDir, Router) {
    let dir = TempDir::new().unwrap();
    let config = ClusterConfig {
        data_dir: dir.path().to_path_buf(),
        block_size: 8,
        write_timeout_ms: 5_000,
        ..ClusterConfig::default()
    };
    let state = AppState::new(&config).unwrap();
    (dir, build_router(state))
}

async fn call(
    app: &Router,
    method: Method,
    uri: &str,
    user: Option<&str>,
    body: Body,
) -> (StatusCode, Vec<u8>) {
    let mut req = Request::builder().method(method).uri(uri);
    if let Some(user) = user {
        req = req.header("x-minidfs-user", user);
    }
    let resp = app
        .clone()
        .oneshot(req.body(body).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    (status, bytes.to_vec())
}

fn json<T: DeserializeOwned>(bytes: &[u8]) -> T {
    serde_json::from_slice(bytes).unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn put_then_get_file() {
    let (_dir, app) = app();

    let (status, body) = call(
        &app,
        Method::PUT,
        "/api/v1/fs/file?path=/test/input/hello.txt",
        None,
        Body::from("hello,hadoop\nhello,hdfs\n"),
    )
    .await;
    // el padre no existe todavía
    assert_eq!(status, StatusCode::NOT_FOUND, "{}", String::from_utf8_lossy(&body));

    let (status, _) = call(&app, Method::POST, "/api/v1/fs/mkdirs?path=/test/input", None, Body::empty()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app,
        Method::PUT,
        "/api/v1/fs/file?path=/test/input/hello.txt",
        None,
        Body::from("hello,hadoop\nhello,hdfs\n"),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let summary: WriteSummary = json(&body);
    assert_eq!(summary.bytes, 24);
    assert_eq!(summary.blocks.len(), 3);

    let (status, body) = call(&app, Method::GET, "/api/v1/fs/file?path=/test/input/hello.txt", None, Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"hello,hadoop\nhello,hdfs\n");

    let (status, body) = call(&app, Method::GET, "/api/v1/fs/list?path=/test&recursive=true", None, Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let listed: Vec<FileStatus> = json(&body);
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].path, "/test/input/hello.txt");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn errors_map_to_status_codes() {
    let (_dir, app) = app();
    call(&app, Method::POST, "/api/v1/fs/mkdirs?path=/d/e", None, Body::empty()).await;

    let (status, body) = call(&app, Method::DELETE, "/api/v1/fs?path=/d", None, Body::empty()).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let err: serde_json::Value = json(&body);
    assert!(err["error"].as_str().unwrap().contains("/d"));

    let (status, _) = call(&app, Method::GET, "/api/v1/fs/status?path=/nada", None, Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, Method::GET, "/api/v1/jobs/no-existe", None, Body::empty()).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, Method::POST, "/api/v1/fs/mkdirs?path=/d/otro", Some("testuser"), Body::empty()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(&app, Method::DELETE, "/api/v1/fs?path=/d&recursive=true", None, Body::empty()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_over_http() {
    let (_dir, app) = app();
    call(&app, Method::POST, "/api/v1/fs/mkdirs?path=/test/input", None, Body::empty()).await;
    call(&app, Method::PUT, "/api/v1/fs/file?path=/test/input/a.txt", None, Body::from("a,b\na,c")).await;

    let req = serde_json::json!({
        "input_paths": ["/test/input"],
        "mapper_id": "wordcount",
        "reducer_id": "sum",
        "partition_count": 1,
        "output_path": "/test/output"
    });
    let submit = |body: String| {
        let app = app.clone();
        async move {
            let req = Request::builder()
                .method(Method::POST)
                .uri("/api/v1/jobs")
                .header("content-type", "application/json")
                .body(Body::from(body))
                .unwrap();
            let resp = app.oneshot(req).await.unwrap();
            let status = resp.status();
            (status, to_bytes(resp.into_body(), usize::MAX).await.unwrap())
        }
    };

    let (status, body) = submit(req.to_string()).await;
    assert_eq!(status, StatusCode::OK);
    let job: JobInfo = json(&body);

    let mut info = job.clone();
    for _ in 0..200 {
        let (_, body) = call(&app, Method::GET, &format!("/api/v1/jobs/{}", job.id), None, Body::empty()).await;
        info = json(&body);
        if info.status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(info.status, JobStatus::Succeeded, "{:?}", info.error);

    let (_, body) = call(&app, Method::GET, &format!("/api/v1/jobs/{}/results", job.id), None, Body::empty()).await;
    let results: JobResults = json(&body);
    assert_eq!(results.files, vec!["/test/output/part-r-00000".to_string()]);

    let (_, body) = call(&app, Method::GET, "/api/v1/fs/file?path=/test/output/part-r-00000", None, Body::empty()).await;
    assert_eq!(body, b"a\t2\nb\t1\nc\t1\n");

    // la salida ya existe
    let (status, _) = submit(req.to_string()).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn nodes_and_fsck() {
    let (_dir, app) = app();

    let (status, body) = call(&app, Method::GET, "/api/v1/nodes", None, Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let nodes: Vec<NodeReport> = json(&body);
    assert_eq!(nodes.len(), 3);
    assert!(nodes.iter().all(|n| n.alive));

    let (status, body) = call(&app, Method::GET, "/api/v1/fsck?repair=true", None, Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let report: common::FsckReport = json(&body);
    assert!(report.is_healthy());

    let (status, body) = call(&app, Method::GET, "/health", None, Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn metadata_calls_run_as_the_caller() {
    let (_dir, app) = app();
    let (status, _) = call(&app, Method::POST, "/api/v1/fs/mkdirs?path=/a/b", None, Body::empty()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&app, Method::POST, "/api/v1/fs/rename?src=/a/b&dst=/a/c", Some("testuser"), Body::empty()).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = call(&app, Method::POST, "/api/v1/fs/rename?src=/a/b&dst=/a/c", None, Body::empty()).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, body) = call(&app, Method::GET, "/api/v1/fs/status?path=/a/c", Some("testuser"), Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let st: FileStatus = json(&body);
    assert_eq!(st.path, "/a/c");

    let (status, body) = call(&app, Method::GET, "/api/v1/fs/list?path=/a", Some("testuser"), Body::empty()).await;
    assert_eq!(status, StatusCode::OK);
    let listed: Vec<FileStatus> = json(&body);
    assert_eq!(listed.len(), 1);
}

use async_trait::async_trait;
use axum::body::Bytes;
use axum_test::{TestResponse, TestServer};
use http::header::{CONTENT_LENGTH, CONTENT_TYPE};
use http::HeaderValue;
use lsif_api::{create_router, AppState};
use lsif_core::{LsifError, Settings};
use lsif_storage::{gzip, BackendKind, Converter, SqliteCrossRepoIndex};
use serde_json::{json, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const REPO_A: &str = include_str!("../../lsif-storage/tests/fixtures/repo-a.lsif");
const REPO_B: &str = include_str!("../../lsif-storage/tests/fixtures/repo-b.lsif");
const COMMIT_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const COMMIT_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

fn settings_for(dir: &TempDir) -> Settings {
    let mut settings = Settings::default();
    settings.storage.root = dir.path().to_path_buf();
    settings
}

async fn test_server(settings: Settings) -> TestServer {
    let state = AppState::new(settings).await.expect("app state");
    TestServer::new(create_router(state)).unwrap()
}

async fn upload(server: &TestServer, repository: &str, commit: &str, dump: &str) -> TestResponse {
    server
        .post("/upload")
        .add_query_param("repository", repository)
        .add_query_param("commit", commit)
        .bytes(Bytes::from(dump.to_string()))
        .await
}

async fn request(server: &TestServer, repository: &str, commit: &str, body: Value) -> TestResponse {
    server
        .post("/request")
        .add_query_param("repository", repository)
        .add_query_param("commit", commit)
        .json(&body)
        .await
}

fn query(method: &str, path: &str, line: u32, character: u32) -> Value {
    json!({
        "path": path,
        "position": { "line": line, "character": character },
        "method": method,
    })
}

fn stored_files(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(root)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_file())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .filter(|name| BackendKind::split_file_name(name).is_some())
        .collect();
    names.sort();
    names
}

/// Both fixture repositories uploaded with every encoding enabled.
async fn populated() -> (TempDir, TestServer) {
    let dir = TempDir::new().unwrap();
    let server = test_server(settings_for(&dir)).await;
    upload(&server, "b", COMMIT_B, REPO_B).await.assert_status_ok();
    upload(&server, "a", COMMIT_A, REPO_A).await.assert_status_ok();
    (dir, server)
}

#[tokio::test]
async fn ping_returns_pong() {
    let dir = TempDir::new().unwrap();
    let server = test_server(settings_for(&dir)).await;
    let resp = server.get("/ping").await;
    assert_eq!(resp.status_code(), 200);
    let body: Value = resp.json();
    assert_eq!(body, json!({ "pong": "pong" }));
}

#[tokio::test]
async fn upload_stores_every_enabled_encoding() {
    let dir = TempDir::new().unwrap();
    let server = test_server(settings_for(&dir)).await;

    let resp = upload(&server, "github.com/a/b", COMMIT_A, REPO_A).await;
    assert_eq!(resp.status_code(), 200);
    assert_eq!(resp.text(), "Upload successful.");

    let base = format!("github.com%2Fa%2Fb@{}", COMMIT_A);
    assert_eq!(
        stored_files(dir.path()),
        vec![
            format!("{}.blob.db", base),
            format!("{}.graph.db", base),
            format!("{}.lsif", base),
        ]
    );
    let leftovers = std::fs::read_dir(dir.path().join("tmp")).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn upload_rejects_invalid_targets_and_dumps() {
    let dir = TempDir::new().unwrap();
    let server = test_server(settings_for(&dir)).await;

    let resp = upload(&server, "a", "not-a-commit", REPO_A).await;
    resp.assert_status_bad_request();
    let body: Value = resp.json();
    assert_eq!(body["status"], 400);
    assert!(body["error"]
        .as_str()
        .unwrap()
        .contains("40 character hash"));

    upload(&server, "", COMMIT_A, REPO_A)
        .await
        .assert_status_bad_request();

    upload(&server, "a", COMMIT_A, "this is not lsif\n")
        .await
        .assert_status_bad_request();
    assert!(stored_files(dir.path()).is_empty());
}

#[tokio::test]
async fn oversized_uploads_are_rejected() {
    let dir = TempDir::new().unwrap();
    let mut settings = settings_for(&dir);
    settings.storage.max_upload_bytes = 64;
    let server = test_server(settings).await;

    let resp = upload(&server, "a", COMMIT_A, REPO_A).await;
    assert_eq!(resp.status_code(), 413);
    let body: Value = resp.json();
    assert!(body["error"].as_str().unwrap().contains("exceeds the max of 64"));
    assert!(stored_files(dir.path()).is_empty());
}

#[tokio::test]
async fn declared_lengths_over_the_limit_are_rejected_up_front() {
    let dir = TempDir::new().unwrap();
    let mut settings = settings_for(&dir);
    settings.storage.max_upload_bytes = 64;
    let server = test_server(settings).await;

    let resp = server
        .post("/upload")
        .add_query_param("repository", "a")
        .add_query_param("commit", COMMIT_A)
        .add_header(CONTENT_LENGTH, HeaderValue::from_static("100"))
        .bytes(Bytes::from(vec![b' '; 100]))
        .await;
    assert_eq!(resp.status_code(), 413);
    let body: Value = resp.json();
    assert_eq!(
        body["error"],
        "The size of the given LSIF file (100 bytes) exceeds the max of 64"
    );
    assert_eq!(std::fs::read_dir(dir.path().join("tmp")).unwrap().count(), 0);
}

#[tokio::test]
async fn compressed_uploads_may_not_inflate_past_the_limit() {
    let dir = TempDir::new().unwrap();
    let compressed = gzip(REPO_A.as_bytes()).unwrap();
    let mut settings = settings_for(&dir);
    settings.storage.max_upload_bytes = compressed.len() as u64 + 16;
    assert!(REPO_A.len() as u64 > settings.storage.max_upload_bytes);
    let server = test_server(settings).await;

    let resp = server
        .post("/upload")
        .add_query_param("repository", "a")
        .add_query_param("commit", COMMIT_A)
        .bytes(Bytes::from(compressed))
        .await;
    resp.assert_status_bad_request();
    let body: Value = resp.json();
    assert!(body["error"].as_str().unwrap().contains("decompressed"));
    assert!(stored_files(dir.path()).is_empty());
}

#[tokio::test]
async fn storage_faults_are_server_errors() {
    let dir = TempDir::new().unwrap();
    let server = test_server(settings_for(&dir)).await;
    std::fs::remove_dir_all(dir.path().join("tmp")).unwrap();

    let resp = upload(&server, "a", COMMIT_A, REPO_A).await;
    assert_eq!(resp.status_code(), 500);
    let body: Value = resp.json();
    assert_eq!(body["status"], 500);
    assert!(stored_files(dir.path()).is_empty());
}

#[tokio::test]
async fn exists_reports_databases_and_documents() {
    let (_dir, server) = populated().await;
    let exists = |repository: &'static str, commit: &'static str, file: Option<&'static str>| {
        let mut req = server
            .post("/exists")
            .add_query_param("repository", repository)
            .add_query_param("commit", commit);
        if let Some(file) = file {
            req = req.add_query_param("file", file);
        }
        req
    };

    assert_eq!(exists("a", COMMIT_A, None).await.json::<bool>(), true);
    assert_eq!(exists("a", COMMIT_A, Some("src/index.ts")).await.json::<bool>(), true);
    assert_eq!(exists("a", COMMIT_A, Some("src/missing.ts")).await.json::<bool>(), false);
    assert_eq!(exists("c", COMMIT_A, None).await.json::<bool>(), false);
    assert_eq!(exists("c", COMMIT_A, Some("src/index.ts")).await.json::<bool>(), false);
    exists("a", "abc", None).await.assert_status_bad_request();
}

#[tokio::test]
async fn local_queries_round_trip() {
    let (_dir, server) = populated().await;

    let resp = request(&server, "a", COMMIT_A, query("definitions", "src/index.ts", 0, 2)).await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(
        body,
        json!([{
            "uri": "src/index.ts",
            "range": {
                "start": { "line": 2, "character": 0 },
                "end": { "line": 2, "character": 5 }
            }
        }])
    );

    let hover: Value = request(&server, "a", COMMIT_A, query("hover", "src/index.ts", 0, 2))
        .await
        .json();
    assert_eq!(hover["contents"][0]["value"], "const foo: number");

    let missing: Value = request(&server, "a", COMMIT_A, query("definitions", "src/index.ts", 999, 0))
        .await
        .json();
    assert_eq!(missing, Value::Null);
}

#[tokio::test]
async fn monikers_resolve_across_repositories() {
    let (_dir, server) = populated().await;

    let definition: Value = request(&server, "a", COMMIT_A, query("definitions", "src/index.ts", 4, 1))
        .await
        .json();
    assert!(definition.is_object());
    assert_eq!(
        definition["uri"],
        format!("git://b?{}#lib/util.ts", COMMIT_B)
    );
    assert_eq!(definition["range"]["start"], json!({ "line": 0, "character": 16 }));

    let references: Value = request(&server, "a", COMMIT_A, query("references", "src/index.ts", 0, 1))
        .await
        .json();
    let uris: Vec<&str> = references
        .as_array()
        .unwrap()
        .iter()
        .map(|l| l["uri"].as_str().unwrap())
        .collect();
    let remote = format!("git://b?{}#lib/util.ts", COMMIT_B);
    assert_eq!(uris, vec!["src/index.ts", "src/index.ts", remote.as_str()]);
}

#[tokio::test]
async fn request_errors_map_to_statuses() {
    let (_dir, server) = populated().await;

    let resp = request(&server, "a", COMMIT_A, query("implementation", "src/index.ts", 0, 0)).await;
    assert_eq!(resp.status_code(), 422);
    let body: Value = resp.json();
    assert_eq!(
        body["error"],
        "Method must be one of hover, definitions, references"
    );

    let resp = request(&server, "nowhere", COMMIT_A, query("hover", "src/index.ts", 0, 0)).await;
    resp.assert_status_not_found();
    let body: Value = resp.json();
    assert_eq!(
        body["error"],
        format!("No LSIF data available for nowhere@{}.", COMMIT_A)
    );

    request(&server, "a", COMMIT_A, query("hover", "src/missing.ts", 0, 0))
        .await
        .assert_status_not_found();

    request(&server, "a", "ABC", query("hover", "src/index.ts", 0, 0))
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn reupload_replaces_cached_data() {
    let (_dir, server) = populated().await;
    let before: Value = request(&server, "a", COMMIT_A, query("hover", "src/index.ts", 0, 2))
        .await
        .json();

    // the same commit now holds repository b's dump
    upload(&server, "a", COMMIT_A, REPO_B).await.assert_status_ok();
    let gone: Value = request(&server, "a", COMMIT_A, query("hover", "src/index.ts", 0, 2))
        .await
        .json();
    assert_ne!(before, gone);
    request(&server, "a", COMMIT_A, query("definitions", "lib/util.ts", 0, 17))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn sqlite_encodings_serve_queries_without_the_raw_dump() {
    let dir = TempDir::new().unwrap();
    let mut settings = settings_for(&dir);
    settings.backends.json = false;
    let server = test_server(settings).await;
    upload(&server, "a", COMMIT_A, REPO_A).await.assert_status_ok();

    assert_eq!(
        stored_files(dir.path()),
        vec![
            format!("a@{}.blob.db", COMMIT_A),
            format!("a@{}.graph.db", COMMIT_A),
        ]
    );
    let body: Value = request(&server, "a", COMMIT_A, query("definitions", "src/index.ts", 6, 1))
        .await
        .json();
    assert_eq!(body[0]["uri"], "src/other.ts");
}

struct FailingConverter;

#[async_trait]
impl Converter for FailingConverter {
    async fn convert(&self, _input: &Path, output: &Path, _kind: BackendKind) -> lsif_core::Result<()> {
        std::fs::write(output, b"partial").unwrap();
        Err(LsifError::Conversion("converter crashed".into()))
    }
}

#[tokio::test]
async fn failed_conversion_leaves_storage_untouched() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("tmp")).unwrap();
    let state = AppState::with_parts(
        settings_for(&dir),
        Arc::new(SqliteCrossRepoIndex::in_memory().unwrap()),
        Arc::new(FailingConverter),
    )
    .unwrap();
    let server = TestServer::new(create_router(state)).unwrap();

    let resp = upload(&server, "a", COMMIT_A, REPO_A).await;
    assert_eq!(resp.status_code(), 500);
    assert!(stored_files(dir.path()).is_empty());
    assert_eq!(std::fs::read_dir(dir.path().join("tmp")).unwrap().count(), 0);
}

#[tokio::test]
async fn metrics_report_uploads_queries_and_caches() {
    let (_dir, server) = populated().await;
    upload(&server, "a", "nope", REPO_A)
        .await
        .assert_status_bad_request();
    request(&server, "a", COMMIT_A, query("hover", "src/index.ts", 0, 2))
        .await
        .assert_status_ok();
    request(&server, "nowhere", COMMIT_A, query("hover", "src/index.ts", 0, 2))
        .await
        .assert_status_not_found();

    let resp = server.get("/metrics").await;
    resp.assert_status_ok();
    let content_type = resp.header(CONTENT_TYPE);
    assert!(content_type.to_str().unwrap().starts_with("text/plain"));

    let text = resp.text();
    for line in [
        "lsif_uploads_total 2",
        "lsif_failed_uploads_total 1",
        "lsif_queries_total{method=\"hover\",outcome=\"ok\"} 1",
        "lsif_queries_total{method=\"hover\",outcome=\"error\"} 1",
        "lsif_cache_entries{cache=\"database\"} 1",
        "lsif_cache_entries{cache=\"document\"} 1",
    ] {
        assert!(text.lines().any(|l| l == line), "missing {:?} in\n{}", line, text);
    }
}

//! Unit tests for the `fs/*` request handlers.

use serde_json::{json, Value};

use gemini_acp::acp::fs_proxy::{FsProxy, MISSING_PATH};
use gemini_acp::acp::message::INTERNAL_ERROR;

#[tokio::test]
async fn read_returns_file_content() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, "hello\nworld\n").expect("seed file");
    let proxy = FsProxy::new(dir.path());

    let resp = proxy
        .read_text_file(&json!({"path": path.to_string_lossy()}))
        .await
        .expect("read must succeed");

    assert_eq!(resp.content, "hello\nworld\n");
}

#[tokio::test]
async fn read_honours_line_window() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::write(dir.path().join("a.txt"), "1\n2\n3\n4\n").expect("seed file");
    let proxy = FsProxy::new(dir.path());

    let resp = proxy
        .read_text_file(&json!({"path": "a.txt", "line": 3, "limit": 5}))
        .await
        .expect("read must succeed");

    assert_eq!(resp.content, "3\n4\n");
}

#[tokio::test]
async fn relative_paths_resolve_against_base() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir(dir.path().join("src")).expect("mkdir");
    std::fs::write(dir.path().join("src/lib.rs"), "// lib").expect("seed file");
    let proxy = FsProxy::new(dir.path());

    let resp = proxy
        .read_text_file(&json!({"path": "src/lib.rs"}))
        .await
        .expect("read must succeed");

    assert_eq!(resp.content, "// lib");
}

#[tokio::test]
async fn read_of_missing_file_is_internal_error_with_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let proxy = FsProxy::new(dir.path());

    let err = proxy
        .read_text_file(&json!({"path": "/definitely/not/here.txt"}))
        .await
        .expect_err("missing file must fail");

    assert_eq!(err.code, INTERNAL_ERROR);
    assert!(
        err.message.contains("/definitely/not/here.txt"),
        "message must name the path: {}",
        err.message
    );
}

#[tokio::test]
async fn missing_path_is_reported() {
    let proxy = FsProxy::new(".");

    for params in [json!({}), Value::Null, json!({"path": ""})] {
        let err = proxy.read_text_file(&params).await.expect_err("must fail");
        assert_eq!(err.message, MISSING_PATH);

        let err = proxy.write_text_file(&params).await.expect_err("must fail");
        assert_eq!(err.message, MISSING_PATH);
    }
}

#[tokio::test]
async fn write_creates_parent_directories() {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = dir.path().join("deep/nested/out.txt");
    let proxy = FsProxy::new(dir.path());

    let resp = proxy
        .write_text_file(&json!({"path": target.to_string_lossy(), "content": "abc"}))
        .await
        .expect("write must succeed");

    assert!(resp.success);
    assert_eq!(std::fs::read_to_string(&target).expect("read back"), "abc");
}

#[tokio::test]
async fn write_replaces_existing_content() {
    let dir = tempfile::tempdir().expect("tempdir");
    let target = dir.path().join("f.txt");
    std::fs::write(&target, "old content that is longer").expect("seed");
    let proxy = FsProxy::new(dir.path());

    proxy
        .write_text_file(&json!({"path": "f.txt", "content": "new"}))
        .await
        .expect("write must succeed");

    assert_eq!(std::fs::read_to_string(&target).expect("read back"), "new");
}

#[tokio::test]
async fn write_then_read_round_trips() {
    let dir = tempfile::tempdir().expect("tempdir");
    let proxy = FsProxy::new(dir.path());

    proxy
        .write_text_file(&json!({"path": "x/y.txt", "content": "payload\n"}))
        .await
        .expect("write");
    let resp = proxy
        .read_text_file(&json!({"path": "x/y.txt"}))
        .await
        .expect("read");

    assert_eq!(resp.content, "payload\n");
}

//! Tests for the assembler API and batched extraction.

#![cfg(feature = "server")]

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use common::{create_temp_dir, create_test_file, TestRemote};
use nas_sync_core::archive::Archiver;
use nas_sync_core::client::ProxyClient;
use nas_sync_core::digest::digest_bytes;
use nas_sync_core::protocol::{Operation, VersionInfo};
use nas_sync_core::server::{router, AssemblerConfig, RemoteAssembler};
use nas_sync_core::sync::UnzipBatcher;

#[tokio::test]
async fn test_unzip_bisects_down_to_the_bad_entry() {
    let remote = TestRemote::new();
    let source_dir = create_temp_dir();
    let tree = source_dir.path().join("flat");
    for i in 0..10 {
        create_test_file(&tree, &format!("f{i:02}.txt"), format!("file {i}").as_bytes());
    }
    let workspace = create_temp_dir();
    let payload = Archiver::pack(&tree, workspace.path()).await.expect("pack");
    assert_eq!(payload.entries.len(), 10);

    let mut entries = payload.entries.clone();
    entries.insert(5, "missing.txt".to_string());

    let transport = remote.scripted();
    let client = ProxyClient::new(transport.clone());
    let dest = remote.volume.join("flat");
    let report = UnzipBatcher::new(&client, 4, 2)
        .run(
            &payload.path.display().to_string(),
            &dest.display().to_string(),
            &entries,
        )
        .await;

    assert_eq!(report.extracted.len(), 10);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].entry, "missing.txt");
    assert!(!report.is_complete());
    // three batches, then {f04, missing} + {f05, f06}, then {f04} + {missing}
    assert_eq!(report.requests, 7);
    assert_eq!(transport.calls(Operation::UnzipBatch), 7);

    for i in 0..10 {
        assert_eq!(
            std::fs::read_to_string(dest.join(format!("f{i:02}.txt"))).expect("read"),
            format!("file {i}")
        );
    }
}

#[tokio::test]
async fn test_system_unzip_bisects_down_to_the_bad_entry() {
    let Some(remote) = TestRemote::with_system_unzip() else {
        return;
    };
    let source_dir = create_temp_dir();
    let tree = source_dir.path().join("routes");
    for i in 0..6 {
        create_test_file(
            &tree,
            &format!("page [{i}]*.js"),
            format!("route {i}").as_bytes(),
        );
    }
    let workspace = create_temp_dir();
    let payload = Archiver::pack(&tree, workspace.path()).await.expect("pack");

    let mut entries = payload.entries.clone();
    entries.insert(3, "gone [x].js".to_string());

    let client = ProxyClient::new(remote.transport());
    let dest = remote.volume.join("routes");
    let report = UnzipBatcher::new(&client, 4, 2)
        .run(
            &payload.path.display().to_string(),
            &dest.display().to_string(),
            &entries,
        )
        .await;

    assert_eq!(report.extracted.len(), 6);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].entry, "gone [x].js");
    for i in 0..6 {
        assert_eq!(
            std::fs::read_to_string(dest.join(format!("page [{i}]*.js"))).expect("read"),
            format!("route {i}")
        );
    }
}

#[tokio::test]
async fn test_system_unzip_respects_no_overwrite() {
    let Some(remote) = TestRemote::with_system_unzip() else {
        return;
    };
    let source_dir = create_temp_dir();
    let tree = source_dir.path().join("site");
    create_test_file(&tree, "[kept].txt", b"from archive");
    create_test_file(&tree, "new.txt", b"from archive");
    let workspace = create_temp_dir();
    let payload = Archiver::pack(&tree, workspace.path()).await.expect("pack");

    let dest = remote.volume.join("site");
    create_test_file(&dest, "[kept].txt", b"already there");

    let client = ProxyClient::new(remote.transport());
    let report = UnzipBatcher::new(&client, 10, 1)
        .overwrite(false)
        .run(
            &payload.path.display().to_string(),
            &dest.display().to_string(),
            &payload.entries,
        )
        .await;

    assert!(report.is_complete());
    assert_eq!(
        std::fs::read(dest.join("[kept].txt")).expect("read"),
        b"already there"
    );
    assert_eq!(std::fs::read(dest.join("new.txt")).expect("read"), b"from archive");
}

#[tokio::test]
async fn test_unzip_keeps_existing_files_without_overwrite() {
    let remote = TestRemote::new();
    let source_dir = create_temp_dir();
    let tree = source_dir.path().join("site");
    create_test_file(&tree, "a.txt", b"from archive");
    create_test_file(&tree, "b.txt", b"from archive");
    let workspace = create_temp_dir();
    let payload = Archiver::pack(&tree, workspace.path()).await.expect("pack");

    let dest = remote.volume.join("site");
    create_test_file(&dest, "a.txt", b"already there");

    let client = ProxyClient::new(remote.transport());
    let report = UnzipBatcher::new(&client, 10, 1)
        .overwrite(false)
        .run(
            &payload.path.display().to_string(),
            &dest.display().to_string(),
            &payload.entries,
        )
        .await;

    assert!(report.is_complete());
    assert_eq!(
        std::fs::read(dest.join("a.txt")).expect("read"),
        b"already there"
    );
    assert_eq!(std::fs::read(dest.join("b.txt")).expect("read"), b"from archive");
}

fn small_router(temp_root: &std::path::Path, limit: usize) -> axum::Router {
    router(
        Arc::new(RemoteAssembler::new(AssemblerConfig::new(temp_root))),
        limit,
    )
}

#[tokio::test]
async fn test_oversized_chunk_rejected() {
    let temp = create_temp_dir();
    let app = small_router(&temp.path().join("tmp"), 1024);
    let digest = digest_bytes(b"x");

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!(
                    "/session/chunk?temp_dir={}/tmp/{digest}&chunk_name=a.part-0&digest={digest}",
                    temp.path().display()
                ))
                .body(Body::from(vec![0u8; 4096]))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_chunk_for_unknown_session_is_not_found() {
    let temp = create_temp_dir();
    let app = small_router(&temp.path().join("tmp"), 1024);
    let digest = digest_bytes(b"never negotiated");

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!(
                    "/session/chunk?temp_dir={}/tmp/{digest}&chunk_name=a.part-0&digest={digest}",
                    temp.path().display()
                ))
                .body(Body::from(b"abc".to_vec()))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let json: serde_json::Value = serde_json::from_slice(&body).expect("json");
    assert_eq!(json["code"], "E101");
}

#[tokio::test]
async fn test_session_outside_temp_root_is_rejected() {
    let temp = create_temp_dir();
    let app = small_router(&temp.path().join("tmp"), 1024);
    let digest = digest_bytes(b"x");

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(format!(
                    "/clean?temp_dir={}/elsewhere/{digest}",
                    temp.path().display()
                ))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_relative_destination_is_rejected() {
    let temp = create_temp_dir();
    let app = small_router(&temp.path().join("tmp"), 1024);
    let digest = digest_bytes(b"x");

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/session/negotiate?dst_path=relative/path&digest={digest}&file_name=a.txt&is_dir=false&trailing_slash=false"
                ))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_version_endpoint() {
    let remote = TestRemote::new();
    let client = ProxyClient::new(remote.transport());

    let info: VersionInfo = client.version().await.expect("version");
    assert_eq!(info.protocol, nas_sync_core::PROTOCOL_VERSION);

    let status = client.check_version().await.expect("check");
    assert!(status.compatible);
}

//! Common test utilities for `nas-sync` integration tests.
//!
//! Sync sessions run against the real assembler router, served in-process:
//! [`LocalTransport`] hands each request straight to the axum `Router`, and
//! [`ScriptedTransport`] wraps it to count calls and inject failures.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use axum::Router;
use tower::ServiceExt;

use nas_sync_core::config::ExtractBackend;
use nas_sync_core::protocol::{Method, Operation};
use nas_sync_core::server::{router, AssemblerConfig, RemoteAssembler};
use nas_sync_core::sync::SyncOptions;
use nas_sync_core::transport::{Transport, TransportRequest, TransportResponse};
use nas_sync_core::{Error, Result};

/// Create a temporary directory for test files.
///
/// The directory will be automatically cleaned up when the returned
/// `TempDir` is dropped.
pub fn create_temp_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Create a test file with the given content.
pub fn create_test_file(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directories");
    }
    std::fs::write(&path, content).expect("Failed to write test file");
    path
}

/// Create a small site tree with nested files.
pub fn create_test_directory(base: &Path, name: &str) -> PathBuf {
    let dir = base.join(name);
    std::fs::create_dir_all(&dir).expect("Failed to create test directory");

    create_test_file(&dir, "index.html", b"<h1>nas-sync</h1>");
    create_test_file(&dir, "assets/app.js", b"console.log('synced');");
    create_test_file(&dir, "assets/img/logo.bin", &random_bytes(40 * 1024));

    dir
}

/// Generate random bytes for testing.
pub fn random_bytes(size: usize) -> Vec<u8> {
    use rand::RngCore;
    let mut bytes = vec![0u8; size];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// Assert that two files have identical content.
pub fn assert_files_equal(path1: &Path, path2: &Path) {
    let content1 = std::fs::read(path1).expect("Failed to read first file");
    let content2 = std::fs::read(path2).expect("Failed to read second file");
    assert_eq!(content1, content2, "File contents differ");
}

/// Number of entries directly under `dir` (0 if it does not exist).
pub fn count_entries(dir: &Path) -> usize {
    std::fs::read_dir(dir).map_or(0, Iterator::count)
}

/// An assembler with its own temp root and NAS volume.
pub struct TestRemote {
    /// Keeps everything alive
    pub temp: tempfile::TempDir,
    /// Session root
    pub temp_root: PathBuf,
    /// Stand-in for the mounted volume
    pub volume: PathBuf,
    /// Local workspace parent for sync sessions
    pub local_tmp: PathBuf,
    /// Assembler router
    pub router: Router,
}

impl TestRemote {
    /// Fresh assembler using the built-in extractor.
    pub fn new() -> Self {
        Self::with_backend(ExtractBackend::Builtin)
    }

    /// Fresh assembler running the system `unzip`, or `None` when it is not
    /// installed.
    pub fn with_system_unzip() -> Option<Self> {
        let installed = std::process::Command::new("unzip")
            .arg("-v")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .is_ok_and(|status| status.success());
        if !installed {
            eprintln!("unzip not found on PATH, skipping");
            return None;
        }
        Some(Self::with_backend(ExtractBackend::Unzip))
    }

    /// Fresh assembler using `backend` for extraction.
    pub fn with_backend(backend: ExtractBackend) -> Self {
        let temp = create_temp_dir();
        let temp_root = temp.path().join("assembler");
        let volume = temp.path().join("volume");
        let local_tmp = temp.path().join("local-tmp");
        std::fs::create_dir_all(&volume).expect("create volume");
        std::fs::create_dir_all(&local_tmp).expect("create local tmp");

        let assembler = RemoteAssembler::new(
            AssemblerConfig::new(&temp_root).with_backend(backend),
        );
        let router = router(Arc::new(assembler), 16 * 1024 * 1024);

        Self {
            temp,
            temp_root,
            volume,
            local_tmp,
            router,
        }
    }

    /// Transport straight into the router.
    pub fn transport(&self) -> LocalTransport {
        LocalTransport {
            router: self.router.clone(),
        }
    }

    /// Transport that records and can tamper with calls.
    pub fn scripted(&self) -> ScriptedTransport {
        ScriptedTransport::new(self.transport())
    }

    /// Sync options with small chunks and batches.
    pub fn options(&self, chunk_size: usize) -> SyncOptions {
        SyncOptions {
            chunk_size,
            parallel_uploads: 3,
            unzip_batch_size: 2,
            overwrite: true,
            check_version: true,
            local_temp_dir: Some(self.local_tmp.clone()),
        }
    }

    /// Remote path string under the volume.
    pub fn remote(&self, relative: &str) -> String {
        if relative.is_empty() {
            return self.volume.display().to_string();
        }
        format!("{}/{relative}", self.volume.display())
    }
}

/// [`Transport`] that serves requests with the in-process router.
#[derive(Clone)]
pub struct LocalTransport {
    router: Router,
}

impl Transport for LocalTransport {
    fn request(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse>> + Send {
        let router = self.router.clone();

        async move {
            let mut url = reqwest::Url::parse("http://assembler.test")
                .map_err(|e| Error::Internal(e.to_string()))?;
            url.set_path(&request.path);
            if !request.query.is_empty() {
                let mut pairs = url.query_pairs_mut();
                for (key, value) in &request.query {
                    pairs.append_pair(key, value);
                }
            }
            let uri = match url.query() {
                Some(query) => format!("{}?{query}", url.path()),
                None => url.path().to_string(),
            };

            let mut builder = Request::builder()
                .method(match request.method {
                    Method::Get => "GET",
                    Method::Post => "POST",
                })
                .uri(uri);
            for (name, value) in &request.headers {
                builder = builder.header(name.as_str(), value.as_str());
            }
            let http_request = builder
                .body(Body::from(request.body.unwrap_or_default()))
                .map_err(|e| Error::Internal(e.to_string()))?;

            let response = router
                .oneshot(http_request)
                .await
                .map_err(|e| Error::Transport(e.to_string()))?;
            let status = response.status().as_u16();
            let data = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .map_err(|e| Error::Transport(e.to_string()))?
                .to_vec();

            Ok(TransportResponse { status, data })
        }
    }
}

/// Wraps a [`LocalTransport`], counting calls per route and injecting faults.
#[derive(Clone)]
pub struct ScriptedTransport {
    inner: LocalTransport,
    state: Arc<ScriptState>,
}

#[derive(Default)]
struct ScriptState {
    calls: Mutex<HashMap<String, usize>>,
    chunk_in_flight: AtomicUsize,
    chunk_peak: AtomicUsize,
    chunk_delay: Mutex<Option<Duration>>,
    fail_route: Mutex<Option<String>>,
    corrupt_chunk_attempts: AtomicUsize,
    corrupt_merge: Mutex<bool>,
    corrupt_stored_chunk: Mutex<Option<u64>>,
}

impl ScriptedTransport {
    fn new(inner: LocalTransport) -> Self {
        Self {
            inner,
            state: Arc::new(ScriptState::default()),
        }
    }

    /// Calls made to an operation's route.
    pub fn calls(&self, operation: Operation) -> usize {
        self.state
            .calls
            .lock()
            .expect("calls lock")
            .get(operation.path())
            .copied()
            .unwrap_or(0)
    }

    /// Most chunk uploads observed in flight at once.
    pub fn peak_chunk_uploads(&self) -> usize {
        self.state.chunk_peak.load(Ordering::SeqCst)
    }

    /// Hold every chunk upload for `delay`.
    pub fn delay_chunks(&self, delay: Duration) {
        *self.state.chunk_delay.lock().expect("delay lock") = Some(delay);
    }

    /// Answer every call to `operation` with a 500.
    pub fn fail(&self, operation: Operation) {
        *self.state.fail_route.lock().expect("fail lock") = Some(operation.path().to_string());
    }

    /// Flip a byte in the next `attempts` chunk bodies.
    pub fn corrupt_chunks(&self, attempts: usize) {
        self.state
            .corrupt_chunk_attempts
            .store(attempts, Ordering::SeqCst);
    }

    /// Send a wrong payload digest with the merge request.
    pub fn corrupt_merge(&self) {
        *self.state.corrupt_merge.lock().expect("merge lock") = true;
    }

    /// Flip a byte of the stored chunk `index` just before the merge runs.
    pub fn corrupt_stored_chunk(&self, index: u64) {
        *self.state.corrupt_stored_chunk.lock().expect("stored chunk lock") = Some(index);
    }

    fn tamper(&self, mut request: TransportRequest) -> TransportRequest {
        if request.path == Operation::UploadChunk.path() {
            let corrupt = self
                .state
                .corrupt_chunk_attempts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if corrupt {
                if let Some(byte) = request.body.as_mut().and_then(|b| b.first_mut()) {
                    *byte ^= 0xff;
                }
            }
        }

        if request.path == Operation::Merge.path()
            && *self.state.corrupt_merge.lock().expect("merge lock")
        {
            for (key, value) in &mut request.query {
                if key == "digest" {
                    *value = nas_sync_core::digest::digest_bytes(b"not the payload");
                }
            }
        }

        let stored = *self.state.corrupt_stored_chunk.lock().expect("stored chunk lock");
        if let (true, Some(index)) = (request.path == Operation::Merge.path(), stored) {
            let param = |name: &str| {
                request
                    .query
                    .iter()
                    .find(|(key, _)| key == name)
                    .map(|(_, value)| value.clone())
                    .expect("merge query parameter")
            };
            let chunk = Path::new(&param("temp_dir"))
                .join(format!("{}.part-{index}", param("file_name")));
            let mut bytes = std::fs::read(&chunk).expect("read stored chunk");
            bytes[0] ^= 0xff;
            std::fs::write(&chunk, bytes).expect("write stored chunk");
        }

        request
    }
}

impl Transport for ScriptedTransport {
    fn request(
        &self,
        request: TransportRequest,
    ) -> impl Future<Output = Result<TransportResponse>> + Send {
        let this = self.clone();

        async move {
            *this
                .state
                .calls
                .lock()
                .expect("calls lock")
                .entry(request.path.clone())
                .or_default() += 1;

            let failing = this.state.fail_route.lock().expect("fail lock").clone();
            if failing.as_deref() == Some(request.path.as_str()) {
                return Ok(TransportResponse {
                    status: 500,
                    data: br#"{"message":"injected failure"}"#.to_vec(),
                });
            }

            let is_chunk = request.path == Operation::UploadChunk.path();
            let request = this.tamper(request);

            if !is_chunk {
                return this.inner.request(request).await;
            }

            let now = this.state.chunk_in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            this.state.chunk_peak.fetch_max(now, Ordering::SeqCst);

            let delay = *this.state.chunk_delay.lock().expect("delay lock");
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let response = this.inner.request(request).await;

            this.state.chunk_in_flight.fetch_sub(1, Ordering::SeqCst);
            response
        }
    }
}

//! End-to-end runs of the agent against a local HTTP responder.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::{tempdir, TempDir};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use updater::{
    Agent, ContentHasher, DigestAlgorithm, FailureClass, HttpReleaseSource, HttpRestartSignaler,
    RunReport, Stage, Url, VerifiedInstaller,
};

const TIMEOUT: Duration = Duration::from_secs(5);
const SHUTDOWN: &str = "/api/service/shutdown";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Recorded {
    method: String,
    path: String,
    body: Vec<u8>,
}

type Routes = Arc<Mutex<HashMap<String, (u16, Vec<u8>)>>>;
type Stalled = Arc<Mutex<HashSet<String>>>;

/// Serves canned responses keyed by request path and records every request.
struct Responder {
    addr: SocketAddr,
    routes: Routes,
    stalled: Stalled,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl Responder {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes: Routes = Arc::default();
        let stalled: Stalled = Arc::default();
        let requests = Arc::new(Mutex::new(Vec::new()));

        let (table, hang, recorded) = (routes.clone(), stalled.clone(), requests.clone());
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (table, hang, recorded) = (table.clone(), hang.clone(), recorded.clone());
                tokio::spawn(async move {
                    let _ = serve(stream, &table, &hang, &recorded).await;
                });
            }
        });

        Self {
            addr,
            routes,
            stalled,
            requests,
        }
    }

    fn route(&self, path: &str, status: u16, body: impl Into<Vec<u8>>) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body.into()));
    }

    /// Send the body of `path` partially, then stop sending without closing.
    fn stall(&self, path: &str) {
        self.stalled.lock().unwrap().insert(path.to_string());
    }

    /// Publish a manifest announcing `digest`, linking to `/new` on this responder.
    fn publish(&self, digest: &str, payload: &[u8]) {
        let body = serde_json::json!({ "md5": digest, "link": self.url("/new").as_str() });
        self.route("/manifest", 200, serde_json::to_vec(&body).unwrap());
        self.route("/new", 200, payload);
        self.route(SHUTDOWN, 200, "ok");
    }

    fn url(&self, path: &str) -> Url {
        Url::parse(&format!("http://{}{}", self.addr, path)).unwrap()
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    fn paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.path).collect()
    }
}

async fn serve(
    stream: TcpStream,
    routes: &Routes,
    stalled: &Stalled,
    recorded: &Mutex<Vec<Recorded>>,
) -> std::io::Result<()> {
    let mut reader = BufReader::new(stream);

    let mut request_line = String::new();
    reader.read_line(&mut request_line).await?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().unwrap_or(0);
            }
        }
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await?;
    recorded.lock().unwrap().push(Recorded {
        method,
        path: path.clone(),
        body,
    });

    let (status, payload) = routes
        .lock()
        .unwrap()
        .get(&path)
        .cloned()
        .unwrap_or((404, b"not found".to_vec()));
    let stall = stalled.lock().unwrap().contains(&path);
    let announced = if stall { payload.len() + 1024 } else { payload.len() };
    let head = format!(
        "HTTP/1.1 {status} Canned\r\nContent-Length: {announced}\r\nConnection: close\r\n\r\n"
    );

    let mut stream = reader.into_inner();
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(&payload).await?;
    stream.flush().await?;
    if stall {
        tokio::time::sleep(Duration::from_secs(30)).await;
    }
    stream.shutdown().await
}

fn md5(bytes: &[u8]) -> String {
    DigestAlgorithm::Md5.digest_bytes(bytes).to_string()
}

fn live_binary(bytes: &[u8]) -> (TempDir, PathBuf) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("service");
    fs::write(&path, bytes).unwrap();
    (dir, path)
}

fn agent_for(
    manifest_url: Url,
    restart_url: Url,
    binary: &Path,
    staging: &Path,
) -> Agent<HttpReleaseSource, HttpRestartSignaler> {
    agent_with_timeout(manifest_url, restart_url, binary, staging, TIMEOUT)
}

fn agent_with_timeout(
    manifest_url: Url,
    restart_url: Url,
    binary: &Path,
    staging: &Path,
    timeout: Duration,
) -> Agent<HttpReleaseSource, HttpRestartSignaler> {
    let source = HttpReleaseSource::builder()
        .endpoint(manifest_url)
        .timeout(timeout)
        .build()
        .unwrap();
    let signaler = HttpRestartSignaler::new(restart_url, timeout).unwrap();
    let installer =
        VerifiedInstaller::new(source, ContentHasher::default(), binary, staging).unwrap();
    Agent::new(installer, signaler)
}

fn agent(server: &Responder, binary: &Path, staging: &Path) -> Agent<HttpReleaseSource, HttpRestartSignaler> {
    agent_for(server.url("/manifest"), server.url(SHUTDOWN), binary, staging)
}

#[tokio::test]
async fn up_to_date_binary_is_left_alone() {
    let (dir, path) = live_binary(b"aaa");
    let server = Responder::start().await;
    server.publish(&md5(b"aaa"), b"aaa");

    let report = agent(&server, &path, dir.path()).run().await.unwrap();

    assert!(matches!(report, RunReport::UpToDate { .. }));
    assert_eq!(fs::read(&path).unwrap(), b"aaa");
    assert_eq!(server.paths(), vec!["/manifest".to_string()]);
}

#[tokio::test]
async fn new_release_is_installed_and_restart_posted() {
    let (dir, path) = live_binary(b"aaa");
    let server = Responder::start().await;
    server.publish(&md5(b"bbb"), b"bbb");

    let report = agent(&server, &path, dir.path()).run().await.unwrap();

    match report {
        RunReport::Updated { installed, .. } => assert_eq!(installed.to_string(), md5(b"bbb")),
        other => panic!("expected update, got {other:?}"),
    }
    assert_eq!(fs::read(&path).unwrap(), b"bbb");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    assert_eq!(server.paths(), vec!["/manifest", "/new", SHUTDOWN]);
    let restart = server.requests().pop().unwrap();
    assert_eq!(restart.method, "POST");
    assert_eq!(restart.body, b"ack");
}

#[tokio::test]
async fn corrupted_download_is_rejected() {
    let (dir, path) = live_binary(b"aaa");
    let server = Responder::start().await;
    server.publish(&md5(b"bbb"), b"ccc");

    let err = agent(&server, &path, dir.path()).run().await.unwrap_err();

    assert_eq!(err.stage, Stage::ReVerify);
    assert_eq!(err.class(), FailureClass::Integrity);
    assert_eq!(fs::read(&path).unwrap(), b"aaa");
    assert!(!server.paths().iter().any(|p| p == SHUTDOWN));
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[tokio::test]
async fn manifest_server_error_aborts_before_download() {
    let (dir, path) = live_binary(b"aaa");
    let server = Responder::start().await;
    server.route("/manifest", 500, "boom");

    let err = agent(&server, &path, dir.path()).run().await.unwrap_err();

    assert_eq!(err.stage, Stage::FetchManifest);
    assert_eq!(err.class(), FailureClass::Protocol);
    assert_eq!(fs::read(&path).unwrap(), b"aaa");
    assert_eq!(server.paths(), vec!["/manifest".to_string()]);
}

#[tokio::test]
async fn undecodable_manifest_is_protocol_failure() {
    let (dir, path) = live_binary(b"aaa");
    let server = Responder::start().await;
    server.route("/manifest", 200, "<html>maintenance</html>");

    let err = agent(&server, &path, dir.path()).run().await.unwrap_err();

    assert_eq!(err.stage, Stage::FetchManifest);
    assert_eq!(err.class(), FailureClass::Protocol);
}

#[tokio::test]
async fn unreachable_endpoint_is_network_failure() {
    let (dir, path) = live_binary(b"aaa");
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let manifest_url = Url::parse(&format!("http://{closed}/manifest")).unwrap();
    let restart_url = Url::parse(&format!("http://{closed}{SHUTDOWN}")).unwrap();

    let err = agent_for(manifest_url, restart_url, &path, dir.path())
        .run()
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::FetchManifest);
    assert_eq!(err.class(), FailureClass::Network);
    assert_eq!(fs::read(&path).unwrap(), b"aaa");
}

#[tokio::test]
async fn rejected_restart_is_reported() {
    let (dir, path) = live_binary(b"aaa");
    let server = Responder::start().await;
    server.publish(&md5(b"bbb"), b"bbb");
    server.route(SHUTDOWN, 500, "busy");

    let err = agent(&server, &path, dir.path()).run().await.unwrap_err();

    assert_eq!(err.stage, Stage::SignalRestart);
    assert_eq!(err.class(), FailureClass::Protocol);
    assert_eq!(fs::read(&path).unwrap(), b"bbb");
}

#[tokio::test]
async fn stalled_download_times_out_as_network_failure() {
    let (dir, path) = live_binary(b"aaa");
    let server = Responder::start().await;
    server.publish(&md5(b"bbb"), b"bb");
    server.stall("/new");

    let err = agent_with_timeout(
        server.url("/manifest"),
        server.url(SHUTDOWN),
        &path,
        dir.path(),
        Duration::from_secs(1),
    )
    .run()
    .await
    .unwrap_err();

    assert_eq!(err.stage, Stage::Download);
    assert_eq!(err.class(), FailureClass::Network);
    assert!(matches!(err.source, updater::UpdaterError::Timeout { .. }));
    assert_eq!(fs::read(&path).unwrap(), b"aaa");
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
    assert!(!server.paths().iter().any(|p| p == SHUTDOWN));
}

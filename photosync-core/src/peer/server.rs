//! Read-only peer transfer server: `GET /photo/{file_name}`.

use crate::paths::{is_partial_name, validate_segment};
use crate::{PhotoSyncError, Result};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

/// Peer server error mapped to an HTTP response.
#[derive(Debug)]
pub enum PeerError {
    NotFound(String),
}

impl IntoResponse for PeerError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(e) => (StatusCode::NOT_FOUND, e),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

#[derive(Clone)]
struct ServeState {
    base_dir: Arc<PathBuf>,
}

/// Router serving files that sit directly inside `base_dir`.
pub fn build_router(base_dir: PathBuf) -> Router {
    Router::new()
        .route("/photo/{file_name}", get(serve_photo))
        .layer(TraceLayer::new_for_http())
        .with_state(ServeState {
            base_dir: Arc::new(base_dir),
        })
}

async fn serve_photo(
    State(state): State<ServeState>,
    Path(file_name): Path<String>,
) -> std::result::Result<Response, PeerError> {
    if let Err(e) = validate_segment("file name", &file_name) {
        debug!("Rejected peer request: {}", e);
        return Err(PeerError::NotFound("Not Found".to_string()));
    }
    if is_partial_name(&file_name) {
        return Err(PeerError::NotFound("Not Found".to_string()));
    }

    let path = state.base_dir.join(&file_name);

    // Symlinks are not followed out of the base directory.
    let is_regular_file = tokio::fs::symlink_metadata(&path)
        .await
        .map(|meta| meta.is_file())
        .unwrap_or(false);
    if !is_regular_file {
        return Err(PeerError::NotFound("Not Found".to_string()));
    }

    let bytes = tokio::fs::read(&path)
        .await
        .map_err(|_| PeerError::NotFound("Not Found".to_string()))?;

    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], bytes).into_response())
}

/// Observable lifecycle of a [`PeerServer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Listening(SocketAddr),
}

struct Running {
    addr: SocketAddr,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

/// Peer transfer server bound to one address and one base directory.
pub struct PeerServer {
    listen_addr: String,
    base_dir: PathBuf,
    running: Mutex<Option<Running>>,
}

impl PeerServer {
    pub fn new(listen_addr: impl Into<String>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            listen_addr: listen_addr.into(),
            base_dir: base_dir.into(),
            running: Mutex::new(None),
        }
    }

    /// Bind and start accepting connections. Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr> {
        let mut running = self.running.lock().await;
        if let Some(current) = running.as_ref() {
            return Err(PhotoSyncError::InvalidState(format!(
                "peer server already listening on {}",
                current.addr
            )));
        }

        let listener = TcpListener::bind(&self.listen_addr).await?;
        let addr = listener.local_addr()?;
        let app = build_router(self.base_dir.clone());
        let (shutdown, signal) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = signal.await;
                })
                .await
        });

        info!("Peer server listening on {} serving {:?}", addr, self.base_dir);
        *running = Some(Running {
            addr,
            shutdown,
            task,
        });
        Ok(addr)
    }

    /// Close the listener and wait for in-flight responses. No-op when stopped.
    pub async fn stop(&self) -> Result<()> {
        let Some(running) = self.running.lock().await.take() else {
            return Ok(());
        };

        let _ = running.shutdown.send(());
        running
            .task
            .await
            .map_err(|e| PhotoSyncError::InvalidState(format!("peer server task failed: {}", e)))??;

        info!("Peer server on {} stopped", running.addr);
        Ok(())
    }

    pub async fn state(&self) -> ServerState {
        match self.running.lock().await.as_ref() {
            Some(running) => ServerState::Listening(running.addr),
            None => ServerState::Stopped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn http() -> reqwest::Client {
        reqwest::Client::builder().no_proxy().build().unwrap()
    }

    async fn get(url: String) -> reqwest::Result<reqwest::Response> {
        http().get(url).send().await
    }

    async fn serving(dir: &TempDir) -> (PeerServer, SocketAddr) {
        let server = PeerServer::new("127.0.0.1:0", dir.path());
        let addr = server.start().await.unwrap();
        (server, addr)
    }

    #[tokio::test]
    async fn serves_existing_file_as_binary() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("IMG_1.jpg"), b"jpeg-bytes").unwrap();
        let (server, addr) = serving(&dir).await;

        let resp = get(format!("http://{}/photo/IMG_1.jpg", addr))
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(
            resp.headers()[reqwest::header::CONTENT_TYPE],
            "application/octet-stream"
        );
        assert_eq!(resp.bytes().await.unwrap().as_ref(), b"jpeg-bytes");

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn missing_file_is_404() {
        let dir = TempDir::new().unwrap();
        let (server, addr) = serving(&dir).await;

        let resp = get(format!("http://{}/photo/IMG_9.jpg", addr))
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn traversal_attempts_are_404() {
        let outer = TempDir::new().unwrap();
        let base = outer.path().join("base");
        std::fs::create_dir(&base).unwrap();
        std::fs::write(outer.path().join("secret.txt"), b"secret").unwrap();
        let server = PeerServer::new("127.0.0.1:0", &base);
        let addr = server.start().await.unwrap();

        for path in [
            "/photo/../../etc/passwd",
            "/photo/..%2Fsecret.txt",
            "/photo/..%5Csecret.txt",
            "/photo/..",
            "/photo/sub/secret.txt",
        ] {
            let resp = get(format!("http://{}{}", addr, path)).await.unwrap();
            assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND, "{}", path);
        }

        let untouched: Vec<_> = std::fs::read_dir(&base).unwrap().collect();
        assert!(untouched.is_empty());

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn partial_files_are_not_served() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".IMG_1.jpg.abc.partial"), b"half").unwrap();
        let (server, addr) = serving(&dir).await;

        let resp = get(format!("http://{}/photo/.IMG_1.jpg.abc.partial", addr))
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn state_machine_transitions() {
        let dir = TempDir::new().unwrap();
        let server = PeerServer::new("127.0.0.1:0", dir.path());
        assert_eq!(server.state().await, ServerState::Stopped);

        let addr = server.start().await.unwrap();
        assert_eq!(server.state().await, ServerState::Listening(addr));
        assert!(matches!(
            server.start().await,
            Err(PhotoSyncError::InvalidState(_))
        ));

        server.stop().await.unwrap();
        assert_eq!(server.state().await, ServerState::Stopped);
        server.stop().await.unwrap();

        // Restartable after a stop.
        server.start().await.unwrap();
        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn stop_lets_in_flight_response_finish() {
        let dir = TempDir::new().unwrap();
        let payload: Vec<u8> = (0..16 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        std::fs::write(dir.path().join("IMG_big.jpg"), &payload).unwrap();
        let (server, addr) = serving(&dir).await;

        // Headers are in, the body is still streaming.
        let resp = get(format!("http://{}/photo/IMG_big.jpg", addr))
            .await
            .unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);

        let (stopped, body) = tokio::join!(server.stop(), resp.bytes());
        stopped.unwrap();
        assert_eq!(body.unwrap().as_ref(), payload.as_slice());
        assert_eq!(server.state().await, ServerState::Stopped);

        let after = get(format!("http://{}/photo/IMG_big.jpg", addr)).await;
        assert!(after.is_err());
    }

    #[tokio::test]
    async fn stopped_server_refuses_connections() {
        let dir = TempDir::new().unwrap();
        let (server, addr) = serving(&dir).await;
        server.stop().await.unwrap();

        let result = get(format!("http://{}/photo/IMG_1.jpg", addr)).await;
        assert!(result.is_err());
    }
}

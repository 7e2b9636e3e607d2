//! HTTP client pulling photos from another device's peer server.

use crate::paths::validate_segment;
use crate::peer::{PeerEndpoint, PHOTO_ROUTE_PREFIX};
use crate::store::write_atomic;
use crate::{PhotoSyncError, Result};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Largest photo accepted from a peer unless configured otherwise (64 MiB).
pub const DEFAULT_MAX_PHOTO_BYTES: u64 = 64 * 1024 * 1024;

/// HTTP client for LAN peers.
#[derive(Debug, Clone)]
pub struct PeerClient {
    client: reqwest::Client,
    max_photo_bytes: u64,
}

impl PeerClient {
    /// Create a new peer client. LAN traffic never goes through a proxy.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(|e| PhotoSyncError::Transfer(e.to_string()))?;

        Ok(Self {
            client,
            max_photo_bytes: DEFAULT_MAX_PHOTO_BYTES,
        })
    }

    /// Refuse bodies larger than `max_photo_bytes`.
    pub fn with_max_photo_bytes(mut self, max_photo_bytes: u64) -> Self {
        self.max_photo_bytes = max_photo_bytes;
        self
    }

    /// Pull `file_name` from `peer` into `destination_dir`.
    ///
    /// Returns `true` only when the whole body landed on disk. Every failure
    /// (non-200, timeout, connection error, local write error) yields `false`
    /// and leaves no file behind.
    pub async fn fetch_from_peer(
        &self,
        peer: &PeerEndpoint,
        file_name: &str,
        destination_dir: &Path,
    ) -> bool {
        match self.try_fetch(peer, file_name, destination_dir).await {
            Ok(()) => {
                debug!("Fetched {} from peer {}", file_name, peer);
                true
            }
            Err(e) => {
                debug!("Peer {} could not supply {}: {}", peer, file_name, e);
                false
            }
        }
    }

    async fn try_fetch(&self, peer: &PeerEndpoint, file_name: &str, destination_dir: &Path) -> Result<()> {
        validate_segment("file name", file_name)?;
        let url = photo_url(peer, file_name)?;

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PhotoSyncError::Transfer(e.to_string()))?;

        if resp.status() != reqwest::StatusCode::OK {
            return Err(PhotoSyncError::Transfer(format!(
                "peer answered {}",
                resp.status()
            )));
        }

        let bytes = self.read_capped(resp).await?;
        write_atomic(destination_dir, file_name, &bytes).await?;
        Ok(())
    }

    /// Buffer the body, giving up as soon as it exceeds the size cap.
    async fn read_capped(&self, mut resp: reqwest::Response) -> Result<Vec<u8>> {
        if let Some(announced) = resp.content_length() {
            if announced > self.max_photo_bytes {
                return Err(PhotoSyncError::Transfer(format!(
                    "peer announced {} bytes, limit is {}",
                    announced, self.max_photo_bytes
                )));
            }
        }

        let mut body = Vec::new();
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| PhotoSyncError::Transfer(e.to_string()))?
        {
            if (body.len() + chunk.len()) as u64 > self.max_photo_bytes {
                return Err(PhotoSyncError::Transfer(format!(
                    "peer body exceeds {} bytes",
                    self.max_photo_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }
}

/// `http://{host}:{port}/photo/{file_name}`, with the name percent-encoded.
pub fn photo_url(peer: &PeerEndpoint, file_name: &str) -> Result<reqwest::Url> {
    let mut url = reqwest::Url::parse(&format!("{}{}/", peer.base_url(), PHOTO_ROUTE_PREFIX))
        .map_err(|e| PhotoSyncError::InvalidInput(format!("peer {}: {}", peer, e)))?;
    url.path_segments_mut()
        .map_err(|_| PhotoSyncError::InvalidInput(format!("peer {} is not a base URL", peer)))?
        .pop_if_empty()
        .push(file_name);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer::PeerServer;
    use crate::store::list_files;
    use axum::routing::get;
    use axum::Router;
    use tempfile::TempDir;

    fn client() -> PeerClient {
        PeerClient::new(Duration::from_secs(2)).unwrap()
    }

    fn endpoint(addr: std::net::SocketAddr) -> PeerEndpoint {
        PeerEndpoint::new(addr.ip().to_string(), addr.port())
    }

    #[test]
    fn photo_url_format() {
        let peer = PeerEndpoint::new("10.0.0.5", 8080);
        assert_eq!(
            photo_url(&peer, "IMG_1.jpg").unwrap().as_str(),
            "http://10.0.0.5:8080/photo/IMG_1.jpg"
        );
        assert_eq!(
            photo_url(&peer, "IMG 1#a.jpg").unwrap().as_str(),
            "http://10.0.0.5:8080/photo/IMG%201%23a.jpg"
        );
    }

    #[tokio::test]
    async fn fetches_from_running_peer() {
        let remote = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        std::fs::write(remote.path().join("IMG_2.jpg"), b"two").unwrap();
        let server = PeerServer::new("127.0.0.1:0", remote.path());
        let addr = server.start().await.unwrap();

        assert!(client().fetch_from_peer(&endpoint(addr), "IMG_2.jpg", local.path()).await);
        assert_eq!(std::fs::read(local.path().join("IMG_2.jpg")).unwrap(), b"two");

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn not_found_writes_nothing() {
        let remote = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        let server = PeerServer::new("127.0.0.1:0", remote.path());
        let addr = server.start().await.unwrap();

        assert!(!client().fetch_from_peer(&endpoint(addr), "IMG_3.jpg", local.path()).await);
        assert!(list_files(local.path()).await.unwrap().is_empty());

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_peer_is_false() {
        let local = TempDir::new().unwrap();
        // Bind then drop to get a port nobody listens on.
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        assert!(!client().fetch_from_peer(&endpoint(addr), "IMG_1.jpg", local.path()).await);
        assert!(list_files(local.path()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn truncated_body_leaves_no_file() {
        let local = TempDir::new().unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Announces 100 bytes, sends 4, then hangs up.
        let liar = tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\n\r\nhalf")
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });

        assert!(!client().fetch_from_peer(&endpoint(addr), "IMG_1.jpg", local.path()).await);
        assert!(list_files(local.path()).await.unwrap().is_empty());
        let leftovers = std::fs::read_dir(local.path()).unwrap().count();
        assert_eq!(leftovers, 0);

        liar.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_photo_is_refused() {
        let remote = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        std::fs::write(remote.path().join("IMG_1.jpg"), vec![7u8; 64]).unwrap();
        std::fs::write(remote.path().join("IMG_2.jpg"), vec![7u8; 16]).unwrap();
        let server = PeerServer::new("127.0.0.1:0", remote.path());
        let addr = server.start().await.unwrap();
        let capped = client().with_max_photo_bytes(16);

        assert!(!capped.fetch_from_peer(&endpoint(addr), "IMG_1.jpg", local.path()).await);
        assert!(capped.fetch_from_peer(&endpoint(addr), "IMG_2.jpg", local.path()).await);
        assert_eq!(
            list_files(local.path()).await.unwrap().into_iter().collect::<Vec<_>>(),
            vec!["IMG_2.jpg".to_string()]
        );

        server.stop().await.unwrap();
    }

    #[tokio::test]
    async fn unannounced_oversized_body_is_refused() {
        let local = TempDir::new().unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // No Content-Length: the body runs until the connection closes.
        let flood = tokio::spawn(async move {
            use tokio::io::{AsyncReadExt, AsyncWriteExt};
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 200 OK\r\nConnection: close\r\n\r\n")
                .await;
            let _ = socket.write_all(&[0u8; 4096]).await;
            let _ = socket.shutdown().await;
        });

        let capped = client().with_max_photo_bytes(1024);
        assert!(!capped.fetch_from_peer(&endpoint(addr), "IMG_1.jpg", local.path()).await);
        assert_eq!(std::fs::read_dir(local.path()).unwrap().count(), 0);

        flood.await.unwrap();
    }

    #[tokio::test]
    async fn non_200_success_codes_are_rejected() {
        let local = TempDir::new().unwrap();
        let app = Router::new().route(
            "/photo/{name}",
            get(|| async { (axum::http::StatusCode::NO_CONTENT, "") }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move { axum::serve(listener, app).await });

        assert!(!client().fetch_from_peer(&endpoint(addr), "IMG_1.jpg", local.path()).await);
        assert!(list_files(local.path()).await.unwrap().is_empty());

        handle.abort();
    }

    #[tokio::test]
    async fn invalid_names_are_refused_without_request() {
        let local = TempDir::new().unwrap();
        let peer = PeerEndpoint::new("127.0.0.1", 1);
        assert!(!client().fetch_from_peer(&peer, "../escape.jpg", local.path()).await);
    }
}

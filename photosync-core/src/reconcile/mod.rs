//! Reconciliation engine: fill a visit's photo set from peers and the durable
//! store, verify it, then reclaim the durable copies.
//!
//! Phases run strictly in order and each one re-reads the visit directory:
//! 1. local gap detection
//! 2. peer fill
//! 3. gap recompute
//! 4. cloud fill
//! 5. push-back of non-durable local photos, then a second cloud fill
//! 6. final verification
//! 7. reclaim, only when nothing is missing


use crate::blob::{self, BlobStore};
use crate::config::PhotoSyncConfig;
use crate::paths::PhotoKey;
use crate::peer::{PeerClient, PeerEndpoint};
use crate::store::{compute_missing, list_files, LocalPhotoStore};
use crate::{PhotoSyncError, Result};
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

/// Per-invocation counters, logged when a session ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct SessionSummary {
    from_peers: usize,
    from_cloud: usize,
    uploaded: usize,
    reclaimed: usize,
    still_missing: usize,
}

/// Orchestrates the local store, the peer client and the durable store.
pub struct ReconcileEngine {
    store: LocalPhotoStore,
    peers: PeerClient,
    blobs: Arc<dyn BlobStore>,
    concurrency: usize,
}

impl ReconcileEngine {
    /// Create an engine; `concurrency` bounds in-flight transfers per phase.
    pub fn new(
        store: LocalPhotoStore,
        peers: PeerClient,
        blobs: Arc<dyn BlobStore>,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            peers,
            blobs,
            concurrency: concurrency.max(1),
        }
    }

    pub fn from_config(config: &PhotoSyncConfig) -> Result<Self> {
        config.validate()?;
        let peers = PeerClient::new(Duration::from_secs(config.peer_timeout_secs))?
            .with_max_photo_bytes(config.max_photo_bytes);
        let blobs = blob::from_backend(&config.blob, Duration::from_secs(config.blob_timeout_secs))?;
        Ok(Self::new(
            LocalPhotoStore::new(config.storage_root.clone()),
            peers,
            blobs,
            config.transfer_concurrency,
        ))
    }

    pub fn store(&self) -> &LocalPhotoStore {
        &self.store
    }

    /// Bring one visit's photos to a consistent state.
    ///
    /// Returns normally whether or not every expected photo could be found;
    /// use [`LocalPhotoStore::is_complete`] to find out. Only local
    /// filesystem failures are returned as errors.
    pub async fn reconcile(
        &self,
        machine_id: &str,
        maintenance_id: &str,
        expected: &BTreeSet<String>,
        peers: &[PeerEndpoint],
    ) -> Result<()> {
        let span = tracing::info_span!("reconcile", machine_id, maintenance_id);
        self.run_session(machine_id, maintenance_id, expected, peers)
            .instrument(span)
            .await
    }

    async fn run_session(
        &self,
        machine_id: &str,
        maintenance_id: &str,
        expected: &BTreeSet<String>,
        peers: &[PeerEndpoint],
    ) -> Result<()> {
        let dir = self.store.resolve_directory(machine_id, maintenance_id).await?;
        let mut summary = SessionSummary::default();

        let missing = compute_missing(expected, &dir).await?;
        debug!("{} of {} expected photos missing locally", missing.len(), expected.len());

        if !missing.is_empty() && !peers.is_empty() {
            let keys = transferable_keys(machine_id, maintenance_id, &missing);
            summary.from_peers = self.peer_fill(&keys, peers, &dir).await;
        }

        let missing = compute_missing(expected, &dir).await?;
        if !missing.is_empty() {
            let keys = transferable_keys(machine_id, maintenance_id, &missing);
            summary.from_cloud += self.cloud_fill(&keys, &dir).await;
        }

        let missing = compute_missing(expected, &dir).await?;
        if !missing.is_empty() {
            // Still incomplete: this device will not reclaim, so make whatever
            // it holds durable for the other devices before looking again.
            let present: BTreeSet<String> = expected.difference(&missing).cloned().collect();
            let keys = transferable_keys(machine_id, maintenance_id, &present);
            summary.uploaded = self.push_back(&keys, &dir).await;

            let missing = compute_missing(expected, &dir).await?;
            let keys = transferable_keys(machine_id, maintenance_id, &missing);
            summary.from_cloud += self.cloud_fill(&keys, &dir).await;
        }

        let missing_final = compute_missing(expected, &dir).await?;
        summary.still_missing = missing_final.len();

        if missing_final.is_empty() {
            let keys = transferable_keys(machine_id, maintenance_id, expected);
            summary.reclaimed = self.reclaim(&keys).await;
        } else {
            info!(
                "Visit incomplete, keeping durable copies; missing: {:?}",
                missing_final
            );
        }

        info!(
            "Reconciled: {} from peers, {} from durable store, {} uploaded, {} reclaimed, {} missing",
            summary.from_peers,
            summary.from_cloud,
            summary.uploaded,
            summary.reclaimed,
            summary.still_missing
        );
        Ok(())
    }

    /// Try peers in order for each name; first success wins.
    async fn peer_fill(&self, keys: &[PhotoKey], peers: &[PeerEndpoint], dir: &Path) -> usize {
        let results: Vec<bool> = stream::iter(keys)
            .map(|key| async move {
                for peer in peers {
                    if self.peers.fetch_from_peer(peer, &key.file_name, dir).await {
                        return true;
                    }
                }
                false
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        results.into_iter().filter(|ok| *ok).count()
    }

    async fn cloud_fill(&self, keys: &[PhotoKey], dir: &Path) -> usize {
        let results: Vec<bool> = stream::iter(keys)
            .map(|key| async move {
                match self.blobs.download(key, &dir.join(&key.file_name)).await {
                    Ok(()) => {
                        debug!("Downloaded {} from durable store", key);
                        true
                    }
                    Err(PhotoSyncError::NotFound(_)) => {
                        debug!("{} not in durable store", key);
                        false
                    }
                    Err(e) => {
                        warn!("Durable download of {} failed: {}", key, e);
                        false
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        results.into_iter().filter(|ok| *ok).count()
    }

    /// Upload local photos that have no durable copy yet.
    async fn push_back(&self, keys: &[PhotoKey], dir: &Path) -> usize {
        let results: Vec<bool> = stream::iter(keys)
            .map(|key| async move {
                match self.blobs.exists(key).await {
                    Ok(true) => return false,
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Could not check durable copy of {}: {}", key, e);
                        return false;
                    }
                }
                self.upload_one(key, dir).await
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        results.into_iter().filter(|ok| *ok).count()
    }

    async fn reclaim(&self, keys: &[PhotoKey]) -> usize {
        let results: Vec<bool> = stream::iter(keys)
            .map(|key| async move {
                match self.blobs.delete(key).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!("Durable delete of {} failed: {}", key, e);
                        false
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        results.into_iter().filter(|ok| *ok).count()
    }

    async fn upload_one(&self, key: &PhotoKey, dir: &Path) -> bool {
        match self.blobs.upload(&dir.join(&key.file_name), key).await {
            Ok(()) => {
                debug!("Uploaded {} to durable store", key);
                true
            }
            Err(e) => {
                warn!("Durable upload of {} failed: {}", key, e);
                false
            }
        }
    }

    /// Upload the named photos that exist locally, e.g. right after capture.
    ///
    /// Returns how many were uploaded. Per-photo failures are logged, not returned.
    pub async fn publish(
        &self,
        machine_id: &str,
        maintenance_id: &str,
        names: &[String],
    ) -> Result<usize> {
        let dir = self.store.visit_dir(machine_id, maintenance_id)?;
        let present = list_files(&dir).await?;
        let wanted: BTreeSet<String> = names
            .iter()
            .filter(|name| present.contains(*name))
            .cloned()
            .collect();
        let keys = transferable_keys(machine_id, maintenance_id, &wanted);

        let results: Vec<bool> = stream::iter(&keys)
            .map(|key| self.upload_one(key, &dir))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let uploaded = results.into_iter().filter(|ok| *ok).count();
        info!(
            "Published {} of {} photos for {}/{}",
            uploaded,
            names.len(),
            machine_id,
            maintenance_id
        );
        Ok(uploaded)
    }
}

/// Keys for the names that are safe to transfer. Invalid names are skipped and
/// therefore stay missing.
fn transferable_keys(
    machine_id: &str,
    maintenance_id: &str,
    names: &BTreeSet<String>,
) -> Vec<PhotoKey> {
    names
        .iter()
        .filter_map(|name| match PhotoKey::new(machine_id, maintenance_id, name.as_str()) {
            Ok(key) => Some(key),
            Err(e) => {
                warn!("Skipping expected photo: {}", e);
                None
            }
        })
        .collect()
}

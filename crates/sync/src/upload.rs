//! Upload orchestration: push chunks, publish manifests, verify and promote.
//!
//! An upload walks a worklist of chunk hashes in order. Before each chunk it
//! checks the session's control flags, so a pause takes effect between
//! chunks and a cancel stops the run before anything is published. Chunk
//! failures are counted and the run continues; failing to publish the
//! manifest ends the session.

use crate::error::{SyncError, SyncResult};
use crate::remote::RemoteRepository;
use depot_core::progress::percent;
use depot_core::{
    BuildType, ChunkHash, ChunkOutcome, ChunkStatus, Manifest, Progress, ProgressReporter,
    ProgressTracker, SessionId, UploadState, UploadStats, VersionDescriptor, diff, layout,
};
use depot_core::manifest::validate_version;
use depot_storage::ChunkStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

/// Share of the progress bar spent on chunks; the rest covers publishing.
const CHUNK_PHASE_PERCENT: f64 = 95.0;

#[derive(Clone, Copy, Debug, Default)]
struct Control {
    paused: bool,
    cancelled: bool,
}

struct SessionInner {
    id: SessionId,
    control: watch::Sender<Control>,
    state: Mutex<UploadState>,
    cursor: AtomicUsize,
    stats: Mutex<UploadStats>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle to one upload run.
///
/// Clones share the same session, so one clone can drive
/// [`Uploader::upload`] while another pauses, resumes or cancels it.
#[derive(Clone)]
pub struct UploadSession {
    inner: Arc<SessionInner>,
}

impl UploadSession {
    pub fn new() -> Self {
        let (control, _) = watch::channel(Control::default());
        Self {
            inner: Arc::new(SessionInner {
                id: SessionId::new(),
                control,
                state: Mutex::new(UploadState::Idle),
                cursor: AtomicUsize::new(0),
                stats: Mutex::new(UploadStats::default()),
            }),
        }
    }

    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    pub fn state(&self) -> UploadState {
        *lock(&self.inner.state)
    }

    /// Index of the next worklist entry to process.
    pub fn cursor(&self) -> usize {
        self.inner.cursor.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> UploadStats {
        *lock(&self.inner.stats)
    }

    /// Suspend the upload before its next chunk.
    pub fn pause(&self) {
        if self.state().is_terminal() {
            return;
        }
        self.inner.control.send_modify(|c| c.paused = true);
    }

    /// Continue a paused upload. Does nothing if it is not paused.
    pub fn resume(&self) {
        self.inner.control.send_if_modified(|c| {
            let was_paused = c.paused;
            c.paused = false;
            was_paused
        });
    }

    /// Stop the upload before its next chunk, without publishing anything.
    pub fn cancel(&self) {
        self.inner.control.send_modify(|c| c.cancelled = true);
    }

    pub fn is_paused(&self) -> bool {
        self.inner.control.borrow().paused
    }

    fn set_state(&self, state: UploadState) {
        *lock(&self.inner.state) = state;
    }

    fn record(&self, outcome: ChunkOutcome, bytes: u64) -> UploadStats {
        let mut stats = lock(&self.inner.stats);
        match outcome {
            ChunkOutcome::Uploaded => {
                stats.uploaded += 1;
                stats.bytes_uploaded += bytes;
            }
            ChunkOutcome::Skipped => stats.skipped += 1,
            _ => stats.failed += 1,
        }
        *stats
    }

    /// Wait out a pause. Returns `false` once the session is cancelled.
    async fn checkpoint(&self, tracker: &ProgressTracker<'_>) -> bool {
        let mut control = self.inner.control.subscribe();
        let current = *control.borrow_and_update();
        if current.cancelled {
            return false;
        }
        if !current.paused {
            return true;
        }

        self.set_state(UploadState::Paused);
        info!(session = %self.id(), cursor = self.cursor(), "Upload paused");
        tracker.report(Progress::new(0.0, "Paused"));

        let cancelled = match control.wait_for(|c| !c.paused || c.cancelled).await {
            Ok(c) => c.cancelled,
            Err(_) => true,
        };
        if cancelled {
            return false;
        }

        self.set_state(UploadState::Uploading);
        info!(session = %self.id(), cursor = self.cursor(), "Upload resumed");
        tracker.report(Progress::new(0.0, "Resumed"));
        true
    }

    fn cancelled(&self) -> SyncError {
        self.set_state(UploadState::Cancelled);
        let stats = self.stats();
        warn!(session = %self.id(), processed = stats.processed(), "Upload cancelled");
        SyncError::Cancelled { stats }
    }
}

impl Default for UploadSession {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for UploadSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadSession")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("cursor", &self.cursor())
            .finish()
    }
}

/// Remote presence of every chunk in a manifest.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub existing: Vec<ChunkHash>,
    pub missing: Vec<ChunkHash>,
    pub all_exist: bool,
}

/// Result of a successful promotion.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PromotionReport {
    pub version: String,
    pub build_type: BuildType,
    pub chunks_verified: usize,
}

/// Chunks to push for `manifest`.
///
/// Without a previous version this is every distinct chunk. With one, only
/// chunks the previous version lacks are scheduled, and shared chunks are
/// pointed at the location the previous version published them under.
pub fn plan_upload(manifest: &mut Manifest, previous: Option<&Manifest>) -> SyncResult<Vec<ChunkHash>> {
    match previous {
        None => Ok(manifest.unique_chunk_hashes()),
        Some(previous) => {
            let delta = diff(previous, manifest)?;
            let inherited = manifest.inherit_chunk_locations(previous);
            debug!(
                chunks = delta.chunks_to_upload.len(),
                inherited,
                base = %previous.version,
                "Planned delta upload"
            );
            Ok(delta.chunks_to_upload)
        }
    }
}

/// Moves chunks from the local store to a remote repository.
pub struct Uploader {
    chunks: Arc<ChunkStore>,
    remote: RemoteRepository,
}

impl Uploader {
    pub fn new(chunks: Arc<ChunkStore>, remote: RemoteRepository) -> Self {
        Self { chunks, remote }
    }

    pub fn remote(&self) -> &RemoteRepository {
        &self.remote
    }

    pub fn chunk_store(&self) -> &ChunkStore {
        &self.chunks
    }

    async fn upload_chunk(&self, hash: &ChunkHash, key: &str) -> (ChunkOutcome, u64) {
        match self.chunks.exists(hash).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(chunk = %hash, "Chunk missing from local store");
                return (ChunkOutcome::Failed, 0);
            }
            Err(e) => {
                warn!(chunk = %hash, error = %e, "Failed to check local chunk");
                return (ChunkOutcome::Failed, 0);
            }
        }

        match self.remote.object_exists(key).await {
            Ok(true) => {
                debug!(chunk = %hash, "Chunk already on remote");
                return (ChunkOutcome::Skipped, 0);
            }
            Ok(false) => {}
            Err(e) => {
                warn!(chunk = %hash, error = %e, "Failed to check remote chunk");
                return (ChunkOutcome::Failed, 0);
            }
        }

        let data = match self.chunks.get(hash).await {
            Ok(Some(data)) => data,
            Ok(None) => {
                warn!(chunk = %hash, "Chunk disappeared from local store");
                return (ChunkOutcome::Failed, 0);
            }
            Err(e) => {
                warn!(chunk = %hash, error = %e, "Failed to read local chunk");
                return (ChunkOutcome::Failed, 0);
            }
        };

        let size = data.len() as u64;
        match self.remote.put_object(key, data).await {
            Ok(()) => {
                debug!(chunk = %hash, size, "Uploaded chunk");
                (ChunkOutcome::Uploaded, size)
            }
            Err(e) => {
                warn!(chunk = %hash, error = %e, "Failed to upload chunk");
                (ChunkOutcome::Failed, 0)
            }
        }
    }

    /// Push `worklist` and publish `manifest` under its version and as the
    /// track's latest.
    ///
    /// `manifest` gets its chunk URLs rewritten to their remote locations.
    /// The manifest is published even when some chunks failed; use
    /// [`Uploader::promote`] to gate the latest pointer on completeness.
    #[instrument(
        skip_all,
        fields(session = %session.id(), build_type = %manifest.build_type, version = %manifest.version)
    )]
    pub async fn upload(
        &self,
        session: &UploadSession,
        manifest: &mut Manifest,
        worklist: &[ChunkHash],
        reporter: &dyn ProgressReporter,
    ) -> SyncResult<UploadStats> {
        {
            let mut state = lock(&session.inner.state);
            if *state != UploadState::Idle {
                return Err(SyncError::SessionState {
                    id: session.id(),
                    state: *state,
                });
            }
            *state = UploadState::Uploading;
        }
        *lock(&session.inner.stats) = UploadStats {
            total: worklist.len(),
            ..Default::default()
        };

        let tracker = ProgressTracker::new(reporter);
        let total = worklist.len();
        info!(chunks = total, "Starting upload");
        tracker.report(Progress::new(0.0, format!("Uploading {total} chunks")));

        let locations: HashMap<ChunkHash, String> = manifest.chunk_locations().into_iter().collect();

        for (index, hash) in worklist.iter().enumerate() {
            if !session.checkpoint(&tracker).await {
                return Err(session.cancelled());
            }
            session.inner.cursor.store(index, Ordering::SeqCst);

            let key = match locations.get(hash) {
                Some(key) => key.clone(),
                None => layout::chunk_key(manifest.build_type, &manifest.version, hash),
            };
            let (outcome, bytes) = self.upload_chunk(hash, &key).await;
            let stats = session.record(outcome, bytes);
            session.inner.cursor.store(index + 1, Ordering::SeqCst);

            let mut progress = Progress::new(
                percent((index + 1) as u64, total as u64) * CHUNK_PHASE_PERCENT / 100.0,
                format!(
                    "{} uploaded, {} skipped, {} failed",
                    stats.uploaded, stats.skipped, stats.failed
                ),
            )
            .with_chunk(ChunkStatus {
                index,
                total,
                hash: *hash,
                outcome,
            });
            if outcome == ChunkOutcome::Failed {
                progress = progress.with_error(format!("chunk {hash} failed"));
            }
            tracker.report(progress);
        }

        if !session.checkpoint(&tracker).await {
            return Err(session.cancelled());
        }

        if let Err(e) = self.publish(manifest, &tracker).await {
            session.set_state(UploadState::Failed);
            warn!(error = %e, "Upload failed while publishing");
            return Err(e);
        }

        session.set_state(UploadState::Completed);
        let stats = session.stats();
        info!(
            uploaded = stats.uploaded,
            skipped = stats.skipped,
            failed = stats.failed,
            bytes = stats.bytes_uploaded,
            "Upload finished"
        );
        tracker.report(Progress::new(100.0, "Upload complete"));
        Ok(stats)
    }

    async fn publish(&self, manifest: &mut Manifest, tracker: &ProgressTracker<'_>) -> SyncResult<()> {
        manifest.rewrite_chunk_urls(self.remote.public_base_url());

        tracker.report(Progress::new(CHUNK_PHASE_PERCENT, "Publishing manifest"));
        self.remote.put_version_manifest(manifest).await?;
        self.remote.put_latest_manifest(manifest).await?;

        tracker.report(Progress::new(98.0, "Publishing version descriptor"));
        let descriptor = VersionDescriptor::for_manifest(manifest, OffsetDateTime::now_utc());
        self.remote.put_version_descriptor(&descriptor).await
    }

    /// Fill in chunk locations a local manifest lacks from the published
    /// manifest of the same version.
    ///
    /// After a delta upload, shared chunks live under the version that first
    /// published them, and only the published manifest records that.
    /// Returns the number of chunk references updated.
    pub async fn resolve_chunk_locations(&self, manifest: &mut Manifest) -> SyncResult<usize> {
        if manifest.all_chunks().all(|c| c.url.is_some()) {
            return Ok(0);
        }
        let Some(published) = self
            .remote
            .fetch_manifest(manifest.build_type, &manifest.version)
            .await?
        else {
            return Ok(0);
        };
        let updated = manifest.fill_missing_chunk_locations(&published.into_chunk_based()?);
        debug!(updated, version = %manifest.version, "Resolved chunk locations");
        Ok(updated)
    }

    /// Check that every chunk `manifest` references exists remotely.
    ///
    /// Chunks without a URL, as in a freshly packaged manifest, are looked up
    /// at the location the version's published manifest records.
    #[instrument(skip_all, fields(build_type = %manifest.build_type, version = %manifest.version))]
    pub async fn verify(
        &self,
        manifest: &Manifest,
        reporter: &dyn ProgressReporter,
    ) -> SyncResult<VerifyReport> {
        let tracker = ProgressTracker::new(reporter);
        let locations = if manifest.all_chunks().any(|c| c.url.is_none()) {
            let mut resolved = manifest.clone();
            self.resolve_chunk_locations(&mut resolved).await?;
            resolved.chunk_locations()
        } else {
            manifest.chunk_locations()
        };
        let total = locations.len();
        let mut report = VerifyReport::default();

        for (index, (hash, key)) in locations.into_iter().enumerate() {
            let outcome = if self.remote.object_exists(&key).await? {
                report.existing.push(hash);
                ChunkOutcome::Present
            } else {
                debug!(chunk = %hash, key = %key, "Chunk missing from remote");
                report.missing.push(hash);
                ChunkOutcome::Missing
            };
            tracker.report(
                Progress::new(
                    percent((index + 1) as u64, total as u64),
                    format!("Verified {} of {total} chunks", index + 1),
                )
                .with_chunk(ChunkStatus {
                    index,
                    total,
                    hash,
                    outcome,
                }),
            );
        }

        report.all_exist = report.missing.is_empty();
        info!(
            existing = report.existing.len(),
            missing = report.missing.len(),
            "Verification finished"
        );
        tracker.report(Progress::new(100.0, "Verification complete"));
        Ok(report)
    }

    /// Make `version` the track's latest, but only if all its chunks exist.
    ///
    /// Uses `manifest` when given, otherwise the version's published
    /// manifest. The latest pointer is left untouched when any chunk is
    /// missing.
    #[instrument(skip(self, manifest, reporter))]
    pub async fn promote(
        &self,
        build_type: BuildType,
        version: &str,
        manifest: Option<Manifest>,
        reporter: &dyn ProgressReporter,
    ) -> SyncResult<PromotionReport> {
        validate_version(version).map_err(depot_core::Error::from)?;
        let mut manifest = match manifest {
            Some(mut manifest) => {
                self.resolve_chunk_locations(&mut manifest).await?;
                manifest
            }
            None => self
                .remote
                .fetch_manifest(build_type, version)
                .await?
                .ok_or_else(|| {
                    SyncError::Storage(depot_storage::StorageError::NotFound(
                        layout::manifest_key(build_type, version),
                    ))
                })?
                .into_chunk_based()?,
        };

        if manifest.build_type != build_type {
            return Err(depot_core::Error::BuildTypeMismatch {
                old: build_type.to_string(),
                new: manifest.build_type.to_string(),
            }
            .into());
        }
        if manifest.version != version {
            return Err(SyncError::VersionMismatch {
                expected: version.to_string(),
                found: manifest.version.clone(),
            });
        }

        let report = self.verify(&manifest, reporter).await?;
        if !report.all_exist {
            warn!(missing = report.missing.len(), "Promotion blocked");
            return Err(SyncError::PromotionBlocked {
                version: version.to_string(),
                missing: report.missing.len(),
            });
        }

        manifest.rewrite_chunk_urls(self.remote.public_base_url());
        self.remote.put_latest_manifest(&manifest).await?;
        info!("Promoted to latest");

        Ok(PromotionReport {
            version: version.to_string(),
            build_type,
            chunks_verified: report.existing.len(),
        })
    }
}

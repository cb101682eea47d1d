//! # Scan Coordinator
//!
//! Orchestrates full and incremental scans against the writable SQL
//! collection.
//!
//! ## Workflow
//!
//! ### Full scan
//! 1. Build the `_temp` shadow table set
//! 2. Walk every configured folder on a background task
//! 3. Insert each track into the shadow tables, resolving dimensions there
//! 4. On success only, swap the shadow tables into place — the live index
//!    is inconsistent only for the duration of the swap
//! 5. Post the discovered subdirectories back through the finished job so
//!    the external directory watch can extend its set
//!
//! ### Incremental scan
//! A directory-dirty event (from the external file-watch collaborator)
//! triggers a scan scoped to exactly that directory: delete all track rows
//! whose directory matches, rescan non-recursively, re-insert. This is the
//! mechanism that prevents duplicate rows on re-scan.
//!
//! Cancellation is cooperative: the token is checked between files, and an
//! accepted abort finishes the job `Cancelled`, drops the shadow tables and
//! leaves the live index untouched.

use crate::error::{Result, ScanError};
use crate::job::{ScanJob, ScanJobId, ScanStats, ScanType};
use crate::tags::TagReader;
use crate::walker::{dir_mtime, walk_directory};
use core_collection::SqlCollection;
use core_runtime::events::{CoreEvent, EventBus, ScanEvent};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Scan pipeline configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanConfig {
    /// Folders walked by a full scan.
    pub folders: Vec<PathBuf>,
    /// Whether full scans descend into subdirectories.
    pub recursive: bool,
    /// Audio file extensions, lower-case.
    pub extensions: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            folders: Vec::new(),
            recursive: true,
            extensions: ["mp3", "ogg", "oga", "flac", "m4a", "aac", "wav", "wma", "opus"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

struct ActiveScan {
    job_id: ScanJobId,
    token: CancellationToken,
}

struct Inner {
    collection: Arc<SqlCollection>,
    reader: Arc<dyn TagReader>,
    events: EventBus,
    config: RwLock<ScanConfig>,
    active: Mutex<Option<ActiveScan>>,
    jobs: Mutex<HashMap<ScanJobId, ScanJob>>,
}

/// Runs scan jobs against one SQL collection. One scan at a time. Cloning
/// is cheap; clones share state.
#[derive(Clone)]
pub struct ScanCoordinator {
    inner: Arc<Inner>,
}

impl ScanCoordinator {
    pub fn new(
        collection: Arc<SqlCollection>,
        reader: Arc<dyn TagReader>,
        events: EventBus,
        config: ScanConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                collection,
                reader,
                events,
                config: RwLock::new(config),
                active: Mutex::new(None),
                jobs: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Start a full rescan on a background task. Fails when a scan is
    /// already running.
    pub async fn start_full_scan(&self) -> Result<ScanJobId> {
        let job = ScanJob::new(ScanType::Full).start()?;
        let job_id = job.id;
        let token = CancellationToken::new();

        {
            let mut active = self.inner.active.lock().await;
            if active.is_some() {
                return Err(ScanError::ScanInProgress);
            }
            *active = Some(ActiveScan {
                job_id,
                token: token.clone(),
            });
        }
        self.inner.jobs.lock().await.insert(job_id, job);

        info!(job_id = %job_id, "Starting full collection scan");
        self.inner.events.emit(CoreEvent::Scan(ScanEvent::Started {
            job_id: job_id.to_string(),
        }));

        let coordinator = self.clone();
        tokio::spawn(async move {
            coordinator.run_full_scan(job_id, token).await;
        });

        Ok(job_id)
    }

    async fn run_full_scan(&self, job_id: ScanJobId, token: CancellationToken) {
        let mut stats = ScanStats::default();
        let mut discovered = Vec::new();

        let result = self
            .full_scan_body(&token, &mut stats, &mut discovered)
            .await;

        let schema = self.inner.collection.schema();
        let changed = match result {
            Ok(()) => {
                // Success: swap the shadow tables into place and invalidate
                // caches that may hold pre-swap ids.
                match schema.move_temp_tables().await {
                    Ok(()) => {
                        self.inner.collection.resolver().invalidate_caches();
                        self.finish_job(job_id, |job| job.complete(stats, discovered))
                            .await;
                        true
                    }
                    Err(e) => {
                        warn!(error = %e, "Temp table swap failed");
                        self.finish_job(job_id, |job| job.fail(e.to_string())).await;
                        false
                    }
                }
            }
            Err(ScanError::Cancelled) => {
                info!(job_id = %job_id, "Scan cancelled, dropping shadow tables");
                schema.drop_tables(true).await.ok();
                self.finish_job(job_id, |job| job.cancel()).await;
                false
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Scan failed, dropping shadow tables");
                schema.drop_tables(true).await.ok();
                self.finish_job(job_id, |job| job.fail(e.to_string())).await;
                false
            }
        };

        *self.inner.active.lock().await = None;
        self.inner.events.emit(CoreEvent::Scan(ScanEvent::Done {
            job_id: job_id.to_string(),
            changed,
        }));
    }

    async fn full_scan_body(
        &self,
        token: &CancellationToken,
        stats: &mut ScanStats,
        discovered: &mut Vec<PathBuf>,
    ) -> Result<()> {
        let config = self.inner.config.read().await.clone();
        let schema = self.inner.collection.schema();

        // A leftover shadow set from an aborted run is discarded first.
        schema.drop_tables(true).await?;
        schema.create_tables(true).await?;

        for root in &config.folders {
            let scanned =
                walk_directory(root, config.recursive, &config.extensions, token).await?;
            for dir in scanned {
                for file in &dir.files {
                    if token.is_cancelled() {
                        return Err(ScanError::Cancelled);
                    }
                    self.scan_file(file, true, stats).await?;
                }
                self.inner
                    .collection
                    .update_dir_stamp(&dir.path.to_string_lossy(), dir.mtime, true)
                    .await?;
                stats.dirs_scanned += 1;
                if dir.path != *root {
                    discovered.push(dir.path);
                }
            }
        }
        Ok(())
    }

    async fn scan_file(&self, file: &Path, temporary: bool, stats: &mut ScanStats) -> Result<()> {
        stats.files_seen += 1;
        match self.inner.reader.read(file).await {
            Ok(bundle) => {
                self.inner.collection.add_track(&bundle, temporary).await?;
                stats.tracks_added += 1;
            }
            Err(e) => {
                // An unreadable file never aborts the scan.
                warn!(file = %file.display(), error = %e, "Skipping unreadable file");
                stats.files_skipped += 1;
            }
        }
        Ok(())
    }

    /// Incremental scan of exactly one dirtied directory: delete its rows,
    /// rescan it non-recursively, re-insert.
    pub async fn handle_dir_dirty(&self, dir: &Path) -> Result<ScanJobId> {
        let job = ScanJob::new(ScanType::Incremental).start()?;
        let job_id = job.id;
        self.inner.jobs.lock().await.insert(job_id, job);

        debug!(dir = %dir.display(), job_id = %job_id, "Rescanning dirty directory");
        self.inner.events.emit(CoreEvent::Scan(ScanEvent::Started {
            job_id: job_id.to_string(),
        }));

        let token = CancellationToken::new();
        let mut stats = ScanStats::default();
        let result = self.dirty_scan_body(dir, &token, &mut stats).await;

        let changed = stats.tracks_added > 0 || stats.rows_removed > 0;
        match result {
            Ok(()) => {
                self.finish_job(job_id, |job| job.complete(stats, Vec::new()))
                    .await
            }
            Err(e) => {
                warn!(error = %e, "Dirty directory rescan failed");
                self.finish_job(job_id, |job| job.fail(e.to_string())).await
            }
        }
        self.inner.events.emit(CoreEvent::Scan(ScanEvent::Done {
            job_id: job_id.to_string(),
            changed,
        }));
        Ok(job_id)
    }

    async fn dirty_scan_body(
        &self,
        dir: &Path,
        token: &CancellationToken,
        stats: &mut ScanStats,
    ) -> Result<()> {
        let config = self.inner.config.read().await.clone();
        let dir_str = dir.to_string_lossy();

        stats.rows_removed = self.inner.collection.remove_songs_in_dir(&dir_str).await?;

        if tokio::fs::metadata(dir).await.is_err() {
            // Directory is gone; its rows were the stale part.
            self.inner
                .collection
                .update_dir_stamp(&dir_str, 0, false)
                .await?;
            return Ok(());
        }

        let scanned = walk_directory(dir, false, &config.extensions, token).await?;
        for scanned_dir in scanned {
            for file in &scanned_dir.files {
                self.scan_file(file, false, stats).await?;
            }
            self.inner
                .collection
                .update_dir_stamp(&dir_str, scanned_dir.mtime, false)
                .await?;
            stats.dirs_scanned += 1;
        }
        Ok(())
    }

    /// Compare recorded directory stamps against on-disk mtimes and rescan
    /// the dirty subset.
    pub async fn scan_modified_dirs(&self) -> Result<Vec<ScanJobId>> {
        let stamps = self.inner.collection.dir_stamps().await?;
        let mut jobs = Vec::new();
        for (dir, stamp) in stamps {
            let path = PathBuf::from(&dir);
            let current = dir_mtime(&path).await;
            let missing = tokio::fs::metadata(&path).await.is_err();
            if missing || current > stamp {
                jobs.push(self.handle_dir_dirty(&path).await?);
            }
        }
        Ok(jobs)
    }

    /// Replace the watched folder set. A changed set invalidates the watch
    /// state and forces a full rescan; returns its job id when one started.
    pub async fn configure_folders(
        &self,
        folders: Vec<PathBuf>,
        recursive: bool,
    ) -> Result<Option<ScanJobId>> {
        let changed = {
            let mut config = self.inner.config.write().await;
            let changed = config.folders != folders || config.recursive != recursive;
            config.folders = folders;
            config.recursive = recursive;
            changed
        };
        if !changed {
            return Ok(None);
        }

        info!("Watch roots changed, forcing full rescan");
        self.inner.collection.clear_dir_stamps().await?;
        Ok(Some(self.start_full_scan().await?))
    }

    /// Request cooperative abort of the running scan.
    pub async fn cancel(&self, job_id: ScanJobId) -> Result<()> {
        let active = self.inner.active.lock().await;
        match active.as_ref() {
            Some(scan) if scan.job_id == job_id => {
                scan.token.cancel();
                Ok(())
            }
            _ => Err(ScanError::JobNotFound(job_id.to_string())),
        }
    }

    /// Current snapshot of a job.
    pub async fn job(&self, job_id: ScanJobId) -> Option<ScanJob> {
        self.inner.jobs.lock().await.get(&job_id).cloned()
    }

    /// Whether a scan is currently running.
    pub async fn is_scanning(&self) -> bool {
        self.inner.active.lock().await.is_some()
    }

    async fn finish_job(
        &self,
        job_id: ScanJobId,
        transition: impl FnOnce(ScanJob) -> Result<ScanJob>,
    ) {
        let mut jobs = self.inner.jobs.lock().await;
        if let Some(job) = jobs.remove(&job_id) {
            match transition(job) {
                Ok(job) => {
                    debug!(job_id = %job_id, status = %job.status, "Scan job finished");
                    jobs.insert(job_id, job);
                }
                Err(e) => warn!(job_id = %job_id, error = %e, "Illegal scan job transition"),
            }
        }
    }
}

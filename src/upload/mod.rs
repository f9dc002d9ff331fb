//! Upload coordinator: drives a file transfer to object storage and declares
//! success despite an unreliable completion signal.
//!
//! The storage API's own upload call is known to hang indefinitely on some
//! clients while the object is in fact already stored, so the coordinator
//! races three operations and takes the first to settle: the primary
//! transfer, an independent existence poll against the destination prefix,
//! and a size-scaled deadline timer. Losing operations are signalled through
//! a cancellation token; the transport itself cannot be aborted, so their
//! eventual results are discarded.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::storage::ObjectStore;
use crate::utils::sanitize_filename;
use crate::CapburnError;

/// Base allowance before size is considered
pub const BASE_DEADLINE_MS: u64 = 30_000;

/// Additional allowance per MiB, generous enough for slow mobile uplinks
pub const PER_MIB_MS: u64 = 10_000;

/// Interval between destination-prefix existence checks
pub const EXISTENCE_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Interval between cosmetic progress ticks
pub const PROGRESS_TICK: Duration = Duration::from_millis(200);

const MIB: f64 = 1_048_576.0;

/// Deadline for one transfer attempt: 30s base plus 10s per MiB.
pub fn upload_deadline_ms(size_bytes: u64) -> u64 {
    BASE_DEADLINE_MS + ((size_bytes as f64 / MIB) * PER_MIB_MS as f64) as u64
}

/// Lifecycle of one file transfer attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadState {
    #[default]
    Idle,
    Uploading,
    Verifying,
    Succeeded,
    Failed,
}

/// One file transfer attempt. Created when a file is selected, reset when a
/// new file is selected or on terminal failure.
#[derive(Debug, Clone, Default)]
pub struct UploadSession {
    pub object_key: String,
    pub size_bytes: u64,
    pub deadline_ms: u64,

    /// Display-only; never exceeds 99 before the terminal success signal
    pub progress_percent: f64,

    pub state: UploadState,
}

/// Result of a successful upload
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub object_key: String,
    pub public_url: String,
}

/// Estimated progress for the upload bar.
///
/// This is a synthetic timer curve, deliberately decoupled from real byte
/// progress (the transport exposes none): a full-speed ramp capped at 95,
/// then a slow crawl capped at 99 until the authoritative success signal
/// forces 100.
#[derive(Debug, Clone)]
pub struct UploadProgressModel {
    percent: f64,
    step: f64,
}

impl UploadProgressModel {
    pub fn new(size_bytes: u64) -> Self {
        let estimated_total_ms = ((size_bytes as f64 / MIB) * 1500.0).min(300_000.0);
        let ticks = estimated_total_ms / PROGRESS_TICK.as_millis() as f64;
        let step = (100.0 / ticks) * 1.4;

        Self { percent: 0.0, step }
    }

    /// Advance one 200ms tick and return the new percentage.
    pub fn tick(&mut self) -> f64 {
        if self.percent < 95.0 {
            self.percent = (self.percent + self.step).min(95.0);
        } else {
            self.percent = (self.percent + 0.05).min(99.0);
        }
        self.percent
    }

    pub fn percent(&self) -> f64 {
        self.percent
    }
}

/// Coordinates uploads against an [`ObjectStore`].
pub struct UploadCoordinator<S: ObjectStore> {
    store: Arc<S>,
    owner: String,
    session: Arc<Mutex<UploadSession>>,
    progress_tx: watch::Sender<f64>,
}

impl<S: ObjectStore + 'static> UploadCoordinator<S> {
    pub fn new(store: Arc<S>, owner: impl Into<String>) -> Self {
        let (progress_tx, _) = watch::channel(0.0);

        Self {
            store,
            owner: owner.into(),
            session: Arc::new(Mutex::new(UploadSession::default())),
            progress_tx,
        }
    }

    /// Subscribe to the estimated-progress signal (0..=100)
    pub fn progress(&self) -> watch::Receiver<f64> {
        self.progress_tx.subscribe()
    }

    /// Snapshot of the current session
    pub fn session(&self) -> UploadSession {
        lock(&self.session).clone()
    }

    /// Storage key for a new session: owner, timestamp, short id, filename.
    fn object_key(&self, file_name: &str) -> String {
        format!(
            "{}/{}_{}_{}",
            self.owner,
            Utc::now().format("%Y%m%d_%H%M%S"),
            &Uuid::new_v4().to_string()[..8],
            sanitize_filename(file_name)
        )
    }

    /// Transfer `bytes` to storage and return the resulting key and public
    /// address.
    ///
    /// First of three operations to settle wins: the primary transfer, the
    /// existence poll, or the deadline. An existence-poll win counts as
    /// success regardless of the primary call's own outcome. The deadline is
    /// the only timeout condition; other failures are reported, not retried.
    pub async fn upload(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadOutcome, CapburnError> {
        let size_bytes = bytes.len() as u64;
        let deadline_ms = upload_deadline_ms(size_bytes);
        let object_key = self.object_key(file_name);

        tracing::info!(
            "uploading {} ({} bytes, deadline {}ms)",
            object_key,
            size_bytes,
            deadline_ms
        );

        // Reset display state for the new session
        let _ = self.progress_tx.send(0.0);
        *lock(&self.session) = UploadSession {
            object_key: object_key.clone(),
            size_bytes,
            deadline_ms,
            progress_percent: 0.0,
            state: UploadState::Uploading,
        };

        let cancel = CancellationToken::new();

        let progress_task = tokio::spawn(progress_loop(
            UploadProgressModel::new(size_bytes),
            Arc::clone(&self.session),
            self.progress_tx.clone(),
            cancel.child_token(),
        ));

        let mut put_task = tokio::spawn({
            let store = Arc::clone(&self.store);
            let key = object_key.clone();
            async move { store.put_object(&key, &bytes).await }
        });

        let mut existence_task = tokio::spawn(wait_for_object(
            Arc::clone(&self.store),
            object_key.clone(),
            cancel.child_token(),
        ));

        let outcome = tokio::select! {
            put = &mut put_task => match put {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(CapburnError::UploadApiError(format!("{e:#}"))),
                Err(e) => Err(CapburnError::UploadApiError(format!("upload task aborted: {e}"))),
            },
            _ = &mut existence_task => {
                tracing::info!(
                    "object {} visible in storage before the transfer call returned",
                    object_key
                );
                Ok(())
            }
            _ = sleep(Duration::from_millis(deadline_ms)) => {
                Err(CapburnError::UploadTimeout { deadline_ms })
            }
        };

        // Clear timers and signal the losers on every exit path, so no stale
        // tick or poll result lands after the session settles.
        cancel.cancel();
        progress_task.abort();
        let _ = progress_task.await;

        match outcome {
            Ok(()) => {
                lock(&self.session).state = UploadState::Verifying;
                let public_url = self.store.public_url(&object_key);

                {
                    let mut session = lock(&self.session);
                    session.state = UploadState::Succeeded;
                    session.progress_percent = 100.0;
                }
                let _ = self.progress_tx.send(100.0);

                tracing::info!("upload succeeded: {}", public_url);
                Ok(UploadOutcome {
                    object_key,
                    public_url,
                })
            }
            Err(err) => {
                {
                    let mut session = lock(&self.session);
                    session.state = UploadState::Failed;
                    session.progress_percent = 0.0;
                }
                let _ = self.progress_tx.send(0.0);

                tracing::warn!("upload failed: {}", err);
                Err(err)
            }
        }
    }
}

fn lock(session: &Arc<Mutex<UploadSession>>) -> MutexGuard<'_, UploadSession> {
    session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Resolve once an object with the expected key appears under its prefix.
///
/// List errors are logged and retried on the next interval; only the race
/// deadline bounds this loop.
async fn wait_for_object<S: ObjectStore>(store: Arc<S>, key: String, cancel: CancellationToken) {
    let prefix = key
        .rsplit_once('/')
        .map(|(parent, _)| format!("{parent}/"))
        .unwrap_or_default();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(EXISTENCE_POLL_INTERVAL) => {}
        }

        match store.list(&prefix).await {
            Ok(names) => {
                if names.iter().any(|name| name == &key) {
                    return;
                }
            }
            Err(e) => tracing::debug!("existence check failed: {e:#}"),
        }
    }
}

async fn progress_loop(
    mut model: UploadProgressModel,
    session: Arc<Mutex<UploadSession>>,
    tx: watch::Sender<f64>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = sleep(PROGRESS_TICK) => {}
        }

        let percent = model.tick();
        lock(&session).progress_percent = percent;
        if tx.send(percent).is_err() {
            return;
        }
    }
}

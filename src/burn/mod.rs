//! Burn pipeline: submits a caption burn-in job to the remote compute
//! backend and polls it to a terminal state.
//!
//! Submission returns either an opaque job id to poll, or, for simpler
//! backends, the finished video address directly (in which case the poller
//! is bypassed). In-flight jobs are keyed by a content fingerprint so two
//! concurrent submissions for the same video and style share one poll loop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};

use crate::signing::LambdaInvoker;
use crate::CapburnError;

/// Status checks before the job is declared timed out
pub const MAX_ATTEMPTS: u32 = 120;

/// Fixed delay between status checks (~10 minutes max wall time)
pub const POLL_DELAY: Duration = Duration::from_secs(5);

/// Assumed total duration for the cosmetic progress estimate
pub const ASSUMED_TOTAL_SECS: f64 = 120.0;

/// Job lifecycle; no transition leaves a terminal state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Submitted,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::TimedOut)
    }
}

/// Snapshot of one remote burn-in job
#[derive(Debug, Clone)]
pub struct TranscodeJob {
    pub job_id: String,
    pub status: JobStatus,

    /// Last status string the remote reported, for display
    pub status_label: String,

    /// Set iff `status == Succeeded`
    pub result_url: Option<String>,

    pub attempts_used: u32,
    pub started_at: Instant,
}

impl TranscodeJob {
    fn new(job_id: String) -> Self {
        Self {
            job_id,
            status: JobStatus::Submitted,
            status_label: "submitted".to_string(),
            result_url: None,
            attempts_used: 0,
            started_at: Instant::now(),
        }
    }
}

/// Burn-in request payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BurnRequest {
    pub video_path: String,
    pub subtitles: String,
    pub style_prompt: String,
}

/// Submission response: a job id to poll, or a finished video directly
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub prediction_id: Option<String>,
    pub success: Option<bool>,
    pub video_url: Option<String>,
}

/// Status-check response
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub status: Option<String>,
    pub video_url: Option<String>,
}

/// Wire access for job submission and status checks, behind a trait so the
/// poll state machine can run against scripted stubs.
#[async_trait]
pub trait JobTransport: Send + Sync {
    async fn submit(&self, request: &BurnRequest) -> Result<SubmitResponse>;
    async fn check(&self, job_id: &str) -> Result<StatusResponse>;
}

/// Production transport riding the signed Lambda invoker
pub struct LambdaJobTransport {
    invoker: LambdaInvoker,
    function: String,
}

impl LambdaJobTransport {
    pub fn new(invoker: LambdaInvoker, function: impl Into<String>) -> Self {
        Self {
            invoker,
            function: function.into(),
        }
    }
}

#[async_trait]
impl JobTransport for LambdaJobTransport {
    async fn submit(&self, request: &BurnRequest) -> Result<SubmitResponse> {
        let payload = serde_json::to_value(request).context("Failed to build submit payload")?;
        let response = self.invoker.invoke(&self.function, &payload).await?;
        serde_json::from_value(response).context("Failed to parse submit response")
    }

    async fn check(&self, job_id: &str) -> Result<StatusResponse> {
        let payload = serde_json::json!({ "predictionId": job_id });
        let response = self.invoker.invoke(&self.function, &payload).await?;
        serde_json::from_value(response).context("Failed to parse status response")
    }
}

/// What `submit` resolved to
pub enum SubmitOutcome {
    /// Job accepted; watch the handle for status snapshots
    Polling(JobHandle),

    /// The backend finished synchronously; no polling needed
    Completed(String),
}

/// Subscription to one in-flight job's status snapshots
#[derive(Clone)]
pub struct JobHandle {
    pub fingerprint: String,
    pub updates: watch::Receiver<TranscodeJob>,
}

type InFlightMap = Arc<Mutex<HashMap<String, JobHandle>>>;

/// Submits burn jobs and drives them to a terminal state.
pub struct BurnPipeline<T: JobTransport + 'static> {
    transport: Arc<T>,
    in_flight: InFlightMap,
}

impl<T: JobTransport + 'static> BurnPipeline<T> {
    pub fn new(transport: Arc<T>) -> Self {
        Self {
            transport,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Content fingerprint keying in-flight jobs: same video, style, and
    /// subtitle text means the same job.
    pub fn fingerprint(request: &BurnRequest) -> String {
        let mut hasher = Sha256::new();
        hasher.update(request.video_path.as_bytes());
        hasher.update([0]);
        hasher.update(request.style_prompt.as_bytes());
        hasher.update([0]);
        hasher.update(request.subtitles.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Submit a burn request, reusing the poll loop of an identical job that
    /// is already in flight.
    pub async fn submit(&self, request: &BurnRequest) -> Result<SubmitOutcome, CapburnError> {
        let fingerprint = Self::fingerprint(request);

        if let Some(handle) = lock_map(&self.in_flight).get(&fingerprint) {
            tracing::info!(
                "burn job already in flight for this content, reusing {}",
                handle.updates.borrow().job_id
            );
            return Ok(SubmitOutcome::Polling(handle.clone()));
        }

        let response = self
            .transport
            .submit(request)
            .await
            .map_err(|e| CapburnError::JobFailed(format!("submission failed: {e:#}")))?;

        // Compatibility path: a backend that transcodes synchronously
        // returns the finished video with no job id.
        if let Some(url) = response.video_url {
            tracing::info!("backend returned a finished video synchronously");
            return Ok(SubmitOutcome::Completed(url));
        }

        let job_id = response.prediction_id.ok_or_else(|| {
            CapburnError::JobFailed("backend returned neither a job id nor a result".into())
        })?;

        tracing::info!("burn job submitted: {}", job_id);

        let (tx, rx) = watch::channel(TranscodeJob::new(job_id.clone()));
        let handle = JobHandle {
            fingerprint: fingerprint.clone(),
            updates: rx,
        };

        lock_map(&self.in_flight).insert(fingerprint.clone(), handle.clone());

        tokio::spawn(poll_job(
            Arc::clone(&self.transport),
            job_id,
            tx,
            Arc::clone(&self.in_flight),
            fingerprint,
        ));

        Ok(SubmitOutcome::Polling(handle))
    }

    /// Submit and wait for the terminal state, invoking `on_update` for each
    /// status snapshot along the way. Returns the finished video address.
    pub async fn run<F>(
        &self,
        request: &BurnRequest,
        mut on_update: F,
    ) -> Result<String, CapburnError>
    where
        F: FnMut(&TranscodeJob),
    {
        let mut handle = match self.submit(request).await? {
            SubmitOutcome::Completed(url) => return Ok(url),
            SubmitOutcome::Polling(handle) => handle,
        };

        loop {
            let job = handle.updates.borrow_and_update().clone();
            on_update(&job);

            match job.status {
                JobStatus::Succeeded => {
                    return job.result_url.ok_or_else(|| {
                        CapburnError::JobFailed("job succeeded without a result address".into())
                    });
                }
                JobStatus::Failed => return Err(CapburnError::JobFailed(job.status_label)),
                JobStatus::TimedOut => {
                    return Err(CapburnError::JobTimedOut {
                        attempts: job.attempts_used,
                    })
                }
                JobStatus::Submitted | JobStatus::Running => {}
            }

            if handle.updates.changed().await.is_err() {
                return Err(CapburnError::JobFailed(
                    "status stream ended before a terminal state".into(),
                ));
            }
        }
    }
}

fn lock_map(map: &InFlightMap) -> std::sync::MutexGuard<'_, HashMap<String, JobHandle>> {
    map.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Fixed-delay poll loop: one outstanding status request at a time, up to
/// [`MAX_ATTEMPTS`] checks. A result address means success; an explicit
/// failure status stops early; exhaustion yields `TimedOut`.
async fn poll_job<T: JobTransport>(
    transport: Arc<T>,
    job_id: String,
    tx: watch::Sender<TranscodeJob>,
    in_flight: InFlightMap,
    fingerprint: String,
) {
    let mut job = TranscodeJob::new(job_id);

    for attempt in 1..=MAX_ATTEMPTS {
        sleep(POLL_DELAY).await;
        job.attempts_used = attempt;

        match transport.check(&job.job_id).await {
            Ok(status) => {
                if let Some(url) = status.video_url {
                    job.status = JobStatus::Succeeded;
                    job.status_label = "succeeded".to_string();
                    job.result_url = Some(url);
                    break;
                }

                let label = status.status.unwrap_or_else(|| "processing".to_string());
                if matches!(
                    label.to_ascii_lowercase().as_str(),
                    "failed" | "error" | "canceled"
                ) {
                    job.status = JobStatus::Failed;
                    job.status_label = label;
                    break;
                }

                job.status = JobStatus::Running;
                job.status_label = label;
            }
            Err(e) => {
                // A flaky status endpoint is not fatal; the attempt budget
                // bounds how long we keep trying.
                tracing::debug!("status check {attempt} failed: {e:#}");
                job.status = JobStatus::Running;
                job.status_label = "status check failed".to_string();
            }
        }

        let _ = tx.send(job.clone());
    }

    if !job.status.is_terminal() {
        job.status = JobStatus::TimedOut;
        job.status_label = "timed out".to_string();
    }

    lock_map(&in_flight).remove(&fingerprint);
    let _ = tx.send(job);
}

/// Cosmetic progress estimate for a running job, independent of the real
/// completion signal: time-based with a front-loaded early curve, clamped to
/// 95 until a terminal signal arrives.
pub fn estimated_progress(elapsed_secs: f64) -> f64 {
    let raw = (elapsed_secs / ASSUMED_TOTAL_SECS).min(0.95) * 100.0;
    let curved = if raw < 50.0 { raw * 1.2 } else { raw };
    curved.min(95.0)
}

/// Download a finished video to a local file.
pub async fn download_result(url: &str, path: &Path) -> Result<u64> {
    tracing::info!("downloading result to {}", path.display());

    let response = reqwest::get(url).await.context("Failed to download result")?;
    if !response.status().is_success() {
        anyhow::bail!("Failed to download result: HTTP {}", response.status());
    }

    let mut file = fs_err::File::create(path)?;
    let mut written = 0u64;
    let mut stream = response.bytes_stream();

    use std::io::Write;

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk)?;
        written += chunk.len() as u64;
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> BurnRequest {
        BurnRequest {
            video_path: "https://cdn.test/owner/clip.mp4".to_string(),
            subtitles: "1\n00:00:01,000 --> 00:00:02,000\nHi\n".to_string(),
            style_prompt: "bold yellow".to_string(),
        }
    }

    #[test]
    fn test_fingerprint_is_stable_and_sensitive() {
        let base = BurnPipeline::<ScriptedTransport>::fingerprint(&request());
        assert_eq!(base, BurnPipeline::<ScriptedTransport>::fingerprint(&request()));

        let mut other_style = request();
        other_style.style_prompt = "plain white".to_string();
        assert_ne!(base, BurnPipeline::<ScriptedTransport>::fingerprint(&other_style));

        let mut other_video = request();
        other_video.video_path = "https://cdn.test/owner/other.mp4".to_string();
        assert_ne!(base, BurnPipeline::<ScriptedTransport>::fingerprint(&other_video));
    }

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Submitted.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Succeeded.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::TimedOut.is_terminal());
    }

    #[test]
    fn test_estimated_progress_curve() {
        assert_eq!(estimated_progress(0.0), 0.0);
        // 30s of a 120s job: 25 raw, front-loaded to 30
        assert!((estimated_progress(30.0) - 30.0).abs() < 1e-9);
        // past the assumed total, clamped to 95
        assert_eq!(estimated_progress(600.0), 95.0);
    }

    /// Transport whose status endpoint succeeds after a scripted number of
    /// checks (or never, when `succeed_after` is 0).
    struct ScriptedTransport {
        succeed_after: u32,
        submit_calls: Mutex<u32>,
        check_calls: Mutex<u32>,
        sync_result: Option<String>,
    }

    impl ScriptedTransport {
        fn new(succeed_after: u32) -> Arc<Self> {
            Arc::new(Self {
                succeed_after,
                submit_calls: Mutex::new(0),
                check_calls: Mutex::new(0),
                sync_result: None,
            })
        }

        fn synchronous(url: &str) -> Arc<Self> {
            Arc::new(Self {
                succeed_after: 0,
                submit_calls: Mutex::new(0),
                check_calls: Mutex::new(0),
                sync_result: Some(url.to_string()),
            })
        }
    }

    #[async_trait]
    impl JobTransport for ScriptedTransport {
        async fn submit(&self, _request: &BurnRequest) -> Result<SubmitResponse> {
            *self.submit_calls.lock().unwrap() += 1;

            if let Some(url) = &self.sync_result {
                return Ok(SubmitResponse {
                    prediction_id: None,
                    success: Some(true),
                    video_url: Some(url.clone()),
                });
            }

            Ok(SubmitResponse {
                prediction_id: Some("job-1".to_string()),
                success: None,
                video_url: None,
            })
        }

        async fn check(&self, _job_id: &str) -> Result<StatusResponse> {
            let calls = {
                let mut calls = self.check_calls.lock().unwrap();
                *calls += 1;
                *calls
            };

            if self.succeed_after > 0 && calls >= self.succeed_after {
                Ok(StatusResponse {
                    status: Some("succeeded".to_string()),
                    video_url: Some("https://cdn.test/results/out.mp4".to_string()),
                })
            } else {
                Ok(StatusResponse {
                    status: Some("Running".to_string()),
                    video_url: None,
                })
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_succeeds_on_final_attempt() {
        let transport = ScriptedTransport::new(MAX_ATTEMPTS);
        let pipeline = BurnPipeline::new(Arc::clone(&transport));

        let mut last_seen = None;
        let url = pipeline
            .run(&request(), |job| last_seen = Some(job.clone()))
            .await
            .unwrap();

        assert_eq!(url, "https://cdn.test/results/out.mp4");
        let last = last_seen.unwrap();
        assert_eq!(last.status, JobStatus::Succeeded);
        assert_eq!(last.attempts_used, MAX_ATTEMPTS);
        assert!(last.result_url.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_times_out_after_attempt_budget() {
        let transport = ScriptedTransport::new(0);
        let pipeline = BurnPipeline::new(Arc::clone(&transport));

        let err = pipeline.run(&request(), |_| {}).await.unwrap_err();

        assert!(matches!(
            err,
            CapburnError::JobTimedOut {
                attempts: MAX_ATTEMPTS
            }
        ));
        assert_eq!(*transport.check_calls.lock().unwrap(), MAX_ATTEMPTS);
    }

    #[tokio::test(start_paused = true)]
    async fn test_synchronous_backend_bypasses_poller() {
        let transport = ScriptedTransport::synchronous("https://cdn.test/results/sync.mp4");
        let pipeline = BurnPipeline::new(Arc::clone(&transport));

        let url = pipeline.run(&request(), |_| {}).await.unwrap();

        assert_eq!(url, "https://cdn.test/results/sync.mp4");
        assert_eq!(*transport.check_calls.lock().unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_submission_reuses_in_flight_job() {
        let transport = ScriptedTransport::new(1);
        let pipeline = BurnPipeline::new(Arc::clone(&transport));

        let first = pipeline.submit(&request()).await.unwrap();
        let second = pipeline.submit(&request()).await.unwrap();

        assert_eq!(*transport.submit_calls.lock().unwrap(), 1);
        match (first, second) {
            (SubmitOutcome::Polling(a), SubmitOutcome::Polling(b)) => {
                assert_eq!(a.fingerprint, b.fingerprint);
            }
            _ => panic!("both submissions should be polling the same job"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_remote_failure() {
        struct FailingTransport;

        #[async_trait]
        impl JobTransport for FailingTransport {
            async fn submit(&self, _request: &BurnRequest) -> Result<SubmitResponse> {
                Ok(SubmitResponse {
                    prediction_id: Some("job-2".to_string()),
                    success: None,
                    video_url: None,
                })
            }

            async fn check(&self, _job_id: &str) -> Result<StatusResponse> {
                Ok(StatusResponse {
                    status: Some("failed".to_string()),
                    video_url: None,
                })
            }
        }

        let pipeline = BurnPipeline::new(Arc::new(FailingTransport));
        let err = pipeline.run(&request(), |_| {}).await.unwrap_err();

        assert!(matches!(err, CapburnError::JobFailed(_)));
    }
}

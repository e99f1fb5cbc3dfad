//! Job dispatcher for the Whisper-AT API
//!
//! This module implements the FIFO queue in front of the loaded model
//! instances. The model is the one resource requiring exclusive-access
//! discipline: each instance runs exactly one job at a time, so incoming
//! requests queue here and one consumer task per instance pulls them off in
//! submission order (competing consumers over a single shared queue). The
//! queue is bounded; overload is answered with a fast, explicit rejection
//! instead of unbounded buffering.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::sync::{oneshot, Mutex, Notify};
use uuid::Uuid;

use crate::audio::NormalizedAudio;
use crate::engine::{EngineError, SpeechEngine};
use crate::models::{TranscriptionParams, TranscriptionResult};

/// Dispatcher error types
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Backpressure signal: the queue is at capacity
    #[error("transcription queue is full ({0} jobs waiting)")]
    QueueFull(usize),
    /// The job was canceled; never surfaced to a client that itself
    /// initiated the cancellation
    #[error("job was canceled before completion")]
    Canceled,
    /// The caller's wait deadline passed before the job resolved
    #[error("transcription timed out after {0} seconds")]
    Timeout(u64),
    /// The consumer side vanished without resolving the job
    #[error("job result channel closed unexpectedly")]
    ChannelClosed,
    /// Inference failed; propagated, never retried here
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// A transcription job from enqueue until completion or expiry
#[derive(Debug)]
pub struct TranscriptionJob {
    /// Unique identifier for the job
    pub id: Uuid,
    /// Normalized audio, consumed exactly once by the engine
    pub audio: NormalizedAudio,
    /// Transcription parameters
    pub params: TranscriptionParams,
    /// When the job entered the queue
    pub submitted_at: DateTime<Utc>,
}

impl TranscriptionJob {
    pub fn new(audio: NormalizedAudio, params: TranscriptionParams) -> Self {
        Self {
            id: Uuid::new_v4(),
            audio,
            params,
            submitted_at: Utc::now(),
        }
    }
}

/// Queue entry: the job plus its completion channel and cancel flag
struct QueuedJob {
    job: TranscriptionJob,
    canceled: Arc<AtomicBool>,
    result_tx: oneshot::Sender<Result<TranscriptionResult, DispatchError>>,
}

/// Caller-side handle to a submitted job
///
/// Dropping the handle (client disconnect) cancels the job: a still-queued
/// entry is skipped without touching a model instance; a running job
/// finishes (inference is not preemptible) and its result is discarded.
pub struct JobHandle {
    id: Uuid,
    canceled: Arc<AtomicBool>,
    result_rx: oneshot::Receiver<Result<TranscriptionResult, DispatchError>>,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Flag the job as canceled without waiting for it
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
    }

    /// Block the calling context until the job resolves, up to `timeout`.
    /// The timeout floor guarantees a pending handle never hangs forever;
    /// on expiry the job is also canceled.
    pub async fn wait(mut self, timeout: Duration) -> Result<TranscriptionResult, DispatchError> {
        match tokio::time::timeout(timeout, &mut self.result_rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(DispatchError::ChannelClosed),
            Err(_) => {
                self.cancel();
                Err(DispatchError::Timeout(timeout.as_secs()))
            }
        }
    }
}

impl Drop for JobHandle {
    fn drop(&mut self) {
        self.canceled.store(true, Ordering::SeqCst);
    }
}

/// Internal state: the shared FIFO plus a running-job counter
struct DispatchState {
    queue: VecDeque<QueuedJob>,
    running: usize,
}

/// Job dispatcher: bounded FIFO queue plus one consumer per model instance
pub struct JobDispatcher {
    state: Arc<Mutex<DispatchState>>,
    notify: Arc<Notify>,
    capacity: usize,
    instances: AtomicUsize,
}

impl JobDispatcher {
    /// Create a dispatcher with the given queue capacity. Consumers are
    /// attached later via [`JobDispatcher::start`], once model loading has
    /// finished.
    pub fn new(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(Mutex::new(DispatchState {
                queue: VecDeque::new(),
                running: 0,
            })),
            notify: Arc::new(Notify::new()),
            capacity,
            instances: AtomicUsize::new(0),
        })
    }

    /// Spawn one consumer task per loaded engine instance
    pub fn start(self: &Arc<Self>, engines: Vec<Arc<dyn SpeechEngine>>) {
        self.instances.store(engines.len(), Ordering::SeqCst);
        for (index, engine) in engines.into_iter().enumerate() {
            let state = Arc::clone(&self.state);
            let notify = Arc::clone(&self.notify);
            tokio::spawn(async move {
                worker_loop(index, state, notify, engine).await;
            });
        }
    }

    /// Enqueue a job, failing fast when the queue is at capacity
    pub async fn submit(&self, job: TranscriptionJob) -> Result<JobHandle, DispatchError> {
        let mut state = self.state.lock().await;

        // Canceled entries occupy slots until a consumer reaps them; resolve
        // them now so stale cancellations cannot hold the queue shut.
        let mut kept = VecDeque::with_capacity(state.queue.len());
        for queued in state.queue.drain(..) {
            if queued.canceled.load(Ordering::SeqCst) {
                debug!("Purging canceled job {} from queue", queued.job.id);
                let _ = queued.result_tx.send(Err(DispatchError::Canceled));
            } else {
                kept.push_back(queued);
            }
        }
        state.queue = kept;

        if state.queue.len() >= self.capacity {
            warn!(
                "Rejecting job {}: queue at capacity ({})",
                job.id, self.capacity
            );
            return Err(DispatchError::QueueFull(state.queue.len()));
        }

        let id = job.id;
        let canceled = Arc::new(AtomicBool::new(false));
        let (result_tx, result_rx) = oneshot::channel();
        state.queue.push_back(QueuedJob {
            job,
            canceled: Arc::clone(&canceled),
            result_tx,
        });
        let depth = state.queue.len();
        drop(state);

        self.notify.notify_one();
        info!("Job {} queued at position {}", id, depth);

        Ok(JobHandle {
            id,
            canceled,
            result_rx,
        })
    }

    /// Number of jobs currently waiting in the queue
    pub async fn queue_len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    /// Number of jobs currently running on a model instance
    pub async fn running_count(&self) -> usize {
        self.state.lock().await.running
    }

    /// Configured queue capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of consumer tasks attached via [`JobDispatcher::start`]
    pub fn instance_count(&self) -> usize {
        self.instances.load(Ordering::SeqCst)
    }
}

/// Consumer loop for one model instance. Pulls jobs in FIFO order; the
/// engine reference is owned by this task alone, which is what guarantees
/// one in-flight invocation per instance.
async fn worker_loop(
    index: usize,
    state: Arc<Mutex<DispatchState>>,
    notify: Arc<Notify>,
    engine: Arc<dyn SpeechEngine>,
) {
    info!("Model instance {} consuming the job queue", index);

    loop {
        let next = {
            let mut state = state.lock().await;
            loop {
                match state.queue.pop_front() {
                    Some(queued) if queued.canceled.load(Ordering::SeqCst) => {
                        // Canceled before dequeue: the engine is never invoked
                        debug!("Job {} canceled before start, skipping", queued.job.id);
                        let _ = queued.result_tx.send(Err(DispatchError::Canceled));
                    }
                    other => break other,
                }
            }
        };

        let Some(queued) = next else {
            notify.notified().await;
            continue;
        };

        {
            let mut state = state.lock().await;
            state.running += 1;
            // Notify stores at most one permit; hand the wakeup on while
            // work remains so sibling instances keep draining
            if !state.queue.is_empty() {
                notify.notify_one();
            }
        }

        let job = &queued.job;
        let waited = Utc::now()
            .signed_duration_since(job.submitted_at)
            .num_milliseconds();
        info!(
            "Job {} running on instance {} after {} ms in queue",
            job.id, index, waited
        );

        let started = std::time::Instant::now();
        let outcome = engine.transcribe(&job.audio, &job.params).await;
        let elapsed = started.elapsed().as_secs_f64();

        {
            let mut state = state.lock().await;
            state.running -= 1;
        }

        let runner_lost = matches!(&outcome, Err(EngineError::Unavailable(_)));

        if queued.canceled.load(Ordering::SeqCst) {
            // Inference is not preemptible; it ran to completion and the
            // result is discarded
            info!("Job {} canceled while running, result discarded", queued.job.id);
            let _ = queued.result_tx.send(Err(DispatchError::Canceled));
        } else {
            match outcome {
                Ok(result) => {
                    info!("Job {} completed in {:.2}s", queued.job.id, elapsed);
                    let _ = queued.result_tx.send(Ok(result));
                }
                Err(e) => {
                    error!("Job {} failed: {}", queued.job.id, e);
                    let _ = queued.result_tx.send(Err(DispatchError::Engine(e)));
                }
            }
        }

        if runner_lost {
            // Readiness never reverts to LOADING; a dead runner ends the
            // process so the supervisor restarts it in a clean state
            error!("Model instance {} lost its runner, shutting down", index);
            std::process::exit(1);
        }
    }
}

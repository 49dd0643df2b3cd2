//! Background training and non-blocking prediction for a shared session.
//!
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use tokio::{
    sync::{oneshot, watch, Mutex},
    task::JoinHandle,
};

use crate::{
    error::{Result, SessionError},
    predictor::{PredictInput, PredictOutput},
    session::{Completion, Session},
    trainer::{TrainConfig, TrainingOutcome},
};

pub type SharedSession = Arc<Mutex<Session>>;

pub fn shared(session: Session) -> SharedSession {
    Arc::new(Mutex::new(session))
}

/// Handle to a training run executing off the async runtime.
pub struct TrainingHandle {
    pub run_id: u64,
    pub handle: JoinHandle<Result<Completion>>,
}

/// Move the session to `Training` and run the job on the blocking pool.
///
/// The transition happens before this function returns. When the job
/// finishes its outcome goes through [`Session::finish_training`], which
/// drops it if the session was reset in the meantime.
pub async fn spawn_training(session: SharedSession, config: TrainConfig) -> Result<TrainingHandle> {
    let job = session.lock().await.begin_training(config)?;
    let run_id = job.run_id();

    let handle = tokio::spawn(async move {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        tokio::task::spawn_blocking(move || {
            job.run(|outcome| {
                outcome_tx.send(outcome).ok();
            })
        });

        let outcome = outcome_rx.await.unwrap_or_else(|_| TrainingOutcome {
            run_id,
            result: Err(SessionError::Worker(format!(
                "training run {run_id} ended without a result"
            ))),
            history: Vec::new(),
        });

        session.lock().await.finish_training(outcome)
    });

    Ok(TrainingHandle { run_id, handle })
}

/// Latest prediction published by a [`PredictWorker`].
#[derive(Debug, Clone)]
pub struct PredictResult {
    /// Sequence number of the request this answers.
    pub seq: u64,
    pub output: std::result::Result<PredictOutput, Arc<SessionError>>,
}

/// Runs predictions on a separate task with last-result-wins semantics.
///
/// A new request replaces any request the worker has not picked up yet, so
/// callers can fire a request per frame without building a queue. Results
/// are published on a watch channel; only the newest one is kept.
pub struct PredictWorker {
    request_tx: watch::Sender<Option<(u64, PredictInput)>>,
    result_rx: watch::Receiver<Option<PredictResult>>,
    next_seq: AtomicU64,
    handle: JoinHandle<()>,
}

impl PredictWorker {
    pub fn spawn(session: SharedSession) -> Self {
        let (request_tx, mut request_rx) = watch::channel(None::<(u64, PredictInput)>);
        let (result_tx, result_rx) = watch::channel(None);

        let handle = tokio::spawn(async move {
            while request_rx.changed().await.is_ok() {
                let request = request_rx.borrow_and_update().clone();
                let Some((seq, input)) = request else {
                    continue;
                };

                let predictor = session.lock().await.predictor();
                let output = predictor
                    .and_then(|predictor| predictor.predict(input))
                    .map_err(Arc::new);
                result_tx.send_replace(Some(PredictResult { seq, output }));
            }
            log::debug!("Prediction worker stopped");
        });

        Self {
            request_tx,
            result_rx,
            next_seq: AtomicU64::new(1),
            handle,
        }
    }

    /// Submit a request without waiting. Returns its sequence number.
    pub fn request(&self, input: impl Into<PredictInput>) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.request_tx.send_replace(Some((seq, input.into())));
        seq
    }

    pub fn latest(&self) -> Option<PredictResult> {
        self.result_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<PredictResult>> {
        self.result_rx.clone()
    }
}

impl Drop for PredictWorker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

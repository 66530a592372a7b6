//! One analysis pipeline: a dedicated worker thread running one job at a
//! time, fed from a queue the coordinator controls.
//!
//! Lifecycle contract: exactly one of `Completed`/`Failed` is emitted per
//! enqueued job, progress is informational only, and after `terminate()` no
//! further events are delivered for the pipeline.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio::adapters::{
    AnalysisError, AnalysisKind, BeatDetector, ClipDetector, Fingerprinter, KeyDetector,
    RawResult,
};
use crate::pipeline::memory::MemoryGauge;
use crate::{LibraryError, Result};

/// A queued unit of work. The sample buffer is owned by the job: enqueueing
/// hands the caller's buffer over for good.
pub struct AnalysisJob {
    pub track_id: String,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Signal variant the samples came from (e.g. an isolated stem).
    pub variant: Option<String>,
}

impl AnalysisJob {
    pub fn byte_size(&self) -> u64 {
        (self.samples.len() * std::mem::size_of::<f32>()) as u64
    }
}

#[derive(Debug)]
pub enum PipelineEvent {
    Progress {
        kind: AnalysisKind,
        track_id: String,
        percent: u8,
    },
    Completed {
        kind: AnalysisKind,
        track_id: String,
        result: RawResult,
    },
    Failed {
        kind: AnalysisKind,
        track_id: String,
        message: String,
    },
}

impl PipelineEvent {
    pub fn kind(&self) -> AnalysisKind {
        match self {
            PipelineEvent::Progress { kind, .. }
            | PipelineEvent::Completed { kind, .. }
            | PipelineEvent::Failed { kind, .. } => *kind,
        }
    }
}

/// The analyzer a pipeline's worker runs.
pub enum AnalyzerBackend {
    Beat(Arc<dyn BeatDetector>),
    Key(Arc<dyn KeyDetector>),
    Clip(Arc<dyn ClipDetector>),
    Fingerprint(Arc<dyn Fingerprinter>),
}

impl AnalyzerBackend {
    pub fn kind(&self) -> AnalysisKind {
        match self {
            AnalyzerBackend::Beat(_) => AnalysisKind::Beat,
            AnalyzerBackend::Key(_) => AnalysisKind::Key,
            AnalyzerBackend::Clip(_) => AnalysisKind::Clip,
            AnalyzerBackend::Fingerprint(_) => AnalysisKind::Fingerprint,
        }
    }

    fn run(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> std::result::Result<RawResult, AnalysisError> {
        match self {
            AnalyzerBackend::Beat(b) => b.detect(samples, sample_rate).map(RawResult::Beat),
            AnalyzerBackend::Key(k) => k.detect(samples, sample_rate).map(RawResult::Key),
            AnalyzerBackend::Clip(c) => c.detect(samples, sample_rate).map(RawResult::Clip),
            AnalyzerBackend::Fingerprint(f) => {
                f.fingerprint(samples, sample_rate).map(RawResult::Fingerprint)
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Byte budget the gauge snapshot is compared against before dispatch.
    pub budget_bytes: u64,
    /// How long a deferred dispatch waits before the next attempt.
    pub retry_delay: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            budget_bytes: 1536 * 1024 * 1024,
            retry_delay: Duration::from_secs(2),
        }
    }
}

pub struct Pipeline {
    kind: AnalysisKind,
    config: PipelineConfig,
    gauge: Arc<MemoryGauge>,
    events: Sender<PipelineEvent>,
    job_tx: Option<Sender<AnalysisJob>>,
    worker: Option<JoinHandle<()>>,
    queue: VecDeque<AnalysisJob>,
    in_flight: Option<(String, u64)>,
    retry_at: Option<Instant>,
    expected: usize,
    finished: usize,
    terminated: bool,
}

impl Pipeline {
    /// Spawns the worker thread and waits for its ready signal.
    pub fn start(
        backend: AnalyzerBackend,
        config: PipelineConfig,
        gauge: Arc<MemoryGauge>,
        events: Sender<PipelineEvent>,
    ) -> Result<Self> {
        let kind = backend.kind();
        let (job_tx, job_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let worker_events = events.clone();
        let worker = thread::Builder::new()
            .name(format!("analysis-{}", kind.label()))
            .spawn(move || worker_loop(backend, job_rx, worker_events, ready_tx))
            .map_err(|e| {
                LibraryError::Pipeline(format!(
                    "failed to spawn {} worker: {}",
                    kind.label(),
                    e
                ))
            })?;
        ready_rx.recv().map_err(|_| {
            LibraryError::Pipeline(format!("{} worker exited before ready", kind.label()))
        })?;
        log::debug!("{} pipeline ready", kind.label());

        Ok(Self {
            kind,
            config,
            gauge,
            events,
            job_tx: Some(job_tx),
            worker: Some(worker),
            queue: VecDeque::new(),
            in_flight: None,
            retry_at: None,
            expected: 0,
            finished: 0,
            terminated: false,
        })
    }

    pub fn kind(&self) -> AnalysisKind {
        self.kind
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn finished(&self) -> usize {
        self.finished
    }

    /// Queues a job; dispatches right away when the worker is idle.
    pub fn enqueue(&mut self, job: AnalysisJob) {
        if self.terminated {
            return;
        }
        self.expected += 1;
        self.queue.push_back(job);
        self.pump();
    }

    /// Attempts to hand the next queued job to the worker, honoring the
    /// memory budget. Over budget: postpone, never reject.
    pub fn pump(&mut self) {
        if self.terminated || self.in_flight.is_some() || self.queue.is_empty() {
            return;
        }
        let bytes = self.queue.front().map(AnalysisJob::byte_size).unwrap_or(0);
        // A lone job always dispatches, or an oversized buffer would wedge
        // the whole pipeline.
        if self.gauge.in_use() > 0 && self.gauge.projected(bytes) > self.config.budget_bytes {
            if self.retry_at.is_none() {
                log::debug!(
                    "{} pipeline deferring dispatch ({} bytes in use)",
                    self.kind.label(),
                    self.gauge.in_use()
                );
            }
            self.retry_at = Some(Instant::now() + self.config.retry_delay);
            return;
        }

        let Some(job) = self.queue.pop_front() else {
            return;
        };
        let Some(tx) = self.job_tx.clone() else {
            return;
        };
        self.gauge.reserve(bytes);
        self.in_flight = Some((job.track_id.clone(), bytes));
        self.retry_at = None;
        if let Err(mpsc::SendError(job)) = tx.send(job) {
            self.gauge.release(bytes);
            self.in_flight = None;
            self.abandon(job);
        }
    }

    // The worker thread is gone: every remaining job fails as a batch and
    // the caller falls back per track.
    fn abandon(&mut self, job: AnalysisJob) {
        log::error!(
            "{} worker died; failing {} remaining jobs",
            self.kind.label(),
            self.queue.len() + 1
        );
        self.job_tx = None;
        let mut lost = vec![job];
        lost.extend(self.queue.drain(..));
        for job in lost {
            let _ = self.events.send(PipelineEvent::Failed {
                kind: self.kind,
                track_id: job.track_id,
                message: "analysis worker terminated unexpectedly".to_string(),
            });
        }
    }

    /// Coordinator callback after a `Completed`/`Failed` event of this kind;
    /// frees the buffer reservation and dispatches the next job.
    pub fn note_finished(&mut self, track_id: &str) {
        if self.terminated {
            return;
        }
        if let Some((active, bytes)) = &self.in_flight {
            if active == track_id {
                let bytes = *bytes;
                self.gauge.release(bytes);
                self.in_flight = None;
            }
        }
        self.finished += 1;
        self.pump();
    }

    pub fn is_complete(&self) -> bool {
        self.finished >= self.expected && self.in_flight.is_none() && self.queue.is_empty()
    }

    pub fn next_retry(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Re-attempts a deferred dispatch once its delay has elapsed.
    pub fn pump_if_due(&mut self, now: Instant) {
        if self.retry_at.is_some_and(|at| at <= now) {
            self.retry_at = None;
            self.pump();
        }
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Discards the queue and detaches the worker. Idempotent; no events of
    /// this kind are delivered afterwards.
    pub fn terminate(&mut self) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.queue.clear();
        self.retry_at = None;
        self.job_tx = None;
        if let Some((_, bytes)) = self.in_flight.take() {
            self.gauge.release(bytes);
        }
        // The worker exits on its own once the job channel closes.
        drop(self.worker.take());
        log::debug!("{} pipeline terminated", self.kind.label());
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn worker_loop(
    backend: AnalyzerBackend,
    jobs: Receiver<AnalysisJob>,
    events: Sender<PipelineEvent>,
    ready: Sender<()>,
) {
    let kind = backend.kind();
    let _ = ready.send(());

    while let Ok(job) = jobs.recv() {
        let track_id = job.track_id.clone();
        let _ = events.send(PipelineEvent::Progress {
            kind,
            track_id: track_id.clone(),
            percent: 0,
        });

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            backend.run(&job.samples, job.sample_rate)
        }));
        drop(job);

        let event = match outcome {
            Ok(Ok(result)) => {
                let _ = events.send(PipelineEvent::Progress {
                    kind,
                    track_id: track_id.clone(),
                    percent: 100,
                });
                PipelineEvent::Completed {
                    kind,
                    track_id,
                    result,
                }
            }
            Ok(Err(e)) => PipelineEvent::Failed {
                kind,
                track_id,
                message: e.to_string(),
            },
            Err(panic) => PipelineEvent::Failed {
                kind,
                track_id,
                message: panic_message(panic),
            },
        };
        if events.send(event).is_err() {
            break;
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("analyzer panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("analyzer panicked: {}", s)
    } else {
        "analyzer panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::adapters::BeatAnalysis;

    struct FakeBeat;

    impl BeatDetector for FakeBeat {
        fn detect(
            &self,
            samples: &[f32],
            _sample_rate: u32,
        ) -> std::result::Result<BeatAnalysis, AnalysisError> {
            if samples.len() == 13 {
                panic!("unlucky buffer");
            }
            if samples.is_empty() {
                return Err(AnalysisError::EmptyInput);
            }
            Ok(BeatAnalysis {
                beat_timestamps: vec![0.0, 0.5],
                bpm_estimate: samples.len() as f64,
                segment_bpms: Vec::new(),
                avg_confidence: 1.0,
            })
        }

        fn name(&self) -> &'static str {
            "fake-beat"
        }
    }

    fn job(id: &str, len: usize) -> AnalysisJob {
        AnalysisJob {
            track_id: id.to_string(),
            samples: vec![0.0; len],
            sample_rate: 44_100,
            variant: None,
        }
    }

    fn test_config(retry_ms: u64, budget: u64) -> PipelineConfig {
        PipelineConfig {
            budget_bytes: budget,
            retry_delay: Duration::from_millis(retry_ms),
        }
    }

    fn drain_until_finished(
        pipeline: &mut Pipeline,
        events: &Receiver<PipelineEvent>,
        expected: usize,
    ) -> Vec<PipelineEvent> {
        let mut seen = Vec::new();
        let mut finished = 0;
        while finished < expected {
            match events.recv_timeout(Duration::from_millis(200)) {
                Ok(event) => {
                    match &event {
                        PipelineEvent::Completed { track_id, .. }
                        | PipelineEvent::Failed { track_id, .. } => {
                            let track_id = track_id.clone();
                            finished += 1;
                            seen.push(event);
                            pipeline.note_finished(&track_id);
                            continue;
                        }
                        PipelineEvent::Progress { .. } => {}
                    }
                    seen.push(event);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => pipeline.pump_if_due(Instant::now()),
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }
        seen
    }

    #[test]
    fn exactly_one_terminal_event_per_job() {
        let (tx, rx) = mpsc::channel();
        let mut pipeline = Pipeline::start(
            AnalyzerBackend::Beat(Arc::new(FakeBeat)),
            test_config(10, u64::MAX),
            Arc::new(MemoryGauge::new()),
            tx,
        )
        .unwrap();

        for (id, len) in [("a", 4), ("b", 8), ("c", 16)] {
            pipeline.enqueue(job(id, len));
        }
        let events = drain_until_finished(&mut pipeline, &rx, 3);

        for id in ["a", "b", "c"] {
            let terminal: Vec<_> = events
                .iter()
                .filter(|e| match e {
                    PipelineEvent::Completed { track_id, .. }
                    | PipelineEvent::Failed { track_id, .. } => track_id == id,
                    _ => false,
                })
                .collect();
            assert_eq!(terminal.len(), 1, "track {} should finish exactly once", id);
        }
        assert!(pipeline.is_complete());
    }

    #[test]
    fn completions_follow_dispatch_order() {
        let (tx, rx) = mpsc::channel();
        let mut pipeline = Pipeline::start(
            AnalyzerBackend::Beat(Arc::new(FakeBeat)),
            test_config(10, u64::MAX),
            Arc::new(MemoryGauge::new()),
            tx,
        )
        .unwrap();

        for (id, len) in [("a", 4), ("b", 8), ("c", 16)] {
            pipeline.enqueue(job(id, len));
        }
        let events = drain_until_finished(&mut pipeline, &rx, 3);
        let order: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Completed { track_id, .. } => Some(track_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn progress_is_strictly_increasing_per_job() {
        let (tx, rx) = mpsc::channel();
        let mut pipeline = Pipeline::start(
            AnalyzerBackend::Beat(Arc::new(FakeBeat)),
            test_config(10, u64::MAX),
            Arc::new(MemoryGauge::new()),
            tx,
        )
        .unwrap();
        pipeline.enqueue(job("a", 4));
        let events = drain_until_finished(&mut pipeline, &rx, 1);
        let percents: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Progress { percent, .. } => Some(*percent),
                _ => None,
            })
            .collect();
        assert!(percents.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn panic_fails_only_the_active_job() {
        let (tx, rx) = mpsc::channel();
        let mut pipeline = Pipeline::start(
            AnalyzerBackend::Beat(Arc::new(FakeBeat)),
            test_config(10, u64::MAX),
            Arc::new(MemoryGauge::new()),
            tx,
        )
        .unwrap();

        pipeline.enqueue(job("bad", 13));
        pipeline.enqueue(job("good", 8));
        let events = drain_until_finished(&mut pipeline, &rx, 2);

        let failed: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                PipelineEvent::Failed { track_id, message, .. } => {
                    assert!(message.contains("panicked"));
                    Some(track_id.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(failed, vec!["bad"]);
        assert!(events.iter().any(|e| matches!(
            e,
            PipelineEvent::Completed { track_id, .. } if track_id == "good"
        )));
        assert!(pipeline.is_complete());
    }

    #[test]
    fn terminate_discards_queue_and_silences_events() {
        let (tx, rx) = mpsc::channel();
        let mut pipeline = Pipeline::start(
            AnalyzerBackend::Beat(Arc::new(FakeBeat)),
            test_config(10, u64::MAX),
            Arc::new(MemoryGauge::new()),
            tx,
        )
        .unwrap();

        pipeline.enqueue(job("a", 4));
        // Wait for the first job to finish, then cut the pipeline off.
        loop {
            match rx.recv_timeout(Duration::from_millis(200)).unwrap() {
                PipelineEvent::Completed { .. } => break,
                _ => continue,
            }
        }
        pipeline.terminate();
        pipeline.terminate(); // idempotent
        pipeline.enqueue(job("b", 8)); // ignored after terminate

        assert!(pipeline.is_terminated());
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(50)),
            Err(mpsc::RecvTimeoutError::Timeout) | Err(mpsc::RecvTimeoutError::Disconnected)
        ));
    }

    #[test]
    fn memory_pressure_defers_but_never_drops() {
        let (tx, rx) = mpsc::channel();
        let gauge = Arc::new(MemoryGauge::new());
        let mut pipeline = Pipeline::start(
            AnalyzerBackend::Beat(Arc::new(FakeBeat)),
            test_config(20, 100),
            gauge.clone(),
            tx,
        )
        .unwrap();

        // Simulated external pressure over the 100-byte budget.
        gauge.reserve(200);
        pipeline.enqueue(job("a", 4));
        assert!(pipeline.next_retry().is_some());
        assert!(matches!(
            rx.recv_timeout(Duration::from_millis(30)),
            Err(mpsc::RecvTimeoutError::Timeout)
        ));

        // Pressure subsides; the deferred dispatch goes through on retry.
        gauge.release(200);
        let events = drain_until_finished(&mut pipeline, &rx, 1);
        assert!(events
            .iter()
            .any(|e| matches!(e, PipelineEvent::Completed { track_id, .. } if track_id == "a")));
        assert!(pipeline.is_complete());
        assert_eq!(gauge.in_use(), 0);
    }
}

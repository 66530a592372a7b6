//! Session coordinator: decode stage, per-kind pipelines, and the
//! cross-pipeline barrier.
//!
//! The coordinator is a single-threaded event loop over one channel. It owns
//! the raw-result maps and only hands them out after every active pipeline
//! has finished all of its jobs, so the verification engine reads them
//! without any locking.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use rayon::prelude::*;

use crate::analyzers::CheckKind;
use crate::audio::adapters::{
    AnalysisKind, BeatAnalysis, BeatDetector, ClipAnalysis, ClipDetector, DecodedAudio, Decoder,
    FingerprintAnalysis, Fingerprinter, KeyAnalysis, KeyDetector, RawResult,
};
use crate::pipeline::memory::MemoryGauge;
use crate::pipeline::worker::{
    AnalysisJob, AnalyzerBackend, Pipeline, PipelineConfig, PipelineEvent,
};
use crate::{Result, Track};

/// Per-session configuration, constructed once and passed where needed.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub active_checks: Vec<CheckKind>,
    pub pipeline: PipelineConfig,
    /// Upper bound for metadata year validation.
    pub current_year: i32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            active_checks: CheckKind::ALL.to_vec(),
            pipeline: PipelineConfig::default(),
            current_year: current_year(),
        }
    }
}

impl SessionConfig {
    pub fn is_active(&self, check: CheckKind) -> bool {
        self.active_checks.contains(&check)
    }
}

/// Gregorian year from the system clock, close enough for validating a
/// year tag.
pub fn current_year() -> i32 {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    1970 + (secs as f64 / 31_556_952.0) as i32
}

/// The analyzer backends available to a session. Absent backends simply
/// deactivate the checks that need them.
#[derive(Default, Clone)]
pub struct AnalyzerRegistry {
    pub decoder: Option<Arc<dyn Decoder>>,
    pub beat: Option<Arc<dyn BeatDetector>>,
    pub key: Option<Arc<dyn KeyDetector>>,
    pub clip: Option<Arc<dyn ClipDetector>>,
    pub fingerprint: Option<Arc<dyn Fingerprinter>>,
}

impl AnalyzerRegistry {
    fn backend_for(&self, kind: AnalysisKind) -> Option<AnalyzerBackend> {
        match kind {
            AnalysisKind::Beat => self.beat.clone().map(AnalyzerBackend::Beat),
            AnalysisKind::Key => self.key.clone().map(AnalyzerBackend::Key),
            AnalysisKind::Clip => self.clip.clone().map(AnalyzerBackend::Clip),
            AnalysisKind::Fingerprint => {
                self.fingerprint.clone().map(AnalyzerBackend::Fingerprint)
            }
        }
    }
}

/// Everything the analysis passes produced, keyed by track id.
#[derive(Debug, Default)]
pub struct RawResultSet {
    pub beat: HashMap<String, BeatAnalysis>,
    pub key: HashMap<String, KeyAnalysis>,
    pub clip: HashMap<String, ClipAnalysis>,
    pub fingerprint: HashMap<String, FingerprintAnalysis>,
    /// Per-track analyzer failures, labeled by kind.
    pub analysis_errors: HashMap<String, Vec<String>>,
}

impl RawResultSet {
    fn insert(&mut self, track_id: String, result: RawResult) {
        match result {
            RawResult::Beat(r) => {
                self.beat.insert(track_id, r);
            }
            RawResult::Key(r) => {
                self.key.insert(track_id, r);
            }
            RawResult::Clip(r) => {
                self.clip.insert(track_id, r);
            }
            RawResult::Fingerprint(r) => {
                self.fingerprint.insert(track_id, r);
            }
        }
    }
}

#[derive(Debug)]
pub enum SessionUpdate {
    DecodeFinished {
        decoded: usize,
        failed: usize,
    },
    JobProgress {
        kind: AnalysisKind,
        track_id: String,
        percent: u8,
    },
    JobFinished {
        kind: AnalysisKind,
        track_id: String,
        ok: bool,
    },
    PipelineFinished {
        kind: AnalysisKind,
    },
}

pub struct SessionOutcome {
    pub raw: RawResultSet,
    /// Tracks with decoded audio, in decode order.
    pub decoded_track_ids: Vec<String>,
    pub decode_failures: HashMap<String, String>,
    /// Exact decoded durations, for backfilling missing document durations.
    pub decoded_durations: HashMap<String, f64>,
}

pub struct AnalysisSession {
    config: SessionConfig,
    registry: AnalyzerRegistry,
}

impl AnalysisSession {
    pub fn new(config: SessionConfig, registry: AnalyzerRegistry) -> Self {
        Self { config, registry }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Runs decode plus every active analysis pipeline to completion and
    /// releases the aggregated raw results exactly once.
    pub fn run(
        &self,
        tracks: &[Track],
        mut on_update: impl FnMut(SessionUpdate),
    ) -> Result<SessionOutcome> {
        let (decoded, decode_failures, decoded_durations) = self.decode_stage(tracks);
        if self.registry.decoder.is_some() {
            on_update(SessionUpdate::DecodeFinished {
                decoded: decoded.len(),
                failed: decode_failures.len(),
            });
        }

        // Active kinds are fixed up front: a kind counts when some active
        // check needs it and a backend exists for it.
        let needed: HashSet<AnalysisKind> = self
            .config
            .active_checks
            .iter()
            .filter_map(|c| c.required_analysis())
            .collect();

        let gauge = Arc::new(MemoryGauge::new());
        let (event_tx, event_rx) = mpsc::channel();
        let mut pipelines: Vec<Pipeline> = Vec::new();
        if !decoded.is_empty() {
            for kind in AnalysisKind::ALL {
                if !needed.contains(&kind) {
                    continue;
                }
                let Some(backend) = self.registry.backend_for(kind) else {
                    continue;
                };
                pipelines.push(Pipeline::start(
                    backend,
                    self.config.pipeline.clone(),
                    gauge.clone(),
                    event_tx.clone(),
                )?);
            }
        }
        drop(event_tx);

        log::info!(
            "analysis session: {} tracks decoded, {} pipeline(s) active",
            decoded.len(),
            pipelines.len()
        );

        let decoded_track_ids: Vec<String> = decoded.iter().map(|(id, _, _)| id.clone()).collect();
        for pipeline in pipelines.iter_mut() {
            for (track_id, samples, sample_rate) in &decoded {
                // Each pipeline kind owns its own copy of the buffer.
                pipeline.enqueue(AnalysisJob {
                    track_id: track_id.clone(),
                    samples: samples.clone(),
                    sample_rate: *sample_rate,
                    variant: None,
                });
            }
        }
        drop(decoded);

        let mut raw = RawResultSet::default();
        let mut reported_complete: HashSet<AnalysisKind> = HashSet::new();

        // Barrier: drain events until every pipeline reports its full total.
        while pipelines.iter().any(|p| !p.is_complete()) {
            let timeout = pipelines
                .iter()
                .filter_map(|p| p.next_retry())
                .min()
                .map(|at| at.saturating_duration_since(Instant::now()))
                .unwrap_or(Duration::from_millis(50))
                .max(Duration::from_millis(1));

            match event_rx.recv_timeout(timeout) {
                Ok(event) => {
                    let kind = event.kind();
                    let Some(pipeline) =
                        pipelines.iter_mut().find(|p| p.kind() == kind)
                    else {
                        continue;
                    };
                    if pipeline.is_terminated() {
                        continue;
                    }
                    match event {
                        PipelineEvent::Progress {
                            kind,
                            track_id,
                            percent,
                        } => on_update(SessionUpdate::JobProgress {
                            kind,
                            track_id,
                            percent,
                        }),
                        PipelineEvent::Completed {
                            kind,
                            track_id,
                            result,
                        } => {
                            raw.insert(track_id.clone(), result);
                            pipeline.note_finished(&track_id);
                            on_update(SessionUpdate::JobFinished {
                                kind,
                                track_id,
                                ok: true,
                            });
                            if pipeline.is_complete() && reported_complete.insert(kind) {
                                on_update(SessionUpdate::PipelineFinished { kind });
                            }
                        }
                        PipelineEvent::Failed {
                            kind,
                            track_id,
                            message,
                        } => {
                            log::warn!("{} analysis failed for {}: {}", kind.label(), track_id, message);
                            raw.analysis_errors
                                .entry(track_id.clone())
                                .or_default()
                                .push(format!("{}: {}", kind.label(), message));
                            pipeline.note_finished(&track_id);
                            on_update(SessionUpdate::JobFinished {
                                kind,
                                track_id,
                                ok: false,
                            });
                            if pipeline.is_complete() && reported_complete.insert(kind) {
                                on_update(SessionUpdate::PipelineFinished { kind });
                            }
                        }
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    let now = Instant::now();
                    for pipeline in pipelines.iter_mut() {
                        pipeline.pump_if_due(now);
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }
        }

        for pipeline in pipelines.iter_mut() {
            pipeline.terminate();
        }

        Ok(SessionOutcome {
            raw,
            decoded_track_ids,
            decode_failures,
            decoded_durations,
        })
    }

    // Decode every track with a file reference on the rayon pool, mixing
    // down to mono. Tracks that fail stay out of every pipeline's total.
    #[allow(clippy::type_complexity)]
    fn decode_stage(
        &self,
        tracks: &[Track],
    ) -> (
        Vec<(String, Vec<f32>, u32)>,
        HashMap<String, String>,
        HashMap<String, f64>,
    ) {
        let Some(decoder) = &self.registry.decoder else {
            return (Vec::new(), HashMap::new(), HashMap::new());
        };

        let targets: Vec<(String, PathBuf)> = tracks
            .iter()
            .filter_map(|t| t.location.clone().map(|p| (t.id.clone(), p)))
            .collect();

        let results: Vec<(String, std::result::Result<DecodedAudio, _>)> = targets
            .par_iter()
            .map(|(id, path)| (id.clone(), decoder.decode(path)))
            .collect();

        let mut decoded = Vec::new();
        let mut failures = HashMap::new();
        let mut durations = HashMap::new();
        for (id, result) in results {
            match result {
                Ok(audio) => {
                    durations.insert(id.clone(), audio.duration_secs());
                    let sample_rate = audio.sample_rate;
                    decoded.push((id, audio.mono_mixdown(), sample_rate));
                }
                Err(e) => {
                    if e.fallback_available() {
                        log::warn!("decode failed for {} (fallback would be available): {}", id, e);
                    } else {
                        log::warn!("decode failed for {}: {}", id, e);
                    }
                    failures.insert(id, e.to_string());
                }
            }
        }
        (decoded, failures, durations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::adapters::{AnalysisError, ClipAnalysis, DecodeError};
    use crate::keys::{MusicalKey, Scale};
    use crate::TrackSource;
    use std::path::Path;

    struct FakeDecoder;

    impl Decoder for FakeDecoder {
        fn decode(&self, path: &Path) -> std::result::Result<DecodedAudio, DecodeError> {
            if path.to_string_lossy().contains("broken") {
                return Err(DecodeError::Corrupt("truncated".into()));
            }
            Ok(DecodedAudio {
                channels: vec![vec![0.25; 400]],
                sample_rate: 100,
            })
        }

        fn name(&self) -> &'static str {
            "fake-decoder"
        }
    }

    struct FakeBeat;

    impl BeatDetector for FakeBeat {
        fn detect(
            &self,
            _samples: &[f32],
            _sample_rate: u32,
        ) -> std::result::Result<BeatAnalysis, AnalysisError> {
            Ok(BeatAnalysis {
                beat_timestamps: vec![0.0, 0.5, 1.0],
                bpm_estimate: 120.0,
                segment_bpms: vec![120.0, 120.0, 120.0],
                avg_confidence: 0.9,
            })
        }

        fn name(&self) -> &'static str {
            "fake-beat"
        }
    }

    struct FakeKey;

    impl KeyDetector for FakeKey {
        fn detect(
            &self,
            _samples: &[f32],
            _sample_rate: u32,
        ) -> std::result::Result<KeyAnalysis, AnalysisError> {
            Ok(KeyAnalysis::new(MusicalKey::new(9, Scale::Minor), 0.8))
        }

        fn name(&self) -> &'static str {
            "fake-key"
        }
    }

    struct FakeClip;

    impl ClipDetector for FakeClip {
        fn detect(
            &self,
            _samples: &[f32],
            _sample_rate: u32,
        ) -> std::result::Result<ClipAnalysis, AnalysisError> {
            Ok(ClipAnalysis {
                has_clipping: false,
                clip_count: 0,
                peak_level_linear: 0.5,
                peak_level_db: -6.0,
                regions: Vec::new(),
            })
        }

        fn name(&self) -> &'static str {
            "fake-clip"
        }
    }

    struct FakeFingerprint;

    impl Fingerprinter for FakeFingerprint {
        fn fingerprint(
            &self,
            samples: &[f32],
            sample_rate: u32,
        ) -> std::result::Result<FingerprintAnalysis, AnalysisError> {
            Ok(FingerprintAnalysis {
                fingerprint: vec![0xAB; 16],
                duration_secs: samples.len() as f64 / sample_rate as f64,
            })
        }

        fn name(&self) -> &'static str {
            "fake-fingerprint"
        }
    }

    fn full_registry() -> AnalyzerRegistry {
        AnalyzerRegistry {
            decoder: Some(Arc::new(FakeDecoder)),
            beat: Some(Arc::new(FakeBeat)),
            key: Some(Arc::new(FakeKey)),
            clip: Some(Arc::new(FakeClip)),
            fingerprint: Some(Arc::new(FakeFingerprint)),
        }
    }

    fn track_with_file(id: &str, path: &str) -> Track {
        let mut track = Track::new(TrackSource::Folder, id);
        track.location = Some(PathBuf::from(path));
        track
    }

    fn fast_config() -> SessionConfig {
        SessionConfig {
            pipeline: PipelineConfig {
                budget_bytes: u64::MAX,
                retry_delay: Duration::from_millis(10),
            },
            ..SessionConfig::default()
        }
    }

    #[test]
    fn all_pipelines_complete_for_all_decoded_tracks() {
        let session = AnalysisSession::new(fast_config(), full_registry());
        let tracks = vec![
            track_with_file("a", "/music/a.mp3"),
            track_with_file("b", "/music/b.mp3"),
            Track::new(TrackSource::Rekordbox, "no-file"),
        ];

        let mut finished_kinds = Vec::new();
        let outcome = session
            .run(&tracks, |update| {
                if let SessionUpdate::PipelineFinished { kind } = update {
                    finished_kinds.push(kind);
                }
            })
            .unwrap();

        assert_eq!(outcome.decoded_track_ids.len(), 2);
        assert_eq!(outcome.raw.beat.len(), 2);
        assert_eq!(outcome.raw.key.len(), 2);
        assert_eq!(outcome.raw.clip.len(), 2);
        assert_eq!(outcome.raw.fingerprint.len(), 2);
        assert_eq!(finished_kinds.len(), 4);
        // Tracks without a file are in nobody's total.
        assert!(!outcome.raw.beat.contains_key("rekordbox:no-file"));
    }

    #[test]
    fn decode_failures_are_isolated() {
        let session = AnalysisSession::new(fast_config(), full_registry());
        let tracks = vec![
            track_with_file("a", "/music/a.mp3"),
            track_with_file("bad", "/music/broken.mp3"),
        ];

        let outcome = session.run(&tracks, |_| {}).unwrap();
        assert_eq!(outcome.decoded_track_ids, vec!["folder:a".to_string()]);
        assert_eq!(outcome.decode_failures.len(), 1);
        assert!(outcome.decode_failures.contains_key("folder:bad"));
        assert_eq!(outcome.raw.beat.len(), 1);
    }

    #[test]
    fn barrier_releases_immediately_with_no_audio_checks() {
        let config = SessionConfig {
            active_checks: vec![CheckKind::Metadata],
            ..fast_config()
        };
        let session = AnalysisSession::new(config, full_registry());
        let tracks = vec![track_with_file("a", "/music/a.mp3")];

        let started = Instant::now();
        let outcome = session.run(&tracks, |_| {}).unwrap();
        assert!(outcome.raw.beat.is_empty());
        assert!(outcome.raw.clip.is_empty());
        // No pipeline to wait on; this must be effectively synchronous.
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn missing_backends_deactivate_their_pipelines() {
        let registry = AnalyzerRegistry {
            decoder: Some(Arc::new(FakeDecoder)),
            clip: Some(Arc::new(FakeClip)),
            ..AnalyzerRegistry::default()
        };
        let session = AnalysisSession::new(fast_config(), registry);
        let tracks = vec![track_with_file("a", "/music/a.mp3")];

        let outcome = session.run(&tracks, |_| {}).unwrap();
        assert_eq!(outcome.raw.clip.len(), 1);
        assert!(outcome.raw.beat.is_empty());
        assert!(outcome.raw.key.is_empty());
    }

    #[test]
    fn shared_pressure_delays_but_completes_everything() {
        let config = SessionConfig {
            pipeline: PipelineConfig {
                // One 1600-byte buffer at a time across all four kinds.
                budget_bytes: 1700,
                retry_delay: Duration::from_millis(5),
            },
            ..SessionConfig::default()
        };
        let session = AnalysisSession::new(config, full_registry());
        let tracks = vec![
            track_with_file("a", "/music/a.mp3"),
            track_with_file("b", "/music/b.mp3"),
        ];

        let outcome = session.run(&tracks, |_| {}).unwrap();
        assert_eq!(outcome.raw.beat.len(), 2);
        assert_eq!(outcome.raw.key.len(), 2);
        assert_eq!(outcome.raw.clip.len(), 2);
        assert_eq!(outcome.raw.fingerprint.len(), 2);
    }
}

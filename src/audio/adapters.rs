//! Analyzer adapter contract.
//!
//! The analysis passes are swappable backends behind these traits. The crate
//! ships a symphonia decoder and a sample-threshold clip scanner; beat, key
//! and fingerprint backends are provided by the embedding application.

use std::path::Path;

use serde::Serialize;
use thiserror::Error;

use crate::keys::MusicalKey;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unsupported codec '{codec}'")]
    UnsupportedCodec {
        codec: String,
        fallback_available: bool,
    },
    #[error("corrupt audio stream: {0}")]
    Corrupt(String),
    #[error("container has no decodable audio track")]
    NoAudioTrack,
}

impl DecodeError {
    /// Whether a different decoder could plausibly read the same file.
    pub fn fallback_available(&self) -> bool {
        matches!(
            self,
            DecodeError::UnsupportedCodec {
                fallback_available: true,
                ..
            }
        )
    }
}

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analyzer failed: {0}")]
    Failed(String),
    #[error("empty sample buffer")]
    EmptyInput,
}

/// Planar PCM output of one decode call.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f64 {
        let frames = self.channels.first().map_or(0, |c| c.len());
        frames as f64 / self.sample_rate.max(1) as f64
    }

    /// Average all channels down to one buffer.
    pub fn mono_mixdown(&self) -> Vec<f32> {
        match self.channels.len() {
            0 => Vec::new(),
            1 => self.channels[0].clone(),
            n => {
                let frames = self.channels.iter().map(|c| c.len()).min().unwrap_or(0);
                let scale = 1.0 / n as f32;
                (0..frames)
                    .map(|i| self.channels.iter().map(|c| c[i]).sum::<f32>() * scale)
                    .collect()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BeatAnalysis {
    /// Beat onset positions in seconds, ascending.
    pub beat_timestamps: Vec<f64>,
    pub bpm_estimate: f64,
    pub segment_bpms: Vec<f64>,
    pub avg_confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyAnalysis {
    pub key: MusicalKey,
    pub confidence: f64,
    pub camelot: String,
    pub open_key: String,
}

impl KeyAnalysis {
    pub fn new(key: MusicalKey, confidence: f64) -> Self {
        Self {
            camelot: key.camelot(),
            open_key: key.open_key(),
            key,
            confidence,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClipRegion {
    pub start_secs: f64,
    pub end_secs: f64,
}

impl ClipRegion {
    pub fn duration_secs(&self) -> f64 {
        (self.end_secs - self.start_secs).max(0.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ClipAnalysis {
    pub has_clipping: bool,
    pub clip_count: usize,
    pub peak_level_linear: f64,
    pub peak_level_db: f64,
    pub regions: Vec<ClipRegion>,
}

impl ClipAnalysis {
    pub fn total_clipped_secs(&self) -> f64 {
        self.regions.iter().map(|r| r.duration_secs()).sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FingerprintAnalysis {
    /// Opaque acoustic signature; only compared, never interpreted.
    pub fingerprint: Vec<u8>,
    pub duration_secs: f64,
}

/// The four audio analysis passes a session can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AnalysisKind {
    Beat,
    Key,
    Clip,
    Fingerprint,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 4] = [
        AnalysisKind::Beat,
        AnalysisKind::Key,
        AnalysisKind::Clip,
        AnalysisKind::Fingerprint,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            AnalysisKind::Beat => "beat",
            AnalysisKind::Key => "key",
            AnalysisKind::Clip => "clip",
            AnalysisKind::Fingerprint => "fingerprint",
        }
    }
}

/// Raw analyzer output for one track, produced at most once per session.
#[derive(Debug, Clone)]
pub enum RawResult {
    Beat(BeatAnalysis),
    Key(KeyAnalysis),
    Clip(ClipAnalysis),
    Fingerprint(FingerprintAnalysis),
}

impl RawResult {
    pub fn kind(&self) -> AnalysisKind {
        match self {
            RawResult::Beat(_) => AnalysisKind::Beat,
            RawResult::Key(_) => AnalysisKind::Key,
            RawResult::Clip(_) => AnalysisKind::Clip,
            RawResult::Fingerprint(_) => AnalysisKind::Fingerprint,
        }
    }
}

pub trait Decoder: Send + Sync {
    fn decode(&self, path: &Path) -> std::result::Result<DecodedAudio, DecodeError>;
    fn name(&self) -> &'static str;
}

pub trait BeatDetector: Send + Sync {
    fn detect(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> std::result::Result<BeatAnalysis, AnalysisError>;
    fn name(&self) -> &'static str;
}

pub trait KeyDetector: Send + Sync {
    fn detect(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> std::result::Result<KeyAnalysis, AnalysisError>;
    fn name(&self) -> &'static str;
}

pub trait ClipDetector: Send + Sync {
    fn detect(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> std::result::Result<ClipAnalysis, AnalysisError>;
    fn name(&self) -> &'static str;
}

pub trait Fingerprinter: Send + Sync {
    fn fingerprint(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> std::result::Result<FingerprintAnalysis, AnalysisError>;
    fn name(&self) -> &'static str;
}

/// Clip scan over raw samples: maximal runs at or above the threshold count
/// as clipped regions once they reach `min_run` samples.
pub struct ThresholdClipDetector {
    pub threshold: f32,
    pub min_run: usize,
}

impl Default for ThresholdClipDetector {
    fn default() -> Self {
        Self {
            threshold: 0.999,
            min_run: 4,
        }
    }
}

impl ClipDetector for ThresholdClipDetector {
    fn detect(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> std::result::Result<ClipAnalysis, AnalysisError> {
        if samples.is_empty() {
            return Err(AnalysisError::EmptyInput);
        }
        let rate = sample_rate.max(1) as f64;
        let mut regions = Vec::new();
        let mut peak = 0.0f32;
        let mut run_start: Option<usize> = None;

        for (i, &sample) in samples.iter().enumerate() {
            let level = sample.abs();
            peak = peak.max(level);
            if level >= self.threshold {
                if run_start.is_none() {
                    run_start = Some(i);
                }
            } else if let Some(start) = run_start.take() {
                if i - start >= self.min_run {
                    regions.push(ClipRegion {
                        start_secs: start as f64 / rate,
                        end_secs: i as f64 / rate,
                    });
                }
            }
        }
        if let Some(start) = run_start {
            if samples.len() - start >= self.min_run {
                regions.push(ClipRegion {
                    start_secs: start as f64 / rate,
                    end_secs: samples.len() as f64 / rate,
                });
            }
        }

        let peak = peak as f64;
        Ok(ClipAnalysis {
            has_clipping: !regions.is_empty(),
            clip_count: regions.len(),
            peak_level_linear: peak,
            peak_level_db: 20.0 * peak.max(1e-9).log10(),
            regions,
        })
    }

    fn name(&self) -> &'static str {
        "threshold-clip-scan"
    }
}

use std::path::PathBuf;
use serde::Serialize;

pub mod analyzers;
pub mod audio;
pub mod cli;
pub mod export;
pub mod fixes;
pub mod health;
pub mod keys;
pub mod library;
pub mod pipeline;
pub mod utils;

/// Where a track was imported from. The source prefix keeps native ids from
/// different documents apart when they collide numerically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TrackSource {
    Rekordbox,
    Traktor,
    Folder,
}

impl TrackSource {
    pub fn prefix(&self) -> &'static str {
        match self {
            TrackSource::Rekordbox => "rekordbox",
            TrackSource::Traktor => "traktor",
            TrackSource::Folder => "folder",
        }
    }
}

/// Session-unique track id: source prefix plus the document's native id.
pub fn qualified_id(source: TrackSource, native_id: &str) -> String {
    format!("{}:{}", source.prefix(), native_id)
}

/// One stored beatgrid marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TempoMarker {
    pub position_secs: f64,
    pub bpm: f64,
    pub meter: String,
    pub beat: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct Track {
    pub id: String,
    pub source: TrackSource,
    pub source_id: String,
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub genre: Option<String>,
    pub composer: Option<String>,
    pub label: Option<String>,
    pub comment: Option<String>,
    pub year: Option<i32>,
    pub rating: Option<u8>,
    pub duration_secs: Option<f64>,
    pub stored_bpm: Option<f64>,
    pub stored_key: Option<String>,
    pub bitrate: Option<u32>,
    pub sample_rate: Option<u32>,
    pub file_size: Option<u64>,
    pub file_type: Option<String>,
    pub location: Option<PathBuf>,
    pub beatgrid: Vec<TempoMarker>,
}

impl Track {
    pub fn new(source: TrackSource, native_id: impl Into<String>) -> Self {
        let source_id = native_id.into();
        Self {
            id: qualified_id(source, &source_id),
            source,
            source_id,
            title: None,
            artist: None,
            album: None,
            genre: None,
            composer: None,
            label: None,
            comment: None,
            year: None,
            rating: None,
            duration_secs: None,
            stored_bpm: None,
            stored_key: None,
            bitrate: None,
            sample_rate: None,
            file_size: None,
            file_type: None,
            location: None,
            beatgrid: Vec::new(),
        }
    }

    /// Replace the stored beatgrid with a freshly generated one.
    pub fn apply_generated_beatgrid(&mut self, markers: Vec<TempoMarker>) {
        self.beatgrid = markers;
    }

    /// Fill in the duration from decoded audio when the document had none.
    pub fn backfill_duration(&mut self, secs: f64) {
        if self.duration_secs.is_none() {
            self.duration_secs = Some(secs);
        }
    }

    pub fn display_name(&self) -> String {
        match (&self.artist, &self.title) {
            (Some(artist), Some(title)) => format!("{} - {}", artist, title),
            (None, Some(title)) => title.clone(),
            _ => self
                .location
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| self.id.clone()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Decode error: {0}")]
    Decode(#[from] audio::adapters::DecodeError),
    #[error("Unsupported document: {0}")]
    UnsupportedDocument(String),
    #[error("Pipeline error: {0}")]
    Pipeline(String),
}

pub type Result<T> = std::result::Result<T, LibraryError>;

// Re-exports for convenience
pub use analyzers::{CheckKind, CheckSummary, Severity, SkipReason};
pub use audio::adapters::{AnalysisKind, DecodedAudio, RawResult};
pub use fixes::{FixEntry, FixOperation, FixStatus};
pub use health::HealthScore;
pub use pipeline::session::{AnalysisSession, AnalyzerRegistry, SessionConfig, SessionOutcome};

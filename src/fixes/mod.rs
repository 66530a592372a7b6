//! Corrective operations derived from check verdicts.
//!
//! A `FixEntry` starts Pending and moves to Approved or Skipped exactly
//! once; only approved entries are ever handed to the export engine.

pub mod planner;

use serde::Serialize;

use crate::audio::adapters::BeatAnalysis;
use crate::keys::MusicalKey;
use crate::{TempoMarker, Track};

#[derive(Debug, Clone, Serialize)]
pub enum FixOperation {
    Bpm { bpm: f64 },
    Key { key: MusicalKey },
    Beatgrid { markers: Vec<TempoMarker> },
    DuplicateRemove,
    ClippingNormalize { peak_db: f64, gain_db: f64 },
}

impl FixOperation {
    pub fn label(&self) -> &'static str {
        match self {
            FixOperation::Bpm { .. } => "bpm",
            FixOperation::Key { .. } => "key",
            FixOperation::Beatgrid { .. } => "beatgrid",
            FixOperation::DuplicateRemove => "duplicate-remove",
            FixOperation::ClippingNormalize { .. } => "clipping-normalize",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FixStatus {
    Pending,
    Approved,
    Skipped,
}

#[derive(Debug, Clone, Serialize)]
pub struct FixEntry {
    pub track_id: String,
    pub source_id: String,
    pub operation: FixOperation,
    pub status: FixStatus,
    /// Human-readable previews of the value being replaced and written.
    pub before: String,
    pub after: String,
}

impl FixEntry {
    pub fn new(
        track: &Track,
        operation: FixOperation,
        before: impl Into<String>,
        after: impl Into<String>,
    ) -> Self {
        Self {
            track_id: track.id.clone(),
            source_id: track.source_id.clone(),
            operation,
            status: FixStatus::Pending,
            before: before.into(),
            after: after.into(),
        }
    }

    /// Pending -> Approved; settled entries stay where they are.
    pub fn approve(&mut self) {
        if self.status == FixStatus::Pending {
            self.status = FixStatus::Approved;
        }
    }

    /// Pending -> Skipped; settled entries stay where they are.
    pub fn skip(&mut self) {
        if self.status == FixStatus::Pending {
            self.status = FixStatus::Skipped;
        }
    }

    pub fn is_approved(&self) -> bool {
        self.status == FixStatus::Approved
    }
}

/// Constant-tempo grid fit: anchored at the first detected beat, running at
/// the (guard-adjusted) detected tempo.
pub fn beatgrid_from_beats(beats: &BeatAnalysis, bpm: f64) -> Vec<TempoMarker> {
    let Some(&anchor) = beats.beat_timestamps.first() else {
        return Vec::new();
    };
    if bpm <= 0.0 {
        return Vec::new();
    }
    vec![TempoMarker {
        position_secs: anchor,
        bpm,
        meter: "4/4".to_string(),
        beat: 1,
    }]
}

//! Beatgrid drift: how far the stored grid's predicted beats sit from the
//! beats actually detected in the audio.

use serde::Serialize;

use crate::analyzers::{Severity, SkipReason};
use crate::audio::adapters::BeatAnalysis;
use crate::{TempoMarker, Track};

const OK_DRIFT_SECS: f64 = 0.025;
const WARNING_DRIFT_SECS: f64 = 0.05;
/// Early beats matter most for mixing; later ones accumulate tempo noise.
const BEATS_COMPARED: usize = 64;

#[derive(Debug, Clone, Serialize)]
pub struct BeatgridCheck {
    pub track_id: String,
    pub severity: Severity,
    pub skip_reason: Option<SkipReason>,
    pub mean_drift_secs: Option<f64>,
    pub beats_compared: usize,
}

impl BeatgridCheck {
    fn skipped(track: &Track, reason: SkipReason) -> Self {
        Self {
            track_id: track.id.clone(),
            severity: Severity::Ok,
            skip_reason: Some(reason),
            mean_drift_secs: None,
            beats_compared: 0,
        }
    }

    pub fn detail(&self) -> String {
        match self.mean_drift_secs {
            Some(drift) => format!(
                "mean drift {:.1} ms over {} beats",
                drift * 1000.0,
                self.beats_compared
            ),
            None => String::new(),
        }
    }
}

/// Offset of `beat` from the nearest beat the grid predicts.
fn drift_against_grid(grid: &[TempoMarker], beat: f64) -> Option<f64> {
    // The governing marker is the last one at or before the beat, or the
    // first marker for pickup beats.
    let marker = grid
        .iter()
        .rev()
        .find(|m| m.position_secs <= beat)
        .or_else(|| grid.first())?;
    if marker.bpm <= 0.0 {
        return None;
    }
    let beat_len = 60.0 / marker.bpm;
    let periods = ((beat - marker.position_secs) / beat_len).round();
    let predicted = marker.position_secs + periods * beat_len;
    Some((beat - predicted).abs())
}

pub fn check(track: &Track, raw: Option<&BeatAnalysis>) -> BeatgridCheck {
    let Some(beats) = raw else {
        return BeatgridCheck::skipped(track, SkipReason::NoPcm);
    };
    if beats.beat_timestamps.is_empty() {
        return BeatgridCheck::skipped(track, SkipReason::NoBeatsDetected);
    }
    if track.beatgrid.is_empty() {
        return BeatgridCheck::skipped(track, SkipReason::NoGrid);
    }

    let mut grid = track.beatgrid.clone();
    grid.sort_by(|a, b| a.position_secs.total_cmp(&b.position_secs));

    let drifts: Vec<f64> = beats
        .beat_timestamps
        .iter()
        .take(BEATS_COMPARED)
        .filter_map(|beat| drift_against_grid(&grid, *beat))
        .collect();
    if drifts.is_empty() {
        return BeatgridCheck::skipped(track, SkipReason::NoGrid);
    }

    let mean_drift = drifts.iter().sum::<f64>() / drifts.len() as f64;
    let severity = if mean_drift <= OK_DRIFT_SECS {
        Severity::Ok
    } else if mean_drift <= WARNING_DRIFT_SECS {
        Severity::Warning
    } else {
        Severity::Error
    };

    BeatgridCheck {
        track_id: track.id.clone(),
        severity,
        skip_reason: None,
        mean_drift_secs: Some(mean_drift),
        beats_compared: drifts.len(),
    }
}

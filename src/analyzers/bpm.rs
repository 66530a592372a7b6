//! Stored-vs-detected tempo verification.
//!
//! Beat trackers routinely land on half or double the musical tempo, so the
//! detected value is reconciled against the stored one before grading.

use serde::Serialize;

use crate::analyzers::{Severity, SkipReason};
use crate::audio::adapters::BeatAnalysis;
use crate::Track;

const MATCH_TOLERANCE: f64 = 0.05;
const WARNING_TOLERANCE: f64 = 0.5;
/// Max deviation from the segment median before a track counts as variable.
const VARIABLE_DEVIATION_PCT: f64 = 15.0;

#[derive(Debug, Clone, Serialize)]
pub struct BpmCheck {
    pub track_id: String,
    pub severity: Severity,
    pub skip_reason: Option<SkipReason>,
    pub stored_bpm: Option<f64>,
    pub detected_bpm: Option<f64>,
    /// Detected value after the half/double guard.
    pub adjusted_bpm: Option<f64>,
    pub was_adjusted: bool,
    pub delta: Option<f64>,
    pub max_deviation_pct: Option<f64>,
    pub is_variable: bool,
}

impl BpmCheck {
    fn skipped(track: &Track, reason: SkipReason) -> Self {
        Self {
            track_id: track.id.clone(),
            severity: Severity::Ok,
            skip_reason: Some(reason),
            stored_bpm: track.stored_bpm,
            detected_bpm: None,
            adjusted_bpm: None,
            was_adjusted: false,
            delta: None,
            max_deviation_pct: None,
            is_variable: false,
        }
    }

    pub fn detail(&self) -> String {
        match (self.stored_bpm, self.adjusted_bpm) {
            (Some(stored), Some(adjusted)) => {
                let guard = if self.was_adjusted { " (half/double)" } else { "" };
                let variable = if self.is_variable { ", variable tempo" } else { "" };
                format!(
                    "stored {:.2}, detected {:.2}{}{}",
                    stored, adjusted, guard, variable
                )
            }
            (None, Some(adjusted)) => format!("no stored bpm, detected {:.2}", adjusted),
            _ => String::new(),
        }
    }
}

/// Picks whichever of {detected, x2, x0.5} lies closest to the stored value.
/// Ties keep the unadjusted detection.
pub fn apply_half_double_guard(detected: f64, stored: f64) -> (f64, bool) {
    let mut best = detected;
    let mut best_delta = (detected - stored).abs();
    for candidate in [detected * 2.0, detected * 0.5] {
        let delta = (candidate - stored).abs();
        if delta < best_delta {
            best = candidate;
            best_delta = delta;
        }
    }
    (best, best != detected)
}

/// Largest absolute percentage deviation from the segment median. Needs at
/// least 3 segments to say anything.
pub fn max_deviation_pct(segment_bpms: &[f64]) -> Option<f64> {
    if segment_bpms.len() < 3 {
        return None;
    }
    let mut sorted: Vec<f64> = segment_bpms.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    let median = if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    };
    if median <= 0.0 {
        return None;
    }
    sorted
        .iter()
        .map(|bpm| (bpm - median).abs() / median * 100.0)
        .fold(None, |acc: Option<f64>, dev| {
            Some(acc.map_or(dev, |a| a.max(dev)))
        })
}

pub fn is_variable_bpm(segment_bpms: &[f64]) -> bool {
    max_deviation_pct(segment_bpms).is_some_and(|dev| dev > VARIABLE_DEVIATION_PCT)
}

fn severity_for_delta(delta: f64) -> Severity {
    if delta <= MATCH_TOLERANCE {
        Severity::Ok
    } else if delta <= WARNING_TOLERANCE {
        Severity::Warning
    } else {
        Severity::Error
    }
}

pub fn check(track: &Track, raw: Option<&BeatAnalysis>) -> BpmCheck {
    let Some(beats) = raw else {
        return BpmCheck::skipped(track, SkipReason::NoPcm);
    };
    if beats.beat_timestamps.is_empty() {
        return BpmCheck::skipped(track, SkipReason::NoBeatsDetected);
    }

    let detected = beats.bpm_estimate;
    let deviation = max_deviation_pct(&beats.segment_bpms);
    let is_variable = is_variable_bpm(&beats.segment_bpms);

    let Some(stored) = track.stored_bpm else {
        // Nothing to verify against, but the detection is still reported so
        // a fix can backfill it.
        let mut result = BpmCheck::skipped(track, SkipReason::NoBpmStored);
        result.detected_bpm = Some(detected);
        result.adjusted_bpm = Some(detected);
        result.max_deviation_pct = deviation;
        result.is_variable = is_variable;
        return result;
    };

    let (adjusted, was_adjusted) = apply_half_double_guard(detected, stored);
    let delta = (adjusted - stored).abs();
    let mut severity = severity_for_delta(delta);
    // A strongly variable tempo makes a hard mismatch unreliable evidence;
    // demote Error to Warning, never touch the Ok threshold.
    if is_variable && severity == Severity::Error {
        severity = Severity::Warning;
    }

    BpmCheck {
        track_id: track.id.clone(),
        severity,
        skip_reason: None,
        stored_bpm: Some(stored),
        detected_bpm: Some(detected),
        adjusted_bpm: Some(adjusted),
        was_adjusted,
        delta: Some(delta),
        max_deviation_pct: deviation,
        is_variable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrackSource;

    fn beats(bpm: f64, segments: &[f64]) -> BeatAnalysis {
        BeatAnalysis {
            beat_timestamps: vec![0.0, 0.5, 1.0],
            bpm_estimate: bpm,
            segment_bpms: segments.to_vec(),
            avg_confidence: 0.9,
        }
    }

    fn track(stored: Option<f64>) -> Track {
        let mut track = Track::new(TrackSource::Rekordbox, "1");
        track.stored_bpm = stored;
        track
    }

    #[test]
    fn half_double_guard_picks_nearest_candidate() {
        assert_eq!(apply_half_double_guard(64.0, 128.0), (128.0, true));
        assert_eq!(apply_half_double_guard(256.0, 128.0), (128.0, true));
        assert_eq!(apply_half_double_guard(128.01, 128.0), (128.01, false));
        assert_eq!(apply_half_double_guard(128.0, 128.0), (128.0, false));
        assert_eq!(apply_half_double_guard(90.0, 128.0), (90.0, false));
    }

    #[test]
    fn short_segment_lists_are_never_variable() {
        assert!(!is_variable_bpm(&[]));
        assert!(!is_variable_bpm(&[120.0]));
        assert!(!is_variable_bpm(&[60.0, 180.0]));
        assert!(is_variable_bpm(&[120.0, 120.0, 180.0]));
        assert!(!is_variable_bpm(&[120.0, 121.0, 122.0]));
    }

    #[test]
    fn severity_is_monotonic_in_delta() {
        let deltas = [0.0, 0.05, 0.06, 0.5, 0.51, 5.0];
        let severities: Vec<Severity> = deltas.iter().map(|d| severity_for_delta(*d)).collect();
        assert!(severities.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(severity_for_delta(0.05), Severity::Ok);
        assert_eq!(severity_for_delta(0.06), Severity::Warning);
        assert_eq!(severity_for_delta(0.51), Severity::Error);
    }

    #[test]
    fn variable_bpm_caps_error_to_warning() {
        let steady = check(&track(Some(128.0)), Some(&beats(120.0, &[120.0; 4])));
        assert_eq!(steady.severity, Severity::Error);
        assert!(!steady.is_variable);

        let variable = check(
            &track(Some(128.0)),
            Some(&beats(120.0, &[100.0, 120.0, 145.0])),
        );
        assert!(variable.is_variable);
        assert_eq!(variable.severity, Severity::Warning);

        // The Ok threshold is never waived by variability.
        let close = check(
            &track(Some(120.0)),
            Some(&beats(120.02, &[100.0, 120.0, 145.0])),
        );
        assert_eq!(close.severity, Severity::Ok);
    }

    #[test]
    fn missing_inputs_skip_with_typed_reasons() {
        let no_pcm = check(&track(Some(128.0)), None);
        assert_eq!(no_pcm.skip_reason, Some(SkipReason::NoPcm));

        let mut empty = beats(128.0, &[]);
        empty.beat_timestamps.clear();
        let no_beats = check(&track(Some(128.0)), Some(&empty));
        assert_eq!(no_beats.skip_reason, Some(SkipReason::NoBeatsDetected));

        let no_stored = check(&track(None), Some(&beats(127.5, &[127.0, 128.0, 127.5])));
        assert_eq!(no_stored.skip_reason, Some(SkipReason::NoBpmStored));
        assert_eq!(no_stored.detected_bpm, Some(127.5));
        assert!(no_stored.max_deviation_pct.is_some());
    }

    #[test]
    fn adjusted_delta_drives_severity() {
        let result = check(&track(Some(128.0)), Some(&beats(64.0, &[64.0; 4])));
        assert_eq!(result.adjusted_bpm, Some(128.0));
        assert!(result.was_adjusted);
        assert_eq!(result.severity, Severity::Ok);
        assert_eq!(result.delta, Some(0.0));
    }
}

//! Verification engine: pure mappings from (track, raw analyzer output) to
//! severity-graded per-track results, plus library-wide aggregation.

pub mod beatgrid;
pub mod bpm;
pub mod clipping;
pub mod duplicate;
pub mod key;
pub mod metadata;

use serde::Serialize;

use crate::audio::adapters::AnalysisKind;
use crate::pipeline::session::{RawResultSet, SessionConfig};
use crate::Track;

/// Per-track verdict unit. Ordering is by badness, so `max` picks the worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Severity {
    Ok,
    Warning,
    Error,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Ok => "ok",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// A deliberate non-result. Skipped tracks stay out of the severity buckets
/// and out of health scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    NoPcm,
    NoBpmStored,
    NoBeatsDetected,
    NoGrid,
    NoFingerprint,
}

impl SkipReason {
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::NoPcm => "no-pcm",
            SkipReason::NoBpmStored => "no-bpm-stored",
            SkipReason::NoBeatsDetected => "no-beats-detected",
            SkipReason::NoGrid => "no-grid",
            SkipReason::NoFingerprint => "no-fingerprint",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CheckKind {
    Bpm,
    Key,
    Beatgrid,
    Clipping,
    Metadata,
    Duplicates,
}

impl CheckKind {
    pub const ALL: [CheckKind; 6] = [
        CheckKind::Bpm,
        CheckKind::Key,
        CheckKind::Beatgrid,
        CheckKind::Clipping,
        CheckKind::Metadata,
        CheckKind::Duplicates,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            CheckKind::Bpm => "bpm",
            CheckKind::Key => "key",
            CheckKind::Beatgrid => "beatgrid",
            CheckKind::Clipping => "clipping",
            CheckKind::Metadata => "metadata",
            CheckKind::Duplicates => "duplicates",
        }
    }

    /// Which analysis pipeline this check consumes, if any.
    pub fn required_analysis(&self) -> Option<AnalysisKind> {
        match self {
            CheckKind::Bpm | CheckKind::Beatgrid => Some(AnalysisKind::Beat),
            CheckKind::Key => Some(AnalysisKind::Key),
            CheckKind::Clipping => Some(AnalysisKind::Clip),
            CheckKind::Duplicates => Some(AnalysisKind::Fingerprint),
            CheckKind::Metadata => None,
        }
    }
}

/// Library-wide aggregate for one check: severity partition of non-skipped
/// tracks, skip count, and the check's domain average where defined.
#[derive(Debug, Clone, Serialize)]
pub struct CheckSummary {
    pub kind: CheckKind,
    pub ok: usize,
    pub warning: usize,
    pub error: usize,
    pub skipped: usize,
    pub average: Option<f64>,
}

impl CheckSummary {
    pub fn total(&self) -> usize {
        self.ok + self.warning + self.error + self.skipped
    }

    pub fn eligible(&self) -> usize {
        self.ok + self.warning + self.error
    }
}

pub(crate) fn summarize(
    kind: CheckKind,
    rows: impl Iterator<Item = (Severity, bool, Option<f64>)>,
) -> CheckSummary {
    let mut summary = CheckSummary {
        kind,
        ok: 0,
        warning: 0,
        error: 0,
        skipped: 0,
        average: None,
    };
    let mut metric_sum = 0.0;
    let mut metric_count = 0usize;
    for (severity, skipped, metric) in rows {
        if skipped {
            summary.skipped += 1;
        } else {
            match severity {
                Severity::Ok => summary.ok += 1,
                Severity::Warning => summary.warning += 1,
                Severity::Error => summary.error += 1,
            }
        }
        if let Some(value) = metric {
            metric_sum += value;
            metric_count += 1;
        }
    }
    if metric_count > 0 {
        summary.average = Some(metric_sum / metric_count as f64);
    }
    summary
}

/// Results of every active check over the whole library.
#[derive(Debug, Default)]
pub struct CheckSet {
    pub bpm: Vec<bpm::BpmCheck>,
    pub key: Vec<key::KeyCheck>,
    pub beatgrid: Vec<beatgrid::BeatgridCheck>,
    pub clipping: Vec<clipping::ClippingCheck>,
    pub metadata: Vec<metadata::MetadataCheck>,
    pub duplicates: Vec<duplicate::DuplicateCheck>,
    pub groups: Vec<duplicate::DuplicateGroup>,
    pub summaries: Vec<CheckSummary>,
}

impl CheckSet {
    pub fn summary(&self, kind: CheckKind) -> Option<&CheckSummary> {
        self.summaries.iter().find(|s| s.kind == kind)
    }
}

/// Runs every active check. Pure with respect to its inputs; the raw result
/// maps are only read, never written.
pub fn run_all(tracks: &[Track], raw: &RawResultSet, config: &SessionConfig) -> CheckSet {
    let mut set = CheckSet::default();

    for kind in CheckKind::ALL {
        if !config.is_active(kind) {
            continue;
        }
        match kind {
            CheckKind::Bpm => {
                set.bpm = tracks
                    .iter()
                    .map(|t| bpm::check(t, raw.beat.get(&t.id)))
                    .collect();
                set.summaries.push(summarize(
                    kind,
                    set.bpm
                        .iter()
                        .map(|c| (c.severity, c.skip_reason.is_some(), c.delta)),
                ));
            }
            CheckKind::Key => {
                set.key = tracks
                    .iter()
                    .map(|t| key::check(t, raw.key.get(&t.id)))
                    .collect();
                set.summaries.push(summarize(
                    kind,
                    set.key
                        .iter()
                        .map(|c| (c.severity, c.skip_reason.is_some(), None)),
                ));
            }
            CheckKind::Beatgrid => {
                set.beatgrid = tracks
                    .iter()
                    .map(|t| beatgrid::check(t, raw.beat.get(&t.id)))
                    .collect();
                set.summaries.push(summarize(
                    kind,
                    set.beatgrid
                        .iter()
                        .map(|c| (c.severity, c.skip_reason.is_some(), c.mean_drift_secs)),
                ));
            }
            CheckKind::Clipping => {
                set.clipping = tracks
                    .iter()
                    .map(|t| clipping::check(t, raw.clip.get(&t.id)))
                    .collect();
                set.summaries.push(summarize(
                    kind,
                    set.clipping
                        .iter()
                        .map(|c| (c.severity, c.skip_reason.is_some(), c.clipped_secs)),
                ));
            }
            CheckKind::Metadata => {
                set.metadata = tracks
                    .iter()
                    .map(|t| metadata::check(t, config.current_year))
                    .collect();
                set.summaries.push(summarize(
                    kind,
                    set.metadata
                        .iter()
                        .map(|c| (c.severity, false, Some(c.score as f64))),
                ));
            }
            CheckKind::Duplicates => {
                set.groups = duplicate::find_groups(tracks, &raw.fingerprint);
                set.duplicates = duplicate::check_tracks(
                    tracks,
                    &set.groups,
                    !raw.fingerprint.is_empty(),
                    &raw.fingerprint,
                );
                set.summaries.push(summarize(
                    kind,
                    set.duplicates
                        .iter()
                        .map(|c| (c.severity, c.skip_reason.is_some(), None)),
                ));
            }
        }
    }
    set
}

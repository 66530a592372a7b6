//! Turns check verdicts into a reviewable fix plan.
//!
//! Value fixes (bpm, key, beatgrid, clipping gain) are materialized up
//! front as pending entries. Duplicate removals are not: the plan only
//! carries a keeper choice per group, and the remove operations for the
//! non-kept members are derived from that map when the export is written,
//! so the choice can be revised without recomputing anything.

use std::collections::HashMap;

use crate::analyzers::duplicate::DuplicateGroup;
use crate::analyzers::{CheckSet, Severity, SkipReason};
use crate::fixes::{beatgrid_from_beats, FixEntry, FixOperation, FixStatus};
use crate::pipeline::session::RawResultSet;
use crate::Track;

/// Normalization headroom left under full scale.
const TARGET_PEAK_DB: f64 = -0.3;

pub struct FixPlan {
    pub entries: Vec<FixEntry>,
    pub groups: Vec<DuplicateGroup>,
    keeper_choices: HashMap<String, String>,
    source_ids: HashMap<String, String>,
}

impl FixPlan {
    pub fn keeper(&self, group_id: &str) -> Option<&str> {
        self.keeper_choices.get(group_id).map(String::as_str)
    }

    /// Overrides the keeper for a group. Rejects ids outside the group.
    pub fn set_keeper(&mut self, group_id: &str, track_id: &str) -> bool {
        let valid = self
            .groups
            .iter()
            .any(|g| g.group_id == group_id && g.contains(track_id));
        if valid {
            self.keeper_choices
                .insert(group_id.to_string(), track_id.to_string());
        }
        valid
    }

    pub fn approve_all(&mut self) {
        for entry in &mut self.entries {
            entry.approve();
        }
    }

    pub fn approve_where(&mut self, mut predicate: impl FnMut(&FixEntry) -> bool) {
        for entry in &mut self.entries {
            if predicate(entry) {
                entry.approve();
            }
        }
    }

    pub fn approved(&self) -> impl Iterator<Item = &FixEntry> {
        self.entries.iter().filter(|e| e.is_approved())
    }

    /// Remove-operations for every non-kept member, derived from the current
    /// keeper choices.
    pub fn removal_entries(&self) -> Vec<FixEntry> {
        let mut removals = Vec::new();
        for group in &self.groups {
            let Some(keeper) = self.keeper(&group.group_id) else {
                continue;
            };
            for member in group.member_ids().filter(|id| *id != keeper) {
                removals.push(FixEntry {
                    track_id: member.to_string(),
                    source_id: self.source_ids.get(member).cloned().unwrap_or_default(),
                    operation: FixOperation::DuplicateRemove,
                    status: FixStatus::Approved,
                    before: member.to_string(),
                    after: format!("removed (kept {})", keeper),
                });
            }
        }
        removals
    }

    /// Everything the export engine should apply: approved value fixes,
    /// plus duplicate removals when asked for.
    pub fn export_operations(&self, remove_duplicates: bool) -> Vec<FixEntry> {
        let mut operations: Vec<FixEntry> = self.approved().cloned().collect();
        if remove_duplicates {
            operations.extend(self.removal_entries());
        }
        operations
    }
}

pub fn plan(tracks: &[Track], checks: &CheckSet, raw: &RawResultSet) -> FixPlan {
    let by_id: HashMap<&str, &Track> = tracks.iter().map(|t| (t.id.as_str(), t)).collect();
    let mut entries = Vec::new();

    for check in &checks.bpm {
        let Some(track) = by_id.get(check.track_id.as_str()) else {
            continue;
        };
        let Some(adjusted) = check.adjusted_bpm else {
            continue;
        };
        match check.skip_reason {
            // Backfill: nothing stored, a detection to write.
            Some(SkipReason::NoBpmStored) => entries.push(FixEntry::new(
                track,
                FixOperation::Bpm { bpm: adjusted },
                "no stored bpm",
                format!("{:.2}", adjusted),
            )),
            Some(_) => {}
            None if check.severity != Severity::Ok => entries.push(FixEntry::new(
                track,
                FixOperation::Bpm { bpm: adjusted },
                format!("{:.2}", check.stored_bpm.unwrap_or(0.0)),
                format!("{:.2}", adjusted),
            )),
            None => {}
        }
    }

    for check in &checks.key {
        if check.skip_reason.is_some() || check.severity == Severity::Ok {
            continue;
        }
        let (Some(track), Some(analysis)) = (
            by_id.get(check.track_id.as_str()),
            raw.key.get(&check.track_id),
        ) else {
            continue;
        };
        entries.push(FixEntry::new(
            track,
            FixOperation::Key { key: analysis.key },
            check
                .stored_key
                .clone()
                .unwrap_or_else(|| "no stored key".to_string()),
            format!("{} ({})", analysis.key.name(), analysis.camelot),
        ));
    }

    // Guard-adjusted tempo per track, for grid synthesis.
    let adjusted_bpm: HashMap<&str, f64> = checks
        .bpm
        .iter()
        .filter_map(|c| c.adjusted_bpm.map(|b| (c.track_id.as_str(), b)))
        .collect();
    for check in &checks.beatgrid {
        let drifted = check.skip_reason.is_none() && check.severity == Severity::Error;
        let gridless = check.skip_reason == Some(SkipReason::NoGrid);
        if !drifted && !gridless {
            continue;
        }
        let (Some(track), Some(beats)) = (
            by_id.get(check.track_id.as_str()),
            raw.beat.get(&check.track_id),
        ) else {
            continue;
        };
        let bpm = adjusted_bpm
            .get(check.track_id.as_str())
            .copied()
            .unwrap_or(beats.bpm_estimate);
        let markers = beatgrid_from_beats(beats, bpm);
        let Some(anchor) = markers.first() else {
            continue;
        };
        let before = if gridless {
            "no beatgrid".to_string()
        } else {
            format!(
                "grid drifting {:.1} ms",
                check.mean_drift_secs.unwrap_or(0.0) * 1000.0
            )
        };
        let after = format!("anchor {:.3}s at {:.2} bpm", anchor.position_secs, anchor.bpm);
        entries.push(FixEntry::new(
            track,
            FixOperation::Beatgrid { markers },
            before,
            after,
        ));
    }

    for check in &checks.clipping {
        if check.skip_reason.is_some() || check.severity == Severity::Ok {
            continue;
        }
        let (Some(track), Some(analysis)) = (
            by_id.get(check.track_id.as_str()),
            raw.clip.get(&check.track_id),
        ) else {
            continue;
        };
        let peak_db = analysis.peak_level_db;
        entries.push(FixEntry::new(
            track,
            FixOperation::ClippingNormalize {
                peak_db,
                gain_db: TARGET_PEAK_DB - peak_db,
            },
            format!(
                "peak {:.1} dB, {} clipped region(s)",
                peak_db, check.clip_count
            ),
            format!("peak {:.1} dB", TARGET_PEAK_DB),
        ));
    }

    let keeper_choices = checks
        .groups
        .iter()
        .map(|g| (g.group_id.clone(), g.recommended_keeper.clone()))
        .collect();

    log::info!(
        "fix plan: {} pending entr{}, {} duplicate group(s)",
        entries.len(),
        if entries.len() == 1 { "y" } else { "ies" },
        checks.groups.len()
    );

    FixPlan {
        entries,
        groups: checks.groups.clone(),
        keeper_choices,
        source_ids: tracks
            .iter()
            .map(|t| (t.id.clone(), t.source_id.clone()))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::run_all;
    use crate::audio::adapters::{BeatAnalysis, ClipAnalysis, ClipRegion, KeyAnalysis};
    use crate::keys::{MusicalKey, Scale};
    use crate::pipeline::session::SessionConfig;
    use crate::{TrackSource, Track};

    fn track(id: &str, bpm: Option<f64>, key: Option<&str>) -> Track {
        let mut track = Track::new(TrackSource::Rekordbox, id);
        track.title = Some(format!("Track {}", id));
        track.artist = Some("DJ A".into());
        track.stored_bpm = bpm;
        track.stored_key = key.map(str::to_string);
        track
    }

    fn beats(bpm: f64) -> BeatAnalysis {
        let beat_len = 60.0 / bpm;
        BeatAnalysis {
            beat_timestamps: (0..16).map(|i| 0.25 + i as f64 * beat_len).collect(),
            bpm_estimate: bpm,
            segment_bpms: vec![bpm; 4],
            avg_confidence: 0.9,
        }
    }

    fn run_plan(tracks: &[Track], raw: &RawResultSet) -> FixPlan {
        let checks = run_all(tracks, raw, &SessionConfig::default());
        plan(tracks, &checks, raw)
    }

    #[test]
    fn bpm_mismatch_beyond_tolerance_gets_a_fix() {
        let tracks = vec![track("1", Some(130.0), None), track("2", Some(128.0), None)];
        let mut raw = RawResultSet::default();
        raw.beat.insert("rekordbox:1".into(), beats(128.0));
        raw.beat.insert("rekordbox:2".into(), beats(128.0));

        let plan = run_plan(&tracks, &raw);
        let bpm_fixes: Vec<&FixEntry> = plan
            .entries
            .iter()
            .filter(|e| matches!(e.operation, FixOperation::Bpm { .. }))
            .collect();
        assert_eq!(bpm_fixes.len(), 1);
        assert_eq!(bpm_fixes[0].track_id, "rekordbox:1");
        assert_eq!(bpm_fixes[0].status, FixStatus::Pending);
    }

    #[test]
    fn missing_stored_bpm_is_backfilled() {
        let tracks = vec![track("1", None, None)];
        let mut raw = RawResultSet::default();
        raw.beat.insert("rekordbox:1".into(), beats(127.5));

        let plan = run_plan(&tracks, &raw);
        assert!(plan.entries.iter().any(|e| matches!(
            e.operation,
            FixOperation::Bpm { bpm } if (bpm - 127.5).abs() < 1e-9
        )));
    }

    #[test]
    fn key_mismatch_proposes_detected_key() {
        let tracks = vec![track("1", None, Some("F#m"))];
        let mut raw = RawResultSet::default();
        raw.key.insert(
            "rekordbox:1".into(),
            KeyAnalysis::new(MusicalKey::new(9, Scale::Minor), 0.9),
        );

        let plan = run_plan(&tracks, &raw);
        let fix = plan
            .entries
            .iter()
            .find(|e| matches!(e.operation, FixOperation::Key { .. }))
            .unwrap();
        assert_eq!(fix.before, "F#m");
        assert!(fix.after.contains("Am"));
    }

    #[test]
    fn gridless_track_with_beats_gets_a_generated_grid() {
        let tracks = vec![track("1", Some(128.0), None)];
        let mut raw = RawResultSet::default();
        raw.beat.insert("rekordbox:1".into(), beats(128.0));

        let plan = run_plan(&tracks, &raw);
        let fix = plan
            .entries
            .iter()
            .find(|e| matches!(e.operation, FixOperation::Beatgrid { .. }))
            .unwrap();
        assert_eq!(fix.before, "no beatgrid");
        if let FixOperation::Beatgrid { markers } = &fix.operation {
            assert_eq!(markers.len(), 1);
            assert!((markers[0].position_secs - 0.25).abs() < 1e-9);
        }
    }

    #[test]
    fn clipping_fix_carries_the_measured_peak() {
        let tracks = vec![track("1", None, None)];
        let mut raw = RawResultSet::default();
        raw.clip.insert(
            "rekordbox:1".into(),
            ClipAnalysis {
                has_clipping: true,
                clip_count: 12,
                peak_level_linear: 1.0,
                peak_level_db: 0.0,
                regions: (0..12)
                    .map(|i| ClipRegion {
                        start_secs: i as f64,
                        end_secs: i as f64 + 0.05,
                    })
                    .collect(),
            },
        );

        let plan = run_plan(&tracks, &raw);
        let fix = plan
            .entries
            .iter()
            .find(|e| matches!(e.operation, FixOperation::ClippingNormalize { .. }))
            .unwrap();
        if let FixOperation::ClippingNormalize { peak_db, gain_db } = fix.operation {
            assert_eq!(peak_db, 0.0);
            assert!((gain_db - TARGET_PEAK_DB).abs() < 1e-9);
        }
    }

    #[test]
    fn duplicate_removals_follow_the_keeper_choice() {
        let mut a = track("1", None, None);
        a.title = Some("Same".into());
        a.bitrate = Some(320);
        let mut b = track("2", None, None);
        b.title = Some("Same".into());
        b.bitrate = Some(128);
        let tracks = vec![a, b];
        let raw = RawResultSet::default();

        let mut plan = run_plan(&tracks, &raw);
        assert_eq!(plan.groups.len(), 1);
        // Recommended keeper is the higher-bitrate member.
        let removals = plan.removal_entries();
        assert_eq!(removals.len(), 1);
        assert_eq!(removals[0].track_id, "rekordbox:2");
        assert_eq!(removals[0].source_id, "2");

        // Revising the keeper flips the derived removal without replanning.
        let group_id = plan.groups[0].group_id.clone();
        assert!(plan.set_keeper(&group_id, "rekordbox:2"));
        let removals = plan.removal_entries();
        assert_eq!(removals.len(), 1);
        assert_eq!(removals[0].track_id, "rekordbox:1");

        assert!(!plan.set_keeper(&group_id, "rekordbox:missing"));
    }

    #[test]
    fn export_operations_respect_approval_and_duplicate_opt_in() {
        let tracks = vec![track("1", Some(130.0), None)];
        let mut raw = RawResultSet::default();
        raw.beat.insert("rekordbox:1".into(), beats(128.0));

        let mut plan = run_plan(&tracks, &raw);
        assert!(plan.export_operations(false).is_empty());
        plan.approve_all();
        let ops = plan.export_operations(false);
        assert!(!ops.is_empty());
        assert!(ops.iter().all(|e| e.is_approved()));
    }
}

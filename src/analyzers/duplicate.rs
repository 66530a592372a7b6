//! Duplicate detection over normalized artist/title metadata, optionally
//! confirmed by acoustic fingerprints.
//!
//! Tracks are never removed in memory; a group only carries a recommended
//! keeper, and removal operations are derived from the keeper choice when an
//! export is actually written.

use std::collections::HashMap;

use regex::Regex;
use serde::Serialize;

use crate::analyzers::{Severity, SkipReason};
use crate::audio::adapters::FingerprintAnalysis;
use crate::Track;

/// A differing parenthesized suffix containing one of these marks a distinct
/// rendition, not a duplicate.
const VERSION_KEYWORDS: [&str; 20] = [
    "remix",
    "edit",
    "version",
    "mix",
    "remaster",
    "extended",
    "radio",
    "club",
    "instrumental",
    "dub",
    "original",
    "rework",
    "reconstruction",
    "vip",
    "bootleg",
    "mashup",
    "flip",
    "cut",
    "recut",
    "reprise",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MatchLevel {
    /// Same normalized artist and title.
    MetadataOnly,
    /// Metadata match plus identical fingerprints for every member.
    FingerprintConfirmed,
}

impl MatchLevel {
    pub fn label(&self) -> &'static str {
        match self {
            MatchLevel::MetadataOnly => "metadata-only",
            MatchLevel::FingerprintConfirmed => "fingerprint-confirmed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupMember {
    pub track_id: String,
    pub quality: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateGroup {
    /// Sorted member ids joined with '|'.
    pub group_id: String,
    pub members: Vec<GroupMember>,
    pub level: MatchLevel,
    pub recommended_keeper: String,
}

impl DuplicateGroup {
    pub fn member_ids(&self) -> impl Iterator<Item = &str> {
        self.members.iter().map(|m| m.track_id.as_str())
    }

    pub fn contains(&self, track_id: &str) -> bool {
        self.members.iter().any(|m| m.track_id == track_id)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DuplicateCheck {
    pub track_id: String,
    pub severity: Severity,
    pub skip_reason: Option<SkipReason>,
    pub group_id: Option<String>,
    pub level: Option<MatchLevel>,
}

impl DuplicateCheck {
    pub fn detail(&self) -> String {
        match self.level {
            Some(level) => format!("duplicate ({})", level.label()),
            None => String::new(),
        }
    }
}

/// Normalized (artist, title, version) identity a track is grouped under.
/// `None` when the track lacks the metadata to group confidently.
fn identity(track: &Track, leading_number: &Regex) -> Option<(String, String, Option<String>)> {
    let artist = track.artist.as_deref()?.trim().to_lowercase();
    let raw_title = track.title.as_deref()?;
    if artist.is_empty() || raw_title.trim().is_empty() {
        return None;
    }

    let cleaned = raw_title
        .replace(['[', ']'], "")
        .replace('_', " ")
        .trim()
        .to_string();
    let mut title = leading_number.replace(&cleaned, "").trim().to_lowercase();

    // Peel a trailing parenthesized suffix off the title; it only keeps a
    // track out of a group when it names a distinct rendition.
    let mut version = None;
    if let Some(open) = title.rfind('(') {
        if let Some(close) = title[open..].find(')') {
            let suffix = title[open + 1..open + close].trim().to_string();
            title = title[..open].trim().to_string();
            if VERSION_KEYWORDS.iter().any(|k| suffix.contains(k)) {
                version = Some(suffix);
            }
        }
    }
    if title.is_empty() {
        return None;
    }
    Some((artist, title, version))
}

/// Higher is better. Lossless formats outrank any lossy bitrate, then
/// bitrate decides, then file size breaks ties.
pub fn quality_score(track: &Track) -> f64 {
    let lossless = track
        .file_type
        .as_deref()
        .is_some_and(|t| matches!(t.to_lowercase().as_str(), "flac" | "wav" | "aiff" | "aif"));
    let mut score = if lossless { 10_000.0 } else { 0.0 };
    score += track.bitrate.unwrap_or(0) as f64;
    score += track.file_size.unwrap_or(0) as f64 / 1e12;
    score
}

pub fn find_groups(
    tracks: &[Track],
    fingerprints: &HashMap<String, FingerprintAnalysis>,
) -> Vec<DuplicateGroup> {
    let leading_number = Regex::new(r"^\d+\.?\s*").unwrap();

    let mut buckets: HashMap<(String, String, Option<String>), Vec<&Track>> = HashMap::new();
    for track in tracks {
        if let Some(key) = identity(track, &leading_number) {
            buckets.entry(key).or_default().push(track);
        }
    }

    let mut groups: Vec<DuplicateGroup> = buckets
        .into_values()
        .filter(|members| members.len() >= 2)
        .map(|mut members| {
            members.sort_by(|a, b| a.id.cmp(&b.id));
            let group_id = members
                .iter()
                .map(|t| t.id.as_str())
                .collect::<Vec<_>>()
                .join("|");

            let scored: Vec<GroupMember> = members
                .iter()
                .map(|t| GroupMember {
                    track_id: t.id.clone(),
                    quality: quality_score(t),
                })
                .collect();

            let level = confirmation_level(&scored, fingerprints);

            // Best quality wins; the sort above makes ties deterministic.
            let recommended_keeper = scored
                .iter()
                .max_by(|a, b| a.quality.total_cmp(&b.quality))
                .map(|m| m.track_id.clone())
                .unwrap_or_default();

            DuplicateGroup {
                group_id,
                members: scored,
                level,
                recommended_keeper,
            }
        })
        .collect();

    groups.sort_by(|a, b| a.group_id.cmp(&b.group_id));
    log::info!("duplicate scan: {} group(s)", groups.len());
    groups
}

fn confirmation_level(
    members: &[GroupMember],
    fingerprints: &HashMap<String, FingerprintAnalysis>,
) -> MatchLevel {
    let mut prints = members
        .iter()
        .map(|m| fingerprints.get(&m.track_id).map(|f| &f.fingerprint));
    let Some(Some(first)) = prints.next() else {
        return MatchLevel::MetadataOnly;
    };
    if prints.all(|p| p == Some(first)) {
        MatchLevel::FingerprintConfirmed
    } else {
        MatchLevel::MetadataOnly
    }
}

pub fn check_tracks(
    tracks: &[Track],
    groups: &[DuplicateGroup],
    fingerprint_active: bool,
    fingerprints: &HashMap<String, FingerprintAnalysis>,
) -> Vec<DuplicateCheck> {
    let mut by_member: HashMap<&str, &DuplicateGroup> = HashMap::new();
    for group in groups {
        for id in group.member_ids() {
            by_member.insert(id, group);
        }
    }

    tracks
        .iter()
        .map(|track| match by_member.get(track.id.as_str()) {
            Some(group) => {
                let severity = match group.level {
                    MatchLevel::MetadataOnly => Severity::Warning,
                    MatchLevel::FingerprintConfirmed => Severity::Error,
                };
                // Confirmation could not run for this member; the metadata
                // verdict stands but the track stays out of the buckets.
                let skip_reason = (fingerprint_active
                    && !fingerprints.contains_key(&track.id))
                .then_some(SkipReason::NoFingerprint);
                DuplicateCheck {
                    track_id: track.id.clone(),
                    severity,
                    skip_reason,
                    group_id: Some(group.group_id.clone()),
                    level: Some(group.level),
                }
            }
            None => DuplicateCheck {
                track_id: track.id.clone(),
                severity: Severity::Ok,
                skip_reason: None,
                group_id: None,
                level: None,
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TrackSource;

    fn track(id: &str, artist: &str, title: &str) -> Track {
        let mut track = Track::new(TrackSource::Folder, id);
        track.artist = Some(artist.to_string());
        track.title = Some(title.to_string());
        track
    }

    fn fingerprint(bytes: &[u8]) -> FingerprintAnalysis {
        FingerprintAnalysis {
            fingerprint: bytes.to_vec(),
            duration_secs: 100.0,
        }
    }

    #[test]
    fn groups_by_normalized_title() {
        let tracks = vec![
            track("a", "DJ A", "01. One"),
            track("b", "dj a", "One"),
            track("c", "DJ A", "Two"),
        ];
        let groups = find_groups(&tracks, &HashMap::new());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group_id, "folder:a|folder:b");
        assert_eq!(groups[0].level, MatchLevel::MetadataOnly);
    }

    #[test]
    fn version_keywords_split_groups() {
        let tracks = vec![
            track("a", "DJ A", "One (Original Mix)"),
            track("b", "DJ A", "One (Radio Edit)"),
            // A non-version suffix is ignored for grouping.
            track("c", "DJ A", "Two (2019)"),
            track("d", "DJ A", "Two"),
        ];
        let groups = find_groups(&tracks, &HashMap::new());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group_id, "folder:c|folder:d");
    }

    #[test]
    fn same_version_still_groups() {
        let tracks = vec![
            track("a", "DJ A", "One (Extended Mix)"),
            track("b", "DJ A", "One (Extended Mix)"),
        ];
        let groups = find_groups(&tracks, &HashMap::new());
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn keeper_prefers_lossless_then_bitrate() {
        let mut flac = track("a", "DJ A", "One");
        flac.file_type = Some("FLAC".into());
        flac.bitrate = Some(900);
        let mut mp3 = track("b", "DJ A", "One");
        mp3.file_type = Some("MP3".into());
        mp3.bitrate = Some(320);

        let groups = find_groups(&[mp3.clone(), flac], &HashMap::new());
        assert_eq!(groups[0].recommended_keeper, "folder:a");

        let mut better_mp3 = track("c", "DJ A", "One");
        better_mp3.file_type = Some("MP3".into());
        better_mp3.bitrate = Some(320);
        let mut worse_mp3 = track("d", "DJ A", "One");
        worse_mp3.file_type = Some("MP3".into());
        worse_mp3.bitrate = Some(128);
        let groups = find_groups(&[worse_mp3, better_mp3], &HashMap::new());
        assert_eq!(groups[0].recommended_keeper, "folder:c");
    }

    #[test]
    fn identical_fingerprints_confirm_a_group() {
        let tracks = vec![track("a", "DJ A", "One"), track("b", "DJ A", "One")];
        let mut prints = HashMap::new();
        prints.insert("folder:a".to_string(), fingerprint(&[1, 2, 3]));
        prints.insert("folder:b".to_string(), fingerprint(&[1, 2, 3]));
        let groups = find_groups(&tracks, &prints);
        assert_eq!(groups[0].level, MatchLevel::FingerprintConfirmed);

        prints.insert("folder:b".to_string(), fingerprint(&[9, 9, 9]));
        let groups = find_groups(&tracks, &prints);
        assert_eq!(groups[0].level, MatchLevel::MetadataOnly);
    }

    #[test]
    fn per_track_severity_follows_group_level() {
        let tracks = vec![
            track("a", "DJ A", "One"),
            track("b", "DJ A", "One"),
            track("c", "DJ A", "Solo"),
        ];
        let mut prints = HashMap::new();
        prints.insert("folder:a".to_string(), fingerprint(&[7]));
        prints.insert("folder:b".to_string(), fingerprint(&[7]));
        let groups = find_groups(&tracks, &prints);
        let checks = check_tracks(&tracks, &groups, true, &prints);

        assert_eq!(checks[0].severity, Severity::Error);
        assert_eq!(checks[1].severity, Severity::Error);
        assert_eq!(checks[2].severity, Severity::Ok);
        assert_eq!(checks[2].group_id, None);
    }

    #[test]
    fn missing_fingerprint_in_active_session_skips_member() {
        let tracks = vec![track("a", "DJ A", "One"), track("b", "DJ A", "One")];
        let mut prints = HashMap::new();
        prints.insert("folder:a".to_string(), fingerprint(&[7]));
        let groups = find_groups(&tracks, &prints);
        let checks = check_tracks(&tracks, &groups, true, &prints);

        assert_eq!(checks[0].skip_reason, None);
        assert_eq!(checks[1].skip_reason, Some(SkipReason::NoFingerprint));
        // Metadata-only verdict still stands for the member with a print.
        assert_eq!(checks[0].severity, Severity::Warning);
    }

    #[test]
    fn tracks_without_metadata_never_group() {
        let mut untitled = Track::new(TrackSource::Folder, "x");
        untitled.artist = Some("DJ A".into());
        let tracks = vec![untitled, track("a", "DJ A", "One")];
        assert!(find_groups(&tracks, &HashMap::new()).is_empty());
    }
}

//! Tag completeness scoring. Weighted field presence, with per-field
//! severities for the fields a DJ actually cannot work without.

use serde::Serialize;

use crate::analyzers::Severity;
use crate::Track;

const EARLIEST_PLAUSIBLE_YEAR: i32 = 1900;

#[derive(Debug, Clone, Serialize)]
pub struct FieldCheck {
    pub field: &'static str,
    pub weight: u32,
    pub present: bool,
    pub severity: Severity,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetadataCheck {
    pub track_id: String,
    pub severity: Severity,
    /// 0-100, the sum of present fields' weights.
    pub score: u32,
    pub fields: Vec<FieldCheck>,
}

impl MetadataCheck {
    pub fn detail(&self) -> String {
        let missing: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| !f.present)
            .map(|f| f.field)
            .collect();
        if missing.is_empty() {
            format!("complete ({}%)", self.score)
        } else {
            format!("{}% complete, missing: {}", self.score, missing.join(", "))
        }
    }
}

// (field, weight, severity when missing or invalid)
const FIELD_WEIGHTS: [(&str, u32, Severity); 9] = [
    ("title", 25, Severity::Error),
    ("artist", 25, Severity::Error),
    ("genre", 15, Severity::Warning),
    ("year", 10, Severity::Warning),
    ("album", 10, Severity::Warning),
    ("key", 10, Severity::Ok),
    ("composer", 3, Severity::Ok),
    ("label", 1, Severity::Ok),
    ("comment", 1, Severity::Ok),
];

fn has_text(value: &Option<String>) -> bool {
    value.as_deref().is_some_and(|v| !v.trim().is_empty())
}

pub fn check(track: &Track, current_year: i32) -> MetadataCheck {
    let mut fields = Vec::with_capacity(FIELD_WEIGHTS.len());
    let mut score = 0;
    let mut overall = Severity::Ok;

    for (field, weight, miss_severity) in FIELD_WEIGHTS {
        let present = match field {
            "title" => has_text(&track.title),
            "artist" => has_text(&track.artist),
            "genre" => has_text(&track.genre),
            "year" => track
                .year
                .is_some_and(|y| (EARLIEST_PLAUSIBLE_YEAR..=current_year).contains(&y)),
            "album" => has_text(&track.album),
            "key" => has_text(&track.stored_key),
            "composer" => has_text(&track.composer),
            "label" => has_text(&track.label),
            "comment" => has_text(&track.comment),
            _ => unreachable!("unknown metadata field"),
        };
        let severity = if present { Severity::Ok } else { miss_severity };
        if present {
            score += weight;
        }
        overall = overall.max(severity);
        fields.push(FieldCheck {
            field,
            weight,
            present,
            severity,
        });
    }

    MetadataCheck {
        track_id: track.id.clone(),
        severity: overall,
        score,
        fields,
    }
}

//! Stored-vs-detected musical key verification, compared in Camelot space
//! so enharmonic spellings and notation systems agree.

use serde::Serialize;

use crate::analyzers::{Severity, SkipReason};
use crate::audio::adapters::KeyAnalysis;
use crate::keys::MusicalKey;
use crate::Track;

/// Below this detector confidence a hard mismatch only warns.
const CONFIDENT_DETECTION: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum KeyRelation {
    /// Stored key missing or unparseable; nothing to compare.
    Unknown,
    Match,
    /// Relative major/minor pair: same Camelot number, other letter.
    Relative,
    Mismatch,
}

#[derive(Debug, Clone, Serialize)]
pub struct KeyCheck {
    pub track_id: String,
    pub severity: Severity,
    pub skip_reason: Option<SkipReason>,
    pub stored_key: Option<String>,
    pub detected_key: Option<String>,
    pub detected_camelot: Option<String>,
    pub confidence: Option<f64>,
    pub relation: KeyRelation,
}

impl KeyCheck {
    pub fn detail(&self) -> String {
        match (&self.stored_key, &self.detected_key) {
            (Some(stored), Some(detected)) => format!(
                "stored {}, detected {} ({})",
                stored,
                detected,
                self.detected_camelot.as_deref().unwrap_or("?")
            ),
            (None, Some(detected)) => format!("no stored key, detected {}", detected),
            _ => String::new(),
        }
    }
}

pub fn check(track: &Track, raw: Option<&KeyAnalysis>) -> KeyCheck {
    let Some(analysis) = raw else {
        return KeyCheck {
            track_id: track.id.clone(),
            severity: Severity::Ok,
            skip_reason: Some(SkipReason::NoPcm),
            stored_key: track.stored_key.clone(),
            detected_key: None,
            detected_camelot: None,
            confidence: None,
            relation: KeyRelation::Unknown,
        };
    };

    let detected = analysis.key;
    let stored = track.stored_key.as_deref().and_then(MusicalKey::parse);

    let (severity, relation) = match stored {
        None => (Severity::Warning, KeyRelation::Unknown),
        Some(stored) if stored == detected => (Severity::Ok, KeyRelation::Match),
        Some(stored) if stored.is_relative_of(&detected) => {
            (Severity::Warning, KeyRelation::Relative)
        }
        Some(_) => {
            if analysis.confidence < CONFIDENT_DETECTION {
                (Severity::Warning, KeyRelation::Mismatch)
            } else {
                (Severity::Error, KeyRelation::Mismatch)
            }
        }
    };

    KeyCheck {
        track_id: track.id.clone(),
        severity,
        skip_reason: None,
        stored_key: track.stored_key.clone(),
        detected_key: Some(detected.name()),
        detected_camelot: Some(analysis.camelot.clone()),
        confidence: Some(analysis.confidence),
        relation,
    }
}

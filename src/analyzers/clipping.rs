//! Clipping verification over the clip scanner's region list.

use serde::Serialize;

use crate::analyzers::{Severity, SkipReason};
use crate::audio::adapters::ClipAnalysis;
use crate::Track;

/// Up to this many regions with under this much clipped audio only warns.
const WARNING_MAX_REGIONS: usize = 5;
const WARNING_MAX_CLIPPED_SECS: f64 = 0.1;

#[derive(Debug, Clone, Serialize)]
pub struct ClippingCheck {
    pub track_id: String,
    pub severity: Severity,
    pub skip_reason: Option<SkipReason>,
    pub clip_count: usize,
    pub clipped_secs: Option<f64>,
    pub peak_level_db: Option<f64>,
}

impl ClippingCheck {
    pub fn detail(&self) -> String {
        match self.clipped_secs {
            Some(secs) if self.clip_count > 0 => format!(
                "{} clipped region(s), {:.0} ms total, peak {:.1} dB",
                self.clip_count,
                secs * 1000.0,
                self.peak_level_db.unwrap_or(0.0)
            ),
            Some(_) => "no clipping".to_string(),
            None => String::new(),
        }
    }
}

pub fn check(track: &Track, raw: Option<&ClipAnalysis>) -> ClippingCheck {
    let Some(analysis) = raw else {
        return ClippingCheck {
            track_id: track.id.clone(),
            severity: Severity::Ok,
            skip_reason: Some(SkipReason::NoPcm),
            clip_count: 0,
            clipped_secs: None,
            peak_level_db: None,
        };
    };

    let clipped_secs = analysis.total_clipped_secs();
    let severity = if analysis.regions.is_empty() {
        Severity::Ok
    } else if analysis.regions.len() <= WARNING_MAX_REGIONS
        && clipped_secs < WARNING_MAX_CLIPPED_SECS
    {
        Severity::Warning
    } else {
        Severity::Error
    };

    ClippingCheck {
        track_id: track.id.clone(),
        severity,
        skip_reason: None,
        clip_count: analysis.clip_count,
        clipped_secs: Some(clipped_secs),
        peak_level_db: Some(analysis.peak_level_db),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::adapters::ClipRegion;
    use crate::TrackSource;

    fn analysis(regions: Vec<ClipRegion>) -> ClipAnalysis {
        ClipAnalysis {
            has_clipping: !regions.is_empty(),
            clip_count: regions.len(),
            peak_level_linear: 1.0,
            peak_level_db: 0.0,
            regions,
        }
    }

    fn region(start: f64, end: f64) -> ClipRegion {
        ClipRegion {
            start_secs: start,
            end_secs: end,
        }
    }

    fn track() -> Track {
        Track::new(TrackSource::Folder, "t")
    }

    #[test]
    fn no_regions_is_ok() {
        let result = check(&track(), Some(&analysis(Vec::new())));
        assert_eq!(result.severity, Severity::Ok);
        assert_eq!(result.clipped_secs, Some(0.0));
    }

    #[test]
    fn few_short_regions_warn() {
        let regions = vec![region(1.0, 1.01), region(2.0, 2.02)];
        let result = check(&track(), Some(&analysis(regions)));
        assert_eq!(result.severity, Severity::Warning);
    }

    #[test]
    fn long_total_is_an_error() {
        let result = check(&track(), Some(&analysis(vec![region(1.0, 1.2)])));
        assert_eq!(result.severity, Severity::Error);
    }

    #[test]
    fn many_regions_are_an_error_even_if_short() {
        let regions = (0..6).map(|i| region(i as f64, i as f64 + 0.001)).collect();
        let result = check(&track(), Some(&analysis(regions)));
        assert_eq!(result.severity, Severity::Error);
    }

    #[test]
    fn no_pcm_is_ok_with_skip() {
        let result = check(&track(), None);
        assert_eq!(result.severity, Severity::Ok);
        assert_eq!(result.skip_reason, Some(SkipReason::NoPcm));
    }
}

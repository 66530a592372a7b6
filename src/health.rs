//! Library health: one 0-100 number summarizing every active check.

use serde::Serialize;

use crate::analyzers::{CheckKind, CheckSummary};

// Base weights; re-normalized over whichever checks actually ran.
const BASE_WEIGHTS: [(CheckKind, f64); 6] = [
    (CheckKind::Metadata, 0.30),
    (CheckKind::Beatgrid, 0.20),
    (CheckKind::Bpm, 0.15),
    (CheckKind::Key, 0.15),
    (CheckKind::Clipping, 0.10),
    (CheckKind::Duplicates, 0.10),
];

pub fn base_weight(kind: CheckKind) -> f64 {
    BASE_WEIGHTS
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, w)| *w)
        .unwrap_or(0.0)
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckScore {
    pub kind: CheckKind,
    /// Weight after re-normalization over the active subset; sums to 1.
    pub weight: f64,
    pub score: u8,
    pub ok: usize,
    pub total: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthScore {
    pub overall: u8,
    pub checks: Vec<CheckScore>,
}

impl HealthScore {
    pub fn check(&self, kind: CheckKind) -> Option<&CheckScore> {
        self.checks.iter().find(|c| c.kind == kind)
    }
}

/// Scores the library from the per-check aggregates. Skipped tracks are out
/// of the denominator entirely; a check nothing was eligible for scores 100.
pub fn score(summaries: &[CheckSummary]) -> HealthScore {
    let total_weight: f64 = summaries.iter().map(|s| base_weight(s.kind)).sum();
    if total_weight <= 0.0 {
        return HealthScore {
            overall: 100,
            checks: Vec::new(),
        };
    }

    let mut checks = Vec::with_capacity(summaries.len());
    let mut overall = 0.0;
    for summary in summaries {
        let weight = base_weight(summary.kind) / total_weight;
        let eligible = summary.eligible();
        let raw = if eligible == 0 {
            100.0
        } else {
            100.0 * summary.ok as f64 / eligible as f64
        };
        overall += weight * raw;
        checks.push(CheckScore {
            kind: summary.kind,
            weight,
            score: raw.round() as u8,
            ok: summary.ok,
            total: summary.total(),
            skipped: summary.skipped,
        });
    }

    HealthScore {
        overall: overall.round() as u8,
        checks,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(kind: CheckKind, ok: usize, warning: usize, error: usize, skipped: usize) -> CheckSummary {
        CheckSummary {
            kind,
            ok,
            warning,
            error,
            skipped,
            average: None,
        }
    }

    #[test]
    fn active_weights_sum_to_one() {
        let summaries = vec![
            summary(CheckKind::Bpm, 5, 0, 0, 0),
            summary(CheckKind::Key, 5, 0, 0, 0),
            summary(CheckKind::Metadata, 5, 0, 0, 0),
        ];
        let health = score(&summaries);
        let total: f64 = health.checks.iter().map(|c| c.weight).sum();
        assert!((total - 1.0).abs() < 1e-9);
        // bpm and key share the same base weight; renormalized they stay equal.
        assert_eq!(
            health.check(CheckKind::Bpm).unwrap().weight,
            health.check(CheckKind::Key).unwrap().weight
        );
    }

    #[test]
    fn perfect_library_scores_one_hundred() {
        let summaries: Vec<CheckSummary> = CheckKind::ALL
            .iter()
            .map(|k| summary(*k, 10, 0, 0, 0))
            .collect();
        let health = score(&summaries);
        assert_eq!(health.overall, 100);
        assert!(health.checks.iter().all(|c| c.score == 100));
    }

    #[test]
    fn zero_eligible_tracks_score_one_hundred() {
        let summaries = vec![
            summary(CheckKind::Bpm, 0, 0, 0, 8),
            summary(CheckKind::Metadata, 4, 4, 0, 0),
        ];
        let health = score(&summaries);
        assert_eq!(health.check(CheckKind::Bpm).unwrap().score, 100);
        assert_eq!(health.check(CheckKind::Metadata).unwrap().score, 50);
    }

    #[test]
    fn overall_is_the_weighted_sum() {
        // metadata .30 and beatgrid .20 active: weights renormalize to .6/.4.
        let summaries = vec![
            summary(CheckKind::Metadata, 1, 1, 0, 0),
            summary(CheckKind::Beatgrid, 0, 0, 2, 0),
        ];
        let health = score(&summaries);
        // 0.6 * 50 + 0.4 * 0 = 30
        assert_eq!(health.overall, 30);
    }

    #[test]
    fn scoring_is_idempotent() {
        let summaries = vec![
            summary(CheckKind::Bpm, 3, 2, 1, 4),
            summary(CheckKind::Clipping, 9, 0, 1, 0),
        ];
        let first = score(&summaries);
        let second = score(&summaries);
        assert_eq!(first.overall, second.overall);
        for (a, b) in first.checks.iter().zip(&second.checks) {
            assert_eq!(a.score, b.score);
            assert_eq!(a.weight, b.weight);
        }
    }

    #[test]
    fn no_active_checks_is_a_clean_bill() {
        let health = score(&[]);
        assert_eq!(health.overall, 100);
        assert!(health.checks.is_empty());
    }
}

//! CSV and JSON report writers for analysis results.

use std::path::{Path, PathBuf};

use csv::Writer;

use crate::analyzers::duplicate::DuplicateGroup;
use crate::analyzers::CheckSet;
use crate::export::MutationReport;
use crate::health::HealthScore;
use crate::utils::file_ops;
use crate::{Result, Track};

pub struct Reporter {
    out_dir: PathBuf,
}

impl Reporter {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }

    /// One row per track per check that ran.
    pub fn write_check_report(&self, checks: &CheckSet) -> Result<PathBuf> {
        file_ops::ensure_directory(&self.out_dir)?;
        let path = self.out_dir.join("checks.csv");
        let mut writer = Writer::from_path(&path)?;
        writer.write_record(["Track", "Check", "Severity", "Skipped", "Detail"])?;

        for check in &checks.bpm {
            write_row(
                &mut writer,
                &check.track_id,
                "bpm",
                check.severity.label(),
                check.skip_reason.map(|r| r.label()),
                &check.detail(),
            )?;
        }
        for check in &checks.key {
            write_row(
                &mut writer,
                &check.track_id,
                "key",
                check.severity.label(),
                check.skip_reason.map(|r| r.label()),
                &check.detail(),
            )?;
        }
        for check in &checks.beatgrid {
            write_row(
                &mut writer,
                &check.track_id,
                "beatgrid",
                check.severity.label(),
                check.skip_reason.map(|r| r.label()),
                &check.detail(),
            )?;
        }
        for check in &checks.clipping {
            write_row(
                &mut writer,
                &check.track_id,
                "clipping",
                check.severity.label(),
                check.skip_reason.map(|r| r.label()),
                &check.detail(),
            )?;
        }
        for check in &checks.metadata {
            write_row(
                &mut writer,
                &check.track_id,
                "metadata",
                check.severity.label(),
                None,
                &check.detail(),
            )?;
        }
        for check in &checks.duplicates {
            write_row(
                &mut writer,
                &check.track_id,
                "duplicates",
                check.severity.label(),
                check.skip_reason.map(|r| r.label()),
                &check.detail(),
            )?;
        }

        writer.flush()?;
        log::info!("check report written to {}", path.display());
        Ok(path)
    }

    /// One row per duplicate group.
    pub fn write_duplicate_report(
        &self,
        groups: &[DuplicateGroup],
        tracks: &[Track],
        path: Option<&Path>,
    ) -> Result<PathBuf> {
        let path = match path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    file_ops::ensure_directory(parent)?;
                }
                path.to_path_buf()
            }
            None => {
                file_ops::ensure_directory(&self.out_dir)?;
                self.out_dir.join("duplicates.csv")
            }
        };
        let mut writer = Writer::from_path(&path)?;
        writer.write_record(["Group", "Level", "Keeper", "Members"])?;

        for group in groups {
            let members = group
                .members
                .iter()
                .map(|m| display_name(tracks, &m.track_id))
                .collect::<Vec<_>>()
                .join(", ");
            writer.write_record([
                group.group_id.as_str(),
                group.level.label(),
                &display_name(tracks, &group.recommended_keeper),
                &members,
            ])?;
        }

        writer.flush()?;
        log::info!("duplicate report written to {}", path.display());
        Ok(path)
    }

    pub fn write_health_summary(&self, health: &HealthScore) -> Result<PathBuf> {
        file_ops::ensure_directory(&self.out_dir)?;
        let path = self.out_dir.join("health.json");
        file_ops::write_text(&path, &serde_json::to_string_pretty(health)?)?;
        Ok(path)
    }

    pub fn write_mutation_report(&self, report: &MutationReport) -> Result<PathBuf> {
        file_ops::ensure_directory(&self.out_dir)?;
        let path = self.out_dir.join("applied-fixes.json");
        file_ops::write_text(&path, &serde_json::to_string_pretty(report)?)?;
        Ok(path)
    }
}

fn write_row(
    writer: &mut Writer<std::fs::File>,
    track_id: &str,
    check: &str,
    severity: &str,
    skip: Option<&str>,
    detail: &str,
) -> Result<()> {
    writer.write_record([track_id, check, severity, skip.unwrap_or(""), detail])?;
    Ok(())
}

fn display_name(tracks: &[Track], track_id: &str) -> String {
    tracks
        .iter()
        .find(|t| t.id == track_id)
        .map(Track::display_name)
        .unwrap_or_else(|| track_id.to_string())
}

use std::fs;
use std::path::Path;
use std::sync::Arc;

use clap::Parser;

use dj_library_analyzer::analyzers::{run_all, CheckKind, CheckSet};
use dj_library_analyzer::audio::adapters::ThresholdClipDetector;
use dj_library_analyzer::audio::decode::SymphoniaDecoder;
use dj_library_analyzer::cli::commands::{parse_check, Cli, Commands};
use dj_library_analyzer::export;
use dj_library_analyzer::fixes::planner;
use dj_library_analyzer::library::{self, Dialect, LibraryExport};
use dj_library_analyzer::pipeline::session::{SessionOutcome, SessionUpdate};
use dj_library_analyzer::utils::reporting::Reporter;
use dj_library_analyzer::{
    health, AnalysisSession, AnalyzerRegistry, FixEntry, FixOperation, LibraryError, Result,
    SessionConfig, Track,
};

fn main() {
    env_logger::init();

    rayon::ThreadPoolBuilder::new()
        .num_threads(num_cpus::get())
        .build_global()
        .unwrap();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Commands::Analyze {
            input,
            output,
            checks,
        } => run_analyze(&input, &output, &checks),
        Commands::Fix {
            input,
            output,
            apply,
        } => run_fix(&input, &output, &apply),
        Commands::Duplicates { input, output } => run_duplicates(&input, output.as_deref()),
    };

    if let Err(e) = outcome {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

/// An export file yields both the parsed document and its tracks; a
/// directory yields tracks only.
fn load_input(input: &Path) -> Result<(Option<LibraryExport>, Vec<Track>)> {
    if input.is_dir() {
        let tracks = library::folder::scan(input)?;
        Ok((None, tracks))
    } else {
        let text = fs::read_to_string(input)?;
        let export = library::load_export(&text)?;
        let tracks = export.tracks.clone();
        Ok((Some(export), tracks))
    }
}

fn parse_active_checks(names: &[String]) -> Result<Vec<CheckKind>> {
    if names.is_empty() {
        return Ok(CheckKind::ALL.to_vec());
    }
    names
        .iter()
        .map(|name| {
            parse_check(name).ok_or_else(|| {
                LibraryError::Pipeline(format!(
                    "unknown check '{}' (expected one of: bpm, key, beatgrid, clipping, metadata, duplicates)",
                    name
                ))
            })
        })
        .collect()
}

fn analysis_session(active_checks: Vec<CheckKind>) -> AnalysisSession {
    // Beat, key and fingerprint backends are provided by the embedding
    // application; the CLI ships decode and the clip scan, so the other
    // checks run in metadata-only mode and skip audio-dependent verdicts.
    let registry = AnalyzerRegistry {
        decoder: Some(Arc::new(SymphoniaDecoder)),
        clip: Some(Arc::new(ThresholdClipDetector::default())),
        ..AnalyzerRegistry::default()
    };
    let config = SessionConfig {
        active_checks,
        ..SessionConfig::default()
    };
    AnalysisSession::new(config, registry)
}

fn run_session(session: &AnalysisSession, tracks: &mut [Track]) -> Result<SessionOutcome> {
    let outcome = session.run(tracks, |update| match update {
        SessionUpdate::DecodeFinished { decoded, failed } => {
            println!("Decoded {} track(s), {} failed", decoded, failed);
        }
        SessionUpdate::PipelineFinished { kind } => {
            println!("{} analysis complete", kind.label());
        }
        _ => {}
    })?;

    for track in tracks.iter_mut() {
        if let Some(secs) = outcome.decoded_durations.get(&track.id) {
            track.backfill_duration(*secs);
        }
    }
    Ok(outcome)
}

fn print_summary(checks: &CheckSet, health: &health::HealthScore) {
    println!("\nCheck results:");
    for summary in &checks.summaries {
        let score = health
            .check(summary.kind)
            .map(|c| c.score.to_string())
            .unwrap_or_default();
        println!(
            "  {:<10} ok {:<4} warning {:<4} error {:<4} skipped {:<4} score {}",
            summary.kind.label(),
            summary.ok,
            summary.warning,
            summary.error,
            summary.skipped,
            score
        );
    }
    println!("\nLibrary health: {}/100", health.overall);
}

fn run_analyze(input: &Path, output: &Path, check_names: &[String]) -> Result<()> {
    let active = parse_active_checks(check_names)?;
    let (_, mut tracks) = load_input(input)?;
    println!("Loaded {} track(s) from {}", tracks.len(), input.display());

    let session = analysis_session(active);
    let outcome = run_session(&session, &mut tracks)?;
    let checks = run_all(&tracks, &outcome.raw, session.config());
    let health = health::score(&checks.summaries);
    print_summary(&checks, &health);

    let reporter = Reporter::new(output);
    let check_path = reporter.write_check_report(&checks)?;
    println!("\nCheck report: {}", check_path.display());
    if !checks.groups.is_empty() {
        let dup_path = reporter.write_duplicate_report(&checks.groups, &tracks, None)?;
        println!("Duplicate report: {}", dup_path.display());
    }
    let health_path = reporter.write_health_summary(&health)?;
    println!("Health summary: {}", health_path.display());
    Ok(())
}

fn operation_matches(entry: &FixEntry, requested: &str) -> bool {
    match requested {
        "bpm" => matches!(entry.operation, FixOperation::Bpm { .. }),
        "key" => matches!(entry.operation, FixOperation::Key { .. }),
        "beatgrid" => matches!(entry.operation, FixOperation::Beatgrid { .. }),
        "clipping" => matches!(entry.operation, FixOperation::ClippingNormalize { .. }),
        _ => false,
    }
}

fn run_fix(input: &Path, output: &Path, apply: &[String]) -> Result<()> {
    const APPLY_KINDS: [&str; 5] = ["bpm", "key", "beatgrid", "clipping", "duplicates"];
    let apply: Vec<String> = apply.iter().map(|a| a.trim().to_lowercase()).collect();
    if let Some(unknown) = apply.iter().find(|a| !APPLY_KINDS.contains(&a.as_str())) {
        return Err(LibraryError::Pipeline(format!(
            "unknown fix kind '{}' (expected one of: {})",
            unknown,
            APPLY_KINDS.join(", ")
        )));
    }

    let (Some(export), mut tracks) = load_input(input)? else {
        return Err(LibraryError::UnsupportedDocument(
            "fix needs a library export file, not a directory".into(),
        ));
    };
    println!("Loaded {} track(s) from {}", tracks.len(), input.display());

    let session = analysis_session(CheckKind::ALL.to_vec());
    let outcome = run_session(&session, &mut tracks)?;
    let checks = run_all(&tracks, &outcome.raw, session.config());
    let health = health::score(&checks.summaries);
    print_summary(&checks, &health);

    let mut plan = planner::plan(&tracks, &checks, &outcome.raw);
    if apply.is_empty() {
        plan.approve_all();
    } else {
        plan.approve_where(|entry| apply.iter().any(|kind| operation_matches(entry, kind)));
    }
    let remove_duplicates = apply.iter().any(|kind| kind == "duplicates");
    let operations = plan.export_operations(remove_duplicates);
    if operations.is_empty() {
        println!("\nNothing to fix.");
        return Ok(());
    }

    println!("\nApplying {} fix(es):", operations.len());
    for op in &operations {
        println!(
            "  {:<20} {:<24} {} -> {}",
            op.operation.label(),
            op.track_id,
            op.before,
            op.after
        );
    }

    let LibraryExport {
        mut document,
        dialect,
        ..
    } = export;
    let (text, report) = export::apply_fixes(&mut document, dialect, &operations)?;

    let out_file = output.join(match dialect {
        Dialect::Rekordbox => "library-fixed.xml",
        Dialect::Traktor => "library-fixed.nml",
    });
    dj_library_analyzer::utils::file_ops::write_text(&out_file, &text)?;

    let reporter = Reporter::new(output);
    reporter.write_mutation_report(&report)?;
    println!(
        "\nApplied {}, skipped {}, removed {}",
        report.applied_count,
        report.skipped_track_ids.len(),
        report.removed_track_ids.len()
    );
    for skipped in &report.skipped_track_ids {
        println!("  skipped: {}", skipped);
    }
    println!("Corrected export: {}", out_file.display());
    Ok(())
}

fn run_duplicates(input: &Path, output: Option<&Path>) -> Result<()> {
    let (_, tracks) = load_input(input)?;
    println!("Loaded {} track(s) from {}", tracks.len(), input.display());

    let config = SessionConfig {
        active_checks: vec![CheckKind::Duplicates],
        ..SessionConfig::default()
    };
    let checks = run_all(&tracks, &Default::default(), &config);

    if checks.groups.is_empty() {
        println!("No duplicates found.");
        return Ok(());
    }
    println!("\nFound {} duplicate group(s):", checks.groups.len());
    let by_id: std::collections::HashMap<&str, &Track> =
        tracks.iter().map(|t| (t.id.as_str(), t)).collect();
    for group in &checks.groups {
        println!("\n  [{}]", group.level.label());
        for member in &group.members {
            let name = by_id
                .get(member.track_id.as_str())
                .map(|t| t.display_name())
                .unwrap_or_else(|| member.track_id.clone());
            let marker = if member.track_id == group.recommended_keeper {
                "keep"
            } else {
                "remove"
            };
            println!("    {:<6} {}", marker, name);
        }
    }

    if let Some(path) = output {
        let reporter = Reporter::new(path.parent().unwrap_or(Path::new(".")));
        let written = reporter.write_duplicate_report(&checks.groups, &tracks, Some(path))?;
        println!("\nDuplicate report: {}", written.display());
    }
    Ok(())
}

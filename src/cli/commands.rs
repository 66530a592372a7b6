use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::analyzers::CheckKind;

#[derive(Parser)]
#[command(name = "dj-library-analyzer")]
#[command(version = "1.0")]
#[command(about = "Analyze DJ library exports and propose metadata/grid fixes", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Analyze a library export (rekordbox XML / Traktor NML) or audio folder
    Analyze {
        /// Export file or audio directory to analyze
        #[arg(short = 'i', long = "input")]
        input: PathBuf,

        /// Directory reports are written to
        #[arg(short = 'o', long = "output", default_value = "analysis-out")]
        output: PathBuf,

        /// Checks to run, comma separated (default: all)
        #[arg(short = 'c', long, value_delimiter = ',')]
        checks: Vec<String>,
    },

    /// Analyze an export and write a corrected copy for re-import
    Fix {
        /// Export file to analyze and rewrite
        #[arg(short = 'i', long = "input")]
        input: PathBuf,

        /// Directory the corrected export and reports are written to
        #[arg(short = 'o', long = "output", default_value = "analysis-out")]
        output: PathBuf,

        /// Fix kinds to apply, comma separated (default: every kind except
        /// duplicate removal, which must be named explicitly)
        #[arg(short = 'a', long, value_delimiter = ',')]
        apply: Vec<String>,
    },

    /// List duplicate groups with recommended keepers
    Duplicates {
        /// Export file or audio directory to scan
        #[arg(short = 'i', long = "input")]
        input: PathBuf,

        /// Optional CSV report path
        #[arg(short = 'o', long = "output")]
        output: Option<PathBuf>,
    },
}

/// Resolves a user-supplied check name against the known kinds.
pub fn parse_check(name: &str) -> Option<CheckKind> {
    let name = name.trim().to_lowercase();
    CheckKind::ALL.into_iter().find(|kind| kind.label() == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_names_round_trip() {
        for kind in CheckKind::ALL {
            assert_eq!(parse_check(kind.label()), Some(kind));
        }
        assert_eq!(parse_check(" BPM "), Some(CheckKind::Bpm));
        assert_eq!(parse_check("loudness"), None);
    }
}

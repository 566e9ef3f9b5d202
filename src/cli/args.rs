//! Command-line argument definitions.
//!
//! Keys arrive one per line. `set` and `add` expect `key<TAB>value`; the
//! split is on the last tab, so keys may themselves contain tabs.

use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "countmin",
    version,
    about = "Count-Min sketch-based approximate counting"
)]
pub struct Cli {
    /// Print more progress notes to stderr (repeatable).
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress everything except errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create a new sketch file.
    Create {
        /// Path of the sketch file to create.
        sketch: PathBuf,
        /// Cells per row (0 = default, 2^20).
        #[arg(short, long, default_value_t = 0)]
        width: u64,
        /// Largest count a cell can report (0 = default, 2^45 - 1).
        #[arg(short, long, default_value_t = 0)]
        max_value: u64,
        /// Hash/PRNG seed baked into the sketch.
        #[arg(short = 'S', long, default_value_t = 0)]
        seed: u64,
        /// Overwrite the file if it already exists.
        #[arg(short, long)]
        truncate: bool,
    },

    /// Print each key with its estimated count.
    Get {
        sketch: PathBuf,
        /// Key files, one key per line (stdin when empty).
        files: Vec<PathBuf>,
        /// Fault the whole sketch into memory before querying.
        #[arg(short, long)]
        preload: bool,
    },

    /// Raise keys to given values (lines of key<TAB>value).
    Set {
        sketch: PathBuf,
        files: Vec<PathBuf>,
        #[arg(short, long)]
        preload: bool,
    },

    /// Count each key once per input line.
    Inc {
        sketch: PathBuf,
        files: Vec<PathBuf>,
        #[arg(short, long)]
        preload: bool,
    },

    /// Add given values to keys (lines of key<TAB>value).
    Add {
        sketch: PathBuf,
        files: Vec<PathBuf>,
        #[arg(short, long)]
        preload: bool,
    },

    /// Print a sketch's header fields.
    Info { sketch: PathBuf },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_flags_parse() {
        let cli = Cli::try_parse_from([
            "countmin", "create", "s.cms", "--width", "100", "--max-value", "3", "-S", "7", "-t",
        ])
        .unwrap();
        match cli.command {
            Command::Create {
                width,
                max_value,
                seed,
                truncate,
                ..
            } => {
                assert_eq!(width, 100);
                assert_eq!(max_value, 3);
                assert_eq!(seed, 7);
                assert!(truncate);
            }
            other => panic!("parsed {other:?}"),
        }
    }

    #[test]
    fn get_accepts_multiple_key_files() {
        let cli = Cli::try_parse_from(["countmin", "get", "s.cms", "a.txt", "b.txt"]).unwrap();
        match cli.command {
            Command::Get { files, preload, .. } => {
                assert_eq!(files.len(), 2);
                assert!(!preload);
            }
            other => panic!("parsed {other:?}"),
        }
    }

    #[test]
    fn quiet_and_verbose_conflict() {
        assert!(Cli::try_parse_from(["countmin", "-q", "-v", "info", "s.cms"]).is_err());
    }
}

//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::storage::Namespace;

/// TaskIndex - incremental task index over markdown documents
#[derive(Parser)]
#[command(
    name = "ti",
    about = "Incremental task index for markdown documents",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Index database, overrides `storage.path`
    #[arg(long, global = true, help = "Path to the index database")]
    pub db: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Build or refresh the index for a document folder
    Index {
        /// Root folder of the documents
        #[arg(default_value = ".")]
        root: PathBuf,

        /// Discard every cache and parse all documents again
        #[arg(long)]
        rebuild: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List indexed tasks
    Tasks {
        /// Root folder of the documents
        #[arg(default_value = ".")]
        root: PathBuf,

        /// Only tasks from this document
        #[arg(long)]
        file: Option<String>,

        /// Hide completed tasks
        #[arg(long)]
        open: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show cache and index statistics
    Stats {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Clear one cache namespace, or everything
    Clear {
        /// raw, augmented, project, consolidated, meta or all
        #[arg(short, long, default_value = "all")]
        namespace: ClearTarget,
    },
}

/// What `ti clear` removes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClearTarget {
    All,
    Namespace(Namespace),
}

impl std::str::FromStr for ClearTarget {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "ClearTarget::from_str: called");
        match s.to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "raw" => Ok(Self::Namespace(Namespace::Raw)),
            "augmented" => Ok(Self::Namespace(Namespace::Augmented)),
            "project" => Ok(Self::Namespace(Namespace::Project)),
            "consolidated" | "index" => Ok(Self::Namespace(Namespace::Consolidated)),
            "meta" => Ok(Self::Namespace(Namespace::Meta)),
            _ => {
                debug!(%s, "ClearTarget::from_str: unknown namespace");
                Err(format!(
                    "Unknown namespace: {}. Use: raw, augmented, project, consolidated, meta or all",
                    s
                ))
            }
        }
    }
}

/// Output format for listing and stats commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => {
                debug!(%s, "OutputFormat::from_str: unknown format");
                Err(format!("Unknown format: {}. Use: text or json", s))
            }
        }
    }
}

/// Path of the log file written by `ti`
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskindex")
        .join("logs")
        .join("taskindex.log")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_output_format_parse() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("PLAIN".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("table".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_clear_target_parse() {
        assert_eq!("all".parse::<ClearTarget>().unwrap(), ClearTarget::All);
        assert_eq!(
            "raw".parse::<ClearTarget>().unwrap(),
            ClearTarget::Namespace(Namespace::Raw)
        );
        assert_eq!(
            "index".parse::<ClearTarget>().unwrap(),
            ClearTarget::Namespace(Namespace::Consolidated)
        );
        assert!("bogus".parse::<ClearTarget>().is_err());
    }

    #[test]
    fn test_parse_tasks_command() {
        let cli = Cli::try_parse_from(["ti", "--db", "/tmp/x.db", "tasks", "notes", "--file", "a.md", "-f", "json"]).unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
        match cli.command {
            Command::Tasks { root, file, open, format } => {
                assert_eq!(root, PathBuf::from("notes"));
                assert_eq!(file.as_deref(), Some("a.md"));
                assert!(!open);
                assert_eq!(format, OutputFormat::Json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}

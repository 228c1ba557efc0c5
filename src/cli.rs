//! Command-line interface (CLI) argument parsing module.
//!
//! This module provides CLI argument parsing using `clap`.
//! It supports commands for a full pinning run, probing a single domain,
//! listing candidates, showing the pinned state, flushing the DNS cache,
//! exporting the settings and generating shell completions.

use crate::config::settings::SourceKind;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// CLI argument parser using clap derive macro.
///
/// # Example
///
/// ```ignore
/// let cli = Cli::parse();
/// match cli.command {
///     Some(Commands::Run { dry_run, .. }) => { /* ... */ }
///     Some(Commands::Probe { domain, .. }) => { /* ... */ }
///     None => { /* status */ }
/// }
/// ```
#[derive(Parser, Debug)]
#[command(
    name = "hostpin",
    version,
    about = "Pin the fastest GitHub addresses in the hosts file",
    long_about = "Collects candidate addresses for GitHub domains, measures latency and \
                  download throughput to each, and writes the best one into the hosts file",
    infer_subcommands = true
)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Quiet mode (only errors)
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Output format
    #[arg(long, global = true, default_value = "table")]
    pub format: OutputFormat,

    /// Settings file (JSON)
    #[arg(short, long, global = true, env = "HOSTPIN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Output format for CLI commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Table format (default, human-readable)
    #[default]
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
    /// TSV format (tab-separated)
    Tsv,
}

impl OutputFormat {
    /// Get all available output format names.
    #[must_use]
    pub fn names() -> &'static [&'static str] {
        &["table", "json", "csv", "tsv"]
    }

    /// Field separator for delimited formats.
    #[must_use]
    pub fn separator(self) -> Option<char> {
        match self {
            Self::Csv => Some(','),
            Self::Tsv => Some('\t'),
            Self::Table | Self::Json => None,
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "tsv" => Ok(Self::Tsv),
            _ => Err(format!(
                "Unknown format: {}. Valid options are: {:?}",
                s,
                Self::names()
            )),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Table => write!(f, "table"),
            Self::Json => write!(f, "json"),
            Self::Csv => write!(f, "csv"),
            Self::Tsv => write!(f, "tsv"),
        }
    }
}

/// Available commands for the hostpin CLI.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Probe, select and pin
    ///
    /// Optimize every configured domain (or the ones given with --domain),
    /// update the hosts file, flush the DNS cache and optionally write a report.
    #[command(alias = "r")]
    Run {
        /// Only these domains (repeatable)
        #[arg(short, long = "domain")]
        domains: Vec<String>,

        /// Hosts file to update
        #[arg(long)]
        hosts: Option<PathBuf>,

        /// Show what would change without writing
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Back up the hosts file before writing
        #[arg(short, long)]
        backup: bool,

        /// Do not flush the DNS cache
        #[arg(long)]
        no_flush: bool,

        /// Write a JSON report to this file
        #[arg(long)]
        report: Option<PathBuf>,

        /// Look up the region of this machine for the report
        #[arg(long)]
        geo: bool,

        /// Candidate sources to use instead of the configured ones (repeatable)
        #[arg(short, long = "source", value_enum)]
        sources: Vec<SourceKind>,

        /// Leave domains without a valid candidate untouched
        #[arg(long)]
        skip_fallback: bool,
    },

    /// Probe one domain and show every result
    #[command(alias = "p")]
    Probe {
        /// Domain to probe
        #[arg(default_value = "github.com")]
        domain: String,

        /// Probe these addresses instead (format: IP#label)
        #[arg(long = "ip")]
        ips: Vec<String>,

        /// Candidate sources (repeatable)
        #[arg(short, long = "source", value_enum)]
        sources: Vec<SourceKind>,

        /// Sort by latency (fastest first)
        #[arg(long = "sort")]
        sort_by_latency: bool,
    },

    /// List candidate addresses for a domain
    #[command(alias = "c")]
    Candidates {
        /// Domain to look up
        #[arg(default_value = "github.com")]
        domain: String,

        /// Candidate sources (repeatable)
        #[arg(short, long = "source", value_enum)]
        sources: Vec<SourceKind>,
    },

    /// Show the addresses currently pinned in the hosts file
    #[command(alias = "s")]
    Status {
        /// Hosts file to read
        #[arg(long)]
        hosts: Option<PathBuf>,
    },

    /// Flush the OS DNS cache
    Flush,

    /// Print or export the effective settings
    Config {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Parse CLI arguments and return verbose flag.
///
/// # Returns
///
/// Returns a tuple of `(Cli, verbose)` where `verbose` indicates
/// whether verbose logging was enabled.
#[must_use]
pub fn parse_verbose() -> (Cli, bool) {
    let cli = Cli::parse();
    let verbose = cli.verbose;
    (cli, verbose)
}

/// Write completions for `shell` to stdout.
pub fn print_completions(shell: Shell) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(shell, &mut cmd, name, &mut std::io::stdout());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!("table".parse::<OutputFormat>(), Ok(OutputFormat::Table));
        assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
        assert_eq!("csv".parse::<OutputFormat>(), Ok(OutputFormat::Csv));
        assert_eq!("tsv".parse::<OutputFormat>(), Ok(OutputFormat::Tsv));
        assert!("invalid".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_output_format_display() {
        assert_eq!(OutputFormat::Table.to_string(), "table");
        assert_eq!(OutputFormat::Json.to_string(), "json");
        assert_eq!(OutputFormat::Tsv.separator(), Some('\t'));
        assert_eq!(OutputFormat::Table.separator(), None);
    }

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_subcommand() {
        let cli = Cli::try_parse_from(["hostpin"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.format, OutputFormat::Table);
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from([
            "hostpin",
            "run",
            "--domain",
            "github.com",
            "-d",
            "raw.githubusercontent.com",
            "--dry-run",
            "--source",
            "doh",
            "--source",
            "ping-site",
            "--skip-fallback",
        ])
        .unwrap();

        match cli.command {
            Some(Commands::Run {
                domains,
                dry_run,
                sources,
                skip_fallback,
                no_flush,
                ..
            }) => {
                assert_eq!(domains, vec!["github.com", "raw.githubusercontent.com"]);
                assert!(dry_run);
                assert_eq!(sources, vec![SourceKind::Doh, SourceKind::PingSite]);
                assert!(skip_fallback);
                assert!(!no_flush);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_aliases_and_global_flags() {
        let cli = Cli::try_parse_from(["hostpin", "p", "--ip", "140.82.112.3#us", "--format", "json", "-v"])
            .unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.format, OutputFormat::Json);
        assert!(matches!(
            cli.command,
            Some(Commands::Probe { ref domain, ref ips, .. }) if domain == "github.com" && ips.len() == 1
        ));
    }

    #[test]
    fn test_verbose_conflicts_with_quiet() {
        assert!(Cli::try_parse_from(["hostpin", "-v", "-q", "status"]).is_err());
    }
}

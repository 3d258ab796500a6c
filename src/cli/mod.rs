//! Command-line interface definitions for the `userdata-forge` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Parser, ValueEnum};

/// Top-level CLI for the `userdata-forge` binary.
#[derive(Debug, Parser)]
#[command(
    name = "userdata-forge",
    about = "Assemble cloud-init userdata for each server in an instances file",
    arg_required_else_help = true
)]
pub(crate) enum Cli {
    /// Render userdata for every server section and print it.
    #[command(
        name = "generate",
        about = "Render userdata for every server section and print it"
    )]
    Generate(GenerateCommand),
}

/// Arguments for the `userdata-forge generate` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct GenerateCommand {
    /// Instances file declaring server sections (overrides configuration).
    #[arg(long, value_name = "PATH")]
    pub(crate) instances: Option<String>,
    /// Directory templates and file directories are resolved against
    /// (overrides configuration).
    #[arg(long, value_name = "DIR")]
    pub(crate) template_root: Option<String>,
    /// Only process the named section; repeat to select several.
    #[arg(long = "section", value_name = "NAME")]
    pub(crate) sections: Vec<String>,
    /// Format of the run summary written to stderr.
    #[arg(long, value_enum, default_value_t = SummaryFormat::Text)]
    pub(crate) summary: SummaryFormat,
    /// Exit with status 2 when any section is skipped.
    #[arg(long)]
    pub(crate) strict: bool,
    /// Emit debug logging.
    #[arg(short, long)]
    pub(crate) verbose: bool,
}

/// Output format of the run summary.
#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub(crate) enum SummaryFormat {
    /// Human-readable lines.
    Text,
    /// Pretty-printed JSON.
    Json,
}

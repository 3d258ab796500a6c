//! Binary entry point for the userdata-forge CLI.

use std::io::{self, Write};
use std::process;

use clap::Parser;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

use userdata_forge::{
    AssemblyOrchestrator, ConfigError, ForgeConfig, Instances, InstancesError, RunSummary,
    TemplateRenderer, WriterSink,
};

mod cli;

use cli::{Cli, GenerateCommand, SummaryFormat};

/// Exit status for fatal configuration errors.
const EXIT_FATAL: i32 = 1;
/// Exit status for `--strict` runs that skipped a section.
const EXIT_SKIPPED: i32 = 2;

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("{0}")]
    Instances(#[from] InstancesError),
    #[error("failed to write run summary: {0}")]
    Summary(String),
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            EXIT_FATAL
        }
    };

    process::exit(exit_code);
}

fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Generate(command) => generate(&command),
    }
}

fn generate(args: &GenerateCommand) -> Result<i32, CliError> {
    init_tracing(args.verbose);

    let config = apply_overrides(ForgeConfig::load_without_cli_args()?, args);
    config.validate()?;

    let mut instances = Instances::load(&config.instances_path())?;
    instances.retain_sections(&args.sections)?;
    tracing::info!(
        sections = instances.sections.len(),
        instances_file = %config.instances_path(),
        "generating userdata"
    );

    let orchestrator =
        AssemblyOrchestrator::new(TemplateRenderer::new(config.template_root_path()));
    let mut sink = WriterSink::stdout();
    let summary = orchestrator.run(&instances, &mut sink);

    write_summary(io::stderr(), &summary, args.summary)?;
    Ok(exit_code_for(&summary, args.strict))
}

fn apply_overrides(mut config: ForgeConfig, args: &GenerateCommand) -> ForgeConfig {
    if let Some(path) = &args.instances {
        config.instances_file.clone_from(path);
    }
    if let Some(root) = &args.template_root {
        config.template_root.clone_from(root);
    }
    config
}

fn exit_code_for(summary: &RunSummary, strict: bool) -> i32 {
    if strict && summary.has_skips() {
        EXIT_SKIPPED
    } else {
        0
    }
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .try_init()
        .ok();
}

fn write_summary(
    mut target: impl Write,
    summary: &RunSummary,
    format: SummaryFormat,
) -> Result<(), CliError> {
    let rendered = match format {
        SummaryFormat::Text => summary.to_string(),
        SummaryFormat::Json => summary
            .to_json()
            .map(|json| format!("{json}\n"))
            .map_err(|err| CliError::Summary(err.to_string()))?,
    };
    target
        .write_all(rendered.as_bytes())
        .map_err(|err| CliError::Summary(err.to_string()))
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}

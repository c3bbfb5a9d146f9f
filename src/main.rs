//! Command-line entry point.
//!
//! Exit codes: 0 when every examined document is clean, 1 when any document
//! is invalid or hit an operational error, 2 when the run itself could not
//! be set up (bad configuration, unusable catalog, unreadable target).

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;

use xsd_validate::catalog::{Catalog, SchemaResolver};
use xsd_validate::cli::{Cli, VerbosityLevel};
use xsd_validate::config::{Config, ConfigManager};
use xsd_validate::file_discovery::FileDiscovery;
use xsd_validate::output::Output;
use xsd_validate::validator::{
    ProgressCallback, ValidationConfig, ValidationEngine, ValidationPhase, ValidationProgress,
};

const EXIT_INVALID: u8 = 1;
const EXIT_OPERATIONAL: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    if let Err(message) = cli.validate() {
        eprintln!("error: {}", message);
        return ExitCode::from(EXIT_OPERATIONAL);
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(EXIT_OPERATIONAL)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = ConfigManager::load_config(&cli)
        .await
        .context("loading configuration")?;

    // A declared catalog that cannot be loaded is a hard error: silently
    // validating without the intended mappings would produce wrong verdicts
    let catalog = match &config.schema.catalog {
        Some(path) => Catalog::load(path).context("loading catalog")?,
        None => Catalog::empty(),
    };
    let resolver = SchemaResolver::new(Arc::new(catalog));

    let verbosity = verbosity_of(&config);
    let engine_config = ValidationConfig {
        max_concurrent_validations: ConfigManager::get_thread_count(&config),
        validation_timeout: ConfigManager::get_timeout_duration(&config),
        fail_fast: config.validation.fail_fast,
        show_progress: config.validation.show_progress,
        live_reporting: verbosity >= VerbosityLevel::Verbose,
        collect_metrics: true,
    };

    let engine = ValidationEngine::new(resolver, config.schema.max_cached_schemas, engine_config)
        .with_pinned_schema(config.schema.root.clone());

    let discovery = FileDiscovery::new()
        .with_extensions(config.files.extensions.clone())
        .with_include_patterns(&config.files.include_patterns)
        .context("include patterns")?
        .with_exclude_patterns(&config.files.exclude_patterns)
        .context("exclude patterns")?;

    let progress = progress_reporter(&config);

    let results = engine
        .validate_path_with_progress(&cli.path, &discovery, progress)
        .await
        .context("validation run failed")?;

    let output = Output::new(config.output.format.into(), verbosity);
    print!("{}", output.format_results(&results));

    Ok(if results.has_failures() {
        ExitCode::from(EXIT_INVALID)
    } else {
        ExitCode::SUCCESS
    })
}

fn verbosity_of(config: &Config) -> VerbosityLevel {
    if config.output.quiet {
        VerbosityLevel::Quiet
    } else if config.output.verbose {
        VerbosityLevel::Verbose
    } else {
        VerbosityLevel::Normal
    }
}

/// Progress goes to stderr so it never mixes with the report on stdout
fn progress_reporter(config: &Config) -> Option<ProgressCallback> {
    if !config.validation.show_progress {
        return None;
    }

    Some(Arc::new(
        |progress: ValidationProgress| match progress.phase {
            ValidationPhase::Discovery => eprintln!("Discovering files..."),
            ValidationPhase::SchemaCompilation => {
                eprintln!("Validating {} file(s)...", progress.total)
            }
            ValidationPhase::Validation => {
                if let Some(file) = &progress.current_file {
                    eprintln!(
                        "[{}/{}] {}",
                        progress.completed,
                        progress.total,
                        file.display()
                    );
                }
            }
            ValidationPhase::Aggregation => {}
            ValidationPhase::Complete => eprintln!("Done."),
        },
    ))
}

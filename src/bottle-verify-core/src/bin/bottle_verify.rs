//! bottle-verify - verify the build provenance of Homebrew bottles.
//!
//! Fetches the requested bottles and checks them against GitHub artifact
//! attestations using the GitHub CLI (`gh attestation verify`).

use std::path::PathBuf;
use std::process::ExitCode;

use bottle_verify_core::{
    GhCliOracle, HttpBottleFetcher, OutputMode, PackageIndex, PlatformSelection, Reporter,
    VerifyConfig, VerifyEngine, VerifyError, VerifyRequest,
};
use clap::Parser;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Exit status when a unit failed and `--strict` was given.
const EXIT_UNVERIFIED: u8 = 2;

/// Verify the build provenance of bottles using GitHub's attestation tools.
///
/// The bottles are fetched first, then verified with `gh attestation verify`.
/// This requires the GitHub CLI to be installed and authenticated.
#[derive(Parser, Debug)]
#[command(name = "bottle-verify")]
#[command(version = VERSION)]
#[command(about = "Verify the build provenance of Homebrew bottles")]
struct Cli {
    /// Formulae to verify.
    #[arg(required = true, value_name = "FORMULA")]
    names: Vec<String>,

    /// Treat all named arguments as formulae.
    #[arg(long, visible_alias = "formulae", conflicts_with = "cask")]
    formula: bool,

    /// Treat all named arguments as casks.
    #[arg(long, visible_alias = "casks")]
    cask: bool,

    /// Verify for the given operating system (`all` for every one).
    #[arg(long)]
    os: Option<String>,

    /// Verify for the given CPU architecture (`all` for every one).
    #[arg(long)]
    arch: Option<String>,

    /// Verify the bottle for the given tag.
    #[arg(long)]
    bottle_tag: Option<String>,

    /// Also verify dependencies of the named formulae.
    #[arg(long)]
    deps: bool,

    /// Remove a previously cached version and re-fetch.
    #[arg(short, long)]
    force: bool,

    /// Print the verified attestations as a JSON array.
    #[arg(long)]
    json: bool,

    /// Number of bottles to verify concurrently.
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Formula index (path or URL).
    #[arg(long, value_name = "PATH|URL")]
    formula_index: Option<String>,

    /// Cask index (path or URL).
    #[arg(long, value_name = "PATH|URL")]
    cask_index: Option<String>,

    /// Bottle download cache.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Exit non-zero if any bottle fails verification.
    #[arg(long)]
    strict: bool,

    /// Enable verbose output.
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(json: bool, verbose: bool) {
    let level = if json {
        tracing::Level::ERROR
    } else if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(cli: &Cli) -> Result<VerifyConfig, VerifyError> {
    let mut config = VerifyConfig::from_env()?;
    if let Some(index) = &cli.formula_index {
        config.formula_index = index.clone();
    }
    if let Some(index) = &cli.cask_index {
        config.cask_index = Some(index.clone());
    }
    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = dir.clone();
    }
    if let Some(jobs) = cli.jobs {
        config.jobs = jobs;
    }
    config.validate()?;
    Ok(config)
}

async fn run(cli: Cli) -> Result<bool, VerifyError> {
    // Conflicts are rejected before any network or process activity.
    let platforms = PlatformSelection::from_options(
        cli.bottle_tag.as_deref(),
        cli.os.as_deref(),
        cli.arch.as_deref(),
    )?;
    let config = build_config(&cli)?;

    let index = PackageIndex::load(
        &config.formula_index,
        config.cask_index.as_deref(),
        config.http_timeout,
    )
    .await?;
    let fetcher = HttpBottleFetcher::new(&config.cache_dir, config.http_timeout)?;
    let oracle = GhCliOracle::from_config(&config);
    let engine =
        VerifyEngine::new(index, fetcher, oracle, config.authorities()).with_jobs(config.jobs);

    let request = VerifyRequest {
        names: cli.names,
        include_dependencies: cli.deps,
        formulae_only: cli.formula,
        force: cli.force,
        platforms,
    };
    let mode = if cli.json {
        OutputMode::Structured
    } else {
        OutputMode::Human
    };

    let mut reporter = Reporter::new(mode, std::io::stdout().lock(), std::io::stderr());
    engine.run(&request, &mut reporter).await?;
    let summary = reporter.finish()?;
    Ok(!summary.has_failures())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.json, cli.verbose);

    if cli.cask {
        eprintln!("Warning: Can only verify bottles, not casks.");
        return ExitCode::SUCCESS;
    }

    let strict = cli.strict;
    match run(cli).await {
        Ok(all_verified) if strict && !all_verified => ExitCode::from(EXIT_UNVERIFIED),
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            if let Some(hint) = e.remediation() {
                eprintln!("{}", hint);
            }
            ExitCode::FAILURE
        },
    }
}

//! debrepro - Debian reproducible-build verifier
//!
//! Rebuilds packages in containers pinned to the archive snapshot of their
//! reference build and checks the rebuilt `.deb` against the published
//! checksum.
//!
//! ## Commands
//!
//! - `run <mode> [package]`: verify a package set, write the CSV and print a summary
//! - `config`: print the effective configuration as JSON

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use container_env::{is_runtime_available, DockerCli, RuntimeConfig};
use debrepro_core::package_set::{reproducible_index_url, sample_fresh};
use debrepro_core::sink::render_summary;
use debrepro_core::telemetry::init_tracing;
use debrepro_core::{
    CsvResultSink, HttpPageSource, PackageSet, PageSource, ReproConfig, ResultSet, ResultSink,
};
use debrepro_pipeline::VerificationPipeline;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

#[derive(Parser)]
#[command(name = "debrepro")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Verify Debian packages rebuild bit-for-bit", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// JSON configuration file
    #[arg(short, long, global = true, env = "DEBREPRO_CONFIG")]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    #[command(subcommand)]
    command: Commands,
}

/// Flags that take precedence over the file and the environment.
#[derive(Args, Debug, Default)]
struct Overrides {
    /// Directory for the CSV, transcripts and copied artifacts
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    /// CSV file name inside the output directory
    #[arg(long, global = true)]
    csv_file: Option<String>,

    /// Suite the reference builds are published under
    #[arg(long, global = true)]
    suite: Option<String>,

    /// Architecture to verify
    #[arg(long, global = true)]
    arch: Option<String>,

    /// Base image for build containers
    #[arg(long, global = true)]
    image: Option<String>,

    /// Container runtime binary
    #[arg(long, global = true)]
    runtime: Option<String>,

    /// Per-command timeout during provisioning, in seconds
    #[arg(long, global = true)]
    command_timeout: Option<u64>,

    /// Per-command timeout during the build, in seconds
    #[arg(long, global = true)]
    build_timeout: Option<u64>,

    /// HTTP request timeout, in seconds
    #[arg(long, global = true)]
    http_timeout: Option<u64>,

    /// Timeout for container start (including image pull), copy and removal, in seconds
    #[arg(long, global = true)]
    control_timeout: Option<u64>,
}

impl Overrides {
    fn apply(self, mut config: ReproConfig) -> ReproConfig {
        if let Some(v) = self.output_dir {
            config.output_dir = v;
        }
        if let Some(v) = self.csv_file {
            config.csv_file = v;
        }
        if let Some(v) = self.suite {
            config.suite = v;
        }
        if let Some(v) = self.arch {
            config.arch = v;
        }
        if let Some(v) = self.image {
            config.base_image = v;
        }
        if let Some(v) = self.runtime {
            config.runtime_binary = v;
        }
        if let Some(v) = self.command_timeout {
            config.command_timeout_secs = v;
        }
        if let Some(v) = self.build_timeout {
            config.build_timeout_secs = v;
        }
        if let Some(v) = self.http_timeout {
            config.http_timeout_secs = v;
        }
        if let Some(v) = self.control_timeout {
            config.control_timeout_secs = v;
        }
        config
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Verify a set of packages
    Run {
        /// Which packages to verify
        #[arg(value_enum)]
        mode: Mode,

        /// Package name, required for `single`
        package: Option<String>,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Mode {
    Required,
    Essential,
    Popular,
    Random,
    #[value(alias = "random_fresh")]
    RandomFresh,
    Single,
}

impl Mode {
    fn package_set(self) -> Option<PackageSet> {
        match self {
            Mode::Required => Some(PackageSet::Required),
            Mode::Essential => Some(PackageSet::Essential),
            Mode::Popular => Some(PackageSet::Popular),
            Mode::Random => Some(PackageSet::Random),
            Mode::RandomFresh => Some(PackageSet::RandomFresh),
            Mode::Single => None,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let config = ReproConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let config = cli.overrides.apply(config);
    config.validate().context("Invalid configuration")?;

    match cli.command {
        Commands::Run { mode, package } => cmd_run(&config, mode, package).await,
        Commands::Config => cmd_config(&config),
    }
}

/// Package names a run covers.
async fn select_packages(
    mode: Mode,
    package: Option<String>,
    pages: &dyn PageSource,
    config: &ReproConfig,
) -> Result<Vec<String>> {
    let Some(set) = mode.package_set() else {
        let Some(name) = package else {
            bail!("mode 'single' needs a package name");
        };
        return Ok(vec![name]);
    };
    if let Some(name) = package {
        bail!("unexpected package '{name}' for mode '{set}'");
    }
    if let Some(fixed) = set.fixed() {
        return Ok(fixed);
    }

    let url = reproducible_index_url(&config.reference_base, &config.suite, &config.arch);
    let sample = sample_fresh(pages, &url, config.fresh_sample_size)
        .await
        .with_context(|| format!("Failed to fetch package index {url}"))?;
    if sample.is_empty() {
        bail!("no reproducible packages listed at {url}");
    }
    Ok(sample)
}

async fn cmd_run(config: &ReproConfig, mode: Mode, package: Option<String>) -> Result<()> {
    let pages: Arc<dyn PageSource> = Arc::new(
        HttpPageSource::new(config.http_timeout()).context("Failed to build HTTP client")?,
    );
    let packages = select_packages(mode, package, pages.as_ref(), config).await?;
    info!(mode = ?mode, packages = packages.len(), "Starting verification run");

    if !is_runtime_available(&config.runtime_binary) {
        warn!(runtime = %config.runtime_binary, "Container runtime not responding, builds will fail");
    }
    let runtime = Arc::new(DockerCli::new(
        RuntimeConfig::new(&config.runtime_binary)
            .with_command_timeout(config.command_timeout_secs)
            .with_control_timeout(config.control_timeout_secs),
    ));

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(watch_interrupts(
        async { tokio::signal::ctrl_c().await.is_ok() },
        async { tokio::signal::ctrl_c().await.is_ok() },
        cancel.clone(),
        || std::process::exit(INTERRUPTED_EXIT_CODE),
    ));

    let pipeline = VerificationPipeline::from_config(pages, runtime, config);
    let results = pipeline.run(&packages, ResultSet::new(), &cancel).await;
    watcher.abort();

    let sink = CsvResultSink::new(config.csv_path());
    sink.write(&results)
        .with_context(|| format!("Failed to write {}", sink.path().display()))?;

    print!("{}", render_summary(&results));
    println!("Results: {}", sink.path().display());
    println!("Logs:    {}", config.log_dir().display());
    Ok(())
}

/// Exit status after a second interrupt, as a shell reports SIGINT.
const INTERRUPTED_EXIT_CODE: i32 = 130;

/// First interrupt cancels the batch gracefully; a second one calls `abort`.
async fn watch_interrupts<F, S, A>(first: F, second: S, cancel: CancellationToken, abort: A)
where
    F: std::future::Future<Output = bool>,
    S: std::future::Future<Output = bool>,
    A: FnOnce(),
{
    if !first.await {
        return;
    }
    warn!("Interrupted, stopping after the current package (press Ctrl-C again to quit now)");
    cancel.cancel();
    if second.await {
        warn!("Interrupted again, exiting without writing results");
        abort();
    }
}

fn cmd_config(config: &ReproConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

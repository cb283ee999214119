//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use nodecounter_core::report::{
    DEFAULT_REPORT_LIMIT, ReportOptions, error_body, page_info, page_report,
    subtree_report,
};
use nodecounter_core::{RunCoordinator, RunProgress, Scheduler};
use nodecounter_shared::{
    AppConfig, NodeCounterError, RunConfig, RunReport, Thresholds, database_path, init_config,
    load_config, load_config_from,
};
use nodecounter_storage::{Repository, SqlRepository, TreeNode};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// nodecounter: measure and annotate page complexity.
#[derive(Parser)]
#[command(
    name = "nodecounter",
    version,
    about = "Count descendant nodes of content pages and annotate each page with a complexity tier.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.nodecounter/nodecounter.toml.
    #[arg(long, global = true, env = "NODECOUNTER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run one full sweep now.
    Run {
        /// Override the configured root path.
        #[arg(long)]
        root: Option<String>,

        /// Print the run report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Run sweeps on the configured interval until interrupted.
    Schedule,

    /// Read-only complexity reports, counted live.
    Report {
        #[command(subcommand)]
        action: ReportAction,
    },

    /// Print the stored complexity annotations of a page.
    Info {
        /// Page path.
        path: String,
    },

    /// Import a JSON content tree into the repository.
    Import {
        /// JSON file holding one tree node.
        file: PathBuf,

        /// Existing node to import under.
        #[arg(long, default_value = "/")]
        parent: String,
    },

    /// Approximate statistics management.
    Stats {
        #[command(subcommand)]
        action: StatsAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Report subcommands.
#[derive(Subcommand)]
pub(crate) enum ReportAction {
    /// Report on a single page.
    Page {
        /// Page path.
        path: String,

        #[command(flatten)]
        thresholds: ThresholdArgs,
    },
    /// Report on the pages below a root.
    Pages {
        /// Root path.
        root: String,

        /// Maximum pages to list.
        #[arg(long, default_value_t = DEFAULT_REPORT_LIMIT)]
        limit: usize,

        #[command(flatten)]
        thresholds: ThresholdArgs,
    },
}

#[derive(clap::Args)]
pub(crate) struct ThresholdArgs {
    /// High threshold (default 2048).
    #[arg(long)]
    high: Option<u64>,

    /// Medium threshold (default 1024).
    #[arg(long)]
    medium: Option<u64>,
}

/// Statistics subcommands.
#[derive(Subcommand)]
pub(crate) enum StatsAction {
    /// Recompute per-page node estimates.
    Refresh,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "nodecounter=info",
        1 => "nodecounter=debug",
        _ => "nodecounter=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run { root, json } => cmd_run(config_path, root, json).await,
        Command::Schedule => cmd_schedule(config_path).await,
        Command::Report { action } => match action {
            ReportAction::Page { path, thresholds } => {
                cmd_report_page(config_path, &path, &thresholds).await
            }
            ReportAction::Pages {
                root,
                limit,
                thresholds,
            } => cmd_report_pages(config_path, &root, limit, &thresholds).await,
        },
        Command::Info { path } => cmd_info(config_path, &path).await,
        Command::Import { file, parent } => cmd_import(config_path, &file, &parent).await,
        Command::Stats { action } => match action {
            StatsAction::Refresh => cmd_stats_refresh(config_path).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path).await,
        },
    }
}

fn load(config_path: Option<&Path>) -> Result<AppConfig> {
    Ok(match config_path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    })
}

async fn open_repository(config: &AppConfig) -> Result<SqlRepository> {
    let path = database_path(config)?;
    info!(path = %path.display(), "opening repository");
    Ok(SqlRepository::open(&path).await?)
}

fn report_options(config: &AppConfig, args: &ThresholdArgs) -> ReportOptions {
    let defaults = Thresholds::default();
    ReportOptions {
        page_type: config.repository.page_type.clone(),
        content_node: config.repository.content_node.clone(),
        thresholds: Thresholds::new(
            args.high.unwrap_or(defaults.high),
            args.medium.unwrap_or(defaults.medium),
        ),
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config_path: Option<&Path>, root: Option<String>, json: bool) -> Result<()> {
    let mut config = load(config_path)?;
    if let Some(root) = root {
        config.job.root_path = root;
    }
    let run_config = RunConfig::try_from(&config)?;
    let repo = open_repository(&config).await?;

    let coordinator = RunCoordinator::new(Arc::new(repo), run_config)?;
    let reporter = CliProgress::new();
    let report = coordinator.run_with_progress(&reporter).await?;
    coordinator.shutdown().await;

    if json {
        return print_json(&report);
    }

    println!();
    println!("  Run {} finished", report.run_id);
    println!("  Discovered: {}", report.pages_discovered);
    println!("  Processed:  {}", report.pages_processed);
    println!("  Updated:    {}", report.pages_updated);
    println!("  Skipped:    {}", report.pages_skipped);
    println!("  Failed:     {}", report.pages_failed);
    println!("  Nodes:      {}", report.total_nodes_counted);
    if report.batches_timed_out > 0 || report.batches_failed > 0 {
        println!(
            "  Batches:    {} total, {} timed out, {} failed",
            report.batches_total, report.batches_timed_out, report.batches_failed
        );
    }
    println!(
        "  Time:       {:.1}s",
        report.duration_ms as f64 / 1000.0
    );
    println!();

    Ok(())
}

async fn cmd_schedule(config_path: Option<&Path>) -> Result<()> {
    let config = load(config_path)?;
    let repo: Arc<dyn Repository> = Arc::new(open_repository(&config).await?);

    let owned_path = config_path.map(Path::to_path_buf);
    let loader = Box::new(move || match &owned_path {
        Some(path) => load_config_from(path),
        None => load_config(),
    });

    let summary = Scheduler::new(repo, loader)
        .run(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, finishing current run");
            }
        })
        .await?;

    println!(
        "Scheduler stopped after {} run(s), {} failed.",
        summary.runs, summary.failed_runs
    );
    Ok(())
}

async fn cmd_report_page(config_path: Option<&Path>, path: &str, args: &ThresholdArgs) -> Result<()> {
    let config = load(config_path)?;
    let repo = open_repository(&config).await?;
    let session = repo.open_session().await?;

    match page_report(session.as_ref(), path, &report_options(&config, args)).await {
        Ok(report) => print_json(&report),
        Err(e @ NodeCounterError::NodeNotFound(_)) => {
            print_json(&error_body(&e))?;
            Err(eyre!("page not found: {path}"))
        }
        Err(e) => Err(e.into()),
    }
}

async fn cmd_report_pages(
    config_path: Option<&Path>,
    root: &str,
    limit: usize,
    args: &ThresholdArgs,
) -> Result<()> {
    let config = load(config_path)?;
    let repo = open_repository(&config).await?;
    let session = repo.open_session().await?;

    match subtree_report(session.as_ref(), root, limit, &report_options(&config, args)).await {
        Ok(report) => print_json(&report),
        Err(e @ NodeCounterError::RootNotFound(_)) => print_json(&error_body(&e)),
        Err(e) => Err(e.into()),
    }
}

async fn cmd_info(config_path: Option<&Path>, path: &str) -> Result<()> {
    let config = load(config_path)?;
    let repo = open_repository(&config).await?;
    let session = repo.open_session().await?;

    let options = ReportOptions {
        page_type: config.repository.page_type.clone(),
        content_node: config.repository.content_node.clone(),
        ..ReportOptions::default()
    };
    print_json(&page_info(session.as_ref(), path, &options).await?)
}

async fn cmd_import(config_path: Option<&Path>, file: &Path, parent: &str) -> Result<()> {
    let config = load(config_path)?;
    let content = std::fs::read_to_string(file)
        .map_err(|e| eyre!("cannot read '{}': {e}", file.display()))?;
    let tree: TreeNode = serde_json::from_str(&content)
        .map_err(|e| eyre!("invalid tree in '{}': {e}", file.display()))?;

    let repo = open_repository(&config).await?;
    let written = repo.import_tree(parent, &tree).await?;
    println!("Imported {written} node(s) under {parent}.");
    Ok(())
}

async fn cmd_stats_refresh(config_path: Option<&Path>) -> Result<()> {
    let config = load(config_path)?;
    let repo = open_repository(&config).await?;
    let pages = repo
        .refresh_statistics(&config.repository.page_type, &config.repository.content_node)
        .await?;
    println!("Refreshed estimates for {pages} page(s).");
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = load(config_path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl RunProgress for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn batch_finished(&self, finished: usize, total: usize) {
        self.spinner
            .set_message(format!("Counting nodes [{finished}/{total} batches]"));
    }

    fn done(&self, _report: &RunReport) {
        self.spinner.finish_and_clear();
    }
}

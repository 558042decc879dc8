mod tui;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::sync::Arc;

use petri_viewer::config::Config;
use petri_viewer::gateway::{BlobClient, Gateway, TestStatus};
use petri_viewer::store::{DataStore, Progress, ProgressFn, StoreSettings};
use petri_viewer::logging;

#[derive(Parser)]
#[command(
    name = "petri-viewer",
    version,
    about = "Browse CI test runs stored in a blob container"
)]
struct Cli {
    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// First-time setup: point the viewer at a blob container
    Init {
        /// Base URL of the container, e.g. https://account.blob.core.windows.net/results
        container_url: String,
        /// Pull request API used to resolve PR titles
        #[arg(long)]
        pr_api_url: Option<String>,
        /// Primary branch whose runs are prefetched
        #[arg(long)]
        branch: Option<String>,
    },

    /// List the most recent runs
    Runs {
        /// Number of runs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Show the test results of one run
    Run {
        run_id: String,
    },

    /// Show the history of one test across recent runs
    Test {
        /// Test name: <arch>/<test-path>
        name: String,
        /// Number of recent runs to look at
        #[arg(short, long, default_value = "20")]
        runs: usize,
    },

    /// Per-test pass/fail counts across recent runs
    Stats {
        /// Number of recent runs to aggregate
        #[arg(short, long, default_value = "20")]
        runs: usize,
        /// Only show tests that failed at least once
        #[arg(long)]
        failing: bool,
    },

    /// Print the structured log of one test
    Log {
        run_id: String,
        /// Test name: <arch>/<test-path>
        test: String,
    },

    /// Open the TUI dashboard
    Dashboard,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let result = match cli.command {
        Commands::Init {
            container_url,
            pr_api_url,
            branch,
        } => cmd_init(&container_url, pr_api_url, branch).await,
        Commands::Runs { limit } => cmd_runs(limit).await,
        Commands::Run { run_id } => cmd_run(&run_id).await,
        Commands::Test { name, runs } => cmd_test(&name, runs).await,
        Commands::Stats { runs, failing } => cmd_stats(runs, failing).await,
        Commands::Log { run_id, test } => cmd_log(&run_id, &test).await,
        Commands::Dashboard => cmd_dashboard(cli.verbose).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

/// Build a store for one command. One-shot commands skip prefetching since
/// the process exits before it would pay off.
fn open_store(config: &Config, prefetch: bool) -> Result<DataStore> {
    let client = BlobClient::from_config(config)?;
    let mut settings = StoreSettings::from_config(config);
    if !prefetch {
        settings.prefetch = None;
    }
    Ok(DataStore::new(Arc::new(client), settings))
}

async fn cmd_init(
    container_url: &str,
    pr_api_url: Option<String>,
    branch: Option<String>,
) -> Result<()> {
    println!("petri-viewer init");
    println!("=================");
    println!();

    // Keep tuning from an existing config, replace only what was given
    let mut config = match Config::load() {
        Ok(mut existing) => {
            println!("Existing config found; updating it.");
            existing.container_url = container_url.trim_end_matches('/').to_string();
            existing
        }
        Err(_) => Config::new(container_url.trim_end_matches('/')),
    };
    if let Some(url) = pr_api_url {
        config.pr_api_url = url;
    }
    if let Some(branch) = branch {
        config.primary_branch = branch;
    }

    println!("Checking container...");
    let client = BlobClient::from_config(&config)?;
    let runs = client
        .list_runs()
        .await
        .context("Failed to list runs; check the container URL")?;
    println!("Found {} runs.", runs.len());

    config.save().context("Failed to save config")?;
    println!("Config written to {}", Config::config_file().display());

    println!();
    println!("Init complete. Next steps:");
    println!("  petri-viewer runs                # recent runs");
    println!("  petri-viewer stats --failing     # flaky and failing tests");
    println!("  petri-viewer dashboard           # open TUI dashboard");

    Ok(())
}

async fn cmd_runs(limit: usize) -> Result<()> {
    let config = Config::load()?;
    let store = open_store(&config, false)?;
    let runs = store.get_all_runs().await?;

    if runs.is_empty() {
        println!("No runs found.");
        return Ok(());
    }

    println!(
        "{:<12}  {:<17}  {:<24}  {:>6}  {:>6}  {:<40}",
        "RUN", "CREATED", "BRANCH", "PASSED", "FAILED", "PULL REQUEST"
    );
    println!(
        "{:<12}  {:<17}  {:<24}  {:>6}  {:>6}  {:<40}",
        "---", "-------", "------", "------", "------", "------------"
    );

    for run in runs.iter().take(limit) {
        let pr = match (run.pr_number, &run.pr_title) {
            (Some(n), Some(title)) => format!("#{n} {}", truncate(title, 33)),
            (Some(n), None) => format!("#{n}"),
            (None, _) => "-".to_string(),
        };
        println!(
            "{:<12}  {:<17}  {:<24}  {:>6}  {:>6}  {:<40}",
            run.id,
            run.creation_time.format("%Y-%m-%d %H:%M"),
            truncate(&run.branch, 24),
            run.passed,
            run.failed,
            pr
        );
    }

    if runs.len() > limit {
        println!();
        println!("({} more, use --limit to show them)", runs.len() - limit);
    }

    Ok(())
}

async fn cmd_run(run_id: &str) -> Result<()> {
    let config = Config::load()?;
    let store = open_store(&config, false)?;
    let details = store.get_run_details(run_id).await?;

    let failed = details
        .tests
        .iter()
        .filter(|t| t.status == TestStatus::Failed)
        .count();
    println!(
        "Run {}: {} tests, {} failed",
        details.id,
        details.tests.len(),
        failed
    );
    println!();

    println!("{:<8}  {:<80}", "STATUS", "TEST");
    println!("{:<8}  {:<80}", "------", "----");

    // Failures first, then by name
    let mut tests: Vec<_> = details.tests.iter().collect();
    tests.sort_by(|a, b| {
        (a.status != TestStatus::Failed, &a.name).cmp(&(b.status != TestStatus::Failed, &b.name))
    });
    for test in tests {
        println!("{:<8}  {}", test.status, test.name);
    }

    Ok(())
}

/// Batch-fetch the `count` most recent runs, printing progress to stderr.
async fn load_recent(store: &DataStore, count: usize) -> Result<usize> {
    let runs = store.get_all_runs().await?;
    let ids: Vec<String> = runs.iter().take(count).map(|r| r.id.clone()).collect();

    let on_progress: ProgressFn = Arc::new(|p: Progress| {
        eprint!("\rFetching run details {}/{}", p.completed, p.total);
        let _ = io::stderr().flush();
    });
    let fetched = store
        .fetch_and_cache_run_details(&ids, Some(on_progress), false)
        .await?;
    eprintln!();

    if fetched.len() < ids.len() {
        eprintln!(
            "warning: {} of {} runs could not be fetched",
            ids.len() - fetched.len(),
            ids.len()
        );
    }
    Ok(fetched.len())
}

async fn cmd_test(name: &str, runs: usize) -> Result<()> {
    let config = Config::load()?;
    let store = open_store(&config, false)?;
    let loaded = load_recent(&store, runs).await?;

    let history = store.get_test_results_from_cache(name);
    if history.is_empty() {
        println!("Test {name} not found in the last {loaded} runs.");
        return Ok(());
    }

    println!("{:<12}  {:<17}  {:<8}", "RUN", "CREATED", "STATUS");
    println!("{:<12}  {:<17}  {:<8}", "---", "-------", "------");
    for occurrence in &history {
        let created = occurrence
            .creation_time
            .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M").to_string());
        println!(
            "{:<12}  {:<17}  {:<8}",
            occurrence.run_id, created, occurrence.result.status
        );
    }

    Ok(())
}

async fn cmd_stats(runs: usize, failing: bool) -> Result<()> {
    let config = Config::load()?;
    let store = open_store(&config, false)?;
    let loaded = load_recent(&store, runs).await?;

    let mut stats: Vec<_> = store
        .get_test_stats_from_cache()
        .into_iter()
        .filter(|(_, s)| !failing || s.failed > 0)
        .collect();
    // Most failures first; BTreeMap order breaks ties by name
    stats.sort_by(|a, b| b.1.failed.cmp(&a.1.failed));

    println!("{} tests across {loaded} runs", stats.len());
    println!();
    println!(
        "{:>6}  {:>6}  {:>7}  {:>7}  {:<80}",
        "PASSED", "FAILED", "UNKNOWN", "RATE", "TEST"
    );
    println!(
        "{:>6}  {:>6}  {:>7}  {:>7}  {:<80}",
        "------", "------", "-------", "----", "----"
    );
    for (name, s) in &stats {
        println!(
            "{:>6}  {:>6}  {:>7}  {:>6.1}%  {}",
            s.passed,
            s.failed,
            s.unknown,
            s.pass_rate(),
            name
        );
    }

    Ok(())
}

async fn cmd_log(run_id: &str, test: &str) -> Result<()> {
    let config = Config::load()?;
    let store = open_store(&config, false)?;
    let entries = store.fetch_test_log(run_id, test).await?;

    if entries.is_empty() {
        println!("Log is empty.");
        return Ok(());
    }
    for entry in &entries {
        println!("{}", entry.display_line());
    }
    Ok(())
}

async fn cmd_dashboard(verbose: bool) -> Result<()> {
    let config = Config::load()?;
    let store = open_store(&config, true)?;
    tui::run_dashboard(config, store, verbose).await
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        let kept: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{kept}...")
    } else {
        s.to_string()
    }
}

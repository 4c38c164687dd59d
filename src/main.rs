//! leadgen CLI - Google Maps leads → Perplexity summaries → CSV.

use anyhow::{Context, Result, bail};
use clap::{ArgAction, Parser, Subcommand};
use leadgen::{
    ApifyClient, CheckpointStore, Config, CsvExporter, Interrupt, LeadgenError, PerplexityClient,
    RateLimiter, RunConfig, RunStats, StageRunner,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, error, info, warn};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_CONFIG: &str = "leadgen.toml";

#[derive(Parser)]
#[command(name = "leadgen")]
#[command(version)]
#[command(about = "Scrape Google Maps leads, summarize them with Perplexity, export to CSV")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Search term (repeat the flag for several)
    #[arg(short, long = "query", action = ArgAction::Append)]
    queries: Vec<String>,

    /// Free-text location, e.g. "Chicago, USA"
    #[arg(short, long)]
    location: Option<String>,

    /// Max places to scrape per search term
    #[arg(short = 'n', long)]
    max_results: Option<u32>,

    /// Destination file (must end in .csv)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Skip the Perplexity enrichment stage
    #[arg(long)]
    skip_enrich: bool,

    /// Continue from the last checkpoint
    #[arg(long)]
    resume: bool,

    /// Path to configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current checkpoint
    Status,

    /// Remove checkpoint state
    Clear,

    /// Show example configuration
    Example,
}

fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to set subscriber")
}

fn print_example_config() {
    let example = r#"# leadgen configuration file

[apify]
# API token (can also use APIFY_API_TOKEN env var)
# api_token = "apify_api_..."
actor_id = "compass~crawler-google-places"
language = "en"
skip_closed = true
scrape_contacts = true
poll_interval_ms = 10000

[perplexity]
# API key (can also use PERPLEXITY_API_KEY env var)
# api_key = "${PERPLEXITY_API_KEY}"
model = "sonar"
timeout_secs = 45
max_retries = 3
# Tier-0 accounts allow ~50 requests/minute
# (PERPLEXITY_RATE_LIMIT_DELAY, in seconds, overrides this)
rate_limit_delay_ms = 1200

[pipeline]
work_dir = ".tmp"
export_max_attempts = 3
export_backoff_secs = 3
save_every = 1
"#;
    println!("{example}");
}

/// Load the config file; a missing default file means built-in defaults.
fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG) {
        return Ok(Config::default());
    }
    Config::from_file(path).with_context(|| format!("Failed to load config from {path:?}"))
}

fn print_stats(stats: &RunStats) {
    println!("\n=== Lead Pipeline Complete ===");
    if let Some(stage) = stats.resumed_from {
        println!("Resumed:     from {stage}");
    }
    println!("Leads:       {}", stats.total_leads);
    println!("Enriched:    {}", stats.enriched);
    println!("Fallbacks:   {}", stats.fallbacks);
    println!("Exported:    {}", stats.exported);
    println!("Duplicates:  {}", stats.skipped_duplicates);
    println!("Throughput:  {:.0}/hr", stats.enrich_throughput_per_hour());
    println!("Runtime:     {:.1}s", stats.runtime_secs);
    println!("Output:      {}", stats.output.display());
    if stats.interrupted {
        println!("\nInterrupted: rerun with --resume to finish the remaining leads.");
    }
}

fn show_status(store: &CheckpointStore) -> Result<()> {
    let Some(record) = store.load().context("Failed to read checkpoint")? else {
        println!("No checkpoint at {}", store.path().display());
        return Ok(());
    };

    println!("Checkpoint:  {}", store.path().display());
    println!("Stage:       {}", record.stage);
    if let Some(step) = record.stage.pending_step() {
        println!("Next step:   {step}");
    }
    println!("Leads:       {}", record.leads.len());
    println!("Summarized:  {}", record.summarized_count());
    println!("Queries:     {}", record.params.queries.join(", "));
    println!("Location:    {}", record.params.location);
    println!("Max results: {}", record.params.max_results);
    println!("Output:      {}", record.params.output.display());
    println!("Saved at:    {}", record.saved_at);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    setup_logging(cli.verbose)?;

    if matches!(cli.command, Some(Commands::Example)) {
        print_example_config();
        return Ok(ExitCode::SUCCESS);
    }

    let config = load_config(&cli.config)?;
    let store = CheckpointStore::new(&config.pipeline.work_dir)
        .context("Failed to open checkpoint directory")?;

    match cli.command {
        Some(Commands::Status) => {
            show_status(&store)?;
            return Ok(ExitCode::SUCCESS);
        }
        Some(Commands::Clear) => {
            store.clear().context("Failed to clear checkpoint")?;
            info!(path = %store.path().display(), "Checkpoint cleared");
            return Ok(ExitCode::SUCCESS);
        }
        Some(Commands::Example) | None => {}
    }

    let run = RunConfig {
        queries: (!cli.queries.is_empty()).then_some(cli.queries),
        location: cli.location,
        max_results: cli.max_results,
        output: cli.output,
        enrich: !cli.skip_enrich,
        resume: cli.resume,
    };
    if run.max_results == Some(0) {
        bail!("--max-results must be at least 1");
    }

    // Credentials are resolved once here; clients never read the environment.
    let apify_token = match config.resolve_apify_token() {
        Ok(token) => Some(token),
        Err(e) => {
            if !run.resume {
                warn!(error = %e, "No Apify token; collection will fail");
            }
            None
        }
    };
    let perplexity_key = match config.resolve_perplexity_key() {
        Ok(key) => Some(key),
        Err(e) => {
            if run.enrich {
                warn!(error = %e, "No Perplexity key; every lead will get a fallback summary");
            }
            None
        }
    };

    let interrupt = Interrupt::on_ctrl_c();

    let collector = ApifyClient::new(&config.apify, apify_token)?
        .with_interrupt(interrupt.clone())
        .with_raw_dump_dir(&config.pipeline.work_dir);

    let rate_limiter = Arc::new(RateLimiter::new(config.resolve_enrich_delay()));
    let enricher = PerplexityClient::new(&config.perplexity, perplexity_key, rate_limiter)?;

    let exporter = CsvExporter::new(
        config.pipeline.export_max_attempts,
        Duration::from_secs(config.pipeline.export_backoff_secs),
    );

    let runner = StageRunner::new(collector, enricher, exporter, store)
        .with_interrupt(interrupt)
        .with_save_every(config.pipeline.save_every);

    match runner.run(&run).await {
        Ok(stats) => {
            print_stats(&stats);
            if stats.interrupted {
                Ok(ExitCode::from(130))
            } else {
                Ok(ExitCode::SUCCESS)
            }
        }
        Err(e) if e.is_interrupted() => {
            warn!("Interrupted during collection; nothing was exported");
            Ok(ExitCode::from(130))
        }
        Err(e) => {
            error!(error = %e, "Pipeline failed");
            report_failure(&e, runner.store());
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Tell the user where the last safe state is.
fn report_failure(err: &LeadgenError, store: &CheckpointStore) {
    eprintln!("\nError: {err}");
    match store.load() {
        Ok(Some(record)) => eprintln!(
            "Last safe checkpoint: stage '{}' with {} leads at {}\nRerun with --resume to continue.",
            record.stage,
            record.leads.len(),
            store.path().display()
        ),
        Ok(None) => eprintln!("No checkpoint was saved; rerun to start over."),
        Err(e) => eprintln!("Checkpoint could not be read: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_takes_one_value_per_flag() {
        let cli = Cli::try_parse_from(["leadgen", "--query", "Malls", "status"]).unwrap();
        assert_eq!(cli.queries, vec!["Malls"]);
        assert!(matches!(cli.command, Some(Commands::Status)));

        let cli = Cli::try_parse_from(["leadgen", "-q", "Plumbers", "--query", "Electricians"])
            .unwrap();
        assert_eq!(cli.queries, vec!["Plumbers", "Electricians"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_extra_words_after_query_are_rejected() {
        assert!(Cli::try_parse_from(["leadgen", "--query", "Malls", "Cafes"]).is_err());
    }
}

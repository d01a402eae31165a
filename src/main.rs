use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use linode_billing::api::LinodeApi;
use linode_billing::config::Config;
use linode_billing::display::ReportDisplayManager;
use linode_billing::logging::init_logging;
use linode_billing::{BillingAnalyzer, BillingPeriod, Clock, SystemClock};
use std::process;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "linode-billing")]
#[command(about = "Estimate Linode costs from account lifecycle events")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the cost of every day of a month
    Daily {
        /// Billing month (YYYY-MM), defaults to the current month
        #[arg(long)]
        month: Option<String>,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
        /// Refetch the full event history
        #[arg(long)]
        refresh: bool,
    },
    /// Show month-to-date cost and the month-end projection
    Summary {
        /// Billing month (YYYY-MM), defaults to the current month
        #[arg(long)]
        month: Option<String>,
        /// Output in JSON format
        #[arg(long)]
        json: bool,
        /// Refetch the full event history
        #[arg(long)]
        refresh: bool,
    },
    /// Show reconstructed billable sessions per instance
    Sessions {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
        /// Refetch the full event history
        #[arg(long)]
        refresh: bool,
    },
    /// Inspect or clear the local event cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Show cache freshness and size
    Stats {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
    /// Delete cached events; the next run refetches everything
    Clear,
}

impl Commands {
    fn json(&self) -> bool {
        match self {
            Commands::Daily { json, .. }
            | Commands::Summary { json, .. }
            | Commands::Sessions { json, .. } => *json,
            Commands::Cache { action: CacheAction::Stats { json } } => *json,
            Commands::Cache { action: CacheAction::Clear } => false,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Summary {
        month: None,
        json: false,
        refresh: false,
    });
    let json = command.json();

    let config = match Config::load().context("Failed to load configuration") {
        Ok(config) => config,
        Err(e) => return handle_error(e, json),
    };
    let _guard = init_logging(&config.logging, &config.paths.log_directory);

    match run(command, &config).await {
        Ok(()) => Ok(()),
        Err(e) => handle_error(e, json),
    }
}

fn build_analyzer(config: &Config, clock: Arc<dyn Clock>) -> Result<BillingAnalyzer> {
    let api = Arc::new(LinodeApi::new(&config.api, config.pricing.storage_base_fee)?);
    Ok(BillingAnalyzer::new(
        api.clone(),
        api.clone(),
        api,
        clock,
        config,
        Some(config.paths.cache_file.clone()),
    ))
}

/// Cache commands work without a token; the API is never contacted.
fn build_offline_analyzer(config: &Config, clock: Arc<dyn Clock>) -> BillingAnalyzer {
    let offline = Arc::new(Offline);
    BillingAnalyzer::new(
        offline.clone(),
        offline.clone(),
        offline,
        clock,
        config,
        Some(config.paths.cache_file.clone()),
    )
}

fn resolve_period(month: Option<&str>, clock: &dyn Clock) -> Result<BillingPeriod> {
    match month {
        Some(value) => BillingPeriod::parse(value)
            .with_context(|| format!("Invalid --month value: {}", value)),
        None => Ok(BillingPeriod::containing(clock.now())),
    }
}

async fn run(command: Commands, config: &Config) -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let display =
        ReportDisplayManager::new(config.output.json_pretty, config.output.show_line_items);

    match command {
        Commands::Daily { month, json, refresh } => {
            let period = resolve_period(month.as_deref(), clock.as_ref())?;
            let analyzer = build_analyzer(config, clock)?;
            let days = analyzer
                .get_daily_costs(period.year(), period.month(), refresh)
                .await?;
            display.display_daily(&days, period, json)
        }
        Commands::Summary { month, json, refresh } => {
            let period = resolve_period(month.as_deref(), clock.as_ref())?;
            let analyzer = build_analyzer(config, clock)?;
            let summary = analyzer
                .get_monthly_summary(period.year(), period.month(), refresh)
                .await?;
            display.display_summary(&summary, json)
        }
        Commands::Sessions { json, refresh } => {
            let analyzer = build_analyzer(config, clock.clone())?;
            let sessions = analyzer.get_sessions(refresh).await?;
            display.display_sessions(&sessions, clock.now(), json)
        }
        Commands::Cache { action: CacheAction::Stats { json } } => {
            let analyzer = build_offline_analyzer(config, clock);
            display.display_cache_stats(&analyzer.get_cache_stats().await, json)
        }
        Commands::Cache { action: CacheAction::Clear } => {
            let analyzer = build_offline_analyzer(config, clock);
            analyzer.clear_cache().await?;
            info!(path = %config.paths.cache_file.display(), "Cleared event cache");
            println!("Event cache cleared.");
            Ok(())
        }
    }
}

fn handle_error(e: anyhow::Error, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::json!({ "error": format!("{:#}", e) }));
    } else {
        eprintln!("❌ Error: {:#}", e);
    }
    process::exit(1);
}

struct Offline;

#[async_trait::async_trait]
impl linode_billing::source::EventSource for Offline {
    async fn fetch_events(
        &self,
        _since: Option<chrono::DateTime<chrono::Utc>>,
        _page: u32,
        _page_size: u32,
    ) -> Result<linode_billing::source::EventPage> {
        anyhow::bail!("event source unavailable for cache commands")
    }
}

#[async_trait::async_trait]
impl linode_billing::source::PricingSource for Offline {
    async fn fetch_rates(&self) -> Result<Vec<linode_billing::PricingEntry>> {
        anyhow::bail!("pricing source unavailable for cache commands")
    }

    async fn get_rate(&self, _rate_class_id: &str) -> Result<Option<linode_billing::PricingEntry>> {
        Ok(None)
    }

    async fn storage_base_fee(&self) -> Result<f64> {
        anyhow::bail!("pricing source unavailable for cache commands")
    }
}

#[async_trait::async_trait]
impl linode_billing::source::ResourceMetadata for Offline {
    async fn current_rate_class(&self, _resource_id: u64) -> Result<Option<String>> {
        Ok(None)
    }
}

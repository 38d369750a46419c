use anyhow::{Context, bail};
use backtester::{
    BacktestSimulator, InMemoryKlineSource, IndicatorSimulator, MarketDataSource, PgKlineSource,
};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use comfy_table::{Table, presets::UTF8_FULL};
use configuration::{Config, LogFormat, init_tracing, load_config, load_config_with_overrides};
use core_types::{BacktestWindow, ReasonCode, StrategyRecord};
use database::{InMemoryStateStore, PgStateStore, StateStore, connect, run_migrations};
use engine::{CycleReport, EvolutionEvent, EvolutionScheduler};
use portfolio::PortfolioManager;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// The main entry point for the ASES strategy evolution engine.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }
    let _log_guard = init_tracing(&config.logging)?;

    let backend = Backend::open(&cli, config).await?;

    match cli.command {
        Commands::Run => handle_run(backend).await,
        Commands::Cycle => handle_cycle(backend).await,
        Commands::Portfolio => handle_portfolio(backend).await,
        Commands::Retire(args) => handle_retire(backend, args).await,
        Commands::Override(args) => handle_override(backend, &cli.config, args).await,
        Commands::SeedKlines(args) => handle_seed_klines(backend, args).await,
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&backend.config)?);
            Ok(())
        }
    }
}

// ==============================================================================
// CLI Structure
// ==============================================================================

/// Autonomous generation, evaluation and retirement of trading strategies.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file. Missing files fall back to defaults.
    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Use an in-memory store and synthetic market data instead of PostgreSQL.
    #[arg(long)]
    dry_run: bool,

    /// Overrides `logging.format`.
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run evolution cycles every `evolution_cycle_hours` until Ctrl-C.
    Run,
    /// Run a single evolution cycle and print its report.
    Cycle,
    /// Print the active portfolio.
    Portfolio,
    /// Retire an active strategy by hand.
    Retire(RetireArgs),
    /// Print the effective configuration.
    Config,
    /// Store a JSON configuration override in the database.
    Override(OverrideArgs),
    /// Fill the klines table with synthetic bars for a trial run.
    SeedKlines(SeedKlinesArgs),
}

#[derive(Parser)]
struct OverrideArgs {
    /// A JSON object shaped like the configuration, e.g. '{"system":{"max_concurrent_strategies":8}}'.
    json: String,
}

#[derive(Parser)]
struct SeedKlinesArgs {
    /// Days of history to generate, ending now.
    #[arg(long, default_value_t = 150)]
    days: i64,

    /// Seed of the random walk.
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[derive(Parser)]
struct RetireArgs {
    /// Full spec id or a unique prefix of one.
    spec_id: String,
}

// ==============================================================================
// Wiring
// ==============================================================================

/// The store and simulator every command runs against.
struct Backend {
    config: Config,
    store: Arc<dyn StateStore>,
    simulator: Arc<dyn BacktestSimulator>,
    /// Present unless running with `--dry-run`.
    postgres: Option<PgStateStore>,
}

impl Backend {
    async fn open(cli: &Cli, config: Config) -> anyhow::Result<Self> {
        if cli.dry_run {
            return Ok(Self::in_memory(config));
        }

        let pool = connect(&config.store)
            .await
            .context("failed to connect to the database")?;
        run_migrations(&pool)
            .await
            .context("failed to run database migrations")?;
        let store = PgStateStore::new(pool);

        // Overrides persisted by operators sit between the file and the environment.
        let config = match store.load_config().await? {
            Some(overrides) => {
                info!("applying configuration overrides from the state store");
                let mut merged = load_config_with_overrides(&cli.config, Some(&overrides.to_string()))?;
                merged.logging = config.logging;
                merged
            }
            None => config,
        };

        let source = PgKlineSource::new(store.clone(), config.backtest.symbol.clone());
        let simulator = IndicatorSimulator::new(
            Arc::new(source),
            config.portfolio.capital_base,
            config.backtest.fee_rate,
        );
        Ok(Self {
            config,
            store: Arc::new(store.clone()),
            simulator: Arc::new(simulator),
            postgres: Some(store),
        })
    }

    /// Enough synthetic history for the longest window a held candidate can reach.
    fn in_memory(config: Config) -> Self {
        let days = config.system.min_backtest_period_days
            + i64::from(config.scheduler.max_hold_retries) * config.scheduler.hold_window_extension_days
            + 1;
        let end = Utc::now();
        let source = InMemoryKlineSource::synthetic(
            &config.strategy.available_timeframes,
            end - Duration::days(days),
            end,
            config.generator.seed.unwrap_or(42),
        );
        let simulator = IndicatorSimulator::new(
            Arc::new(source),
            config.portfolio.capital_base,
            config.backtest.fee_rate,
        );
        info!(history_days = days, "dry run: in-memory store with synthetic klines");
        Self {
            config,
            store: Arc::new(InMemoryStateStore::new()),
            simulator: Arc::new(simulator),
            postgres: None,
        }
    }

    fn scheduler(self) -> anyhow::Result<EvolutionScheduler> {
        Ok(EvolutionScheduler::new(self.config, self.store, self.simulator)?)
    }

    fn postgres(&self) -> anyhow::Result<&PgStateStore> {
        self.postgres
            .as_ref()
            .context("this command needs the database; drop --dry-run")
    }

    async fn portfolio(&self) -> anyhow::Result<PortfolioManager> {
        let mut portfolio = PortfolioManager::new(self.store.clone(), &self.config);
        portfolio.load().await?;
        Ok(portfolio)
    }
}

// ==============================================================================
// Command Logic
// ==============================================================================

async fn handle_run(backend: Backend) -> anyhow::Result<()> {
    let mut scheduler = backend.scheduler()?;

    // Operator channel: failed cycles are surfaced loudly.
    let mut events = scheduler.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let EvolutionEvent::CycleFailed { cycle, error } = event {
                warn!(cycle, %error, "OPERATOR ATTENTION: evolution cycle failed");
            }
        }
    });

    let (stop, shutdown) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, finishing up");
            let _ = stop.send(true);
        }
    });

    scheduler.run(shutdown).await?;
    Ok(())
}

async fn handle_cycle(backend: Backend) -> anyhow::Result<()> {
    let mut scheduler = backend.scheduler()?;
    let (_stop, shutdown) = watch::channel(false);
    let report = scheduler.run_cycle(shutdown).await?;
    print_report(&report);

    let portfolio = scheduler.portfolio();
    let portfolio = portfolio.lock().await;
    print_portfolio(&portfolio);
    Ok(())
}

async fn handle_portfolio(backend: Backend) -> anyhow::Result<()> {
    let portfolio = backend.portfolio().await?;
    print_portfolio(&portfolio);
    Ok(())
}

async fn handle_retire(backend: Backend, args: RetireArgs) -> anyhow::Result<()> {
    let mut portfolio = backend.portfolio().await?;
    let matches: Vec<_> = portfolio
        .active()
        .filter(|r| r.id().as_str().starts_with(&args.spec_id))
        .map(|r| r.id().clone())
        .collect();
    let id = match matches.as_slice() {
        [id] => id.clone(),
        [] => bail!("no active strategy matches '{}'", args.spec_id),
        _ => bail!("'{}' matches {} active strategies", args.spec_id, matches.len()),
    };

    let retired = portfolio
        .retire(&id, ReasonCode::OperatorRetired, Utc::now())
        .await?;
    println!("Retired {} ({})", retired.id(), retired.spec.label());
    Ok(())
}

async fn handle_override(backend: Backend, path: &Path, args: OverrideArgs) -> anyhow::Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(&args.json).context("override is not valid JSON")?;
    if !value.is_object() {
        bail!("override must be a JSON object");
    }
    // Refuse anything that would not load on the next start.
    load_config_with_overrides(path, Some(&args.json)).context("override does not validate")?;

    backend.postgres()?.save_config(&value).await?;
    println!("Override stored; it applies from the next start.");
    Ok(())
}

async fn handle_seed_klines(backend: Backend, args: SeedKlinesArgs) -> anyhow::Result<()> {
    let store = backend.postgres()?;
    let symbol = &backend.config.backtest.symbol;
    let timeframes = &backend.config.strategy.available_timeframes;

    let window = BacktestWindow::ending_at(Utc::now(), args.days);
    let source = InMemoryKlineSource::synthetic(timeframes, window.start, window.end, args.seed);
    for timeframe in timeframes {
        let klines = source.klines(*timeframe, window).await?;
        for kline in &klines {
            store.save_kline(symbol, timeframe.as_str(), kline).await?;
        }
        info!(%symbol, %timeframe, bars = klines.len(), "synthetic klines stored");
    }
    Ok(())
}

fn print_report(report: &CycleReport) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec!["Cycle", "Value"]);
    let rows = [
        ("recovered", report.recovered.to_string()),
        ("generated", report.generated.to_string()),
        ("backtested", report.backtested.to_string()),
        ("promoted", report.promoted.to_string()),
        ("held", report.held.len().to_string()),
        ("rejected", report.rejected().to_string()),
        ("admitted", report.admitted.len().to_string()),
        ("retired", report.retired.len().to_string()),
        ("portfolio size", report.portfolio_size.to_string()),
        ("search space exhausted", report.search_space_exhausted.to_string()),
    ];
    for (name, value) in rows {
        table.add_row(vec![name.to_string(), value]);
    }
    println!("Cycle {}\n{table}", report.cycle);

    if !report.rejections.is_empty() {
        let mut rejections = Table::new();
        rejections
            .load_preset(UTF8_FULL)
            .set_header(vec!["Spec", "Reason", "Detail"]);
        for r in &report.rejections {
            rejections.add_row(vec![
                r.spec_id.short().to_string(),
                r.reason.to_string(),
                r.detail.clone(),
            ]);
        }
        println!("{rejections}");
    }
}

fn print_portfolio(portfolio: &PortfolioManager) {
    let now = Utc::now();
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_header(vec![
        "Spec",
        "Strategy",
        "Activated",
        "Profit factor",
        "Sharpe",
        "Live trades",
        "Score",
    ]);
    for (record, score) in portfolio.ranking(now).into_iter().rev() {
        table.add_row(row(record, score.to_string()));
    }
    println!(
        "Active strategies: {}/{}\n{table}",
        portfolio.len(),
        portfolio.capacity()
    );
}

fn row(record: &StrategyRecord, score: String) -> Vec<String> {
    let (pf, sharpe) = record
        .metrics
        .as_ref()
        .map(|m| (m.profit_factor.to_string(), m.sharpe_ratio.to_string()))
        .unwrap_or_default();
    vec![
        record.id().short().to_string(),
        record.spec.label(),
        record
            .activated_at
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default(),
        pf,
        sharpe,
        record.live_trades.len().to_string(),
        score,
    ]
}

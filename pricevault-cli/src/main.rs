//! PriceVault CLI — ingestion, sync, backfill and storage management commands.
//!
//! Commands:
//! - `download` — resume from the latest stored month and ingest through an end date
//! - `sync` — top up each month partition from its last stored day
//! - `backfill` — find per-instrument gaps and fetch only the missing days
//! - `status` — report partitions and the last stored date per instrument
//! - `load` — print stored rows as CSV
//! - `pairs` — report aligned observations for instrument pairs
//! - `reset` — delete every partition under the storage root

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use pricevault_core::data::{
    find_gap_dates, load_rows, plan_backfill, project, resume_start_date, sync_months,
    CircuitBreaker, Column, FetchRange, IngestRequest, IngestionOutcome, Ingestor,
    PartitionStore, RowQuery, StdoutProgress, YahooProvider,
};
use pricevault_core::{PanelSnapshot, VaultConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "pricevault",
    about = "PriceVault CLI — incremental daily price ingestion into monthly partitions"
)]
struct Cli {
    /// Path to a TOML config file. Defaults are used when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Storage root. Overrides the config file.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest from the resume point (or configured start) through an end date.
    Download {
        /// Instruments to fetch. Defaults to the configured universe.
        symbols: Vec<String>,

        /// Start date (YYYY-MM-DD). Overrides the configured start.
        #[arg(long)]
        start: Option<String>,

        /// Last date to fetch, inclusive (YYYY-MM-DD). Defaults to today.
        #[arg(long)]
        end: Option<String>,

        /// Delete every partition and start over from the configured start.
        #[arg(long, default_value_t = false)]
        force: bool,

        /// Instruments per provider call. Overrides the config file.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Print the outcome as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Walk month by month and fetch what each partition is missing at its end.
    Sync {
        symbols: Vec<String>,

        #[arg(long)]
        start: Option<String>,

        #[arg(long)]
        end: Option<String>,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Detect dates missing inside each instrument's stored span and fetch them.
    Backfill {
        symbols: Vec<String>,

        /// Split fetch windows when gap dates are further apart than this.
        #[arg(long)]
        max_gap_days: Option<i64>,

        /// Only report the plan.
        #[arg(long, default_value_t = false)]
        dry_run: bool,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Report stored partitions and the last date per instrument.
    Status { symbols: Vec<String> },
    /// Print stored rows as CSV on stdout.
    Load {
        symbols: Vec<String>,

        #[arg(long)]
        start: Option<String>,

        #[arg(long)]
        end: Option<String>,

        /// Comma-separated columns, e.g. date,instrument_id,close. Defaults to all.
        #[arg(long, value_delimiter = ',')]
        columns: Vec<String>,
    },
    /// Report how many dates each pair of instruments shares.
    Pairs {
        /// Instruments to pair up (at least two).
        #[arg(required = true, num_args = 2..)]
        symbols: Vec<String>,

        #[arg(long)]
        start: Option<String>,
    },
    /// Delete every partition under the storage root.
    Reset {
        /// Actually delete (without this flag, only previews what would be removed).
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => VaultConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => VaultConfig::default(),
    };
    if let Some(root) = cli.root {
        config.root = root;
    }

    match cli.command {
        Commands::Download {
            symbols,
            start,
            end,
            force,
            batch_size,
            json,
        } => run_download(&config, symbols, start, end, force, batch_size, json),
        Commands::Sync {
            symbols,
            start,
            end,
            json,
        } => run_sync(&config, symbols, start, end, json),
        Commands::Backfill {
            symbols,
            max_gap_days,
            dry_run,
            json,
        } => run_backfill(&config, symbols, max_gap_days, dry_run, json),
        Commands::Status { symbols } => run_status(&config, symbols),
        Commands::Load {
            symbols,
            start,
            end,
            columns,
        } => run_load(&config, symbols, start, end, columns),
        Commands::Pairs { symbols, start } => run_pairs(&config, symbols, start),
        Commands::Reset { confirm } => run_reset(&config, confirm),
    }
}

fn parse_date_arg(value: Option<&str>, flag: &str) -> Result<Option<NaiveDate>> {
    value
        .map(|s| {
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .with_context(|| format!("--{flag} must be YYYY-MM-DD, got {s:?}"))
        })
        .transpose()
}

fn today() -> NaiveDate {
    chrono::Local::now().date_naive()
}

fn instruments(config: &VaultConfig, symbols: Vec<String>) -> Result<Vec<String>> {
    let ids = if symbols.is_empty() {
        config.instruments()
    } else {
        symbols
    };
    if ids.is_empty() {
        bail!("no instruments given and the configured universe is empty");
    }
    Ok(ids)
}

fn yahoo() -> Result<YahooProvider> {
    let breaker = Arc::new(CircuitBreaker::default_provider());
    Ok(YahooProvider::new(breaker)?)
}

fn print_outcome(outcome: &IngestionOutcome, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }
    println!();
    println!("=== Ingest Result ===");
    println!("Stored:    {} instrument(s), {} row(s)", outcome.stored.len(), outcome.total_rows());
    for (id, rows) in &outcome.stored {
        println!("  {id:<10} {rows:>6} rows");
    }
    if !outcome.failed.is_empty() {
        println!("Failed:    {}", outcome.failed.join(", "));
    }
    for path in &outcome.corrupt {
        println!("WARNING: corrupt partition skipped: {}", path.display());
    }
    if outcome.cancelled {
        println!("WARNING: run was cancelled before all batches finished");
    }
    Ok(())
}

fn run_download(
    config: &VaultConfig,
    symbols: Vec<String>,
    start: Option<String>,
    end: Option<String>,
    force: bool,
    batch_size: Option<usize>,
    json: bool,
) -> Result<()> {
    let ids = instruments(config, symbols)?;
    let configured_start = parse_date_arg(start.as_deref(), "start")?.unwrap_or(config.start_date);
    let end = parse_date_arg(end.as_deref(), "end")?.unwrap_or_else(today);

    let store = PartitionStore::new(&config.root);
    let (start, _) = resume_start_date(&store, configured_start, force)?;
    if start > end {
        println!("Nothing to do: start {start} is after end {end}.");
        return Ok(());
    }

    let mut pacing = config.pacing_config();
    if let Some(size) = batch_size {
        pacing.max_batch_size = size.max(1);
    }

    let provider = yahoo()?;
    let request = IngestRequest::uniform(ids, FetchRange::inclusive(start, end));
    let outcome = Ingestor::new(&provider, &store, pacing).run_with_progress(&request, &StdoutProgress)?;
    print_outcome(&outcome, json)?;

    if !outcome.all_stored() {
        std::process::exit(1);
    }
    Ok(())
}

fn run_sync(
    config: &VaultConfig,
    symbols: Vec<String>,
    start: Option<String>,
    end: Option<String>,
    json: bool,
) -> Result<()> {
    let ids = instruments(config, symbols)?;
    let start = parse_date_arg(start.as_deref(), "start")?.unwrap_or(config.start_date);
    let end = parse_date_arg(end.as_deref(), "end")?.unwrap_or_else(today);

    let store = PartitionStore::new(&config.root);
    let provider = yahoo()?;
    let stats = sync_months(&provider, &store, &ids, start, end)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("{}", stats.summary());
    }
    Ok(())
}

fn run_backfill(
    config: &VaultConfig,
    symbols: Vec<String>,
    max_gap_days: Option<i64>,
    dry_run: bool,
    json: bool,
) -> Result<()> {
    let ids = instruments(config, symbols)?;
    let max_gap_days = max_gap_days.unwrap_or(config.max_gap_days);
    if max_gap_days < 0 {
        bail!("--max-gap-days must be >= 0");
    }

    let store = PartitionStore::new(&config.root);
    // The calendar comes from every stored instrument, not just the requested ones.
    let rows = load_rows(&store, &RowQuery::new())?;
    let gaps = find_gap_dates(&rows, &ids);
    let plan = plan_backfill(&gaps, max_gap_days);

    if plan.is_empty() {
        println!("No gaps found for {} instrument(s).", ids.len());
        return Ok(());
    }

    println!("Found {} missing date(s):", plan.gap_count());
    for (id, ranges) in &plan.ranges {
        let windows: Vec<String> = ranges.iter().map(ToString::to_string).collect();
        println!("  {id:<10} {}", windows.join(" "));
    }
    if dry_run {
        println!();
        println!("Dry run — nothing fetched.");
        return Ok(());
    }

    let provider = yahoo()?;
    let outcome = Ingestor::new(&provider, &store, config.pacing_config())
        .run_with_progress(&plan.into(), &StdoutProgress)?;
    print_outcome(&outcome, json)
}

fn run_status(config: &VaultConfig, symbols: Vec<String>) -> Result<()> {
    let store = PartitionStore::new(&config.root);
    let partitions = store.partitions()?;
    if partitions.is_empty() {
        println!("No partitions under {}", config.root.display());
        return Ok(());
    }

    let ids = instruments(config, symbols)?;
    let last = store.find_last_date_per_instrument(&ids)?;

    println!("Root:       {}", config.root.display());
    println!("Partitions: {}", partitions.len());
    if let (Some((first, _)), Some((latest, _))) = (partitions.first(), partitions.last()) {
        println!("Range:      {first} to {latest}");
    }
    println!();
    println!("{:<10} {:<12}", "Instrument", "Last Date");
    println!("{}", "-".repeat(23));
    for id in &ids {
        let date = last
            .get(id)
            .copied()
            .flatten()
            .map_or_else(|| "(none)".to_string(), |d| d.to_string());
        println!("{id:<10} {date:<12}");
    }
    Ok(())
}

fn run_load(
    config: &VaultConfig,
    symbols: Vec<String>,
    start: Option<String>,
    end: Option<String>,
    columns: Vec<String>,
) -> Result<()> {
    let columns: Vec<Column> = if columns.is_empty() {
        Column::ALL.to_vec()
    } else {
        columns
            .iter()
            .map(|c| c.parse::<Column>())
            .collect::<Result<_, _>>()?
    };

    let mut query = RowQuery::new().instruments(symbols);
    if let Some(start) = parse_date_arg(start.as_deref(), "start")? {
        query = query.start(start);
    }
    if let Some(end) = parse_date_arg(end.as_deref(), "end")? {
        query = query.end(end);
    }

    let store = PartitionStore::new(&config.root);
    let rows = load_rows(&store, &query)?;

    let mut wtr = csv::Writer::from_writer(std::io::stdout().lock());
    wtr.write_record(columns.iter().map(|c| c.name()))?;
    for record in project(&rows, &columns) {
        wtr.write_record(&record)?;
    }
    wtr.flush()?;
    info!(rows = rows.len(), "loaded");
    Ok(())
}

fn run_pairs(config: &VaultConfig, symbols: Vec<String>, start: Option<String>) -> Result<()> {
    let mut query = RowQuery::new().instruments(symbols.iter().cloned());
    if let Some(start) = parse_date_arg(start.as_deref(), "start")? {
        query = query.start(start);
    }
    let store = PartitionStore::new(&config.root);
    let panel = PanelSnapshot::from_rows(&load_rows(&store, &query)?).into_shared();

    let mut pairs = Vec::new();
    for (i, a) in symbols.iter().enumerate() {
        for b in &symbols[i + 1..] {
            pairs.push((a.clone(), b.clone()));
        }
    }

    let results = panel.map_pairs(&pairs, |a, _| a.len());
    println!("{:<10} {:<10} {:>8}", "A", "B", "Overlap");
    println!("{}", "-".repeat(30));
    for (a, b, n) in &results {
        println!("{a:<10} {b:<10} {n:>8}");
    }
    let skipped = pairs.len() - results.len();
    if skipped > 0 {
        println!("{skipped} pair(s) skipped: fewer than {} shared dates", pricevault_core::panel::MIN_OBS);
    }
    Ok(())
}

fn run_reset(config: &VaultConfig, confirm: bool) -> Result<()> {
    let store = PartitionStore::new(&config.root);
    let partitions = store.partitions()?;
    if partitions.is_empty() {
        println!("No partitions under {}", config.root.display());
        return Ok(());
    }

    println!("Found {} partition(s) under {}", partitions.len(), config.root.display());
    if !confirm {
        println!();
        println!("Dry run — pass --confirm to actually delete.");
        return Ok(());
    }

    let deleted = store.delete_all_partitions()?;
    println!("Done. Removed {deleted} partition(s).");
    Ok(())
}

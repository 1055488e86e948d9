//! nutrimelt: Load FoodData Central food records into relational tables
//!
//! Usage:
//!   # Use food.json if present, otherwise fetch it; write food.db
//!   nutrimelt run
//!
//!   # Refetch two data types, capped at 10000 records
//!   nutrimelt run --refresh --data-type Foundation --data-type "SR Legacy" --max-records 10000
//!
//!   # Only populate the cache
//!   nutrimelt fetch
//!
//!   # Flatten a saved record list into JSON Lines tables, no network or database
//!   nutrimelt flatten food.json --output-dir ./tables

// Use MiMalloc allocator for better performance (recommended by simd-json)
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use nutrimelt::config::{Settings, SinkKind};
use nutrimelt::logging::init_logging;
use nutrimelt::melt::{FoodMelter, JsonlSink, MeltSummary, SqliteSink, TableSink};
use nutrimelt::pipeline::{acquire_records, run};
use nutrimelt::source::{read_records, FdcClient, Fetcher, JsonFileCache};
use serde_json::Value;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "nutrimelt")]
#[command(about = "Load FoodData Central food records into relational tables", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (defaults to ./nutrimelt.toml when present)
    #[arg(long, short = 'c', global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Acquire records, melt them and write the food and food_nutrients tables
    Run {
        #[command(flatten)]
        source: SourceArgs,

        /// Read records from this JSON list file instead of the cache or API
        #[arg(long, value_name = "FILE")]
        input: Option<PathBuf>,

        /// Output kind
        #[arg(long, value_enum)]
        sink: Option<SinkKind>,

        /// Database file (sqlite) or directory (jsonl)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },

    /// Fetch records into the cache without melting them
    Fetch {
        #[command(flatten)]
        source: SourceArgs,
    },

    /// Melt a JSON list file into JSON Lines tables
    Flatten {
        /// JSON file holding a list of food records
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Directory for food.jsonl and food_nutrients.jsonl
        #[arg(long, short = 'o', default_value = ".")]
        output_dir: PathBuf,
    },
}

#[derive(Args, Debug)]
struct SourceArgs {
    /// Ignore the cache and fetch from the API
    #[arg(long)]
    refresh: bool,

    /// Stop after this many records across all data types
    #[arg(long)]
    max_records: Option<usize>,

    /// Data type to fetch (repeatable), e.g. Foundation, "SR Legacy", Branded
    #[arg(long = "data-type", value_name = "TYPE")]
    data_types: Vec<String>,

    /// FoodData Central API key
    #[arg(long, env = "FDC_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

impl SourceArgs {
    fn apply(&self, settings: &mut Settings) {
        if let Some(max) = self.max_records {
            settings.api.max_records = Some(max);
        }
        if !self.data_types.is_empty() {
            settings.api.data_types = self.data_types.clone();
        }
        if let Some(key) = &self.api_key {
            settings.api.api_key = Some(key.clone());
        }
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose)?;

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run {
            source,
            input,
            sink,
            output,
        } => {
            source.apply(&mut settings);
            if let Some(kind) = sink {
                settings.sink.kind = kind;
            }
            if let Some(path) = output {
                settings.sink.path = path;
            }

            let records = match input {
                Some(path) => read_input(&path)?,
                None => load_or_fetch(&settings, source.refresh)?,
            };
            let summary = melt_into_sink(&records, &settings)?;
            report(&summary);
        }
        Command::Fetch { source } => {
            source.apply(&mut settings);
            let records = load_or_fetch(&settings, source.refresh)?;
            info!(
                records = records.len(),
                path = %settings.cache.path.display(),
                "Records available in cache"
            );
        }
        Command::Flatten { input, output_dir } => {
            let records = read_input(&input)?;
            let melter = FoodMelter::new(settings.melt.clone());
            let mut sink = JsonlSink::new(&output_dir)
                .with_context(|| format!("Failed to prepare output directory {}", output_dir.display()))?;
            let summary = run(&records, &melter, &mut sink).context("Failed to melt records")?;
            report(&summary);
        }
    }

    Ok(())
}

fn read_input(path: &Path) -> Result<Vec<Value>> {
    let records = read_records(path).with_context(|| format!("Failed to read records from {}", path.display()))?;
    info!(records = records.len(), path = %path.display(), "Read records");
    Ok(records)
}

/// The single cache-or-fetch decision for a run
fn load_or_fetch(settings: &Settings, refresh: bool) -> Result<Vec<Value>> {
    let cache = JsonFileCache::new(&settings.cache.path, settings.cache.ttl()).refresh(refresh);
    let client = FdcClient::new(&settings.api)?;
    let fetcher = Fetcher::new(client, &settings.api);

    acquire_records(&cache, &fetcher).context("Failed to acquire food records")
}

fn melt_into_sink(records: &[Value], settings: &Settings) -> Result<MeltSummary> {
    let melter = FoodMelter::new(settings.melt.clone());
    let path = &settings.sink.path;

    let mut sink: Box<dyn TableSink> = match settings.sink.kind {
        SinkKind::Sqlite => Box::new(
            SqliteSink::open(path).with_context(|| format!("Failed to open database {}", path.display()))?,
        ),
        SinkKind::Jsonl => Box::new(
            JsonlSink::new(path).with_context(|| format!("Failed to prepare output directory {}", path.display()))?,
        ),
    };

    let summary = run(records, &melter, sink.as_mut()).context("Failed to load tables")?;
    info!(sink = ?settings.sink.kind, path = %path.display(), "Tables loaded");
    Ok(summary)
}

/// Print the run summary as JSON on stdout
fn report(summary: &MeltSummary) {
    match serde_json::to_string_pretty(summary) {
        Ok(json) => println!("{}", json),
        Err(err) => tracing::warn!(error = %err, "Failed to serialize summary"),
    }
}

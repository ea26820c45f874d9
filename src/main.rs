use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::{error, info};

use sales_etl::constants::DEFAULT_CONFIG_FILE;
use sales_etl::ingest::read_csv;
use sales_etl::{logging, run_pipeline, transform, Config, OrderStore, PipelineReport};

#[derive(Parser)]
#[command(name = "sales_etl")]
#[command(about = "Validate a daily sales extract and upsert it into sales_orders")]
#[command(version)]
struct Cli {
    /// Settings file; defaults to ./sales_etl.toml when present, else the environment
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the rotating JSON log file
    #[arg(long, global = true, default_value = "logs")]
    log_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for one extract file
    Run {
        #[arg(long)]
        file: PathBuf,
        /// Database target (SQLite path or URI); overrides the configured one
        #[arg(long)]
        db: Option<String>,
        #[arg(long)]
        schema: Option<String>,
        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run the pipeline for the extract of a logical date (DATA_DIR/<date>.csv)
    Daily {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        json: bool,
    },
    /// Validate an extract without touching the database
    Check {
        #[arg(long)]
        file: PathBuf,
    },
    /// Create the sales_orders table if it does not exist
    InitDb {
        #[arg(long)]
        db: Option<String>,
        #[arg(long)]
        schema: Option<String>,
    },
    /// Count stored orders for a date after a load
    ValidateLoad {
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        db: Option<String>,
        #[arg(long)]
        schema: Option<String>,
    },
}

fn load_config(explicit: Option<&Path>) -> Result<Config> {
    if let Some(path) = explicit {
        return Config::load(path).with_context(|| format!("loading {}", path.display()));
    }
    let default_path = Path::new(DEFAULT_CONFIG_FILE);
    if default_path.is_file() {
        return Ok(Config::load(default_path)?);
    }
    Ok(Config::from_env())
}

fn apply_overrides(config: &mut Config, db: Option<String>, schema: Option<String>) {
    if let Some(db) = db {
        config.database.url = db;
    }
    if schema.is_some() {
        config.database.schema = schema;
    }
}

fn print_report(report: &PipelineReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!("\n📊 Pipeline results for {}:", report.input_path.display());
    println!("   Run id: {}", report.run_id);
    println!("   Input rows: {}", report.input_rows);
    println!("   Dropped rows: {}", report.dropped_rows);
    println!("   Duplicate rows: {}", report.duplicate_rows);
    println!("   Upserted rows: {} into {}", report.upserted_rows, report.target_table);
    Ok(())
}

fn run_command(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run { file, db, schema, json } => {
            apply_overrides(&mut config, db, schema);
            let pipeline = config.pipeline_for_file(file)?;
            let report = run_pipeline(&pipeline)?;
            print_report(&report, json)?;
        }
        Commands::Daily { date, json } => {
            let pipeline = config.pipeline_for_date(date)?;
            info!("Daily run for {} using {}", date, pipeline.input_path.display());
            let report = run_pipeline(&pipeline)?;
            print_report(&report, json)?;
        }
        Commands::Check { file } => {
            let pipeline = config.pipeline_for_file(file)?;
            let raw = read_csv(&pipeline.input_path, pipeline.delimiter)?;
            let report = transform(&raw)?;
            println!("✅ {} valid orders", report.orders.len());
            println!("   Input rows: {}", report.input_rows);
            println!("   Dropped rows: {}", report.dropped_rows);
            println!("   Duplicate rows: {}", report.duplicate_rows);
        }
        Commands::InitDb { db, schema } => {
            apply_overrides(&mut config, db, schema);
            let store = OrderStore::open(&config.database.url, config.database.schema.as_deref())?;
            store.ensure_table()?;
            println!("✅ Table {} ready", store.table());
        }
        Commands::ValidateLoad { date, db, schema } => {
            apply_overrides(&mut config, db, schema);
            let store = OrderStore::open_existing(&config.database.url, config.database.schema.as_deref())?;
            let count = store.count_orders_for_date(date)?;
            println!("✅ {} orders stored in {} for {}", count, store.table(), date);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();
    let _guard = logging::init_logging(&cli.log_dir);

    run_command(cli).map_err(|e| {
        error!("ETL failed: {:#}", e);
        e
    })
}

//! Tabload - load flat source files into the relational schema

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use std::path::PathBuf;
use tabload_common::logging::{init_logging, LogConfig, LogLevel};
use tabload_ingest::audit::{DEFAULT_AUDIT_LIMIT, MAX_AUDIT_LIMIT};
use tabload_ingest::config::Config;
use tabload_ingest::plan::StepKind;
use tabload_ingest::{
    AuditEntry, CsvSource, LoadPlan, LoadReport, MemoryStore, Orchestrator, PgStore, StepOutcome,
    Store,
};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "tabload")]
#[command(author, version, about = "Load customer, product and transaction files into PostgreSQL")]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Database URL (overrides DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the load pipeline
    Load {
        /// Directory holding customers.csv, products.csv and transactions.csv
        #[arg(short, long, env = "TABLOAD_DATA_DIR")]
        data_dir: Option<PathBuf>,

        /// Load into an in-memory store instead of the database
        #[arg(long)]
        dry_run: bool,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Create all tables and indexes that do not exist yet
    InitDb,

    /// Drop and recreate every table
    ResetDb {
        /// Confirm that all loaded data will be deleted
        #[arg(long)]
        yes: bool,
    },

    /// Show recent load audit entries
    Audit {
        /// Number of entries to show
        #[arg(short, long, default_value_t = DEFAULT_AUDIT_LIMIT)]
        limit: i64,

        /// Print entries as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the load plan
    Plan,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("tabload")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().with_env().unwrap_or(log_config);
    let _guard = match init_logging(&log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Warning: logging disabled: {:#}", e);
            None
        },
    };

    if let Err(e) = execute(cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

async fn execute(cli: Cli) -> Result<()> {
    let mut config = Config::load().context("Failed to load configuration")?;
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }

    match cli.command {
        Command::Load {
            data_dir,
            dry_run,
            json,
        } => {
            if let Some(dir) = data_dir {
                config.data_dir = dir;
            }
            load(&config, dry_run, json).await
        },
        Command::InitDb => {
            connect(&config).await?.init_schema().await?;
            println!("Schema initialized");
            Ok(())
        },
        Command::ResetDb { yes } => {
            if !yes {
                bail!("reset-db deletes all loaded data; pass --yes to confirm");
            }
            connect(&config).await?.reset_schema().await?;
            println!("All tables dropped and recreated");
            Ok(())
        },
        Command::Audit { limit, json } => {
            if !(1..=MAX_AUDIT_LIMIT).contains(&limit) {
                bail!("--limit must be between 1 and {}", MAX_AUDIT_LIMIT);
            }
            let entries = connect(&config).await?.recent_audit(limit).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&entries)?);
            } else {
                print_audit(&entries);
            }
            Ok(())
        },
        Command::Plan => {
            print_plan(&LoadPlan::standard());
            Ok(())
        },
    }
}

async fn connect(config: &Config) -> Result<PgStore> {
    let store = PgStore::connect(&config.database)
        .await
        .context("Failed to connect to database")?
        .with_chunk_size(config.chunk_size);
    Ok(store)
}

async fn load(config: &Config, dry_run: bool, json: bool) -> Result<()> {
    let source = CsvSource::new(&config.data_dir);
    info!(data_dir = %config.data_dir.display(), dry_run, "Loading source files");

    let report = if dry_run {
        let store = MemoryStore::new();
        Orchestrator::new(&store, &source).run().await?
    } else {
        let store = connect(config).await?;
        store.init_schema().await?;
        Orchestrator::new(&store, &source).run().await?
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, dry_run);
    }
    Ok(())
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS);
    table
}

fn print_report(report: &LoadReport, dry_run: bool) {
    let mut table = new_table();
    table.set_header(vec!["Table", "Outcome", "Rows"]);

    for step in &report.steps {
        let (outcome, rows) = match step.outcome {
            StepOutcome::Loaded { rows } => ("loaded", rows.to_string()),
            StepOutcome::Skipped => ("skipped (no source)", "-".to_string()),
        };
        table.add_row(vec![step.entity.to_string(), outcome.to_string(), rows]);
    }

    println!("{}", table);
    if dry_run {
        println!("Dry run: nothing was written to the database");
    }
    println!("{} rows loaded", report.total_rows());
}

fn print_audit(entries: &[AuditEntry]) {
    if entries.is_empty() {
        println!("No load audit entries");
        return;
    }

    let mut table = new_table();
    table.set_header(vec!["ID", "Timestamp", "Table", "Rows", "Status"]);
    for entry in entries {
        table.add_row(vec![
            entry.id.to_string(),
            entry.load_timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            entry.table_name.clone(),
            entry.row_count.to_string(),
            entry.status.clone(),
        ]);
    }
    println!("{}", table);
}

fn print_plan(plan: &LoadPlan) {
    let mut table = new_table();
    table.set_header(vec!["#", "Table", "Source", "Natural key", "Checked references"]);

    for (position, step) in plan.steps().iter().enumerate() {
        let natural_key = match &step.kind {
            StepKind::NaturalKeys(reference) => format!("registers {}.{}", step.source, reference.field),
            StepKind::Records { resolves: Some(reference) } => {
                format!("{} -> {}.id", reference.field, reference.entity)
            },
            StepKind::Records { resolves: None } => "-".to_string(),
        };
        let guards = if step.guards.is_empty() {
            "-".to_string()
        } else {
            step.guards
                .iter()
                .map(|g| format!("{} -> {}", g.column, g.parent))
                .collect::<Vec<_>>()
                .join(", ")
        };

        table.add_row(vec![
            (position + 1).to_string(),
            step.entity.to_string(),
            step.source.file_name().to_string(),
            natural_key,
            guards,
        ]);
    }
    println!("{}", table);
}

use std::path::{Path, PathBuf};

use atomline_restore::RestoreOptions;
use atomline_store::MemoryStore;
use atomline_tools::TimelineInspector;
use atomline_travel::{TimeTravel, TimeTravelConfig};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "atomline-cli", about = "CLI tool for atomline time-travel debugging")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// YAML config file; defaults are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version info
    Info,
    /// Capture a run of edits, then undo and redo through them
    Demo {
        /// Number of edits to capture
        #[arg(short, long, default_value = "10")]
        steps: i64,
        /// How many steps to undo afterwards
        #[arg(short, long, default_value = "3")]
        undo: usize,
    },
    /// Demonstrate transactional restore and checkpoint rollback
    Rollback {
        /// Value written after the first capture
        #[arg(short, long, default_value = "5")]
        value: i64,
    },
    /// Print the effective configuration as YAML
    Config,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<TimeTravelConfig> {
    Ok(match path {
        Some(path) => TimeTravelConfig::from_yaml_file(path)?,
        None => TimeTravelConfig::default(),
    })
}

fn value_of(store: &MemoryStore, name: &str) -> String {
    store
        .value(name)
        .map_or_else(|| "null".to_string(), |v| v.to_string())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Info => {
            println!("atomline-cli v{}", env!("CARGO_PKG_VERSION"));
            println!(
                "max_history={} deltas={} full_snapshot_interval={}",
                config.max_history, config.delta.enabled, config.delta.full_snapshot_interval
            );
        }
        Commands::Demo { steps, undo } => {
            let mut store = MemoryStore::new();
            store.atom("counter", json!(0));
            store.atom("label", json!("start"));
            let mut tt = TimeTravel::new(store, config);

            tt.capture(Some("init"))?;
            for step in 1..=steps {
                tt.store_mut().set_by_name("counter", json!(step))?;
                if step % 3 == 0 {
                    tt.store_mut()
                        .set_by_name("label", json!(format!("step {step}")))?;
                }
                tt.capture(Some("edit"))?;
            }

            let mut undone = 0;
            while undone < undo && tt.undo()? {
                undone += 1;
            }
            println!("Undid {undone} step(s)");
            if tt.redo()? {
                println!("Redid 1 step");
            }
            println!(
                "Store: counter={} label={}",
                value_of(tt.store(), "counter"),
                value_of(tt.store(), "label")
            );

            for entry in TimelineInspector::list_entries(&tt) {
                println!("{entry}");
            }
            println!("{}", TimelineInspector::summary(&tt));
            println!(
                "{}",
                serde_json::to_string_pretty(&tt.get_delta_stats().chains)?
            );
            tt.dispose()?;
        }
        Commands::Rollback { value } => {
            let mut store = MemoryStore::new();
            store.atom("counter", json!(0));
            let mut tt = TimeTravel::new(store, config);

            let Some(first) = tt.capture(Some("initial"))? else {
                anyhow::bail!("initial capture was skipped");
            };
            tt.store_mut().set_by_name("counter", json!(value))?;
            println!("Before restore: counter={}", value_of(tt.store(), "counter"));

            let result = tt.restore_with_transaction(first, RestoreOptions::default())?;
            println!(
                "Restore: success={} restored={} rollback_performed={}",
                result.success, result.restored_count, result.rollback_performed
            );
            println!("After restore: counter={}", value_of(tt.store(), "counter"));

            let Some(checkpoint) = result.checkpoint_id else {
                anyhow::bail!("restore produced no checkpoint");
            };
            let rollback = tt.rollback_to_checkpoint(checkpoint)?;
            println!(
                "Rollback: success={} rolled_back={} failed={}",
                rollback.success, rollback.rolled_back_count, rollback.failed_count
            );
            println!("After rollback: counter={}", value_of(tt.store(), "counter"));
            tt.dispose()?;
        }
        Commands::Config => {
            print!("{}", config.to_yaml()?);
        }
    }

    Ok(())
}

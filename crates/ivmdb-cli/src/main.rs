//! ivmdb Command-Line Runner
//!
//! Replays JSON scenarios through a live query and prints the result after
//! every transaction, or shows how the optimizer rewrites a query.

mod error;
mod formatter;
mod scenario;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use formatter::OutputFormat;
use ivmdb_core::{EngineConfig, Optimizer, OptimizerConfig};
use ivmdb_proto::QueryIr;
use tracing_subscriber::EnvFilter;

use crate::error::{CliError, Result};
use crate::scenario::Scenario;

/// ivmdb Command-Line Runner
#[derive(Parser, Debug)]
#[command(name = "ivmdb")]
#[command(version, about = "Incremental view-maintenance scenario runner")]
pub struct Args {
    /// Output format
    #[arg(long, global = true, default_value = "text", value_enum)]
    pub format: OutputFormat,

    /// Disable predicate pushdown
    #[arg(long, global = true)]
    pub no_optimize: bool,

    /// Maximum optimizer passes per query level
    #[arg(long, global = true, default_value_t = 10)]
    pub max_iterations: usize,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replay a scenario file and print results after each transaction
    Run {
        /// Scenario JSON file
        scenario: PathBuf,
    },
    /// Print the optimized IR and the filters pushed to each collection
    Optimize {
        /// Query IR JSON file
        query: PathBuf,
    },
}

impl Args {
    fn optimizer_config(&self) -> OptimizerConfig {
        if self.no_optimize {
            OptimizerConfig::disabled()
        } else {
            OptimizerConfig::default().max_iterations(self.max_iterations)
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ivmdb_cli=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    if let Err(e) = run(&args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let formatter = formatter::create_formatter(args.format);
    match &args.command {
        Command::Run { scenario } => {
            let scenario = Scenario::load(scenario)?;
            let config = EngineConfig::new().with_optimizer(args.optimizer_config());
            for step in scenario.run(config)? {
                println!("{}", formatter.format_step(&step)?);
            }
        }
        Command::Optimize { query } => {
            let query = load_query(query)?;
            let result = Optimizer::new(args.optimizer_config()).optimize(&query);
            println!(
                "{}",
                formatter.format_optimized(&result.optimized_query, &result.source_where_clauses)?
            );
        }
    }
    Ok(())
}

fn load_query(path: &Path) -> Result<QueryIr> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| CliError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

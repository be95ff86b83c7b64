use ruc_registry::ingestion::{BuildOrchestrator, BulkLoader, LineSanitizer};
use ruc_registry::lookup::{self, LookupEngine, ResolveStats};
use ruc_registry::progress::{Phase, Progress};
use ruc_registry::store::RegistryStore;
use ruc_registry::{normalize, RegistryConfig};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ruc-registry")]
#[command(about = "Taxpayer registry builder and bulk identifier lookup")]
#[command(version)]
struct Args {
    /// JSON configuration file (defaults, then this file, then RUC_REGISTRY_* variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Repair a raw extract into a clean UTF-8 file
    Sanitize {
        /// Raw extract
        #[arg(short, long)]
        source: PathBuf,

        /// Clean output file
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Load a clean file into a new store
    Load {
        /// Clean file produced by `sanitize`
        #[arg(long)]
        clean: PathBuf,

        /// Store to create or replace
        #[arg(long)]
        store: PathBuf,
    },
    /// Sanitize and load in one step
    Build {
        /// Raw extract
        #[arg(short, long)]
        source: PathBuf,

        /// Store to create or replace
        #[arg(long)]
        store: PathBuf,
    },
    /// Resolve the identifiers of a CSV or JSON table
    Resolve {
        #[arg(long)]
        store: PathBuf,

        /// CSV or JSON table with a `Documento` column
        #[arg(short, long)]
        input: PathBuf,

        /// Results file (default: <input>_PROCESADO.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print the canonical form of identifiers
    Normalize {
        values: Vec<String>,
    },
    /// Show what a store holds
    Info {
        #[arg(long)]
        store: PathBuf,
    },
}

fn load_config(path: Option<&PathBuf>) -> Result<RegistryConfig> {
    let mut config = match path {
        Some(path) => RegistryConfig::from_json_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => RegistryConfig::default(),
    };
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

/// Log progress at every tenth of a phase
fn log_progress() -> impl FnMut(Progress) {
    let mut last: Option<(Phase, u32)> = None;
    move |p: Progress| {
        let step = (p.fraction * 10.0).floor() as u32;
        if last != Some((p.phase, step)) {
            last = Some((p.phase, step));
            info!("{:?}: {:.0}%", p.phase, p.fraction * 100.0);
        }
    }
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    match args.command {
        Commands::Sanitize { source, output } => {
            let sanitizer = LineSanitizer::from_config(&config)?;
            let input = File::open(&source).with_context(|| format!("opening {}", source.display()))?;
            let total = input.metadata().ok().map(|m| m.len());
            let out = File::create(&output).with_context(|| format!("creating {}", output.display()))?;
            let report = sanitizer.sanitize_with_progress(
                BufReader::new(input),
                BufWriter::new(out),
                total,
                &mut log_progress(),
            )?;
            info!(
                "{} lines read, {} written, {} dropped",
                report.lines_read,
                report.lines_written,
                report.dropped_lines.len()
            );
        }
        Commands::Load { clean, store } => {
            let summary = BulkLoader::from_config(&config)?.load_file(&clean, &store, &mut log_progress())?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Build { source, store } => {
            let report = BuildOrchestrator::new(config)?.build(&source, &store, &mut log_progress())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Resolve { store, input, output } => {
            let store = RegistryStore::open(&store, &config.table_name, &config.identifier_column)?;
            let values = lookup::read_identifier_column(&input, &config.input_column)?;
            let results = LookupEngine::from_config(&store, &config)?.resolve(&values, &mut log_progress())?;

            let output = output.unwrap_or_else(|| lookup::default_output_path(&input));
            lookup::write_results(&output, &results)?;

            let stats = ResolveStats::from_results(&results);
            println!(
                "{} found, {} not found, {} invalid -> {}",
                stats.found,
                stats.not_found,
                stats.invalid,
                output.display()
            );
        }
        Commands::Normalize { values } => {
            for value in values {
                match normalize(value.as_str()) {
                    Some(id) => match id.repaired_from() {
                        Some(written) => println!("{}\t{}\t(check digit repaired from {})", value, id, written),
                        None => println!("{}\t{}", value, id),
                    },
                    None => println!("{}\tINVALID", value),
                }
            }
        }
        Commands::Info { store } => {
            let store = RegistryStore::open(&store, &config.table_name, &config.identifier_column)?;
            println!("Store: {}", store.path().display());
            println!("Schema: {:?}", store.schema());
            println!("Rows: {}", store.row_count()?);
            match store.metadata()? {
                Some(meta) => println!("{}", serde_json::to_string_pretty(&meta)?),
                None => warn!("Store carries no build metadata"),
            }
        }
    }

    Ok(())
}

//! Generate benchmark identifier lists from a built store

use ruc_registry::dataset;
use ruc_registry::store::RegistryStore;
use ruc_registry::RegistryConfig;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dataset_generator")]
#[command(about = "Sample identifiers from a registry store into normal and stress datasets")]
struct Args {
    /// Registry store
    #[arg(long)]
    store: PathBuf,

    /// Identifiers to sample
    #[arg(short = 'n', long, default_value_t = 1000)]
    count: usize,

    /// Share of stress samples to corrupt
    #[arg(long, default_value_t = 0.15)]
    ratio: f64,

    /// Output directory
    #[arg(long, default_value = ".tests_files")]
    out_dir: PathBuf,

    /// Seed for a reproducible dataset
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = RegistryConfig::from_env()?;
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let store = RegistryStore::open(&args.store, &config.table_name, &config.identifier_column)?;
    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("creating {}", args.out_dir.display()))?;

    let started = Instant::now();
    let normal = dataset::normal_dataset(&store, args.count, &mut rng)?;
    dataset::write_dataset_csv(&dataset::normal_dataset_path(&args.out_dir, args.count), &normal)?;
    info!("Normal dataset generated in {:.2}s", started.elapsed().as_secs_f64());

    let started = Instant::now();
    let stress = dataset::stress_dataset(normal, args.ratio, &mut rng)?;
    dataset::write_dataset_csv(&dataset::stress_dataset_path(&args.out_dir, args.count), &stress)?;
    info!("Stress dataset generated in {:.2}s", started.elapsed().as_secs_f64());

    Ok(())
}

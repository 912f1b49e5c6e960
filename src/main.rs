//! Spendcube batch runner
//!
//! Loads the fact rows of a dataset from a JSON-lines file, rebuilds every
//! cube of the dataset and prints one drilldown query as JSON.

use anyhow::Context;
use clap::Parser;
use spendcube::config::{generate_default_config, Config, LoggingConfig};
use spendcube::cube::{CubeBuilder, CubeQuery, CubeQueryEngine, CubeSelector, OrderKey};
use spendcube::storage::{
    Dataset, DatasetRepository, JsonDatasetRepository, JsonLinesFactSource, Scalar, StorageError,
    TimeAxis,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "spendcube")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Pre-aggregated spending cubes over transaction records")]
struct Cli {
    /// Fact file, one JSON document per line
    facts: Option<PathBuf>,

    /// Config file (default: standard locations, then environment)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Dataset the facts belong to
    #[arg(short, long, default_value = "default")]
    dataset: String,

    /// Declared dimension key of the dataset (repeatable)
    #[arg(long = "dimension")]
    dimensions: Vec<String>,

    /// Time axis granularity: year, month or day
    #[arg(long)]
    time_axis: Option<TimeAxis>,

    /// Dimension to break the result out by (repeatable)
    #[arg(long = "drilldown")]
    drilldowns: Vec<String>,

    /// Cut as path=value (repeatable)
    #[arg(long = "cut")]
    cuts: Vec<String>,

    /// Sort key as path or path:desc (repeatable, first dominates)
    #[arg(long = "order")]
    order: Vec<String>,

    #[arg(long, default_value = "1")]
    page: usize,

    #[arg(long)]
    pagesize: Option<usize>,

    /// Print a default config file and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.print_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let config = match &cli.config {
        Some(path) => Config::load_with_env(path)?,
        None => Config::load_default(),
    };
    init_tracing(&config.logging)?;

    tracing::info!("Spendcube v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Data directory: {:?}", config.storage.data_dir);

    let facts = cli
        .facts
        .clone()
        .context("a fact file is required (see --help)")?;

    let repo = Arc::new(JsonDatasetRepository::open(config.storage.registry_path())?);
    let mut dataset = match repo.load(&cli.dataset).await {
        Ok(dataset) => dataset,
        Err(StorageError::DatasetNotFound(_)) => {
            tracing::info!("Registering new dataset '{}'", cli.dataset);
            Dataset::new(&cli.dataset)
        }
        Err(e) => return Err(e.into()),
    };
    for dimension in &cli.dimensions {
        if !dataset.dimensions.contains(dimension) {
            dataset.dimensions.push(dimension.clone());
        }
    }
    if let Some(axis) = cli.time_axis {
        dataset.time_axis = axis;
    }

    let store = config.storage.open_store()?;
    let builder = CubeBuilder::new(
        store.clone(),
        Arc::new(JsonLinesFactSource::new(&facts)),
        repo.clone(),
    );

    for stats in builder.update_all_cubes(&mut dataset).await? {
        tracing::info!("{}", stats);
    }

    let engine = Arc::new(CubeQueryEngine::new(store, config.cube.clone()));
    let selector = CubeSelector::new(engine);
    let query = build_query(&cli)?;
    let result = selector.aggregate(&dataset, &query).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

fn build_query(cli: &Cli) -> anyhow::Result<CubeQuery> {
    let mut cuts = Vec::with_capacity(cli.cuts.len());
    for cut in &cli.cuts {
        let (path, value) = cut
            .split_once('=')
            .with_context(|| format!("cut must be path=value, got {:?}", cut))?;
        cuts.push((path.to_string(), parse_scalar(value)));
    }

    let order = cli
        .order
        .iter()
        .map(|key| match key.rsplit_once(':') {
            Some((path, "desc")) => OrderKey::desc(path),
            Some((path, "asc")) => OrderKey::asc(path),
            _ => OrderKey::asc(key.as_str()),
        })
        .collect();

    Ok(CubeQuery {
        drilldowns: cli.drilldowns.clone(),
        cuts,
        page: cli.page,
        pagesize: cli.pagesize,
        order,
    })
}

/// Integers and floats as numbers, everything else as text
fn parse_scalar(value: &str) -> Scalar {
    if let Ok(i) = value.parse::<i64>() {
        Scalar::Int(i)
    } else if let Ok(f) = value.parse::<f64>() {
        Scalar::Float(f)
    } else {
        Scalar::Text(value.to_string())
    }
}

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("spendcube={}", logging.level)));
    let registry = tracing_subscriber::registry().with(filter);
    let json = logging.format == "json";

    match &logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {}", path))?;
            let writer = Mutex::new(file);
            if json {
                registry.with(fmt::layer().json().with_writer(writer)).init();
            } else {
                registry
                    .with(fmt::layer().with_ansi(false).with_writer(writer))
                    .init();
            }
        }
        None if json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        None => registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init(),
    }
    Ok(())
}

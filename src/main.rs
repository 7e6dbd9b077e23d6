use anyhow::Context;
use clap::{Parser, Subcommand};
use fuzzrec_core::get_background_system;
use fuzzrec_engine::{run_task, Matcher, MatcherConfig, ProcessLauncher, TaskDescriptor};
use fuzzrec_storage::{DocumentStore, LmdbStore, StoreConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Fuzzy record matcher
#[derive(Parser, Debug)]
#[command(name = "fuzzrec")]
#[command(about = "Match noisy records against a reference universe", long_about = None)]
struct Args {
    /// Path to the data directory
    #[arg(short, long, default_value = "./data", global = true)]
    data_dir: PathBuf,

    /// Log level
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest a universe file
    Ingest {
        #[arg(short, long)]
        config: PathBuf,
        /// Defaults to the configured universe file
        universe: Option<PathBuf>,
    },
    /// Ingest the configured universe and build every missing shard
    Build {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Match a single record given as COLUMN=VALUE pairs
    Match {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(required = true, value_parser = parse_pair)]
        fields: Vec<(String, String)>,
    },
    /// Match every record of a target file into a tab-separated output file
    MatchFile {
        #[arg(short, long)]
        config: PathBuf,
        target: PathBuf,
        output: PathBuf,
    },
    /// Drop everything stored for a matcher
    Purge {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Run one serialized task (spawned by the worker pool)
    #[command(hide = true)]
    Worker {
        #[arg(long)]
        task: String,
    },
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected COLUMN=VALUE, got {:?}", s))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let store_config = StoreConfig::with_data_dir(&args.data_dir);
    let store: Arc<dyn DocumentStore> =
        Arc::new(LmdbStore::open(&store_config).context("opening the document store")?);
    let blob_root = store_config.blob_dir();

    if let Command::Worker { task } = &args.command {
        let task = TaskDescriptor::from_json(task)?;
        let label = task.label();
        let store = store.clone();
        let count = tokio::task::spawn_blocking(move || run_task(&task, store, &blob_root)).await??;
        info!("worker {} done ({})", label, count);
        drain_background();
        return Ok(());
    }

    info!("Starting fuzzrec v{}", env!("CARGO_PKG_VERSION"));
    info!("Data directory: {:?}", args.data_dir);

    let open = |path: &PathBuf| -> anyhow::Result<Matcher> {
        let config = MatcherConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?;
        let launcher = Arc::new(ProcessLauncher::current(&args.data_dir, &args.log_level)?);
        Ok(Matcher::open(config, store.clone(), blob_root.clone(), launcher)?)
    };

    match &args.command {
        Command::Ingest { config, universe } => {
            let matcher = open(config)?;
            let path = universe
                .clone()
                .or_else(|| matcher.config().universe_file.clone())
                .context("no universe file given or configured")?;
            match matcher.ingest(&path)? {
                Some(inserted) => info!("{} new universe records", inserted),
                None => info!("{} was already ingested", path.display()),
            }
        }
        Command::Build { config } => {
            let matcher = open(config)?;
            let report = matcher.prepare().await?;
            info!(
                "{} shards planned over {:?}: {} built, {} already present",
                report.plan.filters.len(),
                report.plan.fields,
                report.build.launched,
                report.build.skipped
            );
        }
        Command::Match { config, fields } => {
            let matcher = open(config)?;
            let result = matcher.match_record(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())));
            match result {
                Ok(result) => {
                    let out = serde_json::json!({
                        "query": result.query.to_document()?,
                        "match": result.matched.to_document()?,
                        "score": result.score,
                    });
                    println!("{}", serde_json::to_string_pretty(&out)?);
                }
                Err(e) if e.is_unmatched() => println!("no match: {}", e),
                Err(e) => return Err(e.into()),
            }
        }
        Command::MatchFile { config, target, output } => {
            let matcher = open(config)?;
            let report = matcher.match_file(target, output).await?;
            info!("{} of {} records matched", report.matched, report.queued);
        }
        Command::Purge { config } => {
            let matcher = open(config)?;
            matcher.purge()?;
        }
        Command::Worker { .. } => {}
    }

    drain_background();
    Ok(())
}

/// Let queued count persistence and index builds finish before exiting.
fn drain_background() {
    let system = get_background_system();
    if !system.wait_idle(Duration::from_secs(600)) {
        warn!("exiting with background jobs still pending");
    }
    system.shutdown();
}


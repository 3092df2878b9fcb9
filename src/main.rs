use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use log::info;

use street_extract::cache::CacheStore;
use street_extract::config::{ExtractConfig, DEFAULT_DISTANCE_THRESHOLD_KM};
use street_extract::pipeline::{default_output_path, find_default_pbf, run, run_batch, run_cached};
use street_extract::{Error, Result};

#[derive(Parser, Debug)]
#[command(version, about = "Extract one row per street from OpenStreetMap extracts")]
struct Cli {
    /// More output per occurrence (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors.
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Extract the street table of one region.
    Extract(ExtractArgs),
    /// Extract every `<region>-latest.osm.pbf` in a directory.
    Batch(BatchArgs),
    /// Inspect or empty the result cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Args, Debug)]
struct GroupingArgs {
    /// Merge same-named fragments whose centroids are this close (km).
    #[arg(long, default_value_t = DEFAULT_DISTANCE_THRESHOLD_KM)]
    threshold_km: f64,

    /// Accepted `highway` value; repeat to replace the default set.
    #[arg(long = "road-class", value_name = "CLASS")]
    road_classes: Vec<String>,

    /// Worker threads for grouping; defaults to one per CPU.
    #[arg(long)]
    workers: Option<usize>,
}

impl GroupingArgs {
    fn to_config(&self) -> ExtractConfig {
        let mut config = ExtractConfig::default().with_threshold(self.threshold_km);
        if !self.road_classes.is_empty() {
            config = config.with_road_classes(self.road_classes.iter().cloned());
        }
        config.workers = self.workers;
        config
    }
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Region label written to every row.
    region: String,

    /// `.osm.pbf` or `.osm` file; defaults to the only `.pbf` in the
    /// current directory.
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Parquet unless the name ends in `.csv`. Defaults to
    /// `streetdfs/<region>_streets.parquet`.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Reuse tables cached in this directory.
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    #[command(flatten)]
    grouping: GroupingArgs,
}

#[derive(Args, Debug)]
struct BatchArgs {
    /// Directory holding `<region>-latest.osm.pbf` files.
    input_dir: PathBuf,

    #[arg(short, long, default_value = "streetdfs")]
    output_dir: PathBuf,

    #[command(flatten)]
    grouping: GroupingArgs,
}

#[derive(Subcommand, Debug)]
enum CacheAction {
    /// Show cached entries.
    List {
        #[arg(long, default_value = ".cache")]
        cache_dir: PathBuf,
    },
    /// Delete cached entries.
    Clear {
        #[arg(long, default_value = ".cache")]
        cache_dir: PathBuf,
        /// Only entries of this computation.
        #[arg(long)]
        name: Option<String>,
    },
}

fn init_logging(cli: &Cli) {
    let level = match (cli.quiet, cli.verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_target(false)
        .format_module_path(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run_cli(cli) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run_cli(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Extract(args) => {
            let config = args.grouping.to_config();
            config.validate()?;
            let input = match args.input {
                Some(input) => input,
                None => {
                    let cwd = std::env::current_dir().map_err(|err| Error::io(Path::new("."), err))?;
                    find_default_pbf(&cwd)?
                }
            };
            let output = args
                .output
                .unwrap_or_else(|| default_output_path(&args.region));

            match args.cache_dir {
                Some(cache_dir) => {
                    let store = CacheStore::new(cache_dir)?;
                    run_cached(&store, &args.region, &input, &config, &output)?;
                }
                None => {
                    run(&args.region, &input, &config, &output)?;
                }
            }
            println!("{}", output.display());
            Ok(ExitCode::SUCCESS)
        }
        Command::Batch(args) => {
            let config = args.grouping.to_config();
            let batch = run_batch(&args.input_dir, &args.output_dir, &config)?;
            for (region, summary) in &batch.succeeded {
                println!("{region}\t{} streets", summary.rows);
            }
            if batch.failed.is_empty() {
                return Ok(ExitCode::SUCCESS);
            }
            for (region, message) in &batch.failed {
                eprintln!("{region}\tfailed: {message}");
            }
            Ok(ExitCode::FAILURE)
        }
        Command::Cache { action } => match action {
            CacheAction::List { cache_dir } => {
                let store = CacheStore::new(cache_dir)?;
                let entries = store.list()?;
                for entry in &entries {
                    println!("{}\t{}\t{}", entry.name, entry.key, entry.params);
                }
                info!("{} cached entries in {}", entries.len(), store.dir().display());
                Ok(ExitCode::SUCCESS)
            }
            CacheAction::Clear { cache_dir, name } => {
                let store = CacheStore::new(cache_dir)?;
                store.clear(name.as_deref())?;
                Ok(ExitCode::SUCCESS)
            }
        },
    }
}

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand, ValueEnum};
use dotenv::dotenv;
use serde::Serialize;
use serde::de::DeserializeOwned;

use market_store::config::{BackendKind, StoreConfig};
use market_store::service::{self, ErrorClass, KlineParams, MarketStore, ServiceError};

// Command-line argument parser.
#[derive(Parser, Debug)]
#[command(about, long_about = None)]
struct Args {
    /// Storage backend, overrides `store_backend`.
    #[arg(long, global = true, value_enum)]
    backend: Option<BackendKind>,
    /// Root directory of the file backend, overrides `data_dir`.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// SQLite database file, overrides `sqlite_file`.
    #[arg(long, global = true)]
    sqlite_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum KlineFormat {
    #[default]
    Json,
    Csv,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum DepthFormat {
    #[default]
    Json,
    Npy,
}

// Subcommands for the application.
#[derive(Subcommand, Debug)]
enum Commands {
    // Merge klines from a file holding a JSON array of records.
    UpsertKlines {
        records_file_path: PathBuf,
    },
    // Query one (symbol, timeframe) dataset.
    QueryKlines {
        #[arg(long)]
        symbol: String,
        #[arg(long)]
        timeframe: String,
        #[arg(long)]
        start_date: Option<i64>,
        #[arg(long)]
        end_date: Option<i64>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        limit_first: Option<usize>,
        #[arg(long, value_enum, default_value_t)]
        format: KlineFormat,
    },
    // List symbols with stored klines, or with depth history when --depth is set.
    Symbols {
        #[arg(long)]
        timeframe: Option<String>,
        #[arg(long, conflicts_with = "timeframe")]
        depth: bool,
    },
    // Append one order book snapshot from a JSON file of [price, volume] rows.
    AppendDepth {
        #[arg(long)]
        symbol: String,
        /// Capture time in ms, defaults to now.
        #[arg(long)]
        time: Option<i64>,
        rows_file_path: PathBuf,
    },
    // Print or export the depth history of a symbol.
    ReadDepth {
        #[arg(long)]
        symbol: String,
        #[arg(long, value_enum, default_value_t)]
        format: DepthFormat,
        /// Destination of the .npy payload.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    // Remove every kline and depth dataset.
    Wipe {
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> ExitCode {
    dotenv().ok();

    env_logger::init();

    let args = Args::parse();

    let mut config = match StoreConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            log::error!("Error reading configuration: {}", err);
            return ExitCode::from(2);
        }
    };
    if let Some(backend) = args.backend {
        config.backend = backend;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if args.sqlite_file.is_some() {
        config.sqlite_file = args.sqlite_file;
    }

    let backend = match config.open_backend() {
        Ok(backend) => backend,
        Err(err) => {
            log::error!("Error opening storage backend: {}", err);
            return ExitCode::FAILURE;
        }
    };
    let store = MarketStore::open(backend);

    match run(&store, args.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", err);
            eprintln!("error: {}", err);
            match err.class() {
                ErrorClass::Client => ExitCode::from(2),
                ErrorClass::NotFound => ExitCode::from(3),
                ErrorClass::Server => ExitCode::FAILURE,
            }
        }
    }
}

fn run(store: &MarketStore, command: Commands) -> Result<(), ServiceError> {
    match command {
        Commands::UpsertKlines { records_file_path } => {
            let records: Vec<serde_json::Value> = read_json(&records_file_path)?;
            let count = store.upsert_klines(&records)?;
            print_json(&serde_json::json!({ "added_klines": count }))
        }

        Commands::QueryKlines {
            symbol,
            timeframe,
            start_date,
            end_date,
            limit,
            limit_first,
            format,
        } => {
            let params = KlineParams {
                symbol,
                timeframe,
                start_date,
                end_date,
                limit,
                limit_first,
            };
            let candles = store.query_klines(&params)?;
            match format {
                KlineFormat::Json => print_json(&service::klines_to_json(&candles)),
                KlineFormat::Csv => {
                    io::stdout().write_all(&service::klines_to_csv(&candles)?)?;
                    Ok(())
                }
            }
        }

        Commands::Symbols { timeframe, depth } => {
            let symbols = if depth {
                store.list_depth_symbols()?
            } else {
                store.list_symbols(timeframe.as_deref())?
            };
            print_json(&symbols)
        }

        Commands::AppendDepth {
            symbol,
            time,
            rows_file_path,
        } => {
            let rows: Vec<Vec<f64>> = read_json(&rows_file_path)?;
            let time = time.unwrap_or_else(|| chrono::Utc::now().timestamp_millis());
            store.append_depth(&symbol, time, rows)?;
            log::info!("Appended depth snapshot for {} at {}", symbol, time);
            Ok(())
        }

        Commands::ReadDepth {
            symbol,
            format,
            output,
        } => {
            let snapshots = store.read_depth(&symbol)?;
            match format {
                DepthFormat::Json => print_json(&snapshots),
                DepthFormat::Npy => {
                    let output = output.ok_or_else(|| {
                        ServiceError::Input("--output is required for npy export".into())
                    })?;
                    fs::write(&output, service::depth_to_npy(&snapshots)?)?;
                    log::info!("Wrote {} snapshots to {}", snapshots.len(), output.display());
                    print_json(&service::depth_times(&snapshots))
                }
            }
        }

        Commands::Wipe { yes } => {
            if !yes {
                return Err(ServiceError::Contract(
                    "wipe removes every dataset, pass --yes to confirm".into(),
                ));
            }
            store.wipe_all()
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ServiceError> {
    let bytes = fs::read(path)
        .map_err(|e| ServiceError::Input(format!("could not read {}: {}", path.display(), e)))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| ServiceError::Input(format!("{} is not valid JSON: {}", path.display(), e)))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), ServiceError> {
    let text = serde_json::to_string_pretty(value).map_err(io::Error::from)?;
    println!("{}", text);
    Ok(())
}

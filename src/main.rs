use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tweetload::{apply_schema, init_tracing, table_counts, DecodeErrorPolicy, Ingestor, RunSummary, SqliteSink};

#[derive(Parser)]
#[command(name = "tweetload", version)]
#[command(about = "Load line-delimited tweet dumps into SQLite or CSV tables", long_about = None)]
struct Cli {
    /// Plain-text copy of the log, truncated at start
    #[arg(long, env = "LOG_FILE", default_value = "log.txt", global = true)]
    log_file: PathBuf,

    /// Do not write a log file
    #[arg(long, global = true)]
    no_log_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest every input file into the SQLite database
    Load {
        #[command(flatten)]
        ingest: IngestArgs,
        #[command(flatten)]
        db: DbArgs,
        /// Drop and recreate all tables before loading
        #[arg(long)]
        reset: bool,
    },
    /// Ingest every input file into one CSV per table
    Export {
        #[command(flatten)]
        ingest: IngestArgs,
        #[arg(long, env = "OUTPUT_DIR", default_value = "output")]
        output_dir: PathBuf,
    },
    /// Run the pipeline without writing and print distinct rows per table
    Count {
        #[command(flatten)]
        ingest: IngestArgs,
    },
    /// Create the database schema, optionally dropping existing tables
    Schema {
        #[command(flatten)]
        db: DbArgs,
        #[arg(long)]
        reset: bool,
    },
}

#[derive(Args)]
struct IngestArgs {
    #[arg(long, env = "INPUT_DIR", default_value = "data")]
    input_dir: PathBuf,
    /// Regex matched against file names directly under the input directory
    #[arg(long, env = "FILE_PATTERN", default_value = tweetload::DEFAULT_FILE_PATTERN)]
    file_pattern: String,
    /// Accepted lines between flushes
    #[arg(long, env = "BATCH_SIZE", default_value_t = 100)]
    batch_size: usize,
    /// Attempts per table write before leaving rows for the next flush
    #[arg(long, env = "RETRY_LIMIT", default_value_t = 3)]
    retry_limit: u32,
    #[arg(long, env = "BACKOFF_MS", default_value_t = 1000)]
    backoff_ms: u64,
    /// Flush rounds allowed at end of file
    #[arg(long, env = "DRAIN_ATTEMPTS", default_value_t = 30)]
    drain_attempts: u32,
    #[arg(long, env = "WORKER_COUNT", default_value_t = 16)]
    worker_count: usize,
    /// abort | skip
    #[arg(long, env = "ON_DECODE_ERROR", default_value = "abort")]
    on_decode_error: DecodeErrorPolicy,
    /// Stop each file after this many accepted lines
    #[arg(long, env = "MAX_LINES")]
    max_lines: Option<u64>,
    /// Where rows that could not be drained are written
    #[arg(long, env = "DEAD_LETTER_DIR")]
    dead_letter_dir: Option<PathBuf>,
    #[arg(long)]
    no_progress: bool,
}

impl IngestArgs {
    fn ingestor(&self) -> Ingestor {
        let mut ing = Ingestor::new()
            .input_dir(&self.input_dir)
            .file_pattern(self.file_pattern.clone())
            .batch_size(self.batch_size)
            .retry_limit(self.retry_limit)
            .backoff(Duration::from_millis(self.backoff_ms))
            .drain_attempts(self.drain_attempts)
            .worker_count(self.worker_count)
            .decode_error_policy(self.on_decode_error)
            .max_lines(self.max_lines)
            .progress(!self.no_progress);
        if let Some(dir) = &self.dead_letter_dir {
            ing = ing.dead_letter_dir(dir);
        }
        ing
    }
}

#[derive(Args)]
struct DbArgs {
    #[arg(long, env = "DB_PATH", default_value = "tweets.db")]
    db_path: PathBuf,
    #[arg(long, env = "DB_BUSY_TIMEOUT_MS", default_value_t = 5000)]
    busy_timeout_ms: u64,
}

impl DbArgs {
    fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

fn finish(summary: &RunSummary) -> ExitCode {
    summary.log();
    if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Load { ingest, db, reset } => {
            let summary = ingest.ingestor().progress_label("Loading").run_sqlite(&db.db_path, db.busy_timeout(), reset)?;
            let check = SqliteSink::open(&db.db_path, db.busy_timeout())?;
            for (table, rows) in table_counts(check.connection())? {
                tracing::info!(table, rows, "table size");
            }
            Ok(finish(&summary))
        }
        Command::Export { ingest, output_dir } => {
            let summary = ingest.ingestor().progress_label("Exporting").run_csv(&output_dir)?;
            Ok(finish(&summary))
        }
        Command::Count { ingest } => {
            let (summary, stats) = ingest.ingestor().progress_label("Counting").count()?;
            for (table, rows) in stats.counts() {
                println!("{table:<14} {rows}");
            }
            Ok(finish(&summary))
        }
        Command::Schema { db, reset } => {
            let sink = SqliteSink::open(&db.db_path, db.busy_timeout())?;
            apply_schema(sink.connection(), reset)?;
            tracing::info!(db = %db.db_path.display(), reset, "schema ready");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let log_file = (!cli.no_log_file).then(|| cli.log_file.clone());
    if let Err(e) = init_tracing(log_file.as_deref()) {
        eprintln!("{e:#}");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            let msg = format!("{e:#}");
            tracing::error!(error = %msg, "run failed");
            ExitCode::FAILURE
        }
    }
}

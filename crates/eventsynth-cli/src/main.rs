//! eventsynth CLI
//!
//! - `generate`: synthesize a corpus with injected anomaly bursts, save and/or upload it
//! - `load`: upload an existing corpus file (batched, resumable)
//! - `setup` / `health`: prepare and check the ClickHouse events table
//! - `query` / `tool-sql`: run SQL as a table or through the agent SQL tool
//! - `stats`: summarize a corpus file
//! - `serve`: HTTP ingestion and query API

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing_subscriber::EnvFilter;

use eventsynth_gen::assemble::{DEFAULT_ANOMALY_RATIO, DEFAULT_LOOKBACK_DAYS, DEFAULT_POPULATION};
use eventsynth_gen::{assemble, AnomalyPattern, GenerateConfig, Population};
use eventsynth_model::corpus::{read_corpus, write_corpus};
use eventsynth_model::{CorpusFormat, CorpusStats, Event};
use eventsynth_store::writer::DEFAULT_BATCH_SIZE;
use eventsynth_store::{
    render_table, BatchWriter, Checkpoint, ClickHouseStore, EventStore, MemoryStore, QueryFacade,
    QueryParams, RetryPolicy, SqlTool, StoreConfig, StoreOverrides, WriterConfig,
};

mod server;

#[derive(Parser)]
#[command(name = "eventsynth")]
#[command(
    author,
    version,
    about = "Synthetic analytics events with injected anomaly patterns, loaded into ClickHouse"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a corpus: normal traffic plus anomaly bursts, sorted by time.
    Generate(GenerateArgs),

    /// Upload a corpus file (NDJSON or JSON array) in batches.
    Load {
        /// Corpus file to upload.
        file: PathBuf,
        #[command(flatten)]
        batch: BatchArgs,
        #[command(flatten)]
        conn: ConnectionArgs,
    },

    /// Create the events table (after an optional init SQL file) and show what exists.
    Setup {
        /// SQL file executed statement by statement (split on `;`) before the table is created.
        #[arg(long)]
        init_sql: Option<PathBuf>,
        #[command(flatten)]
        conn: ConnectionArgs,
    },

    /// Run SQL and print an aligned table.
    Query {
        /// SQL text (joined with spaces). Defaults to the first 5 rows of the events table.
        sql: Vec<String>,
        #[command(flatten)]
        conn: ConnectionArgs,
    },

    /// Run SQL through the agent tool (read-only, at most 20 rows shown).
    ToolSql {
        sql: Vec<String>,
        /// Print the tool name and description first.
        #[arg(long)]
        describe: bool,
        #[command(flatten)]
        conn: ConnectionArgs,
    },

    /// Check connectivity and print the server version.
    Health {
        #[command(flatten)]
        conn: ConnectionArgs,
    },

    /// Summarize a corpus file.
    Stats {
        file: PathBuf,
    },

    /// Serve the HTTP ingestion/query API.
    Serve {
        #[arg(long, default_value = "127.0.0.1:8000")]
        listen: SocketAddr,
        /// Keep events in process instead of ClickHouse.
        #[arg(long)]
        memory: bool,
        /// Write `{"addr": ..., "pid": ...}` here once listening.
        #[arg(long)]
        ready_file: Option<PathBuf>,
        /// Reject request bodies larger than this with 413.
        #[arg(long, default_value_t = server::DEFAULT_MAX_BODY_BYTES)]
        max_body_bytes: usize,
        #[command(flatten)]
        conn: ConnectionArgs,
    },
}

#[derive(Args)]
struct GenerateArgs {
    /// Target corpus size.
    #[arg(long, short = 'n', default_value_t = 100_000)]
    events: usize,
    /// Fraction of events that belong to anomaly bursts.
    #[arg(long, default_value_t = DEFAULT_ANOMALY_RATIO)]
    anomaly_ratio: f64,
    /// Number of distinct users (`user_1..=user_N`).
    #[arg(long, default_value_t = DEFAULT_POPULATION)]
    users: usize,
    /// Lookback window in days.
    #[arg(long, default_value_t = DEFAULT_LOOKBACK_DAYS)]
    days: i64,
    /// RNG seed; together with `--anchor` makes the run reproducible.
    #[arg(long)]
    seed: Option<u64>,
    /// End of the time window (RFC 3339). Defaults to now.
    #[arg(long)]
    anchor: Option<String>,
    /// Write the corpus here.
    #[arg(long, short = 'o')]
    out: Option<PathBuf>,
    /// `ndjson` or `json` (default: from the file extension).
    #[arg(long)]
    format: Option<String>,
    /// Upload the corpus to ClickHouse.
    #[arg(long)]
    upload: bool,
    #[command(flatten)]
    batch: BatchArgs,
    #[command(flatten)]
    conn: ConnectionArgs,
}

#[derive(Args, Clone, Default)]
struct ConnectionArgs {
    /// ClickHouse host (env: CLICKHOUSE_HOST).
    #[arg(long)]
    host: Option<String>,
    /// HTTP interface port (env: CLICKHOUSE_PORT, default 8123).
    #[arg(long)]
    port: Option<u16>,
    /// Use https (env: CLICKHOUSE_SECURE).
    #[arg(long)]
    secure: bool,
    /// env: CLICKHOUSE_USER
    #[arg(long)]
    user: Option<String>,
    /// env: CLICKHOUSE_PASSWORD
    #[arg(long)]
    password: Option<String>,
    /// env: CLICKHOUSE_DATABASE
    #[arg(long)]
    database: Option<String>,
    /// env: CLICKHOUSE_TABLE (default `events`)
    #[arg(long)]
    table: Option<String>,
    /// Request timeout in seconds; `0` disables it (env: CLICKHOUSE_TIMEOUT_SECS, default 30).
    #[arg(long)]
    timeout_secs: Option<u64>,
}

impl ConnectionArgs {
    fn overrides(&self) -> StoreOverrides {
        StoreOverrides {
            host: self.host.clone(),
            port: self.port,
            secure: self.secure.then_some(true),
            username: self.user.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
            table: self.table.clone(),
            timeout_secs: self.timeout_secs,
        }
    }

    fn connect(&self) -> Result<ClickHouseStore> {
        let config = StoreConfig::resolve(&self.overrides()).context("invalid ClickHouse settings")?;
        tracing::debug!(
            url = %config.base_url(),
            table = %config.qualified_table(),
            "connecting"
        );
        Ok(ClickHouseStore::new(config)?)
    }
}

#[derive(Args, Clone)]
struct BatchArgs {
    /// Rows per insert request.
    #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,
    /// Attempts per batch; transient failures (network, timeout, 5xx) are retried.
    #[arg(long, default_value_t = 1)]
    max_attempts: u32,
    /// Initial wait between attempts, doubled each retry.
    #[arg(long, default_value_t = 500)]
    backoff_ms: u64,
    /// Skip batches before this index.
    #[arg(long, conflicts_with = "resume_from_checkpoint")]
    resume_from: Option<usize>,
    /// Progress file rewritten after every committed batch.
    #[arg(long)]
    checkpoint: Option<PathBuf>,
    /// Resume after the last batch recorded in `--checkpoint`.
    #[arg(long, requires = "checkpoint")]
    resume_from_checkpoint: bool,
}

impl BatchArgs {
    fn writer_config(&self) -> Result<WriterConfig> {
        let mut config = WriterConfig::default()
            .with_batch_size(self.batch_size)
            .with_retry(RetryPolicy::exponential(
                self.max_attempts,
                Duration::from_millis(self.backoff_ms),
            ));
        if let Some(path) = &self.checkpoint {
            config = config.with_checkpoint(path);
        }

        let resume = if self.resume_from_checkpoint {
            let path = self
                .checkpoint
                .as_deref()
                .ok_or_else(|| anyhow!("--resume-from-checkpoint needs --checkpoint"))?;
            match Checkpoint::load(path)? {
                Some(checkpoint) => checkpoint.resume_index(self.batch_size)?,
                None => 0,
            }
        } else {
            self.resume_from.unwrap_or(0)
        };
        Ok(config.with_resume_from(resume))
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Generate(args) => cmd_generate(&args),
        Commands::Load { file, batch, conn } => cmd_load(&file, &batch, &conn),
        Commands::Setup { init_sql, conn } => cmd_setup(init_sql.as_deref(), &conn),
        Commands::Query { sql, conn } => cmd_query(&sql, &conn),
        Commands::ToolSql {
            sql,
            describe,
            conn,
        } => cmd_tool_sql(&sql, describe, &conn),
        Commands::Health { conn } => cmd_health(&conn),
        Commands::Stats { file } => cmd_stats(&file),
        Commands::Serve {
            listen,
            memory,
            ready_file,
            max_body_bytes,
            conn,
        } => cmd_serve(
            server::ServerConfig {
                listen,
                ready_file,
                max_body_bytes,
            },
            memory,
            &conn,
        ),
    }
}

fn cmd_generate(args: &GenerateArgs) -> Result<()> {
    let mut config = GenerateConfig::new(args.events, args.anomaly_ratio)
        .with_population(Population::new(args.users)?)
        .with_lookback(chrono::Duration::days(args.days));
    if let Some(anchor) = &args.anchor {
        let anchor = eventsynth_model::time::parse_timestamp(anchor)
            .with_context(|| format!("invalid --anchor `{anchor}`"))?;
        config = config.with_anchor(anchor);
    }

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    println!(
        "{} {} events ({:.1}% anomalies, {} users, {} days)",
        "Generating".green().bold(),
        args.events,
        args.anomaly_ratio * 100.0,
        args.users,
        args.days
    );
    let corpus = assemble(&mut rng, &config)?;
    println!(
        "  {} {} events, {} anomaly bursts ({} anomaly events)",
        "→".cyan(),
        corpus.len(),
        corpus.bursts().len(),
        corpus.anomaly_events()
    );

    if let Some(out) = &args.out {
        let format = match &args.format {
            Some(f) => CorpusFormat::parse(f)?,
            None => CorpusFormat::from_path(out),
        };
        if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        write_corpus(out, corpus.events(), format)
            .with_context(|| format!("failed to write {}", out.display()))?;
        println!("  {} {}", "→".cyan(), out.display());
    }

    if args.upload {
        let store = args.conn.connect()?;
        upload(&store, corpus.events(), &args.batch)?;
    } else if args.out.is_none() {
        println!(
            "  {} nothing saved (pass --out <file> and/or --upload)",
            "!".yellow()
        );
    }

    print_stats(&CorpusStats::from_events(corpus.events()));
    Ok(())
}

fn cmd_load(file: &Path, batch: &BatchArgs, conn: &ConnectionArgs) -> Result<()> {
    println!("{} {}", "Loading".green().bold(), file.display());
    let events = read_corpus(file).with_context(|| format!("failed to read {}", file.display()))?;
    println!("  {} {} events", "→".cyan(), events.len());
    let store = conn.connect()?;
    upload(&store, &events, batch)
}

fn upload(store: &dyn EventStore, events: &[Event], batch: &BatchArgs) -> Result<()> {
    let writer = BatchWriter::new(store, batch.writer_config()?);
    writer.ensure_schema()?;

    println!(
        "{} {} events to {} in batches of {}",
        "Uploading".green().bold(),
        events.len(),
        store.events_table(),
        writer.config().batch_size
    );
    match writer.write(events) {
        Ok(report) => {
            println!(
                "  {} {} rows in {} batches ({} skipped, {} retries)",
                "✓".green(),
                report.rows_written,
                report.batches_written,
                report.batches_skipped,
                report.retries
            );
            Ok(())
        }
        Err(e) => {
            if let Some(resume) = e.resume_from() {
                eprintln!(
                    "  {} rerun with `--resume-from {resume}` to upload only the missing batches",
                    "hint:".yellow()
                );
            }
            Err(e.into())
        }
    }
}

fn cmd_setup(init_sql: Option<&Path>, conn: &ConnectionArgs) -> Result<()> {
    let store = conn.connect()?;

    if let Some(path) = init_sql {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let statements: Vec<&str> = text
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        for (i, statement) in statements.iter().enumerate() {
            let preview: String = statement.chars().take(60).collect();
            println!(
                "  {} [{}/{}] {}",
                "→".cyan(),
                i + 1,
                statements.len(),
                preview.replace('\n', " ")
            );
            store
                .command(statement)
                .with_context(|| format!("statement {} failed", i + 1))?;
        }
    }

    store.ensure_schema()?;
    println!("{} events table ready", "✓".green());

    let facade = QueryFacade::new(&store);
    println!("\n{} {}", "Tables in".bold(), store.database());
    for table in facade.list_tables()? {
        println!("  - {table}");
    }
    println!("\n{} {}", "Schema of".bold(), store.events_table());
    for (name, type_name) in facade.describe_events_table()? {
        println!("  {name}: {type_name}");
    }
    Ok(())
}

fn sql_text(words: &[String]) -> String {
    words.join(" ").trim().to_string()
}

/// First rows of the configured events table.
fn default_query(store: &dyn EventStore) -> String {
    format!("SELECT * FROM {} LIMIT 5", store.events_table())
}

fn cmd_query(words: &[String], conn: &ConnectionArgs) -> Result<()> {
    let store = conn.connect()?;
    let mut sql = sql_text(words);
    if sql.is_empty() {
        sql = default_query(&store);
        println!("{} {sql}", "No query given; running default:".dimmed());
    }

    println!("{} {sql}", "Query:".bold());
    let result = QueryFacade::new(&store)
        .execute(&sql, &QueryParams::new())
        .context("query failed")?;
    if result.is_empty() {
        println!("No results found.");
    } else {
        println!("\n{}", render_table(&result));
        println!("\nTotal rows: {}", result.rows.len());
    }
    Ok(())
}

fn cmd_tool_sql(words: &[String], describe: bool, conn: &ConnectionArgs) -> Result<()> {
    let sql = sql_text(words);
    if sql.is_empty() {
        return Err(anyhow!("tool-sql: pass a SQL query"));
    }
    let store = conn.connect()?;
    if describe {
        println!("{}: {}\n", SqlTool::<ClickHouseStore>::NAME.bold(), SqlTool::<ClickHouseStore>::DESCRIPTION);
    }
    print!("{}", SqlTool::new(&store).run(&sql));
    println!();
    Ok(())
}

fn cmd_health(conn: &ConnectionArgs) -> Result<()> {
    let store = conn.connect()?;
    let version = store
        .ping()
        .with_context(|| format!("ClickHouse at {} is not reachable", store.config().base_url()))?;
    println!("{} ClickHouse {version} ({})", "✓".green(), store.events_table());
    Ok(())
}

fn cmd_stats(file: &Path) -> Result<()> {
    let events = read_corpus(file).with_context(|| format!("failed to read {}", file.display()))?;
    print_stats(&CorpusStats::from_events(&events));
    Ok(())
}

fn print_stats(stats: &CorpusStats) {
    println!("\n{}", "Corpus statistics".bold());
    println!("{stats}");
    println!("\n{}", "Anomaly patterns to look for:".bold());
    for (i, pattern) in AnomalyPattern::ALL.iter().enumerate() {
        println!("  {}. {}", i + 1, pattern.description());
    }
}

fn cmd_serve(config: server::ServerConfig, memory: bool, conn: &ConnectionArgs) -> Result<()> {
    let store: Arc<dyn EventStore> = if memory {
        tracing::warn!("serving from an in-memory store; events are lost on exit");
        Arc::new(MemoryStore::new())
    } else {
        let store = conn.connect()?;
        store.ensure_schema()?;
        Arc::new(store)
    };
    server::serve(config, store)
}

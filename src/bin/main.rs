//! sqlgate CLI - SQL tool gateway and its driver
//!
//! Usage:
//!   sqlgate serve
//!   sqlgate ask <question>
//!   sqlgate run <sql> [--max-rows <n>]
//!   sqlgate tables
//!   sqlgate schema <table>...
//!   sqlgate inspect [-c <command>]
//!   sqlgate cache <list|count|clear>
//!   sqlgate usage
//!
//! Examples:
//!   sqlgate ask "Show film titles from 2006 limit 3"
//!   sqlgate run "SELECT title FROM film LIMIT 5" --max-rows 2
//!   sqlgate inspect -c 'raw {"id":1,"method":"list_tables"}'

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use sqlgate::cache::{GeminiEmbedder, SemanticCache, VectorStore};
use sqlgate::config::Settings;
use sqlgate::server;
use sqlgate::session::{Session, ToolChannel};
use sqlgate::supervisor::Supervisor;
use sqlgate::transport::protocol::methods;
use sqlgate::transport::Request;
use sqlgate::usage::{UsageLedger, UsageStats};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

type CliResult = Result<(), Box<dyn Error>>;

#[derive(Parser)]
#[command(name = "sqlgate")]
#[command(about = "sqlgate - A sandboxed SQL tool gateway with a semantic query cache")]
#[command(version)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(long, global = true)]
    debug: bool,

    /// Config file (default: $SQLGATE_CONFIG, ./sqlgate.toml, ~/.config/sqlgate/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve tools over stdin/stdout (the gateway process)
    Serve,

    /// Answer a natural-language question, using the semantic cache
    Ask {
        /// The question
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,

        /// Skip the semantic cache
        #[arg(long)]
        no_cache: bool,
    },

    /// Run a read-only SQL statement through the gateway
    Run {
        sql: String,

        /// Row cap for this call
        #[arg(long)]
        max_rows: Option<usize>,
    },

    /// List tables
    Tables,

    /// Show columns of the given tables
    Schema {
        #[arg(required = true)]
        tables: Vec<String>,
    },

    /// Interactive tool inspector
    Inspect {
        /// Run one command and exit
        #[arg(short, long)]
        command: Option<String>,
    },

    /// Inspect or clear the semantic cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },

    /// Show accumulated token usage and cost
    Usage,
}

#[derive(Subcommand)]
enum CacheAction {
    /// List cached questions and their SQL
    List,
    /// Count cached entries
    Count,
    /// Delete all cached entries
    Clear,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.debug);

    let settings = match &cli.config {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    };
    let settings = match settings {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = match cli.command {
        Commands::Serve => cmd_serve(&settings).await,
        Commands::Ask { question, no_cache } => cmd_ask(&settings, &question.join(" "), !no_cache).await,
        Commands::Run { sql, max_rows } => cmd_run(&settings, &sql, max_rows).await,
        Commands::Tables => cmd_tables(&settings).await,
        Commands::Schema { tables } => cmd_schema(&settings, &tables).await,
        Commands::Inspect { command } => cmd_inspect(&settings, command).await,
        Commands::Cache { action } => cmd_cache(&settings, action),
        Commands::Usage => cmd_usage(&settings),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr: in `serve` mode stdout carries the protocol.
fn init_tracing(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

async fn cmd_serve(settings: &Settings) -> CliResult {
    server::run_stdio(settings).await?;
    Ok(())
}

async fn cmd_ask(settings: &Settings, question: &str, use_cache: bool) -> CliResult {
    let mut session = open_session(settings, use_cache)?;
    let answer = session.ask(question).await;
    session.channel_mut().terminate().await;
    print_json(&answer?)
}

async fn cmd_run(settings: &Settings, sql: &str, max_rows: Option<usize>) -> CliResult {
    let mut supervisor = Supervisor::from_settings(&settings.supervisor)?;
    let mut params = json!({ "query": sql });
    if let Some(max_rows) = max_rows {
        params["max_rows"] = json!(max_rows);
    }
    let result = supervisor.invoke(methods::EXECUTE_SQL, params).await;
    supervisor.terminate().await;
    print_json(&result?)
}

async fn cmd_tables(settings: &Settings) -> CliResult {
    let mut session = open_session(settings, false)?;
    let tables = session.list_tables().await;
    session.channel_mut().terminate().await;
    for table in tables? {
        println!("{}", table);
    }
    Ok(())
}

async fn cmd_schema(settings: &Settings, tables: &[String]) -> CliResult {
    let mut session = open_session(settings, false)?;
    let rows = session.table_schema(tables).await;
    session.channel_mut().terminate().await;
    for row in rows? {
        println!("{}.{}\t{}", row.table, row.column, row.data_type);
    }
    Ok(())
}

fn cmd_cache(settings: &Settings, action: CacheAction) -> CliResult {
    let store = VectorStore::open(settings.cache.cache_path()?)?;
    match action {
        CacheAction::List => {
            for entry in store.entries()? {
                println!("{}\n    {}", entry.question, entry.sql);
                if !entry.params.is_empty() {
                    println!("    params: {}", Value::Array(entry.params));
                }
            }
        }
        CacheAction::Count => println!("{}", store.count()?),
        CacheAction::Clear => println!("Removed {} cached entries", store.clear()?),
    }
    Ok(())
}

fn cmd_usage(settings: &Settings) -> CliResult {
    let stats = UsageStats::load(settings.usage.usage_path()?);
    println!("Input tokens:  {}", stats.input);
    println!("Output tokens: {}", stats.output);
    println!("Total cost:    ${:.6}", stats.total_cost);
    Ok(())
}

// ============================================================================
// Inspector
// ============================================================================

const INSPECT_HELP: &str = "Commands:
  tables                   list tables
  schema <table>...        show columns
  run <SQL>                execute a read-only statement
  text2sql <question>      generate SQL without running it
  ask <question>           full ask flow (cache, generate, execute)
  raw <JSON request>       send a raw request line
  status                   supervisor state
  logs                     gateway stderr collected so far
  restart [--force]        restart the gateway
  quit";

/// One inspector command.
#[derive(Debug, PartialEq)]
enum InspectCommand {
    Help,
    Quit,
    Tables,
    Schema(Vec<String>),
    Run(String),
    TextToSql(String),
    Ask(String),
    Raw(Request),
    Status,
    Logs,
    Restart { force: bool },
}

fn parse_inspect_line(line: &str) -> Result<InspectCommand, String> {
    let line = line.trim();
    let (head, rest) = match line.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (line, ""),
    };

    let need_arg = |what: &str| -> Result<String, String> {
        if rest.is_empty() {
            Err(format!("{head} needs {what}"))
        } else {
            Ok(rest.to_string())
        }
    };

    match head {
        "help" => Ok(InspectCommand::Help),
        "q" | "quit" | "exit" => Ok(InspectCommand::Quit),
        "tables" => Ok(InspectCommand::Tables),
        "schema" => {
            let tables: Vec<String> = rest.split_whitespace().map(str::to_string).collect();
            if tables.is_empty() {
                return Err("schema needs at least one table".to_string());
            }
            Ok(InspectCommand::Schema(tables))
        }
        "run" => need_arg("a SQL statement").map(InspectCommand::Run),
        "text2sql" => need_arg("a question").map(InspectCommand::TextToSql),
        "ask" => need_arg("a question").map(InspectCommand::Ask),
        "raw" => parse_raw(rest).map(InspectCommand::Raw),
        "status" => Ok(InspectCommand::Status),
        "logs" => Ok(InspectCommand::Logs),
        "restart" => match rest {
            "" => Ok(InspectCommand::Restart { force: false }),
            "--force" | "force" => Ok(InspectCommand::Restart { force: true }),
            other => Err(format!("unknown restart option: {other}")),
        },
        _ => Err("Unknown command. Type 'help'.".to_string()),
    }
}

/// Parse a raw request, tolerating shell-escaped or single-quoted JSON.
fn parse_raw(text: &str) -> Result<Request, String> {
    let mut attempts = vec![text.to_string(), text.replace("\\\"", "\"")];
    if let Some(inner) = text.strip_prefix('\'').and_then(|t| t.strip_suffix('\'')) {
        attempts.push(inner.to_string());
    }
    attempts
        .iter()
        .find_map(|candidate| serde_json::from_str::<Request>(candidate).ok())
        .ok_or_else(|| r#"Invalid JSON for raw. Try: raw {"id":1,"method":"list_tables"}"#.to_string())
}

async fn cmd_inspect(settings: &Settings, one_shot: Option<String>) -> CliResult {
    let mut session = open_session(settings, true)?;

    if let Some(line) = one_shot {
        let result = run_inspect_line(&mut session, &line).await;
        session.channel_mut().terminate().await;
        return result.map(|_| ());
    }

    println!("sqlgate inspector. Type 'help' for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match run_inspect_line(&mut session, &line).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => eprintln!("{}", e),
        }
    }

    session.channel_mut().terminate().await;
    Ok(())
}

/// Run one inspector line. Returns `false` on quit.
async fn run_inspect_line(session: &mut Session<Supervisor>, line: &str) -> Result<bool, Box<dyn Error>> {
    let command = parse_inspect_line(line)?;
    match command {
        InspectCommand::Help => println!("{}", INSPECT_HELP),
        InspectCommand::Quit => return Ok(false),
        InspectCommand::Tables => print_json(&session.list_tables().await?)?,
        InspectCommand::Schema(tables) => print_json(&session.table_schema(&tables).await?)?,
        InspectCommand::Run(sql) => print_json(&session.run_sql(&sql, &[]).await?)?,
        InspectCommand::TextToSql(text) => print_json(&session.text_to_sql(&text).await?)?,
        InspectCommand::Ask(question) => print_json(&session.ask(&question).await?)?,
        InspectCommand::Raw(request) => print_json(&session.channel_mut().send(&request).await?)?,
        InspectCommand::Status => print_json(&session.channel_mut().status())?,
        InspectCommand::Logs => {
            for line in session.channel_mut().drain_diagnostics() {
                println!("[gateway] {}", line);
            }
        }
        InspectCommand::Restart { force } => {
            session.channel_mut().restart(force).await?;
            println!("restarted");
        }
    }
    Ok(true)
}

// ============================================================================
// Helpers
// ============================================================================

fn open_session(settings: &Settings, use_cache: bool) -> Result<Session<Supervisor>, Box<dyn Error>> {
    let supervisor = Supervisor::from_settings(&settings.supervisor)?;
    let cache = if use_cache && settings.cache.enabled {
        open_cache(settings)
    } else {
        None
    };
    let usage = match settings.usage.usage_path() {
        Ok(path) => UsageLedger::open(path),
        Err(e) => {
            tracing::warn!(error = %e, "usage stats path unavailable, not persisting usage");
            UsageLedger::in_memory()
        }
    };
    Ok(Session::new(supervisor, cache, usage))
}

/// The cache is optional: any setup failure disables it for this run.
fn open_cache(settings: &Settings) -> Option<SemanticCache> {
    let embedder = match GeminiEmbedder::from_settings(&settings.embedding) {
        Ok(embedder) => embedder,
        Err(e) => {
            tracing::warn!(error = %e, "semantic cache disabled");
            return None;
        }
    };
    match SemanticCache::from_settings(&settings.cache, Arc::new(embedder)) {
        Ok(cache) => Some(cache),
        Err(e) => {
            tracing::warn!(error = %e, "semantic cache disabled");
            None
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use quote_kernel_api::{AddQuoteRequest, QuoteKernelApi, QuoteKernelConfig};
use quote_kernel_core::CategoryFilter;
use quote_kernel_store_sqlite::{SessionId, SqliteStore};
use quote_kernel_sync::HttpRemote;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "cli.v1";
const DEFAULT_EXPORT_FILE: &str = "quotes.json";

#[derive(Debug, Parser)]
#[command(name = "qk")]
#[command(about = "Quote Kernel CLI")]
struct Cli {
    #[arg(long)]
    db: Option<PathBuf>,

    #[arg(long)]
    config: Option<PathBuf>,

    /// Reuse a session across invocations; without it every run is its own session.
    #[arg(long)]
    session: Option<String>,

    #[arg(long)]
    remote_endpoint: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Db {
        #[command(subcommand)]
        command: DbCommand,
    },
    Quote {
        #[command(subcommand)]
        command: QuoteCommand,
    },
    Category {
        #[command(subcommand)]
        command: CategoryCommand,
    },
    Export(ExportArgs),
    Import(ImportArgs),
    Sync {
        #[command(subcommand)]
        command: SyncCommand,
    },
    Session {
        #[command(subcommand)]
        command: SessionCommand,
    },
}

#[derive(Debug, Subcommand)]
enum DbCommand {
    SchemaVersion,
    Migrate(DbMigrateArgs),
    Backup(DbBackupArgs),
    IntegrityCheck,
}

#[derive(Debug, Args)]
struct DbMigrateArgs {
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

#[derive(Debug, Args)]
struct DbBackupArgs {
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Subcommand)]
enum QuoteCommand {
    Add(AddArgs),
    List,
    Random(RandomArgs),
    Last,
}

#[derive(Debug, Args)]
struct AddArgs {
    #[arg(long)]
    text: String,
    #[arg(long)]
    category: String,
    #[arg(long, default_value_t = false)]
    no_push: bool,
}

#[derive(Debug, Args)]
struct RandomArgs {
    #[arg(long)]
    category: Option<String>,
}

#[derive(Debug, Subcommand)]
enum CategoryCommand {
    List,
    Select(SelectArgs),
}

#[derive(Debug, Args)]
struct SelectArgs {
    value: String,
}

#[derive(Debug, Args)]
struct ExportArgs {
    #[arg(long, default_value = DEFAULT_EXPORT_FILE)]
    out: PathBuf,
}

#[derive(Debug, Args)]
struct ImportArgs {
    #[arg(long = "in")]
    input: PathBuf,
}

#[derive(Debug, Subcommand)]
enum SyncCommand {
    Pull,
}

#[derive(Debug, Subcommand)]
enum SessionCommand {
    Start,
    End,
}

struct CliContext {
    config: QuoteKernelConfig,
    api: QuoteKernelApi,
    ephemeral_session: bool,
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}

fn build_context(cli: &Cli) -> Result<CliContext> {
    let mut config = QuoteKernelConfig::load(cli.config.as_deref())?;
    if let Some(db) = &cli.db {
        config.db.clone_from(db);
    }
    if let Some(endpoint) = &cli.remote_endpoint {
        config.remote.endpoint.clone_from(endpoint);
    }

    let (session, ephemeral_session) = match cli.session.as_deref() {
        Some(raw) => (SessionId::parse(raw)?, false),
        None => (SessionId::new(), true),
    };
    let remote = Arc::new(HttpRemote::new(config.remote.clone()));
    let api = QuoteKernelApi::with_session(config.db.clone(), remote, session);

    Ok(CliContext { config, api, ephemeral_session })
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let ctx = build_context(&cli)?;

    let result = match cli.command {
        Command::Db { command } => run_db(command, &ctx),
        Command::Quote { command } => run_quote(command, &ctx),
        Command::Category { command } => run_category(command, &ctx),
        Command::Export(args) => run_export(&args, &ctx),
        Command::Import(args) => run_import(&args, &ctx),
        Command::Sync { command } => run_sync(&command, &ctx),
        Command::Session { command } => return run_session(&command, &ctx),
    };

    if ctx.ephemeral_session {
        if let Err(err) = ctx.api.end_session() {
            tracing::warn!(error = %err, "failed to clear ephemeral session");
        }
    }
    result
}

fn run_db(command: DbCommand, ctx: &CliContext) -> Result<()> {
    match command {
        DbCommand::SchemaVersion => {
            let status = ctx.api.schema_status()?;
            emit_json(serde_json::json!({
                "current_version": status.current_version,
                "target_version": status.target_version,
                "pending_versions": status.pending_versions,
                "up_to_date": status.pending_versions.is_empty()
            }))
        }
        DbCommand::Migrate(args) => {
            let result = ctx.api.migrate(args.dry_run)?;
            emit_json(serde_json::to_value(&result).context("failed to serialize migrate result")?)
        }
        DbCommand::Backup(args) => {
            let mut store = SqliteStore::open(&ctx.config.db)?;
            store.migrate()?;
            store.backup_database(&args.out)?;
            emit_json(serde_json::json!({
                "backup_path": args.out,
                "status": "ok"
            }))
        }
        DbCommand::IntegrityCheck => {
            let store = SqliteStore::open(&ctx.config.db)?;
            let report = store.integrity_check()?;
            emit_json(serde_json::to_value(&report).context("failed to serialize integrity report")?)
        }
    }
}

fn run_quote(command: QuoteCommand, ctx: &CliContext) -> Result<()> {
    match command {
        QuoteCommand::Add(args) => {
            let added =
                ctx.api.add_quote(AddQuoteRequest { text: args.text, category: args.category })?;
            if ctx.config.push_on_add && !args.no_push {
                let outcome = ctx.api.push_quote(&added.quote);
                tracing::debug!(delivered = outcome.delivered, "push finished");
            }
            emit_json(serde_json::to_value(&added).context("failed to serialize added quote")?)
        }
        QuoteCommand::List => {
            let listed = ctx.api.list_quotes()?;
            emit_json(serde_json::to_value(&listed).context("failed to serialize quote list")?)
        }
        QuoteCommand::Random(args) => {
            let filter = args.category.as_deref().map(CategoryFilter::parse);
            let picked = ctx.api.show_random(filter)?;
            emit_json(serde_json::to_value(&picked).context("failed to serialize random quote")?)
        }
        QuoteCommand::Last => {
            let last = ctx.api.last_quote()?;
            emit_json(serde_json::json!({
                "session": ctx.api.session().to_string(),
                "last_quote": last
            }))
        }
    }
}

fn run_category(command: CategoryCommand, ctx: &CliContext) -> Result<()> {
    let listed = match command {
        CategoryCommand::List => ctx.api.categories()?,
        CategoryCommand::Select(args) => ctx.api.select_category(&args.value)?,
    };
    emit_json(serde_json::to_value(&listed).context("failed to serialize categories")?)
}

fn run_export(args: &ExportArgs, ctx: &CliContext) -> Result<()> {
    let export = ctx.api.export_quotes()?;
    if let Some(parent) = args.out.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| {
            format!("failed to create export directory {}", parent.display())
        })?;
    }
    fs::write(&args.out, export.json.as_bytes())
        .with_context(|| format!("failed to write export file {}", args.out.display()))?;

    emit_json(serde_json::json!({
        "out_file": args.out,
        "quotes": export.quotes,
        "sha256": hex::encode(Sha256::digest(export.json.as_bytes()))
    }))
}

fn run_import(args: &ImportArgs, ctx: &CliContext) -> Result<()> {
    let body = fs::read_to_string(&args.input)
        .with_context(|| format!("failed to read import file {}", args.input.display()))?;
    let result = ctx.api.import_quotes(&body)?;
    emit_json(serde_json::json!({
        "in_file": args.input,
        "summary": result
    }))
}

fn run_sync(command: &SyncCommand, ctx: &CliContext) -> Result<()> {
    match command {
        SyncCommand::Pull => {
            let report = ctx.api.sync_once()?;
            emit_json(serde_json::to_value(&report).context("failed to serialize sync report")?)
        }
    }
}

fn run_session(command: &SessionCommand, ctx: &CliContext) -> Result<()> {
    match command {
        SessionCommand::Start => {
            emit_json(serde_json::json!({ "session": ctx.api.session().to_string() }))
        }
        SessionCommand::End => {
            if ctx.ephemeral_session {
                return Err(anyhow!("session end requires --session"));
            }
            let cleared = ctx.api.end_session()?;
            emit_json(serde_json::json!({
                "session": ctx.api.session().to_string(),
                "cleared_items": cleared
            }))
        }
    }
}

//! Stride CLI - Track walk sessions from the terminal
//!
//! Session actions are queued locally first and delivered to the backend
//! when a sync runs, so every command works offline.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use clap::{Parser, Subcommand};
use stride_core::config::{EngineConfig, RemoteConfig};
use stride_core::db::{Database, LibSqlOutboxRepository, OutboxRepository};
use stride_core::models::{
    CancelPayload, EndPayload, PausePayload, QueuedOperation, ResumePayload, StartPayload,
    UpdateSpeedPayload,
};
use stride_core::remote::HttpSessionRemote;
use stride_core::sync::{DrainOutcome, SyncEngine};
use stride_core::OperationId;
use thiserror::Error;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "stride")]
#[command(about = "Track walk sessions from the command line")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Optional path to local database file
    #[arg(long, value_name = "PATH")]
    db_path: Option<PathBuf>,

    /// Acting user ID (or STRIDE_USER_ID)
    #[arg(long, global = true, value_name = "ID")]
    user: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new walk session
    Start {
        /// Initial walking speed in km/h
        #[arg(long, default_value = "4.5")]
        speed: f64,
    },
    /// Pause a session
    Pause {
        /// Session ID (local or server)
        session: String,
    },
    /// Resume a paused session
    Resume {
        /// Session ID (local or server)
        session: String,
        /// Measured pause duration to add, in seconds
        #[arg(long, value_name = "SECS")]
        paused_secs: i64,
    },
    /// Change a session's walking speed
    Speed {
        /// Session ID (local or server)
        session: String,
        /// New speed in km/h
        value: f64,
    },
    /// End a session
    End {
        /// Session ID (local or server)
        session: String,
        /// Final status to record
        #[arg(long, default_value = "completed")]
        status: String,
    },
    /// Cancel a session and delete its remote record
    Cancel {
        /// Session ID (local or server)
        session: String,
    },
    /// Inspect the outbox queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Drain the outbox against the remote backend now
    Sync,
}

#[derive(Subcommand)]
enum QueueCommands {
    /// List queued operations
    List {
        /// Show abandoned (dead-lettered) operations instead
        #[arg(long)]
        dead: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the pending operation count
    Count,
    /// Drop a queued operation by ID or unique ID prefix
    Remove {
        /// Operation ID or unique ID prefix
        id: String,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Core(#[from] stride_core::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("User ID is required; pass --user or set STRIDE_USER_ID")]
    MissingUser,
    #[error("Session ID cannot be empty")]
    EmptySessionId,
    #[error("Operation not found for id/prefix: {0}")]
    OperationNotFound(String),
    #[error("{0}")]
    AmbiguousOperationId(String),
    #[error(
        "Sync is not configured. Set STRIDE_REST_URL, STRIDE_API_KEY and STRIDE_ACCESS_TOKEN to enable `stride sync`."
    )]
    SyncNotConfigured,
}

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("stride=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    let db_path = resolve_db_path(cli.db_path);

    match cli.command {
        Commands::Start { speed } => {
            let user = resolve_user(cli.user)?;
            run_start(&user, speed, &db_path).await?;
        }
        Commands::Pause { session } => {
            let user = resolve_user(cli.user)?;
            let session = normalize_session_id(&session)?;
            run_pause(&user, &session, &db_path).await?;
        }
        Commands::Resume {
            session,
            paused_secs,
        } => {
            let user = resolve_user(cli.user)?;
            let session = normalize_session_id(&session)?;
            run_resume(&user, &session, paused_secs, &db_path).await?;
        }
        Commands::Speed { session, value } => {
            let user = resolve_user(cli.user)?;
            let session = normalize_session_id(&session)?;
            run_speed(&user, &session, value, &db_path).await?;
        }
        Commands::End { session, status } => {
            let user = resolve_user(cli.user)?;
            let session = normalize_session_id(&session)?;
            run_end(&user, &session, &status, &db_path).await?;
        }
        Commands::Cancel { session } => {
            let user = resolve_user(cli.user)?;
            let session = normalize_session_id(&session)?;
            run_cancel(&user, &session, &db_path).await?;
        }
        Commands::Queue { command } => match command {
            QueueCommands::List { dead, json } => run_queue_list(dead, json, &db_path).await?,
            QueueCommands::Count => run_queue_count(&db_path).await?,
            QueueCommands::Remove { id } => run_queue_remove(&id, &db_path).await?,
        },
        Commands::Sync => run_sync(&db_path).await?,
    }

    Ok(())
}

async fn run_start(user: &str, speed: f64, db_path: &Path) -> Result<(), CliError> {
    let local_id = format!("local-{}", Uuid::now_v7());
    let op = QueuedOperation::start(
        user,
        &StartPayload {
            local_id: local_id.clone(),
            started_at: Utc::now().timestamp_millis(),
            speed_kmh: speed,
        },
    )?;

    enqueue(op, db_path).await?;
    println!("{local_id}");
    Ok(())
}

async fn run_pause(user: &str, session: &str, db_path: &Path) -> Result<(), CliError> {
    let op = QueuedOperation::pause(
        user,
        &PausePayload {
            session_id: session.to_string(),
            paused_at: Utc::now().timestamp_millis(),
        },
    )?;
    enqueue(op, db_path).await
}

async fn run_resume(
    user: &str,
    session: &str,
    paused_secs: i64,
    db_path: &Path,
) -> Result<(), CliError> {
    let op = QueuedOperation::resume(
        user,
        &ResumePayload {
            session_id: session.to_string(),
            resumed_at: Utc::now().timestamp_millis(),
            pause_secs: paused_secs,
        },
    )?;
    enqueue(op, db_path).await
}

async fn run_speed(
    user: &str,
    session: &str,
    speed_kmh: f64,
    db_path: &Path,
) -> Result<(), CliError> {
    let op = QueuedOperation::update_speed(
        user,
        &UpdateSpeedPayload {
            session_id: session.to_string(),
            speed_kmh,
        },
    )?;
    enqueue(op, db_path).await
}

async fn run_end(
    user: &str,
    session: &str,
    status: &str,
    db_path: &Path,
) -> Result<(), CliError> {
    let mut fields = serde_json::Map::new();
    fields.insert("status".to_string(), serde_json::json!(status));
    fields.insert(
        "ended_at".to_string(),
        serde_json::json!(Utc::now().timestamp_millis()),
    );

    let op = QueuedOperation::end(
        user,
        &EndPayload {
            session_id: session.to_string(),
            fields,
        },
    )?;
    enqueue(op, db_path).await
}

async fn run_cancel(user: &str, session: &str, db_path: &Path) -> Result<(), CliError> {
    let op = QueuedOperation::cancel(
        user,
        &CancelPayload {
            session_id: session.to_string(),
        },
    )?;
    enqueue(op, db_path).await
}

/// Queue the operation; deliver right away when sync is configured
async fn enqueue(op: QueuedOperation, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path).await?;

    if let Some(config) = remote_config_from_env() {
        tracing::debug!("Sync configured, delivering immediately");
        let remote = HttpSessionRemote::new(config)
            .map_err(|error| stride_core::Error::InvalidInput(error.to_string()))?;
        let engine = Arc::new(SyncEngine::new(
            Arc::new(db),
            remote,
            &EngineConfig::default(),
        ));
        engine.enqueue(op).await?;
        report_drain(&engine).await?;
    } else {
        let repo = LibSqlOutboxRepository::new(db.connection());
        repo.append(&op).await?;
        let pending = repo.count().await?;
        println!("Queued (offline); {pending} pending. Run `stride sync` when online.");
    }

    Ok(())
}

async fn run_sync(db_path: &Path) -> Result<(), CliError> {
    let Some(config) = remote_config_from_env() else {
        return Err(CliError::SyncNotConfigured);
    };

    let db = open_database(db_path).await?;
    let remote = HttpSessionRemote::new(config)
        .map_err(|error| stride_core::Error::InvalidInput(error.to_string()))?;
    let engine = Arc::new(SyncEngine::new(
        Arc::new(db),
        remote,
        &EngineConfig::default(),
    ));

    report_drain(&engine).await
}

async fn report_drain(engine: &SyncEngine<HttpSessionRemote>) -> Result<(), CliError> {
    match engine.drain().await? {
        DrainOutcome::Completed(report) => {
            if let Some(halted_on) = report.halted_on {
                let stuck = engine
                    .pending_operations()
                    .await?
                    .into_iter()
                    .find(|op| op.id == halted_on);
                let reason = stuck
                    .and_then(|op| op.last_error)
                    .unwrap_or_else(|| "unknown error".to_string());
                println!(
                    "Synced {}; halted on {} ({reason}); {} pending",
                    report.synced, halted_on, report.pending
                );
            } else {
                println!("Synced {}; {} pending", report.synced, report.pending);
            }
        }
        DrainOutcome::Offline => println!("Offline; nothing synced"),
        DrainOutcome::AlreadyDraining => println!("A sync is already running"),
    }
    Ok(())
}

async fn run_queue_list(dead: bool, as_json: bool, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let repo = LibSqlOutboxRepository::new(db.connection());

    let ops = if dead {
        repo.list_dead().await?
    } else {
        repo.list().await?
    };

    if as_json {
        println!("{}", serde_json::to_string_pretty(&ops)?);
    } else {
        for line in format_op_lines(&ops) {
            println!("{line}");
        }
    }

    Ok(())
}

async fn run_queue_count(db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let repo = LibSqlOutboxRepository::new(db.connection());
    println!("{}", repo.count().await?);
    Ok(())
}

async fn run_queue_remove(id_query: &str, db_path: &Path) -> Result<(), CliError> {
    let db = open_database(db_path).await?;
    let repo = LibSqlOutboxRepository::new(db.connection());

    let op_id = resolve_operation_id(id_query, &repo).await?;
    repo.remove(&op_id).await?;
    println!("{op_id}");
    Ok(())
}

/// Match an exact operation ID or a unique ID prefix across pending and dead
async fn resolve_operation_id(
    id_query: &str,
    repo: &LibSqlOutboxRepository<'_>,
) -> Result<OperationId, CliError> {
    let id_query = id_query.trim();
    if id_query.is_empty() {
        return Err(CliError::OperationNotFound(String::new()));
    }

    if let Ok(op_id) = id_query.parse::<OperationId>() {
        if repo.get(&op_id).await?.is_some() {
            return Ok(op_id);
        }
    }

    let mut all = repo.list().await?;
    all.extend(repo.list_dead().await?);

    let matching: Vec<OperationId> = all
        .iter()
        .filter(|op| op.id.as_str().starts_with(id_query))
        .map(|op| op.id)
        .collect();

    match matching.len() {
        0 => Err(CliError::OperationNotFound(id_query.to_string())),
        1 => Ok(matching[0]),
        _ => {
            let options = matching
                .iter()
                .take(3)
                .map(|id| id.as_str().chars().take(13).collect::<String>())
                .collect::<Vec<_>>()
                .join(", ");
            Err(CliError::AmbiguousOperationId(format!(
                "ID prefix '{id_query}' is ambiguous; matches: {options}"
            )))
        }
    }
}

fn format_op_lines(ops: &[QueuedOperation]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    ops.iter()
        .map(|op| {
            let id = op.id.to_string();
            let short_id = id.chars().take(13).collect::<String>();
            let relative_time = format_relative_time(op.created_at, now_ms);
            let error = op
                .last_error
                .as_deref()
                .map(|message| message.chars().take(40).collect::<String>())
                .unwrap_or_default();

            if error.is_empty() {
                format!(
                    "{short_id:<13}  {:<12}  attempts={:<3}  {relative_time}",
                    op.action, op.attempts
                )
            } else {
                format!(
                    "{short_id:<13}  {:<12}  attempts={:<3}  {relative_time:<10}  {error}",
                    op.action, op.attempts
                )
            }
        })
        .collect()
}

fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else {
        format!("{}w ago", diff / week)
    }
}

fn resolve_user(cli_user: Option<String>) -> Result<String, CliError> {
    cli_user
        .or_else(|| env::var("STRIDE_USER_ID").ok())
        .map(|user| user.trim().to_string())
        .filter(|user| !user.is_empty())
        .ok_or(CliError::MissingUser)
}

fn normalize_session_id(id: &str) -> Result<String, CliError> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        Err(CliError::EmptySessionId)
    } else {
        Ok(trimmed.to_string())
    }
}

fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os("STRIDE_DB_PATH").map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stride")
        .join("stride.db")
}

fn remote_config_from_env() -> Option<RemoteConfig> {
    let rest_url = env::var("STRIDE_REST_URL").ok()?;
    let api_key = env::var("STRIDE_API_KEY").ok()?;
    let access_token = env::var("STRIDE_ACCESS_TOKEN").ok()?;

    RemoteConfig::new(rest_url, api_key, access_token).ok()
}

async fn open_database(path: &Path) -> Result<Database, CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    Ok(Database::open(path).await?)
}

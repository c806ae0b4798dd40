//! viva CLI: operator interface to the assessment queue.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use secrecy::ExposeSecret;

use vivavoce::config::{Config, Settings};
use vivavoce::db::Db;
use vivavoce::model::{ItemId, ItemStatus, NewQueueItem, SubmissionId};
use vivavoce::queue::AssessmentQueue;
use vivavoce::scorer::HttpScorer;
use vivavoce::store::{FsArtifactStore, SqlSubmissionStore, SubmissionStore};
use vivavoce::telemetry::{TelemetryConfig, init_telemetry};

#[derive(Parser)]
#[command(name = "viva", about = "Processing queue for spoken language assessments")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the queue daemon
    Serve {
        /// TOML settings file (defaults apply when omitted)
        #[arg(long)]
        settings: Option<PathBuf>,
        /// Override the maximum concurrent assessments
        #[arg(long)]
        max_concurrent: Option<usize>,
    },
    /// Register a recording and queue it for assessment
    Submit {
        /// Path to the audio file, absolute or relative to the media root
        audio: String,
        /// Priority (higher = dispatched sooner)
        #[arg(long, default_value_t = 0)]
        priority: i32,
    },
    /// Queue an already-registered submission
    Enqueue {
        /// Submission UUID
        submission: String,
        /// Priority (higher = dispatched sooner)
        #[arg(long, default_value_t = 0)]
        priority: i32,
    },
    /// List queue items
    List {
        /// Filter by status
        #[arg(long)]
        status: Option<String>,
        /// Maximum items to show
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Show a queue item
    Show {
        /// Item ID (full UUID or prefix)
        id: String,
    },
    /// Queue occupancy and error rate
    Status,
    /// Reset items stranded in processing
    Cleanup {
        /// Staleness threshold in seconds
        #[arg(long, default_value_t = 600)]
        stale_secs: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            settings,
            max_concurrent,
        } => cmd_serve(settings, max_concurrent).await,
        Command::Submit { audio, priority } => cmd_submit(&connect().await?, audio, priority).await,
        Command::Enqueue {
            submission,
            priority,
        } => cmd_enqueue(&connect().await?, submission, priority).await,
        Command::List { status, limit } => cmd_list(&connect().await?, status, limit).await,
        Command::Show { id } => cmd_show(&connect().await?, id).await,
        Command::Status => cmd_status(&connect().await?).await,
        Command::Cleanup { stale_secs } => cmd_cleanup(&connect().await?, stale_secs).await,
    }
}

/// Database handle for the one-shot commands.
async fn connect() -> anyhow::Result<Db> {
    let config = Config::from_env()?;
    Ok(Db::connect(config.database_url.expose_secret()).await?)
}

async fn cmd_serve(settings: Option<PathBuf>, max_concurrent: Option<usize>) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let settings = match settings {
        Some(ref path) => Settings::load(path)?,
        None => Settings::default(),
    };

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "vivavoce".to_string(),
        default_filter: config.log_level.clone(),
    })?;

    let db = Arc::new(Db::connect(config.database_url.expose_secret()).await?);
    db.health_check().await?;

    let submissions = Arc::new(SqlSubmissionStore::new(&db));
    let artifacts = Arc::new(FsArtifactStore::new(&config.media_root));
    let scorer = Arc::new(HttpScorer::new(
        config.scorer_url.clone(),
        config.scorer_api_key.clone(),
        settings.request_timeout(),
    )?);

    let mut queue_config = settings.queue_config();
    if let Some(n) = max_concurrent {
        queue_config.max_concurrent = n;
    }

    let queue = AssessmentQueue::new(
        db,
        submissions,
        artifacts,
        scorer,
        queue_config,
        settings.monitor_config(),
    );

    queue.start().await;
    tokio::signal::ctrl_c().await?;
    queue.shutdown().await;
    Ok(())
}

async fn cmd_submit(db: &Db, audio: String, priority: i32) -> anyhow::Result<()> {
    let store = SqlSubmissionStore::new(db);
    let submission_id = store.register(&audio).await?;
    let item = db
        .insert_item(NewQueueItem::new(submission_id).priority(priority))
        .await?;

    println!("Registered submission {submission_id}");
    println!("Queued: {} (status: {})", item.id, item.status);
    Ok(())
}

async fn cmd_enqueue(db: &Db, submission: String, priority: i32) -> anyhow::Result<()> {
    let submission_id: SubmissionId = submission.parse()?;
    let store = SqlSubmissionStore::new(db);
    if !store.exists(submission_id).await? {
        anyhow::bail!("no submission {submission_id}");
    }

    let item = db
        .insert_item(NewQueueItem::new(submission_id).priority(priority))
        .await?;

    println!("Queued: {} (status: {})", item.id, item.status);
    Ok(())
}

async fn cmd_list(db: &Db, status: Option<String>, limit: i64) -> anyhow::Result<()> {
    let filter: Option<ItemStatus> = match status {
        Some(s) => Some(
            s.parse()
                .map_err(|_| anyhow::anyhow!("invalid status: {s}"))?,
        ),
        None => None,
    };

    let items = db.list_items(filter, limit).await?;

    if items.is_empty() {
        println!("No queue items found.");
        return Ok(());
    }

    // Header
    println!(
        "{:<8}  {:<10}  {:<10}  {:<4}  {:<5}  {:<30}  CREATED",
        "ID", "SUBMISSION", "STATUS", "PRI", "RETRY", "ERROR"
    );
    println!("{}", "-".repeat(100));

    for item in &items {
        let submission_short = &item.submission_id.0.to_string()[..8];
        let error = item.error_message.as_deref().unwrap_or("-");
        let error_display = trim_to(error, 30);
        println!(
            "{:<8}  {:<10}  {:<10}  {:<4}  {:<5}  {:<30}  {}",
            item.id,
            submission_short,
            item.status,
            item.priority,
            item.retry_count,
            error_display,
            item.created_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!("\n{} item(s)", items.len());
    Ok(())
}

/// Cut to at most `max` bytes without splitting a UTF-8 character.
fn trim_to(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

async fn cmd_show(db: &Db, id_str: String) -> anyhow::Result<()> {
    // Support prefix matching: find the item whose ID starts with the input
    let id = if id_str.len() < 36 {
        let items = db.list_items(None, 100).await?;
        let matches: Vec<_> = items
            .iter()
            .filter(|item| item.id.0.to_string().starts_with(&id_str))
            .collect();
        match matches.len() {
            0 => anyhow::bail!("no queue item matching prefix '{id_str}'"),
            1 => matches[0].id,
            n => anyhow::bail!("{n} queue items match prefix '{id_str}', be more specific"),
        }
    } else {
        ItemId(uuid::Uuid::parse_str(&id_str)?)
    };

    let item = db.get_item(id).await?;

    println!("ID:          {}", item.id.0);
    println!("Submission:  {}", item.submission_id);
    println!("Status:      {}", item.status);
    println!("Priority:    {}", item.priority);
    println!("Retries:     {}", item.retry_count);
    println!(
        "Error:       {}",
        item.error_message.as_deref().unwrap_or("-")
    );
    println!("Created:     {}", item.created_at);
    println!("Updated:     {}", item.updated_at);

    if item.status == ItemStatus::Completed {
        let store = SqlSubmissionStore::new(db);
        if let Some(result) = store.result(item.submission_id).await? {
            println!("---");
            println!("Level:       {}", result.level);
            println!("Speakers:    {}", if result.multiple_speakers { "multiple" } else { "one" });
            println!("Analysis:    {}", result.analysis);
            println!("Strengths:   {}", result.strengths);
            println!("Improve:     {}", result.improvements);
            println!("Rationale:   {}", result.justification);
        }
    }

    Ok(())
}

async fn cmd_status(db: &Db) -> anyhow::Result<()> {
    let counts = db.counts().await?;

    println!("Pending:     {}", counts.pending);
    println!("Processing:  {}", counts.processing);
    println!("Completed:   {}", counts.completed);
    println!("Failed:      {}", counts.failed);
    println!("Error rate:  {:.1}%", counts.error_rate() * 100.0);
    Ok(())
}

async fn cmd_cleanup(db: &Db, stale_secs: u64) -> anyhow::Result<()> {
    let reset = db
        .reset_stuck(
            Duration::from_secs(stale_secs),
            "reset by operator cleanup",
        )
        .await?;

    println!("Reset {reset} stuck item(s).");
    Ok(())
}

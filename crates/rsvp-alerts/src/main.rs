//! RSVP alerts CLI - batch RSVP change digests.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use rsvp_alerts::config::DEFAULT_EVENT_RECORDS_PREFIX;
use rsvp_alerts::render::text_digest;
use rsvp_alerts::snapshot::DirectoryBlobStore;
use rsvp_alerts::{
    AlertConfig, AlertJob, BlobEventStore, BlobStore, DigestRenderer, JobStatus, LogMailer,
    Mailer, Mode, Reconciler, RsvpLog, SentenceStyle, SmtpMailer, SnapshotLoader,
};

/// RSVP alerts - drain RSVP changes and email one digest per subscriber.
#[derive(Parser)]
#[command(name = "rsvp-alerts")]
#[command(about = "Batch RSVP change digests for Game Knight events")]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Drain the queue and send digests (configured from the environment)
    Run {
        /// Log emails instead of sending them
        #[arg(long)]
        dry_run: bool,

        /// Messages requested per receive, overriding ALERT_PAGE_SIZE
        #[arg(long)]
        page_size: Option<usize>,
    },

    /// Render digests for local files without touching a queue or mailer
    Preview {
        /// JSON array of RSVP logs
        #[arg(long)]
        logs: PathBuf,

        /// Directory holding events.json, players_groups.json and
        /// email_alert_preferences.json
        #[arg(long)]
        snapshot_dir: PathBuf,

        /// Include every individual change ahead of the net changes
        #[arg(long)]
        history: bool,

        /// Print the HTML body instead of the text body
        #[arg(long)]
        html: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        EnvFilter::new("rsvp_alerts=debug,info")
    } else {
        EnvFilter::new("rsvp_alerts=info,warn")
    };

    let registry = tracing_subscriber::registry().with(filter);
    if cli.json_logs {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }

    match cli.command {
        Commands::Run { dry_run, page_size } => run(dry_run, page_size).await,
        Commands::Preview {
            logs,
            snapshot_dir,
            history,
            html,
        } => preview(&logs, snapshot_dir, history, html).await,
    }
}

async fn run(dry_run: bool, page_size: Option<usize>) -> Result<()> {
    let mut config = AlertConfig::from_env().context("Failed to load configuration")?;
    if let Some(page_size) = page_size {
        if page_size == 0 {
            bail!("--page-size must be at least 1");
        }
        config.page_size = page_size;
    }

    let mailer: Arc<dyn Mailer> = match (&config.smtp, dry_run) {
        (_, true) => Arc::new(LogMailer),
        (Some(smtp), false) => {
            Arc::new(SmtpMailer::new(smtp).context("Failed to create SMTP transport")?)
        }
        (None, false) => bail!("SMTP_HOST is not set; pass --dry-run to run without sending"),
    };

    tracing::info!(
        mode = ?config.mode,
        queue = %config.queue_dir.display(),
        page_size = config.page_size,
        transport = mailer.name(),
        "Starting RSVP alert run"
    );

    let job = AlertJob::from_config(&config, mailer)
        .await
        .context("Failed to set up alert job")?;
    let summary = job.run().await.context("RSVP alert run failed")?;

    println!("\nRSVP Alert Summary");
    println!("   Status: {}", summary.status.as_str());
    println!("   Received: {}", summary.received);
    if summary.malformed > 0 {
        println!("   Malformed: {}", summary.malformed);
    }
    if summary.status != JobStatus::NoMessages {
        println!("   Events changed: {}", summary.events_changed);
        println!("   Net changes: {}", summary.changes);
        for event_id in &summary.unresolved_events {
            eprintln!("     - unknown event {event_id}");
        }
    }
    if summary.status == JobStatus::Dispatched {
        println!("   Sent: {}", summary.sent);
        println!("   Skipped recipients: {}", summary.skipped_recipients);
        if summary.failed > 0 {
            println!("   Failed: {}", summary.failed);
        }
    }

    Ok(())
}

async fn preview(
    logs_path: &Path,
    snapshot_dir: PathBuf,
    history: bool,
    html: bool,
) -> Result<()> {
    let raw = tokio::fs::read_to_string(logs_path)
        .await
        .with_context(|| format!("Failed to read {}", logs_path.display()))?;
    let mut logs: Vec<RsvpLog> = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid RSVP logs in {}", logs_path.display()))?;
    logs.sort_by_key(|log| log.timestamp);

    let store: Arc<dyn BlobStore> = Arc::new(DirectoryBlobStore::new(snapshot_dir));
    let mut snapshot = SnapshotLoader::new(store.clone(), store.clone())
        .load()
        .await
        .context("Failed to load snapshot")?;

    let event_store = BlobEventStore::new(store, DEFAULT_EVENT_RECORDS_PREFIX);
    for event_id in snapshot.backfill_events(&logs, &event_store).await {
        eprintln!("unknown event {event_id}, its changes are skipped");
    }

    let env = |key: &str| std::env::var(key).ok();
    let style = SentenceStyle::from_lookup(env).context("Invalid sentence style settings")?;
    let reconciliation =
        Reconciler::new(&snapshot.events, &snapshot.players, &style).reconcile(&logs);

    if reconciliation.table.is_empty() {
        println!("No net RSVP changes");
        return Ok(());
    }

    if !html && !history {
        print!("{}", text_digest(&reconciliation.table));
        return Ok(());
    }

    let mode = Mode::from_lookup(env).context("Invalid ALERT_MODE")?;
    let renderer = DigestRenderer::new(snapshot.template.as_deref(), mode.subject())?;
    let digest = if history {
        renderer.render_with_history(&reconciliation.table, &reconciliation.history)?
    } else {
        renderer.render(&reconciliation.table)?
    };

    print!("{}", if html { digest.html } else { digest.text });
    Ok(())
}

#![forbid(unsafe_code)]

//! `agent-steward` supervisor binary.
//!
//! Bootstraps configuration and the database, opens the message bus, then
//! runs the watchdog, inbound router, response pipeline and retention
//! service until SIGINT or SIGTERM.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_steward::audit::{spawn_event_consumer, JsonlAuditWriter, Notifier};
use agent_steward::bus::{BusSettings, MessageBus};
use agent_steward::clock::{Clock, MonotonicClock};
use agent_steward::config::GlobalConfig;
use agent_steward::orchestrator::{
    spawn_inbound_router, LifecycleManager, Watchdog, WatchdogSettings,
};
use agent_steward::persistence::commit_repo::CommitRepo;
use agent_steward::persistence::mailbox_repo::MailboxRepo;
use agent_steward::persistence::outcome_repo::OutcomeRepo;
use agent_steward::persistence::{db, retention};
use agent_steward::pipeline::{
    spawn_pipeline_workers, ChangeApplier, CommandChecks, CommitStage, InFlightTracker,
    LeaseTable, PipelineParts, PipelineSettings, ResponsePipeline, ValidationRunner,
};
use agent_steward::runtime::{AgentRuntime, DetachedRuntime, ProcessRuntime, SpawnConfig};
use agent_steward::vcs::{GitRepository, VersionControl};
use agent_steward::workspace::Workspace;
use agent_steward::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-steward", about = "Agent pool supervisor", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured workspace root.
    #[arg(long)]
    workspace: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-steward bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = GlobalConfig::load_from_path(&args.config)?;
    if let Some(ws) = args.workspace {
        config.workspace_root = ws
            .canonicalize()
            .map_err(|err| AppError::Config(format!("invalid workspace override: {err}")))?;
    }
    let config = Arc::new(config);
    info!(workspace = %config.workspace_root.display(), agents = config.agent_pool_size, "configuration loaded");

    // ── Initialize database and bus ─────────────────────
    let db = Arc::new(db::connect(&config.db_path()).await?);
    info!("database connected");

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let bus = MessageBus::open(
        &config.agent_ids(),
        Arc::new(MailboxRepo::new(Arc::clone(&db))),
        Arc::clone(&clock),
        BusSettings {
            max_payload_bytes: config.max_payload_bytes,
            log_capacity: config.bus_log_capacity,
        },
    )
    .await?;

    let ct = CancellationToken::new();

    // ── Notification sink ───────────────────────────────
    let (event_tx, event_rx) = mpsc::channel(config.event_channel_capacity);
    let notifier = Notifier::new(event_tx);
    let audit = Arc::new(JsonlAuditWriter::new(config.log_dir())?);
    let events_handle = spawn_event_consumer(event_rx, audit, ct.clone());

    // ── Response pipeline ───────────────────────────────
    let inflight = InFlightTracker::new();
    let pipeline = Arc::new(build_pipeline(
        &config,
        &db,
        LeaseTable::new(Arc::clone(&clock), config.validation_lease()),
        inflight.clone(),
        notifier.clone(),
    ));

    // ── Agent contexts ──────────────────────────────────
    let runtime: Arc<dyn AgentRuntime> = match &config.agent {
        Some(agent) => Arc::new(ProcessRuntime::new(
            SpawnConfig {
                command: agent.command.clone(),
                args: agent.args.clone(),
                workspace_root: config.workspace_root.clone(),
                max_line_bytes: config.max_payload_bytes,
            },
            bus.clone(),
            ct.clone(),
        )),
        None => {
            info!("no agent command configured; agents read their mailboxes externally");
            Arc::new(DetachedRuntime)
        }
    };

    let lifecycle = Arc::new(LifecycleManager::new(
        bus.clone(),
        Arc::clone(&runtime),
        inflight,
        notifier,
    ));
    lifecycle.start_all().await;

    // ── Background tasks ────────────────────────────────
    let pipeline_handle = spawn_pipeline_workers(&bus, pipeline, ct.clone());
    let router_handle =
        spawn_inbound_router(&bus, Arc::clone(&lifecycle), Arc::clone(&runtime), ct.clone());
    let watchdog_handle = Watchdog::new(
        bus.clone(),
        Arc::clone(&lifecycle),
        WatchdogSettings {
            soft_timeout: config.soft_timeout(),
            hard_timeout: config.hard_timeout(),
            restart_grace: config.restart_grace(),
            poll_interval: config.poll_interval(),
        },
    )
    .spawn(ct.clone());
    let retention_handle =
        retention::spawn_retention_task(Arc::clone(&db), config.retention_days, ct.clone());

    info!("agent-steward ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();
    bus.close();

    // Pipeline workers finish validations already started.
    let _ = tokio::join!(pipeline_handle, router_handle, watchdog_handle, retention_handle);

    for agent in bus.agents() {
        if let Err(err) = runtime.teardown(&agent).await {
            warn!(agent = %agent, %err, "failed to stop agent context");
        }
    }

    let _ = events_handle.await;
    db.close().await;
    info!("agent-steward shut down");

    Ok(())
}

fn build_pipeline(
    config: &GlobalConfig,
    db: &Arc<db::Database>,
    leases: LeaseTable,
    inflight: InFlightTracker,
    notifier: Notifier,
) -> ResponsePipeline {
    let vcs: Arc<dyn VersionControl> = Arc::new(GitRepository::new(config.workspace_root.clone()));
    let workspace = Workspace::new(config.workspace_root.clone());

    ResponsePipeline::new(
        PipelineParts {
            applier: ChangeApplier::new(workspace.clone(), Arc::clone(&vcs), leases),
            validator: ValidationRunner::new(
                workspace.clone(),
                Arc::new(CommandChecks::new(config.checks.clone())),
            ),
            commit: CommitStage::new(workspace, Arc::clone(&vcs), CommitRepo::new(Arc::clone(db))),
            vcs,
            outcomes: OutcomeRepo::new(Arc::clone(db)),
            inflight,
            notifier,
        },
        PipelineSettings {
            max_transient_retries: config.max_transient_retries,
            retry_backoff: config.retry_backoff(),
            validation_lease: config.validation_lease(),
        },
    )
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}

//! Response pipeline: outbound message → descriptor → edit set →
//! validation → commit or discard.
//!
//! Each message id is handled at most once. Outcomes of change-carrying
//! messages are persisted, and the commit log is keyed by origin message,
//! so replays after a process restart or a failed outcome write return the
//! earlier result instead of applying the change again. Conversational
//! messages are skipped without touching the file system or the database.

pub mod applier;
pub mod commit;
pub mod extract;
pub mod inflight;
pub mod lease;
pub mod locate;
pub mod validation;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::audit::Notifier;
use crate::bus::MessageBus;
use crate::models::{
    AgentId, ChangeDescriptor, Direction, EventKind, Message, MessageId, PipelineOutcome,
    ValidationResult,
};
use crate::persistence::outcome_repo::OutcomeRepo;
use crate::vcs::VersionControl;
use crate::{AppError, Result};

pub use applier::{ChangeApplier, LeasedEditSet};
pub use commit::CommitStage;
pub use extract::{classify, ResponsePayload};
pub use inflight::InFlightTracker;
pub use lease::{LeaseGuard, LeaseTable};
pub use validation::{CheckRunner, CommandChecks, ValidationRunner};

/// Reason recorded for messages without a change descriptor.
pub const NO_DESCRIPTOR: &str = "no_descriptor";

/// Retry and timeout tunables.
#[derive(Debug, Clone, Copy)]
pub struct PipelineSettings {
    /// Retries of transient failures before rejecting.
    pub max_transient_retries: u32,
    /// Delay before the first retry; doubled on each further retry.
    pub retry_backoff: Duration,
    /// Upper bound on validation; matches the lease duration.
    pub validation_lease: Duration,
}

/// Collaborators of the pipeline.
pub struct PipelineParts {
    /// Descriptor materialization.
    pub applier: ChangeApplier,
    /// Check suite execution.
    pub validator: ValidationRunner,
    /// Live tree writer.
    pub commit: CommitStage,
    /// Revision source for retries.
    pub vcs: Arc<dyn VersionControl>,
    /// Persistent outcome ledger.
    pub outcomes: OutcomeRepo,
    /// In-flight edit set tracking shared with the lifecycle manager.
    pub inflight: InFlightTracker,
    /// Event sink.
    pub notifier: Notifier,
}

/// Handles outbound messages exactly once per message id.
pub struct ResponsePipeline {
    parts: PipelineParts,
    settings: PipelineSettings,
    handled: Mutex<HashMap<MessageId, Arc<OnceCell<PipelineOutcome>>>>,
}

impl ResponsePipeline {
    /// Assemble a pipeline.
    #[must_use]
    pub fn new(parts: PipelineParts, settings: PipelineSettings) -> Self {
        Self {
            parts,
            settings,
            handled: Mutex::new(HashMap::new()),
        }
    }

    /// Tracker of edit sets currently between apply and commit.
    #[must_use]
    pub fn inflight(&self) -> &InFlightTracker {
        &self.parts.inflight
    }

    /// Handle one outbound message.
    ///
    /// Concurrent and repeated calls for the same message id share a
    /// single execution and return the same outcome.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the outcome ledger cannot be read or
    /// written; the message may then be handled again later.
    pub async fn handle(&self, message: &Message) -> Result<PipelineOutcome> {
        if message.direction != Direction::Outbound {
            return Ok(PipelineOutcome::Skipped("inbound".into()));
        }

        let descriptor = match classify(message) {
            ResponsePayload::ConversationalText => {
                return Ok(PipelineOutcome::Skipped(NO_DESCRIPTOR.into()));
            }
            ResponsePayload::Unrecognized(reason) => Err(AppError::MalformedEdit(reason)),
            ResponsePayload::ChangeDescriptor(descriptor) => Ok(descriptor),
        };

        let cell = {
            let mut handled = self.handled.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(handled.entry(message.id.clone()).or_default())
        };

        let span = info_span!("handle_message", message_id = %message.id, agent = %message.agent);
        let outcome = cell
            .get_or_try_init(|| self.process(message, descriptor).instrument(span))
            .await
            .cloned();

        // Later replays are answered by the outcome ledger.
        let mut handled = self.handled.lock().unwrap_or_else(PoisonError::into_inner);
        if handled
            .get(&message.id)
            .is_some_and(|current| Arc::ptr_eq(current, &cell))
        {
            handled.remove(&message.id);
        }
        outcome
    }

    async fn process(
        &self,
        message: &Message,
        descriptor: Result<ChangeDescriptor>,
    ) -> Result<PipelineOutcome> {
        if let Some(stored) = self.parts.outcomes.get(&message.id).await? {
            debug!(outcome = stored.label(), "replayed stored outcome");
            return Ok(stored);
        }

        // A commit whose outcome was never recorded still counts.
        let outcome = if let Some(record) = self.parts.commit.committed_for(&message.id).await? {
            debug!(revision = %record.revision, "recovered outcome from commit log");
            PipelineOutcome::Committed(record)
        } else {
            match descriptor {
                Ok(descriptor) => self.run_with_retries(&descriptor).await,
                Err(err) => PipelineOutcome::Rejected(ValidationResult::from_error(&err)),
            }
        };

        self.parts
            .outcomes
            .record(&message.id, &message.agent, &outcome)
            .await?;

        match &outcome {
            PipelineOutcome::Committed(record) => {
                self.parts.notifier.emit(
                    EventKind::Committed,
                    &message.agent,
                    record.revision.to_string(),
                );
            }
            PipelineOutcome::Rejected(result) => {
                self.parts.notifier.emit(
                    EventKind::Rejected,
                    &message.agent,
                    result.failing_checks.join(","),
                );
            }
            PipelineOutcome::Skipped(_) => {}
        }

        info!(outcome = outcome.label(), "message handled");
        Ok(outcome)
    }

    async fn run_with_retries(&self, descriptor: &ChangeDescriptor) -> PipelineOutcome {
        let mut attempt = 0u32;
        loop {
            match self.attempt(descriptor).await {
                Ok(outcome) => return outcome,
                Err(err) if err.is_transient() && attempt < self.settings.max_transient_retries => {
                    attempt += 1;
                    let delay = self.settings.retry_backoff * 2u32.saturating_pow(attempt - 1);
                    debug!(%err, attempt, delay_ms = delay.as_millis(), "transient failure, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    warn!(%err, attempt, "change rejected");
                    return PipelineOutcome::Rejected(ValidationResult::from_error(&err));
                }
            }
        }
    }

    /// One pass against a freshly read base revision.
    async fn attempt(&self, descriptor: &ChangeDescriptor) -> Result<PipelineOutcome> {
        let _inflight = self.parts.inflight.begin(&descriptor.agent);

        let base = self.parts.vcs.current_revision().await?;
        let LeasedEditSet { edit_set, lease } = self.parts.applier.apply(descriptor, &base).await?;

        let result = match tokio::time::timeout(
            self.settings.validation_lease,
            self.parts.validator.validate(&edit_set),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                self.parts.commit.discard(&edit_set, "validation exceeded lease");
                return Err(AppError::LeaseExpired(format!(
                    "validation of {} exceeded {}s",
                    descriptor.origin_message,
                    self.settings.validation_lease.as_secs()
                )));
            }
        };

        if !result.passed {
            self.parts.commit.discard(&edit_set, "validation failed");
            return Ok(PipelineOutcome::Rejected(result));
        }

        match self.parts.commit.commit(&edit_set, &result, &lease).await {
            Ok(record) => Ok(PipelineOutcome::Committed(record)),
            Err(err) => {
                self.parts.commit.discard(&edit_set, "commit refused");
                Err(err)
            }
        }
    }
}

/// Spawn the pipeline dispatcher.
///
/// Outbound messages are routed to one worker per agent: each agent's
/// messages are handled in cycle order, different agents in parallel. On
/// cancellation the dispatcher stops reading; workers drain the messages
/// already routed to them, so started validations run to completion.
#[must_use]
pub fn spawn_pipeline_workers(
    bus: &MessageBus,
    pipeline: Arc<ResponsePipeline>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    let mut subscription = bus.subscribe(Direction::Outbound);
    let agents = bus.agents();

    tokio::spawn(
        async move {
            let mut senders: HashMap<AgentId, mpsc::UnboundedSender<Message>> = HashMap::new();
            let mut workers = Vec::with_capacity(agents.len());
            for agent in agents {
                let (tx, rx) = mpsc::unbounded_channel();
                senders.insert(agent.clone(), tx);
                workers.push(tokio::spawn(
                    run_worker(Arc::clone(&pipeline), rx)
                        .instrument(info_span!("pipeline_worker", agent = %agent)),
                ));
            }

            loop {
                let message = tokio::select! {
                    () = cancel.cancelled() => break,
                    next = subscription.next() => match next {
                        Some(message) => message,
                        None => break,
                    },
                };
                if let Some(tx) = senders.get(&message.agent) {
                    if tx.send(message).is_err() {
                        error!("pipeline worker exited unexpectedly");
                    }
                }
            }

            drop(senders);
            for worker in workers {
                let _ = worker.await;
            }
            info!("pipeline workers stopped");
        }
        .instrument(info_span!("pipeline_dispatcher")),
    )
}

async fn run_worker(pipeline: Arc<ResponsePipeline>, mut rx: mpsc::UnboundedReceiver<Message>) {
    while let Some(message) = rx.recv().await {
        if let Err(err) = pipeline.handle(&message).await {
            error!(%err, message_id = %message.id, "pipeline failed to record outcome");
        }
    }
}

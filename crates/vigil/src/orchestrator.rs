// Stream orchestrator: single authority for the active source tier and
// playback state. Runs as one event-loop task; adapter pumps, the prober,
// and the public handle only ever talk to it through channels, so every
// state mutation happens on this task.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::adapter::EngineFactory;
use crate::config::FailoverConfig;
use crate::events::{EngineEvent, ErrorKind};
use crate::journal::{ActivityJournal, StatusSnapshot};
use crate::monitor::HealthSignal;
use crate::prober::{ProbeHandle, ProbeOutcome, ProbeReport};
use crate::session::{EngineEventEnvelope, PlaybackSession};
use crate::state::PlaybackState;
use crate::tier::SourceTier;

const COMMAND_BUFFER: usize = 16;
const ENGINE_EVENT_BUFFER: usize = 64;
const PROBE_REPORT_BUFFER: usize = 4;

#[derive(Debug)]
enum Command {
    Start,
    Stop,
    ReportFatalFailure { reason: String },
    ReportRecoverableIssue { reason: String },
    ReportBufferEscalation,
    PrimaryRecovered,
    ConfirmUserStart,
}

/// The orchestrator task has exited and no longer accepts commands.
#[derive(Debug, thiserror::Error)]
#[error("orchestrator has shut down")]
pub struct OrchestratorClosed;

/// Owner handle for a spawned [`StreamOrchestrator`].
///
/// Dropping the handle (or calling [`shutdown`](Self::shutdown)) tears the
/// orchestrator down along with its session, probe, and timers.
pub struct OrchestratorHandle {
    cmd_tx: mpsc::Sender<Command>,
    status_rx: watch::Receiver<StatusSnapshot>,
    journal: Arc<ActivityJournal>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl OrchestratorHandle {
    /// Initialize playback on the highest-priority configured tier.
    pub async fn start(&self) -> Result<(), OrchestratorClosed> {
        self.send(Command::Start).await
    }

    /// Tear down the active session, probe, and pending timers. Idempotent.
    pub async fn stop(&self) -> Result<(), OrchestratorClosed> {
        self.send(Command::Stop).await
    }

    /// Report an unrecoverable condition for the active tier.
    pub async fn report_fatal_failure(
        &self,
        reason: impl Into<String>,
    ) -> Result<(), OrchestratorClosed> {
        self.send(Command::ReportFatalFailure {
            reason: reason.into(),
        })
        .await
    }

    /// Advisory journal entry; never a state transition.
    pub async fn report_recoverable_issue(
        &self,
        reason: impl Into<String>,
    ) -> Result<(), OrchestratorClosed> {
        self.send(Command::ReportRecoverableIssue {
            reason: reason.into(),
        })
        .await
    }

    /// Buffer-health thresholds tripped; same policy as a fatal failure.
    pub async fn report_buffer_escalation(&self) -> Result<(), OrchestratorClosed> {
        self.send(Command::ReportBufferEscalation).await
    }

    /// Force an immediate switch back to the preferred tier.
    pub async fn notify_primary_recovered(&self) -> Result<(), OrchestratorClosed> {
        self.send(Command::PrimaryRecovered).await
    }

    /// The user performed the explicit start gesture after an autoplay
    /// rejection; clears the gate without a state transition.
    pub async fn confirm_user_start(&self) -> Result<(), OrchestratorClosed> {
        self.send(Command::ConfirmUserStart).await
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status_rx.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_rx.clone()
    }

    pub fn journal(&self) -> Arc<ActivityJournal> {
        Arc::clone(&self.journal)
    }

    /// Stop the orchestrator task and wait for its teardown to finish.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.task.await;
    }

    async fn send(&self, command: Command) -> Result<(), OrchestratorClosed> {
        self.cmd_tx
            .send(command)
            .await
            .map_err(|_| OrchestratorClosed)
    }
}

/// The failover state machine.
pub struct StreamOrchestrator {
    config: FailoverConfig,
    factory: Arc<dyn EngineFactory>,
    journal: Arc<ActivityJournal>,
    status_tx: watch::Sender<StatusSnapshot>,
    cmd_rx: mpsc::Receiver<Command>,
    engine_tx: mpsc::Sender<EngineEventEnvelope>,
    engine_rx: mpsc::Receiver<EngineEventEnvelope>,
    probe_tx: mpsc::Sender<ProbeReport>,
    probe_rx: mpsc::Receiver<ProbeReport>,
    shutdown: CancellationToken,

    /// `None` before `start()` and after `stop()`.
    state: Option<PlaybackState>,
    tier: SourceTier,
    session: Option<PlaybackSession>,
    probe: Option<ProbeHandle>,
    retry_count: u32,
    retry_at: Option<Instant>,
    probe_retry_at: Option<Instant>,
    /// Failure recorded by a handler that cannot apply the policy inline
    /// (session init); drained at the top of the loop.
    pending_failure: Option<String>,
    next_generation: u64,
    next_probe_attempt: u64,
}

impl StreamOrchestrator {
    /// Spawn the orchestrator task. Playback does not begin until
    /// [`OrchestratorHandle::start`] is called.
    pub fn spawn(config: FailoverConfig, factory: Arc<dyn EngineFactory>) -> OrchestratorHandle {
        let journal = ActivityJournal::new(config.journal_capacity);
        let (status_tx, status_rx) = watch::channel(StatusSnapshot::idle(config.retry.max_retries));
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
        let (engine_tx, engine_rx) = mpsc::channel(ENGINE_EVENT_BUFFER);
        let (probe_tx, probe_rx) = mpsc::channel(PROBE_REPORT_BUFFER);
        let shutdown = CancellationToken::new();

        let orchestrator = Self {
            config,
            factory,
            journal: Arc::clone(&journal),
            status_tx,
            cmd_rx,
            engine_tx,
            engine_rx,
            probe_tx,
            probe_rx,
            shutdown: shutdown.clone(),
            state: None,
            tier: SourceTier::Primary,
            session: None,
            probe: None,
            retry_count: 0,
            retry_at: None,
            probe_retry_at: None,
            pending_failure: None,
            next_generation: 0,
            next_probe_attempt: 0,
        };

        let task = tokio::spawn(orchestrator.run());

        OrchestratorHandle {
            cmd_tx,
            status_rx,
            journal,
            shutdown,
            task,
        }
    }

    async fn run(mut self) {
        info!("stream orchestrator started");
        loop {
            // Failures recorded mid-handler (e.g. session init) re-enter the
            // policy here instead of recursing.
            if let Some(reason) = self.pending_failure.take() {
                self.apply_failure_policy(&reason).await;
                self.push_status();
                continue;
            }

            let watchdog_at = self.watchdog_deadline();

            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => {
                    self.halt("shutting down").await;
                    break;
                }

                maybe_cmd = self.cmd_rx.recv() => {
                    match maybe_cmd {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            self.halt("control handle dropped").await;
                            break;
                        }
                    }
                }

                Some(envelope) = self.engine_rx.recv() => {
                    self.handle_engine_event(envelope).await;
                }

                Some(report) = self.probe_rx.recv() => {
                    self.handle_probe_report(report).await;
                }

                _ = maybe_deadline(self.retry_at), if self.retry_at.is_some() => {
                    self.fire_retry().await;
                }

                _ = maybe_deadline(self.probe_retry_at), if self.probe_retry_at.is_some() => {
                    self.fire_probe_retry();
                }

                _ = maybe_deadline(watchdog_at), if watchdog_at.is_some() => {
                    self.fire_watchdog().await;
                }
            }

            self.push_status();
        }
        info!("stream orchestrator finished");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start => {
                if self.state.is_some() {
                    self.journal.warning("start ignored: playback already active");
                    return;
                }
                self.journal.info("starting playback");
                self.enter_tier(SourceTier::Primary).await;
            }
            Command::Stop => {
                self.halt("stop requested").await;
            }
            Command::ReportFatalFailure { reason } => {
                if self.state.is_none() {
                    return;
                }
                self.journal
                    .error(format!("fatal failure on {}: {reason}", self.tier));
                self.apply_failure_policy(&reason).await;
            }
            Command::ReportRecoverableIssue { reason } => {
                self.journal
                    .warning(format!("recoverable issue on {}: {reason}", self.tier));
            }
            Command::ReportBufferEscalation => {
                self.escalate("buffer escalation reported").await;
            }
            Command::PrimaryRecovered => {
                self.recover_to_primary("recovery reported").await;
            }
            Command::ConfirmUserStart => {
                if let Some(session) = self.session.as_mut()
                    && session.user_start_required
                {
                    session.user_start_required = false;
                    self.journal.success("manual start confirmed by user");
                }
            }
        }
    }

    async fn handle_engine_event(&mut self, envelope: EngineEventEnvelope) {
        let Some(session) = self.session.as_mut() else {
            trace!(generation = envelope.generation, "engine event without session, dropped");
            return;
        };
        if envelope.generation != session.generation {
            trace!(
                generation = envelope.generation,
                live = session.generation,
                "stale engine event dropped"
            );
            return;
        }

        let now = Instant::now();
        let tier = session.tier;
        match envelope.event {
            EngineEvent::ManifestReady => {
                session.health.on_manifest_ready(now);
                debug!(tier = %tier, url = %session.endpoint, "manifest ready");
                if self.state == Some(PlaybackState::Connecting) {
                    self.state = Some(PlaybackState::Playing);
                }
                self.journal
                    .success(format!("{tier} manifest ready, playback started"));
            }
            EngineEvent::FragmentLoaded { sequence, bytes } => {
                session.health.on_fragment(now);
                trace!(sequence, bytes, tier = %tier, "fragment arrived");
            }
            EngineEvent::QualityChanged { level } => {
                self.journal
                    .info(format!("quality level changed to {level}"));
            }
            EngineEvent::PlaybackBlocked { detail } => {
                session.user_start_required = true;
                if self.state == Some(PlaybackState::Connecting) {
                    self.state = Some(PlaybackState::Playing);
                }
                self.journal.warning(format!(
                    "autoplay rejected, waiting for user start: {detail}"
                ));
            }
            EngineEvent::Error {
                fatal: true,
                detail,
                ..
            } => {
                self.journal
                    .error(format!("fatal failure on {tier}: {detail}"));
                self.apply_failure_policy(&detail).await;
            }
            EngineEvent::Error {
                kind: ErrorKind::Stall,
                detail,
                ..
            } => {
                let signal = session.health.on_stall(now, &self.config.health);
                match signal {
                    HealthSignal::Logged => {
                        self.journal
                            .warning(format!("buffer stall on {tier}: {detail}"));
                    }
                    HealthSignal::Escalate { reason } => {
                        self.escalate(&reason).await;
                    }
                }
            }
            EngineEvent::Error {
                kind: ErrorKind::Media,
                detail,
                ..
            } => {
                self.journal.warning(format!(
                    "media error on {tier}, attempting in-place recovery: {detail}"
                ));
                session.recover_media_error().await;
            }
            EngineEvent::Error { detail, .. } => {
                self.journal
                    .warning(format!("recoverable issue on {tier}: {detail}"));
            }
            EngineEvent::Ended => {
                self.journal
                    .error(format!("{tier} stream ended unexpectedly"));
                self.apply_failure_policy("stream ended").await;
            }
        }
    }

    async fn handle_probe_report(&mut self, report: ProbeReport) {
        let stale = self
            .probe
            .as_ref()
            .is_none_or(|probe| probe.attempt != report.attempt);
        if stale {
            trace!(attempt = report.attempt, "stale probe report dropped");
            return;
        }
        if let Some(probe) = self.probe.take() {
            probe.teardown();
        }

        match report.outcome {
            ProbeOutcome::Verified { fragments } => {
                self.journal.success(format!(
                    "primary verified by background probe ({fragments} fragments)"
                ));
                self.recover_to_primary("probe verified stability").await;
            }
            ProbeOutcome::InsufficientEvidence { fragments } => {
                self.journal.info(format!(
                    "primary probe inconclusive ({fragments} fragments), will retry"
                ));
                self.schedule_probe_retry();
            }
            ProbeOutcome::Failed { detail } => {
                self.journal
                    .info(format!("primary probe failed: {detail}, will retry"));
                self.schedule_probe_retry();
            }
        }
    }

    async fn escalate(&mut self, reason: &str) {
        if self.state.is_none() {
            return;
        }
        self.journal
            .error(format!("buffer escalation on {}: {reason}", self.tier));
        self.apply_failure_policy(reason).await;
    }

    /// Retry/advance policy shared by fatal errors and buffer escalations.
    async fn apply_failure_policy(&mut self, reason: &str) {
        if self.state.is_none() {
            return;
        }
        if let Some(session) = self.session.take() {
            session.teardown().await;
        }

        if self.retry_count < self.config.retry.max_retries {
            self.retry_count += 1;
            self.state = Some(PlaybackState::Connecting);
            let delay = self.config.retry.delay();
            self.retry_at = Some(Instant::now() + delay);
            self.journal.warning(format!(
                "retrying {} in {}s (attempt {}/{})",
                self.tier,
                delay.as_secs(),
                self.retry_count,
                self.config.retry.max_retries
            ));
            debug!(tier = %self.tier, reason, "retry scheduled");
        } else {
            let next = self.config.endpoints.next_configured(self.tier);
            self.journal.warning(format!(
                "retries exhausted on {}, advancing to {next}",
                self.tier
            ));
            warn!(from = %self.tier, to = %next, reason, "advancing source tier");
            self.enter_tier(next).await;
        }
    }

    /// Enter `tier` with fresh counters, tearing down any previous session
    /// first. Engine tiers connect immediately; embed/hold tiers render
    /// without a session.
    async fn enter_tier(&mut self, tier: SourceTier) {
        if let Some(session) = self.session.take() {
            session.teardown().await;
        }
        self.tier = tier;
        self.retry_count = 0;
        self.retry_at = None;

        if tier.uses_engine() {
            self.state = Some(PlaybackState::Connecting);
            self.start_session().await;
        } else if tier == SourceTier::Fallback {
            self.state = Some(PlaybackState::FallbackActive);
            self.journal.info("interactive fallback embed active");
        } else {
            self.state = Some(PlaybackState::HoldActive);
            self.journal
                .warning("no live source viable, hold screen active");
        }

        self.ensure_probe_policy();
    }

    /// Create a session for the active tier. On failure the policy re-enters
    /// through `pending_failure` rather than recursing.
    async fn start_session(&mut self) {
        let Some(endpoint) = self.config.endpoints.endpoint(self.tier).cloned() else {
            self.pending_failure = Some(format!("no endpoint configured for {}", self.tier));
            return;
        };

        let generation = self.next_generation;
        self.next_generation += 1;

        match PlaybackSession::create(
            &*self.factory,
            self.tier,
            endpoint,
            &self.config.surface,
            generation,
            self.engine_tx.clone(),
            &self.shutdown,
        )
        .await
        {
            Ok(session) => {
                self.session = Some(session);
                self.journal
                    .info(format!("connecting to {} source", self.tier));
            }
            Err(e) => {
                self.journal
                    .error(format!("failed to initialize {} engine: {e}", self.tier));
                self.pending_failure = Some(e.to_string());
            }
        }
    }

    /// Start or stop probing according to the active tier.
    fn ensure_probe_policy(&mut self) {
        if self.state.is_none() || self.tier == SourceTier::Primary {
            if let Some(probe) = self.probe.take() {
                probe.teardown();
            }
            self.probe_retry_at = None;
            return;
        }
        if self.probe.is_none() && self.probe_retry_at.is_none() {
            self.start_probe();
        }
    }

    fn start_probe(&mut self) {
        // Starting a new probe always destroys any prior instance first.
        if let Some(probe) = self.probe.take() {
            probe.teardown();
        }
        let attempt = self.next_probe_attempt;
        self.next_probe_attempt += 1;
        self.probe = Some(ProbeHandle::spawn(
            attempt,
            Arc::clone(&self.factory),
            self.config.endpoints.primary.clone(),
            self.config.probe.clone(),
            self.probe_tx.clone(),
            &self.shutdown,
        ));
        self.journal.info("probing primary source in background");
    }

    fn schedule_probe_retry(&mut self) {
        if self.state.is_none() || self.tier == SourceTier::Primary {
            return;
        }
        self.probe_retry_at = Some(Instant::now() + self.config.probe.retry_delay);
    }

    /// Forced switch back to the preferred tier: cancels the probe and any
    /// pending retry, resets all counters.
    async fn recover_to_primary(&mut self, reason: &str) {
        if self.state.is_none() {
            return;
        }
        debug!(from = %self.tier, reason, "forcing primary re-initialization");
        self.journal
            .success(format!("switching back to primary: {reason}"));
        if let Some(probe) = self.probe.take() {
            probe.teardown();
        }
        self.probe_retry_at = None;
        self.retry_at = None;
        self.enter_tier(SourceTier::Primary).await;
    }

    async fn fire_retry(&mut self) {
        self.retry_at = None;
        if self.state.is_none() {
            return;
        }
        self.journal.info(format!(
            "re-initializing {} (attempt {}/{})",
            self.tier, self.retry_count, self.config.retry.max_retries
        ));
        self.state = Some(PlaybackState::Connecting);
        self.start_session().await;
    }

    fn fire_probe_retry(&mut self) {
        self.probe_retry_at = None;
        if self.state.is_none() || self.tier == SourceTier::Primary {
            return;
        }
        if self.probe.is_none() {
            self.start_probe();
        }
    }

    async fn fire_watchdog(&mut self) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if self.state != Some(PlaybackState::Playing) {
            return;
        }
        let signal = session.health.on_watchdog(Instant::now(), &self.config.health);
        if let HealthSignal::Escalate { reason } = signal {
            self.escalate(&reason).await;
        }
    }

    fn watchdog_deadline(&self) -> Option<Instant> {
        if self.state != Some(PlaybackState::Playing) {
            return None;
        }
        self.session
            .as_ref()
            .and_then(|session| session.health.watchdog_deadline(&self.config.health))
    }

    /// Full teardown; used by `stop()`, handle drop, and shutdown.
    async fn halt(&mut self, reason: &str) {
        if let Some(session) = self.session.take() {
            session.teardown().await;
        }
        if let Some(probe) = self.probe.take() {
            probe.teardown();
        }
        self.retry_at = None;
        self.probe_retry_at = None;
        self.pending_failure = None;
        if self.state.take().is_some() {
            self.journal.info(format!("playback stopped: {reason}"));
        }
        self.push_status();
    }

    fn push_status(&self) {
        let snapshot = StatusSnapshot {
            state: self.state,
            tier: self.tier,
            retry_count: self.retry_count,
            max_retries: self.config.retry.max_retries,
            user_start_required: self
                .session
                .as_ref()
                .is_some_and(|session| session.user_start_required),
            probing: self.probe.is_some(),
        };
        self.status_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

/// Sleep until `at`, or forever when no deadline is pending. Keeps the
/// select arms free of `Option` plumbing.
async fn maybe_deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

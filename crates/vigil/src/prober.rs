// Recovery prober: verifies, without touching the live viewer, that the
// preferred tier has become reliable before the orchestrator switches back.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use crate::adapter::{EngineFactory, EngineRole, MediaSurface};
use crate::config::ProbeConfig;
use crate::events::EngineEvent;

/// Result of one probe attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// Enough fragments arrived within the stability window.
    Verified { fragments: u32 },
    /// The window expired with too few fragments; probe again later.
    InsufficientEvidence { fragments: u32 },
    /// The probe died before the window could complete.
    Failed { detail: String },
}

/// Outcome tagged with its attempt number so the orchestrator can discard
/// reports from probes it has already torn down.
#[derive(Debug)]
pub(crate) struct ProbeReport {
    pub attempt: u64,
    pub outcome: ProbeOutcome,
}

const PROBE_EVENT_BUFFER: usize = 32;

/// Owner handle for the single in-flight probe.
pub(crate) struct ProbeHandle {
    pub attempt: u64,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl ProbeHandle {
    /// Spawn a probe attempt against the preferred endpoint. The task
    /// reports exactly once unless cancelled first.
    pub fn spawn(
        attempt: u64,
        factory: Arc<dyn EngineFactory>,
        endpoint: Url,
        config: ProbeConfig,
        report_tx: mpsc::Sender<ProbeReport>,
        parent: &CancellationToken,
    ) -> Self {
        let token = parent.child_token();
        let task_token = token.clone();
        let task = tokio::spawn(async move {
            if let Some(outcome) = run_probe(&*factory, &endpoint, &config, &task_token).await {
                let _ = report_tx.send(ProbeReport { attempt, outcome }).await;
            }
        });
        debug!(attempt, "recovery probe started");
        Self {
            attempt,
            token,
            task,
        }
    }

    /// Cancel the attempt and drop its engine. Idempotent with respect to a
    /// probe that already reported.
    pub fn teardown(self) {
        self.token.cancel();
        self.task.abort();
    }
}

/// One-shot stability check against an endpoint, using the same verification
/// logic as the background prober.
pub async fn probe_endpoint(
    factory: &dyn EngineFactory,
    endpoint: &Url,
    config: &ProbeConfig,
) -> ProbeOutcome {
    let token = CancellationToken::new();
    run_probe(factory, endpoint, config, &token)
        .await
        .unwrap_or(ProbeOutcome::Failed {
            detail: "probe cancelled".to_string(),
        })
}

/// Drive one isolated probe attempt. Returns `None` when cancelled mid-way,
/// in which case no report is sent.
async fn run_probe(
    factory: &dyn EngineFactory,
    endpoint: &Url,
    config: &ProbeConfig,
    token: &CancellationToken,
) -> Option<ProbeOutcome> {
    let (event_tx, mut event_rx) = mpsc::channel(PROBE_EVENT_BUFFER);

    let mut engine = match factory
        .create(endpoint, EngineRole::Probe, event_tx, token.clone())
        .await
    {
        Ok(engine) => engine,
        Err(e) => {
            return Some(ProbeOutcome::Failed {
                detail: e.to_string(),
            });
        }
    };
    engine.attach_media(&MediaSurface::Detached);

    if let Err(e) = engine.load_source(endpoint).await {
        engine.destroy().await;
        return Some(ProbeOutcome::Failed {
            detail: e.to_string(),
        });
    }

    // Phase 1: the probe must produce a manifest within its budget.
    let manifest_deadline = Instant::now() + config.manifest_timeout;
    let outcome = loop {
        tokio::select! {
            _ = token.cancelled() => {
                engine.destroy().await;
                return None;
            }
            _ = tokio::time::sleep_until(manifest_deadline) => {
                break Some(ProbeOutcome::Failed {
                    detail: "no manifest within probe budget".to_string(),
                });
            }
            maybe_event = event_rx.recv() => {
                match maybe_event {
                    Some(EngineEvent::ManifestReady) => break None,
                    Some(EngineEvent::Error { fatal: true, detail, .. }) => {
                        break Some(ProbeOutcome::Failed { detail });
                    }
                    Some(EngineEvent::Ended) => {
                        break Some(ProbeOutcome::Failed {
                            detail: "probed stream ended".to_string(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        break Some(ProbeOutcome::Failed {
                            detail: "probe engine closed its event channel".to_string(),
                        });
                    }
                }
            }
        }
    };
    if let Some(outcome) = outcome {
        engine.destroy().await;
        return Some(outcome);
    }

    // Phase 2: count fragments until the stability window expires.
    let window_deadline = Instant::now() + config.stability_window;
    let mut fragments: u32 = 0;
    let outcome = loop {
        tokio::select! {
            _ = token.cancelled() => {
                engine.destroy().await;
                return None;
            }
            _ = tokio::time::sleep_until(window_deadline) => {
                if fragments >= config.min_fragments {
                    break ProbeOutcome::Verified { fragments };
                }
                break ProbeOutcome::InsufficientEvidence { fragments };
            }
            maybe_event = event_rx.recv() => {
                match maybe_event {
                    Some(EngineEvent::FragmentLoaded { .. }) => {
                        fragments += 1;
                        trace!(fragments, "probe fragment arrived");
                    }
                    Some(EngineEvent::Error { fatal: true, detail, .. }) => {
                        break ProbeOutcome::Failed { detail };
                    }
                    Some(EngineEvent::Ended) => {
                        break ProbeOutcome::Failed {
                            detail: "probed stream ended".to_string(),
                        };
                    }
                    Some(_) => {}
                    None => {
                        break ProbeOutcome::Failed {
                            detail: "probe engine closed its event channel".to_string(),
                        };
                    }
                }
            }
        }
    };

    engine.destroy().await;
    Some(outcome)
}

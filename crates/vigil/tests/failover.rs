// Failover scenario suite. Engines are scripted test doubles injected
// through the public factory seam; every timing-sensitive case runs under
// paused tokio time so retries, grace windows, and probe windows are
// deterministic.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

use vigil_engine::{
    EngineError, EngineEvent, EngineFactory, EngineRole, ErrorKind, FailoverConfig, MediaSurface,
    PlaybackEngine, PlaybackState, SourceTier, StatusSnapshot, StreamOrchestrator,
};

// --- Scripted engine double ---

#[derive(Debug, Clone)]
enum Step {
    Wait(Duration),
    Emit(EngineEvent),
}

#[derive(Debug, Clone, Default)]
struct Script {
    fail_create: bool,
    steps: Vec<Step>,
}

impl Script {
    fn failing_create() -> Self {
        Self {
            fail_create: true,
            steps: Vec::new(),
        }
    }

    fn fatal_after(delay: Duration) -> Self {
        Self {
            fail_create: false,
            steps: vec![
                Step::Wait(delay),
                Step::Emit(EngineEvent::fatal_error(ErrorKind::Network, "origin down")),
            ],
        }
    }

    fn healthy() -> Self {
        let mut steps = vec![Step::Emit(EngineEvent::ManifestReady)];
        for sequence in 1..=100 {
            steps.push(Step::Wait(Duration::from_secs(2)));
            steps.push(Step::Emit(EngineEvent::FragmentLoaded {
                sequence,
                bytes: 64 * 1024,
            }));
        }
        Self {
            fail_create: false,
            steps,
        }
    }

    fn probe_with_fragments(count: u64) -> Self {
        let mut steps = vec![Step::Emit(EngineEvent::ManifestReady)];
        for sequence in 1..=count {
            steps.push(Step::Wait(Duration::from_secs(2)));
            steps.push(Step::Emit(EngineEvent::FragmentLoaded {
                sequence,
                bytes: 64 * 1024,
            }));
        }
        Self {
            fail_create: false,
            steps,
        }
    }
}

#[derive(Debug, Default)]
struct InstanceCounters {
    live_viewers: usize,
    max_viewers: usize,
    total_viewers: usize,
    live_probes: usize,
    max_probes: usize,
    total_probes: usize,
}

struct InstanceGuard {
    counters: Arc<Mutex<InstanceCounters>>,
    role: EngineRole,
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        let mut counters = self.counters.lock();
        match self.role {
            EngineRole::Viewer => counters.live_viewers -= 1,
            EngineRole::Probe => counters.live_probes -= 1,
        }
    }
}

struct ScriptedEngine {
    script: Script,
    events: mpsc::Sender<EngineEvent>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
    _guard: InstanceGuard,
}

#[async_trait]
impl PlaybackEngine for ScriptedEngine {
    async fn load_source(&mut self, _url: &Url) -> Result<(), EngineError> {
        let steps = self.script.steps.clone();
        let events = self.events.clone();
        let token = self.token.clone();
        self.task = Some(tokio::spawn(async move {
            for step in steps {
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = run_step(&step, &events) => {}
                }
            }
        }));
        Ok(())
    }

    fn attach_media(&mut self, _surface: &MediaSurface) {}

    async fn destroy(&mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_step(step: &Step, events: &mpsc::Sender<EngineEvent>) {
    match step {
        Step::Wait(delay) => tokio::time::sleep(*delay).await,
        Step::Emit(event) => {
            let _ = events.send(event.clone()).await;
        }
    }
}

struct ScriptedFactory {
    viewer_scripts: Mutex<VecDeque<Script>>,
    probe_scripts: Mutex<VecDeque<Script>>,
    counters: Arc<Mutex<InstanceCounters>>,
}

impl ScriptedFactory {
    fn new(viewer: Vec<Script>, probe: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            viewer_scripts: Mutex::new(viewer.into()),
            probe_scripts: Mutex::new(probe.into()),
            counters: Arc::new(Mutex::new(InstanceCounters::default())),
        })
    }

    fn counters(&self) -> InstanceCounters {
        let counters = self.counters.lock();
        InstanceCounters {
            live_viewers: counters.live_viewers,
            max_viewers: counters.max_viewers,
            total_viewers: counters.total_viewers,
            live_probes: counters.live_probes,
            max_probes: counters.max_probes,
            total_probes: counters.total_probes,
        }
    }
}

#[async_trait]
impl EngineFactory for ScriptedFactory {
    async fn create(
        &self,
        _endpoint: &Url,
        role: EngineRole,
        events: mpsc::Sender<EngineEvent>,
        token: CancellationToken,
    ) -> Result<Box<dyn PlaybackEngine>, EngineError> {
        let script = match role {
            EngineRole::Viewer => self.viewer_scripts.lock().pop_front().unwrap_or_default(),
            EngineRole::Probe => self.probe_scripts.lock().pop_front().unwrap_or_default(),
        };
        if script.fail_create {
            return Err(EngineError::Internal {
                reason: "scripted create failure".to_string(),
            });
        }

        {
            let mut counters = self.counters.lock();
            match role {
                EngineRole::Viewer => {
                    counters.live_viewers += 1;
                    counters.total_viewers += 1;
                    counters.max_viewers = counters.max_viewers.max(counters.live_viewers);
                }
                EngineRole::Probe => {
                    counters.live_probes += 1;
                    counters.total_probes += 1;
                    counters.max_probes = counters.max_probes.max(counters.live_probes);
                }
            }
        }

        Ok(Box::new(ScriptedEngine {
            script,
            events,
            token,
            task: None,
            _guard: InstanceGuard {
                counters: Arc::clone(&self.counters),
                role,
            },
        }))
    }
}

// --- Harness helpers ---

fn config(secondary: bool, fallback: bool) -> FailoverConfig {
    let mut builder = FailoverConfig::builder(
        Url::parse("https://live.example.com/main.m3u8").unwrap(),
    );
    if secondary {
        builder = builder.with_secondary(Url::parse("https://backup.example.com/alt.m3u8").unwrap());
    }
    if fallback {
        builder = builder.with_fallback(Url::parse("https://embed.example.com/room").unwrap());
    }
    builder.build().unwrap()
}

async fn wait_status(
    rx: &mut watch::Receiver<StatusSnapshot>,
    what: &str,
    predicate: impl FnMut(&StatusSnapshot) -> bool,
) -> StatusSnapshot {
    tokio::time::timeout(Duration::from_secs(3600), rx.wait_for(predicate))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for status: {what}"))
        .expect("orchestrator dropped its status channel")
        .clone()
}

fn journal_contains(entries: &[vigil_engine::JournalEntry], needle: &str) -> bool {
    entries.iter().any(|entry| entry.message.contains(needle))
}

// --- Scenarios ---

#[tokio::test(start_paused = true)]
async fn scenario_a_retries_exhaust_then_advance_to_secondary() {
    let factory = ScriptedFactory::new(
        vec![
            Script::fatal_after(Duration::from_millis(200)),
            Script::fatal_after(Duration::from_millis(200)),
            Script::fatal_after(Duration::from_millis(200)),
            Script::fatal_after(Duration::from_millis(200)),
            Script::healthy(),
        ],
        vec![],
    );
    let handle = StreamOrchestrator::spawn(config(true, false), factory.clone());
    let mut status = handle.watch_status();

    handle.start().await.unwrap();

    let snapshot = wait_status(&mut status, "secondary playing", |s| {
        s.tier == SourceTier::Secondary && s.state == Some(PlaybackState::Playing)
    })
    .await;
    assert_eq!(snapshot.retry_count, 0);

    let counters = factory.counters();
    // Initial attempt + 3 same-tier retries on primary, then one secondary.
    assert_eq!(counters.total_viewers, 5);
    assert!(counters.max_viewers <= 1);

    let entries = handle.journal().recent();
    assert!(journal_contains(
        &entries,
        "retries exhausted on primary, advancing to secondary"
    ));

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scenario_b_secondary_exhaustion_lands_in_hold() {
    let mut viewer = Vec::new();
    for _ in 0..8 {
        viewer.push(Script::fatal_after(Duration::from_millis(100)));
    }
    let factory = ScriptedFactory::new(viewer, vec![]);
    let handle = StreamOrchestrator::spawn(config(true, false), factory.clone());
    let mut status = handle.watch_status();

    handle.start().await.unwrap();

    let snapshot = wait_status(&mut status, "hold active", |s| {
        s.state == Some(PlaybackState::HoldActive)
    })
    .await;
    assert_eq!(snapshot.tier, SourceTier::Hold);
    assert_eq!(snapshot.retry_count, 0);

    // Hold is terminal by policy but still probes the primary.
    wait_status(&mut status, "probing from hold", |s| s.probing).await;

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scenario_c_probe_success_reinitializes_primary() {
    let factory = ScriptedFactory::new(
        vec![
            Script::fatal_after(Duration::from_millis(100)),
            Script::fatal_after(Duration::from_millis(100)),
            Script::fatal_after(Duration::from_millis(100)),
            Script::fatal_after(Duration::from_millis(100)),
            Script::healthy(),
        ],
        vec![Script::probe_with_fragments(4)],
    );
    let handle = StreamOrchestrator::spawn(config(false, false), factory.clone());
    let mut status = handle.watch_status();

    handle.start().await.unwrap();

    wait_status(&mut status, "hold active", |s| {
        s.state == Some(PlaybackState::HoldActive)
    })
    .await;

    let snapshot = wait_status(&mut status, "primary recovered", |s| {
        s.tier == SourceTier::Primary && s.state == Some(PlaybackState::Playing)
    })
    .await;
    assert_eq!(snapshot.retry_count, 0);
    assert!(!snapshot.probing);

    let entries = handle.journal().recent();
    assert!(journal_contains(
        &entries,
        "primary verified by background probe (4 fragments)"
    ));

    let counters = factory.counters();
    assert!(counters.max_probes <= 1);
    assert!(counters.max_viewers <= 1);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn scenario_d_autoplay_gate_sets_and_clears_without_transition() {
    let script = Script {
        fail_create: false,
        steps: vec![
            Step::Emit(EngineEvent::ManifestReady),
            Step::Wait(Duration::from_millis(100)),
            Step::Emit(EngineEvent::PlaybackBlocked {
                detail: "autoplay policy".to_string(),
            }),
        ],
    };
    let factory = ScriptedFactory::new(vec![script], vec![]);
    let handle = StreamOrchestrator::spawn(config(false, false), factory);
    let mut status = handle.watch_status();

    handle.start().await.unwrap();

    let snapshot = wait_status(&mut status, "user start required", |s| s.user_start_required).await;
    assert_eq!(snapshot.state, Some(PlaybackState::Playing));

    handle.confirm_user_start().await.unwrap();

    let snapshot = wait_status(&mut status, "gate cleared", |s| !s.user_start_required).await;
    assert_eq!(snapshot.state, Some(PlaybackState::Playing));
    assert_eq!(snapshot.tier, SourceTier::Primary);
    assert_eq!(snapshot.retry_count, 0);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stalls_inside_grace_window_never_escalate() {
    let mut steps = vec![Step::Emit(EngineEvent::ManifestReady)];
    for _ in 0..10 {
        steps.push(Step::Wait(Duration::from_millis(500)));
        steps.push(Step::Emit(EngineEvent::transient_error(
            ErrorKind::Stall,
            "buffer underrun",
        )));
    }
    // Keep the session healthy after the stall burst so no watchdog fires
    // while the test observes the state.
    for sequence in 1..=20 {
        steps.push(Step::Wait(Duration::from_secs(2)));
        steps.push(Step::Emit(EngineEvent::FragmentLoaded {
            sequence,
            bytes: 1024,
        }));
    }
    let factory = ScriptedFactory::new(
        vec![Script {
            fail_create: false,
            steps,
        }],
        vec![],
    );
    let handle = StreamOrchestrator::spawn(config(true, false), factory.clone());
    let mut status = handle.watch_status();

    handle.start().await.unwrap();
    wait_status(&mut status, "playing", |s| {
        s.state == Some(PlaybackState::Playing)
    })
    .await;

    // Let the stall burst and a stretch of healthy playback elapse.
    tokio::time::sleep(Duration::from_secs(30)).await;

    let snapshot = handle.status();
    assert_eq!(snapshot.state, Some(PlaybackState::Playing));
    assert_eq!(snapshot.tier, SourceTier::Primary);
    assert_eq!(snapshot.retry_count, 0);
    assert_eq!(factory.counters().total_viewers, 1);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stall_threshold_escalates_after_grace_window() {
    let mut steps = vec![
        Step::Emit(EngineEvent::ManifestReady),
        // Clear the grace window, then keep the feed alive with a fragment.
        Step::Wait(Duration::from_secs(16)),
        Step::Emit(EngineEvent::FragmentLoaded {
            sequence: 1,
            bytes: 1024,
        }),
    ];
    for _ in 0..5 {
        steps.push(Step::Wait(Duration::from_millis(100)));
        steps.push(Step::Emit(EngineEvent::transient_error(
            ErrorKind::Stall,
            "buffer underrun",
        )));
    }
    let factory = ScriptedFactory::new(
        vec![
            Script {
                fail_create: false,
                steps,
            },
            Script::healthy(),
        ],
        vec![],
    );
    let handle = StreamOrchestrator::spawn(config(false, false), factory);
    let mut status = handle.watch_status();

    handle.start().await.unwrap();

    // The fifth stall past the grace window trips the threshold and the
    // retry policy takes over on the same tier.
    let snapshot = wait_status(&mut status, "retry scheduled", |s| s.retry_count == 1).await;
    assert_eq!(snapshot.state, Some(PlaybackState::Connecting));
    assert_eq!(snapshot.tier, SourceTier::Primary);

    let entries = handle.journal().recent();
    assert!(journal_contains(&entries, "buffer escalation on primary"));

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn watchdog_escalates_on_fragment_silence() {
    // Manifest arrives, then the stream goes silent: the watchdog must trip
    // once the stall timeout elapses past the grace window.
    let factory = ScriptedFactory::new(
        vec![
            Script {
                fail_create: false,
                steps: vec![Step::Emit(EngineEvent::ManifestReady)],
            },
            Script::healthy(),
        ],
        vec![],
    );
    let handle = StreamOrchestrator::spawn(config(false, false), factory);
    let mut status = handle.watch_status();

    handle.start().await.unwrap();
    wait_status(&mut status, "playing", |s| {
        s.state == Some(PlaybackState::Playing)
    })
    .await;

    let snapshot = wait_status(&mut status, "watchdog retry", |s| s.retry_count == 1).await;
    assert_eq!(snapshot.state, Some(PlaybackState::Connecting));

    let entries = handle.journal().recent();
    assert!(journal_contains(&entries, "no fragment for"));

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn inconclusive_probe_reschedules_until_verified() {
    let factory = ScriptedFactory::new(
        vec![
            Script::fatal_after(Duration::from_millis(100)),
            Script::fatal_after(Duration::from_millis(100)),
            Script::fatal_after(Duration::from_millis(100)),
            Script::fatal_after(Duration::from_millis(100)),
            Script::healthy(),
        ],
        vec![
            Script::probe_with_fragments(2),
            Script::probe_with_fragments(4),
        ],
    );
    let handle = StreamOrchestrator::spawn(config(false, false), factory.clone());
    let mut status = handle.watch_status();

    handle.start().await.unwrap();

    wait_status(&mut status, "primary recovered after reprobe", |s| {
        s.tier == SourceTier::Primary && s.state == Some(PlaybackState::Playing)
    })
    .await;

    let entries = handle.journal().recent();
    assert!(journal_contains(&entries, "inconclusive (2 fragments)"));
    assert!(journal_contains(&entries, "(4 fragments)"));

    let counters = factory.counters();
    assert_eq!(counters.total_probes, 2);
    assert!(counters.max_probes <= 1);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn engine_init_failure_feeds_the_retry_policy() {
    let factory = ScriptedFactory::new(
        vec![Script::failing_create(), Script::healthy()],
        vec![],
    );
    let handle = StreamOrchestrator::spawn(config(false, false), factory);
    let mut status = handle.watch_status();

    handle.start().await.unwrap();

    let snapshot = wait_status(&mut status, "playing after init retry", |s| {
        s.state == Some(PlaybackState::Playing)
    })
    .await;
    assert_eq!(snapshot.tier, SourceTier::Primary);
    assert_eq!(snapshot.retry_count, 1);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent_and_releases_everything() {
    let factory = ScriptedFactory::new(vec![Script::healthy()], vec![]);
    let handle = StreamOrchestrator::spawn(config(true, true), factory.clone());
    let mut status = handle.watch_status();

    handle.start().await.unwrap();
    wait_status(&mut status, "playing", |s| {
        s.state == Some(PlaybackState::Playing)
    })
    .await;

    handle.stop().await.unwrap();
    let snapshot = wait_status(&mut status, "stopped", |s| s.state.is_none()).await;
    assert_eq!(snapshot.status_label(), "stopped");

    // Second stop is a no-op.
    handle.stop().await.unwrap();

    // Give teardown a tick to drop the engine instance.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let counters = factory.counters();
    assert_eq!(counters.live_viewers, 0);
    assert_eq!(counters.live_probes, 0);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn recoverable_issue_is_advisory_only() {
    let factory = ScriptedFactory::new(vec![Script::healthy()], vec![]);
    let handle = StreamOrchestrator::spawn(config(true, false), factory.clone());
    let mut status = handle.watch_status();

    handle.start().await.unwrap();
    wait_status(&mut status, "playing", |s| {
        s.state == Some(PlaybackState::Playing)
    })
    .await;

    handle
        .report_recoverable_issue("transient decode hiccup")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let snapshot = handle.status();
    assert_eq!(snapshot.state, Some(PlaybackState::Playing));
    assert_eq!(snapshot.retry_count, 0);
    assert_eq!(factory.counters().total_viewers, 1);

    let entries = handle.journal().recent();
    assert!(journal_contains(&entries, "transient decode hiccup"));

    handle.shutdown().await;
}

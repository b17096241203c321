// Playback session lifecycle. A session is the single owner of one engine
// instance; teardown cancels the session token and destroys the engine
// before the orchestrator may create a replacement.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use crate::adapter::{EngineFactory, EngineRole, MediaSurface, PlaybackEngine};
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::monitor::SessionHealth;
use crate::tier::SourceTier;

/// Engine event tagged with the generation of the session that emitted it.
/// The orchestrator discards envelopes from dead generations, which makes
/// every handler safe against callbacks arriving after teardown.
#[derive(Debug)]
pub(crate) struct EngineEventEnvelope {
    pub generation: u64,
    pub event: EngineEvent,
}

/// Capacity of the per-session engine event channel.
const SESSION_EVENT_BUFFER: usize = 32;

/// One live viewer session: engine instance, health counters, and the pump
/// forwarding engine events into the orchestrator loop.
pub(crate) struct PlaybackSession {
    pub generation: u64,
    pub tier: SourceTier,
    pub endpoint: Url,
    pub health: SessionHealth,
    /// Autoplay was rejected; playback waits on an explicit user gesture.
    pub user_start_required: bool,
    engine: Box<dyn PlaybackEngine>,
    token: CancellationToken,
    pump: JoinHandle<()>,
}

impl PlaybackSession {
    /// Create the engine, attach the surface, and begin loading. The session
    /// owns a child token of `parent`, so orchestrator shutdown reaches the
    /// engine even mid-teardown.
    pub async fn create(
        factory: &dyn EngineFactory,
        tier: SourceTier,
        endpoint: Url,
        surface: &MediaSurface,
        generation: u64,
        forward_tx: mpsc::Sender<EngineEventEnvelope>,
        parent: &CancellationToken,
    ) -> Result<Self, EngineError> {
        let token = parent.child_token();
        let (event_tx, event_rx) = mpsc::channel(SESSION_EVENT_BUFFER);

        let mut engine = factory
            .create(&endpoint, EngineRole::Viewer, event_tx, token.clone())
            .await?;
        engine.attach_media(surface);
        engine.load_source(&endpoint).await?;

        let pump = spawn_event_pump(generation, event_rx, forward_tx, token.clone());

        debug!(tier = %tier, generation, url = %endpoint, "playback session created");
        Ok(Self {
            generation,
            tier,
            endpoint,
            health: SessionHealth::new(),
            user_start_required: false,
            engine,
            token,
            pump,
        })
    }

    pub async fn recover_media_error(&mut self) {
        self.engine.recover_media_error().await;
    }

    /// Cancel the token, destroy the engine, and stop the pump. Completes
    /// before the caller may create a successor session.
    pub async fn teardown(mut self) {
        trace!(generation = self.generation, "tearing down playback session");
        self.token.cancel();
        self.engine.destroy().await;
        self.pump.abort();
    }
}

/// Forward engine events into the orchestrator channel, tagged with the
/// emitting generation. Stops when the engine channel closes, the session
/// token fires, or the orchestrator goes away.
pub(crate) fn spawn_event_pump(
    generation: u64,
    mut event_rx: mpsc::Receiver<EngineEvent>,
    forward_tx: mpsc::Sender<EngineEventEnvelope>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                maybe_event = event_rx.recv() => {
                    let Some(event) = maybe_event else { break };
                    let envelope = EngineEventEnvelope { generation, event };
                    if forward_tx.send(envelope).await.is_err() {
                        break;
                    }
                }
            }
        }
    })
}

// Playback engine boundary: the orchestrator drives engines only through
// these traits, so concrete engines (HLS polling, native progressive, test
// doubles) stay interchangeable.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::EngineError;
use crate::events::EngineEvent;

/// Why an engine instance exists. Probe engines run headless with
/// conservative timeouts and are never attached to the viewer surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineRole {
    Viewer,
    Probe,
}

impl EngineRole {
    pub fn label(&self) -> &'static str {
        match self {
            EngineRole::Viewer => "viewer",
            EngineRole::Probe => "probe",
        }
    }
}

/// Descriptor of the rendering surface a viewer session is attached to.
///
/// The engine core is headless; an embedder that owns a real sink passes a
/// named handle through, while `Detached` means fragments are counted and
/// discarded (always the case for probes).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MediaSurface {
    #[default]
    Detached,
    Named(String),
}

/// A single playback engine instance bound to one endpoint.
///
/// Events flow over the channel handed to [`EngineFactory::create`]; the
/// engine stops emitting once its cancellation token fires or `destroy` is
/// called, whichever happens first.
#[async_trait]
pub trait PlaybackEngine: Send {
    /// Begin loading the endpoint. Implementations spawn their own pump
    /// tasks; this returns once loading has been initiated.
    async fn load_source(&mut self, url: &Url) -> Result<(), EngineError>;

    /// Bind the engine to a rendering surface descriptor.
    fn attach_media(&mut self, surface: &MediaSurface);

    /// Attempt in-place recovery from a non-fatal media error. Engines
    /// without the capability treat this as a no-op.
    async fn recover_media_error(&mut self) {}

    /// Release the engine: cancel pumps, drop connections. Must be prompt
    /// and must not emit further events afterwards.
    async fn destroy(&mut self);
}

/// Creates engine instances for the orchestrator and the prober.
#[async_trait]
pub trait EngineFactory: Send + Sync {
    /// Create an engine for `endpoint`. Events must be sent to `events` and
    /// all background work must stop when `token` is cancelled.
    async fn create(
        &self,
        endpoint: &Url,
        role: EngineRole,
        events: mpsc::Sender<EngineEvent>,
        token: CancellationToken,
    ) -> Result<Box<dyn PlaybackEngine>, EngineError>;
}

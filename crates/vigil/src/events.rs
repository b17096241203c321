use serde::Serialize;

/// Broad class of an engine-reported error, decoupled from any concrete
/// engine's own error shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    /// Endpoint unreachable, HTTP failure, playlist refresh failure.
    Network,
    /// Decode/demux problem inside the engine; may be recoverable in place.
    Media,
    /// Buffer underrun reported by the engine.
    Stall,
    Other,
}

/// Event emitted by a playback engine over its session channel.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The source manifest loaded and playback can begin.
    ManifestReady,
    /// A media fragment arrived.
    FragmentLoaded {
        /// Monotonic sequence of the fragment within this session
        sequence: u64,
        bytes: u64,
    },
    /// The engine switched rendition levels.
    QualityChanged { level: u32 },
    /// The environment refused to start playback without a user gesture.
    /// Not a failure; the orchestrator flags it for the UI layer.
    PlaybackBlocked { detail: String },
    Error {
        kind: ErrorKind,
        /// Fatal errors condemn the source and drive the retry/advance policy.
        fatal: bool,
        detail: String,
    },
    /// The source signalled a clean end of stream.
    Ended,
}

impl EngineEvent {
    pub fn fatal_error(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self::Error {
            kind,
            fatal: true,
            detail: detail.into(),
        }
    }

    pub fn transient_error(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self::Error {
            kind,
            fatal: false,
            detail: detail.into(),
        }
    }
}

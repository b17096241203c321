use serde::Serialize;

/// What is currently rendered to the viewer. Orthogonal to [`SourceTier`]:
/// the tier names the endpoint being targeted, the state names what the
/// viewer sees.
///
/// [`SourceTier`]: crate::tier::SourceTier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlaybackState {
    /// A session is being (re)initialized against the active tier.
    Connecting,
    /// Manifest ready and fragments flowing (or gated on a user gesture).
    Playing,
    /// The interactive embed tier is live; no engine session exists.
    FallbackActive,
    /// Static screen; terminal by policy, exited only via recovery.
    HoldActive,
}

impl PlaybackState {
    pub fn label(&self) -> &'static str {
        match self {
            PlaybackState::Connecting => "connecting",
            PlaybackState::Playing => "playing",
            PlaybackState::FallbackActive => "fallback-active",
            PlaybackState::HoldActive => "hold-active",
        }
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

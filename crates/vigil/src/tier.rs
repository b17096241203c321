use serde::Serialize;
use url::Url;

/// One candidate stream source, in strict priority order.
///
/// `Hold` carries no endpoint: it is the terminal static-screen tier and is
/// always reachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceTier {
    Primary,
    Secondary,
    Fallback,
    Hold,
}

impl SourceTier {
    /// Priority order used for advancement.
    pub const ORDER: [SourceTier; 4] = [
        SourceTier::Primary,
        SourceTier::Secondary,
        SourceTier::Fallback,
        SourceTier::Hold,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SourceTier::Primary => "primary",
            SourceTier::Secondary => "secondary",
            SourceTier::Fallback => "fallback",
            SourceTier::Hold => "hold",
        }
    }

    /// Whether sessions on this tier run a playback engine. `Fallback` is an
    /// interactive embed and `Hold` a static screen; both render without one.
    pub fn uses_engine(&self) -> bool {
        matches!(self, SourceTier::Primary | SourceTier::Secondary)
    }
}

impl std::fmt::Display for SourceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// The configured endpoint set. Optional tiers without an endpoint are
/// skipped during advancement.
#[derive(Debug, Clone)]
pub struct StreamEndpoints {
    /// Preferred live source; the recovery prober always targets this.
    pub primary: Url,
    pub secondary: Option<Url>,
    /// Interactive embed shown when no live source is viable.
    pub fallback: Option<Url>,
}

impl StreamEndpoints {
    pub fn new(primary: Url) -> Self {
        Self {
            primary,
            secondary: None,
            fallback: None,
        }
    }

    pub fn endpoint(&self, tier: SourceTier) -> Option<&Url> {
        match tier {
            SourceTier::Primary => Some(&self.primary),
            SourceTier::Secondary => self.secondary.as_ref(),
            SourceTier::Fallback => self.fallback.as_ref(),
            SourceTier::Hold => None,
        }
    }

    pub fn is_configured(&self, tier: SourceTier) -> bool {
        match tier {
            SourceTier::Hold => true,
            _ => self.endpoint(tier).is_some(),
        }
    }

    /// Next configured tier after `current` in priority order. `Hold` is the
    /// end of the chain and returns itself.
    pub fn next_configured(&self, current: SourceTier) -> SourceTier {
        SourceTier::ORDER
            .into_iter()
            .skip_while(|t| *t <= current)
            .find(|t| self.is_configured(*t))
            .unwrap_or(SourceTier::Hold)
    }
}

//! Vigil failover engine.
//!
//! Delivers a live stream with automatic resilience: when the preferred
//! source degrades or fails, playback falls back through a tiered chain of
//! alternates while a background prober watches for the preferred source to
//! recover. The [`StreamOrchestrator`] owns all lifecycle state; concrete
//! playback engines plug in behind the [`PlaybackEngine`] boundary.

pub mod adapter;
pub mod config;
pub mod error;
pub mod events;
pub mod factory;
pub mod hls;
pub mod journal;
pub mod monitor;
pub mod native;
mod orchestrator;
pub mod prober;
mod session;
pub mod state;
pub mod tier;

// Re-exports for easier access
pub use adapter::{EngineFactory, EngineRole, MediaSurface, PlaybackEngine};
pub use config::{FailoverConfig, FailoverConfigBuilder, HealthConfig, ProbeConfig, RetryConfig};
pub use error::EngineError;
pub use events::{EngineEvent, ErrorKind};
pub use factory::{HttpEngineFactory, create_client};
pub use journal::{ActivityJournal, JournalEntry, Severity, StatusSnapshot};
pub use orchestrator::{OrchestratorClosed, OrchestratorHandle, StreamOrchestrator};
pub use prober::{ProbeOutcome, probe_endpoint};
pub use state::PlaybackState;
pub use tier::{SourceTier, StreamEndpoints};

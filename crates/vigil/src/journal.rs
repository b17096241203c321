//! Operator-facing activity journal and status snapshot.
//!
//! The journal is a bounded, insertion-ordered ring of recent entries plus a
//! broadcast channel for live consumers. It is append-only for the engine
//! and read-only for sinks; dropping the oldest entry keeps memory bounded
//! regardless of uptime.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::state::PlaybackState;
use crate::tier::SourceTier;

/// Broadcast channel capacity for journal entries.
const JOURNAL_BROADCAST_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Success,
    Warning,
    Error,
}

impl Severity {
    pub fn label(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Success => "success",
            Severity::Warning => "warning",
            Severity::Error => "error",
        }
    }
}

/// A single timestamped journal entry.
#[derive(Debug, Clone, Serialize)]
pub struct JournalEntry {
    pub time: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
}

/// Bounded activity journal shared between the engine and its consumers.
#[derive(Debug)]
pub struct ActivityJournal {
    entries: Mutex<VecDeque<JournalEntry>>,
    capacity: usize,
    tx: broadcast::Sender<JournalEntry>,
}

impl ActivityJournal {
    pub fn new(capacity: usize) -> Arc<Self> {
        let (tx, _) = broadcast::channel(JOURNAL_BROADCAST_CAPACITY);
        Arc::new(Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity + 1)),
            capacity,
            tx,
        })
    }

    pub fn push(&self, severity: Severity, message: impl Into<String>) {
        let entry = JournalEntry {
            time: Utc::now(),
            severity,
            message: message.into(),
        };

        let mut entries = self.entries.lock();
        entries.push_back(entry.clone());
        while entries.len() > self.capacity {
            entries.pop_front();
        }
        drop(entries);

        // Lagging or absent receivers are fine; the ring is the durable view.
        let _ = self.tx.send(entry);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(Severity::Info, message);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.push(Severity::Success, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.push(Severity::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(Severity::Error, message);
    }

    /// Recent entries, oldest first.
    pub fn recent(&self) -> Vec<JournalEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Subscribe to entries appended after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<JournalEntry> {
        self.tx.subscribe()
    }
}

/// Point-in-time view of the orchestrator for display, published over a
/// `watch` channel on every mutation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    /// `None` before `start()` and after `stop()`.
    pub state: Option<PlaybackState>,
    pub tier: SourceTier,
    pub retry_count: u32,
    pub max_retries: u32,
    /// Playback is gated on an explicit user gesture.
    pub user_start_required: bool,
    /// A background probe against the preferred tier is in flight.
    pub probing: bool,
}

impl StatusSnapshot {
    pub fn idle(max_retries: u32) -> Self {
        Self {
            state: None,
            tier: SourceTier::Primary,
            retry_count: 0,
            max_retries,
            user_start_required: false,
            probing: false,
        }
    }

    pub fn status_label(&self) -> &'static str {
        match self.state {
            Some(state) => state.label(),
            None => "stopped",
        }
    }

    pub fn source_label(&self) -> &'static str {
        self.tier.label()
    }
}

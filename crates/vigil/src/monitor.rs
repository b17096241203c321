// Buffer-health evaluation for the active session. Pure state + deadline
// arithmetic; the orchestrator owns the timer that polls it.

use std::time::Duration;
use tokio::time::Instant;

use crate::config::HealthConfig;

/// Verdict for a stall-class signal or a watchdog firing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthSignal {
    /// Within the grace window (or pre-manifest); journal only.
    Logged,
    /// Thresholds crossed; treat like a fatal source failure.
    Escalate { reason: String },
}

/// Per-session health counters.
///
/// Counters live on the session and die with it: a new tier always starts
/// with a clean slate. The stall count resets on every successful fragment
/// arrival; the last-arrival stamp detects prolonged silence independent of
/// discrete stall events.
#[derive(Debug)]
pub struct SessionHealth {
    stall_count: u32,
    manifest_ready_at: Option<Instant>,
    last_fragment_at: Option<Instant>,
}

impl SessionHealth {
    pub fn new() -> Self {
        Self {
            stall_count: 0,
            manifest_ready_at: None,
            last_fragment_at: None,
        }
    }

    pub fn stall_count(&self) -> u32 {
        self.stall_count
    }

    pub fn manifest_ready(&self) -> bool {
        self.manifest_ready_at.is_some()
    }

    /// Manifest became ready: the grace window opens and silence tracking
    /// starts now.
    pub fn on_manifest_ready(&mut self, now: Instant) {
        self.manifest_ready_at = Some(now);
        self.last_fragment_at = Some(now);
        self.stall_count = 0;
    }

    /// A fragment arrived: clear the stall count and re-arm the watchdog.
    pub fn on_fragment(&mut self, now: Instant) {
        self.stall_count = 0;
        self.last_fragment_at = Some(now);
    }

    /// Whether `now` is inside the post-manifest grace window. Pre-manifest
    /// counts as inside: startup buffering never escalates.
    pub fn in_grace_window(&self, now: Instant, config: &HealthConfig) -> bool {
        match self.manifest_ready_at {
            Some(ready_at) => now.duration_since(ready_at) < config.stability_window,
            None => true,
        }
    }

    fn silence(&self, now: Instant) -> Duration {
        self.last_fragment_at
            .map(|at| now.duration_since(at))
            .unwrap_or(Duration::ZERO)
    }

    /// A stall-class engine event.
    pub fn on_stall(&mut self, now: Instant, config: &HealthConfig) -> HealthSignal {
        if self.in_grace_window(now, config) {
            return HealthSignal::Logged;
        }

        self.stall_count += 1;
        if self.stall_count >= config.stall_threshold {
            return HealthSignal::Escalate {
                reason: format!("{} buffer stalls since last fragment", self.stall_count),
            };
        }

        let silence = self.silence(now);
        if silence >= config.stall_timeout {
            return HealthSignal::Escalate {
                reason: format!("no fragment for {}s", silence.as_secs()),
            };
        }

        HealthSignal::Logged
    }

    /// Next instant at which the watchdog should fire, or `None` while the
    /// manifest is not ready. Never earlier than the end of the grace window.
    pub fn watchdog_deadline(&self, config: &HealthConfig) -> Option<Instant> {
        let ready_at = self.manifest_ready_at?;
        let last = self.last_fragment_at.unwrap_or(ready_at);
        let deadline = last + config.stall_timeout;
        let grace_end = ready_at + config.stability_window;
        Some(deadline.max(grace_end))
    }

    /// The watchdog fired: decide whether the silence warrants escalation.
    pub fn on_watchdog(&self, now: Instant, config: &HealthConfig) -> HealthSignal {
        if self.in_grace_window(now, config) {
            return HealthSignal::Logged;
        }
        let silence = self.silence(now);
        if silence >= config.stall_timeout {
            HealthSignal::Escalate {
                reason: format!("watchdog: no fragment for {}s", silence.as_secs()),
            }
        } else {
            HealthSignal::Logged
        }
    }
}

impl Default for SessionHealth {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> HealthConfig {
        HealthConfig {
            stall_timeout: Duration::from_secs(20),
            stall_threshold: 5,
            stability_window: Duration::from_secs(15),
        }
    }

    #[test]
    fn stalls_inside_grace_window_never_escalate() {
        let config = config();
        let start = Instant::now();
        let mut health = SessionHealth::new();
        health.on_manifest_ready(start);

        for _ in 0..20 {
            let signal = health.on_stall(start + Duration::from_secs(14), &config);
            assert_eq!(signal, HealthSignal::Logged);
        }
        assert_eq!(health.stall_count(), 0);
    }

    #[test]
    fn pre_manifest_stalls_are_logged_only() {
        let config = config();
        let mut health = SessionHealth::new();
        let signal = health.on_stall(Instant::now(), &config);
        assert_eq!(signal, HealthSignal::Logged);
    }

    #[test]
    fn stall_count_threshold_escalates_past_grace() {
        let config = config();
        let start = Instant::now();
        let mut health = SessionHealth::new();
        health.on_manifest_ready(start);
        health.on_fragment(start + Duration::from_secs(16));

        let at = start + Duration::from_secs(17);
        for _ in 0..4 {
            assert_eq!(health.on_stall(at, &config), HealthSignal::Logged);
        }
        assert!(matches!(
            health.on_stall(at, &config),
            HealthSignal::Escalate { .. }
        ));
    }

    #[test]
    fn fragment_arrival_resets_stall_count() {
        let config = config();
        let start = Instant::now();
        let mut health = SessionHealth::new();
        health.on_manifest_ready(start);

        let at = start + Duration::from_secs(16);
        for _ in 0..4 {
            health.on_stall(at, &config);
        }
        assert_eq!(health.stall_count(), 4);

        health.on_fragment(at);
        assert_eq!(health.stall_count(), 0);
    }

    #[test]
    fn prolonged_silence_escalates_even_with_few_stalls() {
        let config = config();
        let start = Instant::now();
        let mut health = SessionHealth::new();
        health.on_manifest_ready(start);
        health.on_fragment(start + Duration::from_secs(16));

        // One stall, but 21s of silence since the last fragment.
        let signal = health.on_stall(start + Duration::from_secs(37), &config);
        assert!(matches!(signal, HealthSignal::Escalate { .. }));
    }

    #[test]
    fn watchdog_deadline_waits_out_the_grace_window() {
        let config = config();
        let start = Instant::now();
        let mut health = SessionHealth::new();
        assert!(health.watchdog_deadline(&config).is_none());

        health.on_manifest_ready(start);
        // stall_timeout (20s) > stability_window (15s), so the base deadline
        // already clears the grace window.
        assert_eq!(
            health.watchdog_deadline(&config),
            Some(start + Duration::from_secs(20))
        );

        let short_grace = HealthConfig {
            stall_timeout: Duration::from_secs(5),
            ..config
        };
        assert_eq!(
            health.watchdog_deadline(&short_grace),
            Some(start + Duration::from_secs(15))
        );
    }

    #[test]
    fn watchdog_escalates_only_on_real_silence() {
        let config = config();
        let start = Instant::now();
        let mut health = SessionHealth::new();
        health.on_manifest_ready(start);

        assert!(matches!(
            health.on_watchdog(start + Duration::from_secs(25), &config),
            HealthSignal::Escalate { .. }
        ));

        health.on_fragment(start + Duration::from_secs(24));
        assert_eq!(
            health.on_watchdog(start + Duration::from_secs(25), &config),
            HealthSignal::Logged
        );
    }
}

//! Native progressive playback engine.
//!
//! The fallback path when the adaptive engine does not apply to an endpoint:
//! one streaming GET, headers validated, then each received chunk window is
//! reported as a fragment. Equivalent to handing the URL straight to a native
//! playback surface and listening for its load/error signals.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use crate::adapter::{MediaSurface, PlaybackEngine};
use crate::error::EngineError;
use crate::events::{EngineEvent, ErrorKind};

#[derive(Debug, Clone)]
pub struct NativeEngineConfig {
    pub connect_timeout: Duration,
    /// Received bytes are coalesced into fragments of roughly this size.
    pub fragment_window_bytes: u64,
}

impl Default for NativeEngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            fragment_window_bytes: 256 * 1024,
        }
    }
}

impl NativeEngineConfig {
    pub fn probe_profile() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            ..Self::default()
        }
    }
}

/// [`PlaybackEngine`] implementation for progressive HTTP sources.
pub struct NativeHttpEngine {
    client: Client,
    config: NativeEngineConfig,
    events: mpsc::Sender<EngineEvent>,
    token: CancellationToken,
    surface: MediaSurface,
    task: Option<JoinHandle<()>>,
}

impl NativeHttpEngine {
    pub fn new(
        client: Client,
        config: NativeEngineConfig,
        events: mpsc::Sender<EngineEvent>,
        parent: CancellationToken,
    ) -> Self {
        Self {
            client,
            config,
            events,
            token: parent.child_token(),
            surface: MediaSurface::Detached,
            task: None,
        }
    }
}

#[async_trait]
impl PlaybackEngine for NativeHttpEngine {
    async fn load_source(&mut self, url: &Url) -> Result<(), EngineError> {
        debug!(url = %url, surface = ?self.surface, "native engine loading source");
        let client = self.client.clone();
        let config = self.config.clone();
        let events = self.events.clone();
        let token = self.token.clone();
        let url = url.clone();
        self.task = Some(tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = stream_progressive(client, config, url, events) => {}
            }
        }));
        Ok(())
    }

    fn attach_media(&mut self, surface: &MediaSurface) {
        self.surface = surface.clone();
    }

    async fn destroy(&mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn stream_progressive(
    client: Client,
    config: NativeEngineConfig,
    url: Url,
    events: mpsc::Sender<EngineEvent>,
) {
    // The timeout bounds the header exchange only; the body is a live
    // stream and must be allowed to run indefinitely.
    let response = match tokio::time::timeout(config.connect_timeout, client.get(url.clone()).send())
        .await
    {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            let _ = events
                .send(EngineEvent::fatal_error(ErrorKind::Network, e.to_string()))
                .await;
            return;
        }
        Err(_) => {
            let _ = events
                .send(EngineEvent::fatal_error(
                    ErrorKind::Network,
                    format!("no response within {}s", config.connect_timeout.as_secs()),
                ))
                .await;
            return;
        }
    };

    let status = response.status();
    if !status.is_success() {
        let _ = events
            .send(EngineEvent::fatal_error(
                ErrorKind::Network,
                format!("HTTP {status} for {url}"),
            ))
            .await;
        return;
    }

    // Reject obvious error pages before declaring the source ready.
    if let Some(content_type) = response.headers().get("content-type")
        && let Ok(ct) = content_type.to_str()
    {
        let ct = ct.to_lowercase();
        let is_text = ct.starts_with("text/")
            || ct.contains("html")
            || ct.contains("json")
            || ct.contains("xml");
        if is_text {
            warn!(url = %url, content_type = %ct, "text response is not playable media");
            let _ = events
                .send(EngineEvent::fatal_error(
                    ErrorKind::Media,
                    format!("unplayable content type `{ct}`"),
                ))
                .await;
            return;
        }
    }

    debug!(url = %url, "progressive source validated");
    if events.send(EngineEvent::ManifestReady).await.is_err() {
        return;
    }

    let mut byte_stream = response.bytes_stream();
    let mut sequence: u64 = 0;
    let mut window: u64 = 0;
    loop {
        match byte_stream.next().await {
            Some(Ok(chunk)) => {
                window += chunk.len() as u64;
                if window >= config.fragment_window_bytes {
                    sequence += 1;
                    let loaded = EngineEvent::FragmentLoaded {
                        sequence,
                        bytes: window,
                    };
                    window = 0;
                    if events.send(loaded).await.is_err() {
                        return;
                    }
                }
            }
            Some(Err(e)) => {
                let _ = events
                    .send(EngineEvent::fatal_error(ErrorKind::Network, e.to_string()))
                    .await;
                return;
            }
            None => {
                if window > 0 {
                    sequence += 1;
                    let _ = events
                        .send(EngineEvent::FragmentLoaded {
                            sequence,
                            bytes: window,
                        })
                        .await;
                }
                let _ = events.send(EngineEvent::Ended).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_profile_tightens_the_connect_budget() {
        let viewer = NativeEngineConfig::default();
        let probe = NativeEngineConfig::probe_profile();
        assert!(probe.connect_timeout < viewer.connect_timeout);
        assert_eq!(probe.fragment_window_bytes, viewer.fragment_window_bytes);
    }
}

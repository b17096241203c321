//! HLS playlist-polling playback engine.
//!
//! Loads the initial playlist (resolving master playlists to their best
//! variant), then polls the media playlist at half the target duration,
//! fetching newly listed segments and emitting one `FragmentLoaded` per
//! segment. This is the adaptive-engine implementation of the
//! [`PlaybackEngine`] boundary; non-playlist endpoints use the native
//! progressive engine instead.

use async_trait::async_trait;
use m3u8_rs::{MasterPlaylist, MediaPlaylist, Playlist, VariantStream};
use reqwest::Client;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use crate::adapter::{MediaSurface, PlaybackEngine};
use crate::error::{EngineError, is_retryable_reqwest_error};
use crate::events::{EngineEvent, ErrorKind};

/// Tuning for the HLS engine. The probe profile trades patience for fast
/// verdicts.
#[derive(Debug, Clone)]
pub struct HlsEngineConfig {
    pub playlist_fetch_timeout: Duration,
    pub segment_fetch_timeout: Duration,
    /// Consecutive playlist refresh failures tolerated before the source is
    /// declared dead.
    pub max_refresh_retries: u32,
    /// Floor for the playlist refresh interval.
    pub min_refresh_interval: Duration,
}

impl Default for HlsEngineConfig {
    fn default() -> Self {
        Self {
            playlist_fetch_timeout: Duration::from_secs(10),
            segment_fetch_timeout: Duration::from_secs(10),
            max_refresh_retries: 5,
            min_refresh_interval: Duration::from_secs(1),
        }
    }
}

impl HlsEngineConfig {
    /// Conservative profile for recovery probes.
    pub fn probe_profile() -> Self {
        Self {
            playlist_fetch_timeout: Duration::from_secs(5),
            segment_fetch_timeout: Duration::from_secs(5),
            max_refresh_retries: 2,
            min_refresh_interval: Duration::from_secs(1),
        }
    }
}

/// [`PlaybackEngine`] implementation that polls HLS playlists.
pub struct HlsPollEngine {
    client: Client,
    config: HlsEngineConfig,
    events: mpsc::Sender<EngineEvent>,
    token: CancellationToken,
    surface: MediaSurface,
    task: Option<JoinHandle<()>>,
}

impl HlsPollEngine {
    pub fn new(
        client: Client,
        config: HlsEngineConfig,
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
impl PlaybackEngine for HlsPollEngine {
    async fn load_source(&mut self, url: &Url) -> Result<(), EngineError> {
        debug!(url = %url, surface = ?self.surface, "hls engine loading source");
        let client = self.client.clone();
        let config = self.config.clone();
        let events = self.events.clone();
        let token = self.token.clone();
        let url = url.clone();
        self.task = Some(tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = poll_stream(client, config, url, events) => {}
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

/// Main polling loop. Emits events until the stream ends, a fatal error is
/// hit, or the receiver goes away.
async fn poll_stream(
    client: Client,
    config: HlsEngineConfig,
    url: Url,
    events: mpsc::Sender<EngineEvent>,
) {
    let (mut playlist, playlist_url) = match load_initial_playlist(&client, &config, &url, &events).await {
        Ok(loaded) => loaded,
        Err(e) => {
            let _ = events
                .send(EngineEvent::fatal_error(ErrorKind::Network, e.to_string()))
                .await;
            return;
        }
    };

    if events.send(EngineEvent::ManifestReady).await.is_err() {
        return;
    }

    let mut last_sequence: Option<u64> = None;
    let mut emitted: u64 = 0;
    let mut refresh_failures: u32 = 0;

    loop {
        for (sequence, uri) in new_segments(&playlist, &mut last_sequence) {
            let segment_url = match resolve_uri(&playlist_url, &uri) {
                Ok(url) => url,
                Err(e) => {
                    warn!(uri = %uri, error = %e, "invalid segment URI, skipped");
                    continue;
                }
            };
            match fetch_segment(&client, &config, &segment_url).await {
                Ok(bytes) => {
                    emitted += 1;
                    trace!(sequence, bytes, url = %segment_url, "segment fetched");
                    if events
                        .send(EngineEvent::FragmentLoaded {
                            sequence: emitted,
                            bytes,
                        })
                        .await
                        .is_err()
                    {
                        return;
                    }
                }
                Err(e) => {
                    // A single missing segment is a gap, not a source death.
                    let _ = events
                        .send(EngineEvent::transient_error(
                            ErrorKind::Network,
                            format!("segment {sequence} fetch failed: {e}"),
                        ))
                        .await;
                }
            }
        }

        if playlist.end_list {
            let _ = events.send(EngineEvent::Ended).await;
            return;
        }

        tokio::time::sleep(refresh_interval(&playlist, config.min_refresh_interval)).await;

        match fetch_media_playlist(&client, &config, &playlist_url).await {
            Ok(updated) => {
                refresh_failures = 0;
                playlist = updated;
            }
            Err(e) => {
                refresh_failures += 1;
                warn!(
                    url = %playlist_url,
                    retry = refresh_failures,
                    max = config.max_refresh_retries,
                    error = %e,
                    "playlist refresh failed"
                );
                if refresh_failures >= config.max_refresh_retries {
                    let _ = events
                        .send(EngineEvent::fatal_error(
                            ErrorKind::Network,
                            format!("playlist refresh failed {refresh_failures} times: {e}"),
                        ))
                        .await;
                    return;
                }
                // Keep serving the stale playlist until the next attempt.
            }
        }
    }
}

/// Fetch the endpoint playlist, following a master playlist to its best
/// variant. Returns the media playlist plus the URL it was loaded from
/// (segment URIs resolve against it).
async fn load_initial_playlist(
    client: &Client,
    config: &HlsEngineConfig,
    url: &Url,
    events: &mpsc::Sender<EngineEvent>,
) -> Result<(MediaPlaylist, Url), EngineError> {
    let body = fetch_playlist_body(client, config, url).await?;
    match parse_playlist(&body)? {
        Playlist::MediaPlaylist(media) => Ok((media, url.clone())),
        Playlist::MasterPlaylist(master) => {
            let (level, variant) = select_variant(&master).ok_or_else(|| {
                EngineError::playlist("master playlist contains no variants")
            })?;
            let variant_url = resolve_uri(url, &variant.uri)?;
            debug!(level, bandwidth = variant.bandwidth, url = %variant_url, "variant selected");
            let _ = events
                .send(EngineEvent::QualityChanged { level })
                .await;
            let body = fetch_playlist_body(client, config, &variant_url).await?;
            match parse_playlist(&body)? {
                Playlist::MediaPlaylist(media) => Ok((media, variant_url)),
                Playlist::MasterPlaylist(_) => Err(EngineError::playlist(
                    "variant resolved to another master playlist",
                )),
            }
        }
    }
}

async fn fetch_media_playlist(
    client: &Client,
    config: &HlsEngineConfig,
    url: &Url,
) -> Result<MediaPlaylist, EngineError> {
    let body = fetch_playlist_body(client, config, url).await?;
    match parse_playlist(&body)? {
        Playlist::MediaPlaylist(media) => Ok(media),
        Playlist::MasterPlaylist(_) => {
            Err(EngineError::playlist("expected media playlist on refresh"))
        }
    }
}

async fn fetch_playlist_body(
    client: &Client,
    config: &HlsEngineConfig,
    url: &Url,
) -> Result<Vec<u8>, EngineError> {
    let response = client
        .get(url.clone())
        .timeout(config.playlist_fetch_timeout)
        .send()
        .await?;
    let status = response.status();
    if !status.is_success() {
        return Err(EngineError::http_status(status, url.as_str(), "playlist fetch"));
    }
    Ok(response.bytes().await?.to_vec())
}

async fn fetch_segment(
    client: &Client,
    config: &HlsEngineConfig,
    url: &Url,
) -> Result<u64, EngineError> {
    let response = client
        .get(url.clone())
        .timeout(config.segment_fetch_timeout)
        .send()
        .await
        .map_err(|e| EngineError::FragmentFetch {
            reason: e.to_string(),
            retryable: is_retryable_reqwest_error(&e),
        })?;
    let status = response.status();
    if !status.is_success() {
        return Err(EngineError::FragmentFetch {
            reason: format!("HTTP {status}"),
            retryable: status.is_server_error(),
        });
    }
    let body = response.bytes().await.map_err(|e| EngineError::FragmentFetch {
        reason: e.to_string(),
        retryable: true,
    })?;
    Ok(body.len() as u64)
}

fn parse_playlist(body: &[u8]) -> Result<Playlist, EngineError> {
    let (_, playlist) =
        m3u8_rs::parse_playlist(body).map_err(|e| EngineError::playlist(e.to_string()))?;
    Ok(playlist)
}

/// Highest-bandwidth variant, with its index as the quality level.
fn select_variant(master: &MasterPlaylist) -> Option<(u32, &VariantStream)> {
    master
        .variants
        .iter()
        .enumerate()
        .max_by_key(|(_, variant)| variant.bandwidth)
        .map(|(i, variant)| (i as u32, variant))
}

/// Segments newer than the last processed media sequence, oldest first.
fn new_segments(playlist: &MediaPlaylist, last_sequence: &mut Option<u64>) -> Vec<(u64, String)> {
    let mut fresh = Vec::new();
    for (i, segment) in playlist.segments.iter().enumerate() {
        let sequence = playlist.media_sequence + i as u64;
        let is_new = last_sequence.is_none_or(|last| sequence > last);
        if is_new {
            fresh.push((sequence, segment.uri.clone()));
            *last_sequence = Some(sequence);
        }
    }
    fresh
}

/// Refresh at half the target duration, but never faster than the floor.
fn refresh_interval(playlist: &MediaPlaylist, floor: Duration) -> Duration {
    let half = Duration::from_secs_f64((playlist.target_duration as f64 / 2.0).max(0.0));
    half.max(floor)
}

fn resolve_uri(base: &Url, uri: &str) -> Result<Url, EngineError> {
    base.join(uri)
        .map_err(|e| EngineError::invalid_endpoint(uri, e.to_string()))
}

// Engine selection: playlist endpoints get the HLS engine, everything else
// the native progressive engine.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::adapter::{EngineFactory, EngineRole, PlaybackEngine};
use crate::error::EngineError;
use crate::events::EngineEvent;
use crate::hls::{HlsEngineConfig, HlsPollEngine};
use crate::native::{NativeEngineConfig, NativeHttpEngine};

const DEFAULT_USER_AGENT: &str = concat!("vigil/", env!("CARGO_PKG_VERSION"));

/// Build the shared HTTP client used by every engine instance.
pub fn create_client(connect_timeout: Duration) -> Result<Client, EngineError> {
    Client::builder()
        .user_agent(DEFAULT_USER_AGENT)
        .connect_timeout(connect_timeout)
        .build()
        .map_err(EngineError::from)
}

/// Default [`EngineFactory`]: picks the engine from the endpoint URL and
/// applies the conservative probe profile for probe instances.
pub struct HttpEngineFactory {
    client: Client,
    hls: HlsEngineConfig,
    hls_probe: HlsEngineConfig,
    native: NativeEngineConfig,
    native_probe: NativeEngineConfig,
}

impl HttpEngineFactory {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            hls: HlsEngineConfig::default(),
            hls_probe: HlsEngineConfig::probe_profile(),
            native: NativeEngineConfig::default(),
            native_probe: NativeEngineConfig::probe_profile(),
        }
    }

    pub fn with_hls_config(mut self, config: HlsEngineConfig) -> Self {
        self.hls = config;
        self
    }

    pub fn with_native_config(mut self, config: NativeEngineConfig) -> Self {
        self.native = config;
        self
    }
}

#[async_trait]
impl EngineFactory for HttpEngineFactory {
    async fn create(
        &self,
        endpoint: &Url,
        role: EngineRole,
        events: mpsc::Sender<EngineEvent>,
        token: CancellationToken,
    ) -> Result<Box<dyn PlaybackEngine>, EngineError> {
        if is_playlist_endpoint(endpoint) {
            let config = match role {
                EngineRole::Viewer => self.hls.clone(),
                EngineRole::Probe => self.hls_probe.clone(),
            };
            Ok(Box::new(HlsPollEngine::new(
                self.client.clone(),
                config,
                events,
                token,
            )))
        } else {
            let config = match role {
                EngineRole::Viewer => self.native.clone(),
                EngineRole::Probe => self.native_probe.clone(),
            };
            Ok(Box::new(NativeHttpEngine::new(
                self.client.clone(),
                config,
                events,
                token,
            )))
        }
    }
}

/// Whether the endpoint looks like an HLS playlist.
fn is_playlist_endpoint(url: &Url) -> bool {
    let path = url.path().to_lowercase();
    path.ends_with(".m3u8") || path.ends_with(".m3u")
}

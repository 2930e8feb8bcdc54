//! Wiring of the engine from configuration

use std::sync::Arc;

use anyhow::{Context, Result};

use punchclock_core::network::{HttpReachability, ManualReachability, Reachability};
use punchclock_core::push::{PushBridge, PushConfig, TracingNotifier, WebSocketPushChannel};
use punchclock_core::remote::{Credentials, HttpRemote, StaticToken};
use punchclock_core::{
    resolve_device_id, Config, FileStore, StorageError, SyncDependencies, SyncOrchestrator,
};

/// A configured engine and what it was built from
pub struct App {
    pub config: Config,
    pub engine: Arc<SyncOrchestrator>,
    credentials: Arc<dyn Credentials>,
}

impl App {
    /// Open the local store and build the engine
    ///
    /// Without an API URL the engine runs permanently offline: writes are
    /// queued and nothing is sent.
    pub async fn open(config: Config) -> Result<Self> {
        let store = Arc::new(FileStore::open(config.store_dir()).map_err(open_failure)?);
        let device_id = resolve_device_id(&config, store.as_ref()).await?;
        let settings = config.sync.to_settings();

        let credentials: Arc<dyn Credentials> =
            Arc::new(StaticToken::new(config.api_token.clone()));
        let remote = HttpRemote::new(
            config.api_url.clone().unwrap_or_default(),
            credentials.clone(),
            settings.request_timeout,
        )
        .context("Failed to create API client")?;

        let network: Arc<dyn Reachability> = match config.health_url() {
            Some(url) => Arc::new(HttpReachability::new(url)),
            None => Arc::new(ManualReachability::new(false)),
        };

        let deps = SyncDependencies {
            store,
            remote: Arc::new(remote),
            network,
            credentials: credentials.clone(),
        };
        let engine = SyncOrchestrator::open(deps, settings, device_id)
            .await
            .context("Failed to load sync state")?;

        Ok(Self {
            config,
            engine,
            credentials,
        })
    }

    /// Whether a remote API is configured
    pub fn is_connected_mode(&self) -> bool {
        self.config.api_url.is_some()
    }

    /// Build the push bridge, if a push URL is configured
    pub fn push_bridge(&self) -> Option<Arc<PushBridge>> {
        let url = self.config.push_url.as_ref()?;
        let channel = WebSocketPushChannel::new(PushConfig::new(
            url.clone(),
            self.credentials.bearer_token(),
        ));
        Some(Arc::new(PushBridge::new(
            self.engine.clone(),
            Arc::new(channel),
            Arc::new(TracingNotifier),
        )))
    }
}

/// Wrap a store open error, adding its recovery hint when there is one
fn open_failure(error: StorageError) -> anyhow::Error {
    match error.recovery_suggestion() {
        Some(hint) => {
            anyhow::Error::new(error).context(format!("Failed to open local store. {}", hint))
        }
        None => anyhow::Error::new(error).context("Failed to open local store"),
    }
}

//! Network reachability
//!
//! The queue processor asks a [`Reachability`] probe before every drain and
//! skips the pass entirely while offline.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use tracing::debug;

/// Reports whether the remote API can currently be reached
pub trait Reachability: Send + Sync {
    fn is_reachable(&self) -> BoxFuture<'_, bool>;
}

/// Reachability controlled by the application (airplane mode toggles, tests)
#[derive(Debug)]
pub struct ManualReachability {
    online: AtomicBool,
    probes: AtomicUsize,
}

impl ManualReachability {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// How many times the probe was consulted
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

impl Default for ManualReachability {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Reachability for ManualReachability {
    fn is_reachable(&self) -> BoxFuture<'_, bool> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let online = self.online.load(Ordering::SeqCst);
        async move { online }.boxed()
    }
}

/// Probes a health URL over HTTP
///
/// Any HTTP response below 500 counts as reachable: an auth error still
/// proves the network path works.
#[derive(Debug, Clone)]
pub struct HttpReachability {
    client: reqwest::Client,
    url: String,
}

impl HttpReachability {
    /// Default probe timeout
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(url: impl Into<String>) -> Self {
        Self::with_timeout(url, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            url: url.into(),
        }
    }
}

impl Reachability for HttpReachability {
    fn is_reachable(&self) -> BoxFuture<'_, bool> {
        async move {
            match self.client.get(&self.url).send().await {
                Ok(response) => !response.status().is_server_error(),
                Err(e) => {
                    debug!("Reachability probe to {} failed: {}", self.url, e);
                    false
                }
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_reachability() {
        let probe = ManualReachability::new(false);
        assert!(!probe.is_reachable().await);

        probe.set_online(true);
        assert!(probe.is_reachable().await);
        assert_eq!(probe.probe_count(), 2);
    }

    #[tokio::test]
    async fn test_http_probe_unreachable_host() {
        // Port 9 (discard) on localhost is closed in test environments
        let probe = HttpReachability::with_timeout("http://127.0.0.1:9/health", Duration::from_millis(500));
        assert!(!probe.is_reachable().await);
    }
}

//! Device identity
//!
//! Every request to the remote API carries a device identifier so the server
//! can tell apart replays from different devices of the same user.
//!
//! The identifier is taken from configuration when set; otherwise it is
//! generated once and kept in the durable store.

use anyhow::{Context, Result};
use tracing::info;

use crate::config::Config;
use crate::storage::KeyValueStore;

/// Store key holding the generated device identifier
pub const DEVICE_ID_KEY: &str = "device_id";

/// Resolve the device identifier for this installation
///
/// Order: configured `device_id`, then the persisted one, then a new one
/// which is persisted for next time.
pub async fn resolve_device_id(config: &Config, store: &dyn KeyValueStore) -> Result<String> {
    if let Some(ref id) = config.device_id {
        return Ok(id.clone());
    }

    if let Some(id) = store
        .get(DEVICE_ID_KEY)
        .await
        .context("Failed to read device ID")?
    {
        let id = id.trim().to_string();
        if !id.is_empty() {
            return Ok(id);
        }
    }

    let id = generate_device_id();
    store
        .set(DEVICE_ID_KEY, id.clone())
        .await
        .context("Failed to save device ID")?;
    info!("Generated new device ID {}", id);

    Ok(id)
}

/// Generate a fresh device identifier
pub fn generate_device_id() -> String {
    format!("punchclock-{}", &uuid::Uuid::new_v4().simple().to_string()[..8])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_generate_device_id_shape() {
        let id = generate_device_id();
        assert!(id.starts_with("punchclock-"));
        assert_eq!(id.len(), "punchclock-".len() + 8);
        assert_ne!(id, generate_device_id());
    }

    #[tokio::test]
    async fn test_configured_id_wins() {
        let store = MemoryStore::new();
        let config = Config {
            device_id: Some("tablet-3".to_string()),
            ..Config::default()
        };

        let id = resolve_device_id(&config, &store).await.unwrap();
        assert_eq!(id, "tablet-3");
        // Nothing persisted when configured
        assert!(store.value(DEVICE_ID_KEY).is_none());
    }

    #[tokio::test]
    async fn test_generated_id_is_stable() {
        let store = MemoryStore::new();
        let config = Config::default();

        let first = resolve_device_id(&config, &store).await.unwrap();
        let second = resolve_device_id(&config, &store).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.value(DEVICE_ID_KEY), Some(first));
    }
}

//! Request credentials
//!
//! Token issuance (SMS code login) lives outside the sync core. The core
//! only needs the current bearer token and a way to ask for a fresh one
//! after the server rejected it.

use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use super::RemoteError;

/// Source of bearer tokens for API and push requests
pub trait Credentials: Send + Sync {
    /// Current token, `None` when signed out
    fn bearer_token(&self) -> Option<String>;

    /// Obtain a new token after an authentication failure
    fn refresh(&self) -> BoxFuture<'_, Result<(), RemoteError>>;
}

/// A fixed token from configuration
///
/// It cannot be refreshed, so an authentication failure is final until the
/// configuration changes.
#[derive(Debug, Clone, Default)]
pub struct StaticToken {
    token: Option<String>,
}

impl StaticToken {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

impl Credentials for StaticToken {
    fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }

    fn refresh(&self) -> BoxFuture<'_, Result<(), RemoteError>> {
        let message = if self.token.is_some() {
            "configured API token was rejected; update api_token"
        } else {
            "no API token configured; set api_token"
        };
        async move { Err(RemoteError::Unauthorized(message.to_string())) }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token_cannot_refresh() {
        let creds = StaticToken::new(Some("abc".to_string()));
        assert_eq!(creds.bearer_token().as_deref(), Some("abc"));

        let err = creds.refresh().await.unwrap_err();
        assert!(err.is_auth());
        assert!(err.to_string().contains("rejected"));
    }

    #[tokio::test]
    async fn test_missing_token() {
        let creds = StaticToken::default();
        assert!(creds.bearer_token().is_none());
        assert!(creds.refresh().await.unwrap_err().to_string().contains("no API token"));
    }
}

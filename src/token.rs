//! Bearer token acquisition.
//!
//! The request pipeline never caches tokens itself; it asks a
//! [`TokenProvider`] for the current token immediately before every
//! transmission and tells it to invalidate its cache when the server answers
//! 401. Providers are free to fetch, cache and refresh however they like —
//! acquisition is async because it may involve its own network round trip.

use crate::context::ConnectionContext;
use crate::error::Result;
use async_trait::async_trait;

/// Source of bearer tokens for outbound requests.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// The current token value, fetched or refreshed as necessary.
    ///
    /// Called once per request attempt; the result is placed verbatim into
    /// `Authorization: bearer {token}`.
    async fn token(&self, connection: &ConnectionContext) -> Result<String>;

    /// Discard any cached token so the next [`token`](Self::token) call
    /// re-acquires one. Invoked when the server rejects a request with 401.
    async fn invalidate(&self, _connection: &ConnectionContext) {}
}

/// A provider that always returns the same token.
///
/// Useful for tests and for callers that manage token refresh externally.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    /// Create a provider wrapping a fixed token value.
    pub fn new(token: impl Into<String>) -> Self {
        StaticTokenProvider {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn token(&self, _connection: &ConnectionContext) -> Result<String> {
        Ok(self.token.clone())
    }
}

//! Shared connection context.
//!
//! A [`ConnectionContext`] owns the resources that every request issued from
//! one client instance shares: the HTTP transport, the JSON codec and the
//! pipeline configuration. It is cheap to clone and safe to share across
//! concurrently issued requests.

use crate::codec::JsonCodec;
use crate::error::Result;
use crate::tls::SslCertificateTruster;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 16;
const DEFAULT_INVALID_TOKEN_RETRIES: usize = 1;

/// Shared, read-only state backing every request of a client instance.
#[derive(Clone)]
pub struct ConnectionContext {
    inner: Arc<Inner>,
}

struct Inner {
    http_client: reqwest::Client,
    codec: JsonCodec,
    invalid_token_retries: usize,
}

impl ConnectionContext {
    /// Start building a connection context.
    pub fn builder() -> ConnectionContextBuilder {
        ConnectionContextBuilder::default()
    }

    /// The shared HTTP transport.
    pub fn http_client(&self) -> &reqwest::Client {
        &self.inner.http_client
    }

    /// The shared JSON codec.
    pub fn codec(&self) -> &JsonCodec {
        &self.inner.codec
    }

    /// How many times a request is replayed after a 401 before the response
    /// is surfaced as an error.
    pub fn invalid_token_retries(&self) -> usize {
        self.inner.invalid_token_retries
    }
}

/// Builder for [`ConnectionContext`].
#[derive(Default)]
pub struct ConnectionContextBuilder {
    connect_timeout: Option<Duration>,
    request_timeout: Option<Duration>,
    pool_max_idle_per_host: Option<usize>,
    invalid_token_retries: Option<usize>,
    max_payload_size: Option<usize>,
    ssl_certificate_truster: Option<Arc<SslCertificateTruster>>,
}

impl ConnectionContextBuilder {
    /// Limit how long establishing a TCP connection may take.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Limit the total duration of a request, from connect to the last body
    /// byte. Unset by default, since streamed responses may be long-lived.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Cap the number of idle pooled connections kept per host.
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.pool_max_idle_per_host = Some(max);
        self
    }

    /// How many times to replay a request after a 401 response. Defaults to 1.
    pub fn invalid_token_retries(mut self, retries: usize) -> Self {
        self.invalid_token_retries = Some(retries);
        self
    }

    /// Payload ceiling for the JSON codec, in bytes.
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = Some(size);
        self
    }

    /// Route TLS verification through a trust-on-first-use truster, so hosts
    /// accepted via [`SslCertificateTruster::trust`] are honored by this
    /// context's transport.
    pub fn ssl_certificate_truster(mut self, truster: Arc<SslCertificateTruster>) -> Self {
        self.ssl_certificate_truster = Some(truster);
        self
    }

    /// Build the context and its underlying HTTP client.
    pub fn build(self) -> Result<ConnectionContext> {
        let mut builder = reqwest::Client::builder()
            .pool_idle_timeout(DEFAULT_POOL_IDLE_TIMEOUT)
            .pool_max_idle_per_host(
                self.pool_max_idle_per_host
                    .unwrap_or(DEFAULT_POOL_MAX_IDLE_PER_HOST),
            );

        if let Some(timeout) = self.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(timeout) = self.request_timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(truster) = &self.ssl_certificate_truster {
            builder = builder.use_preconfigured_tls(truster.clone().client_config()?);
        }

        let http_client = builder.build()?;
        let codec = match self.max_payload_size {
            Some(size) => JsonCodec::new(size),
            None => JsonCodec::default(),
        };

        Ok(ConnectionContext {
            inner: Arc::new(Inner {
                http_client,
                codec,
                invalid_token_retries: self
                    .invalid_token_retries
                    .unwrap_or(DEFAULT_INVALID_TOKEN_RETRIES),
            }),
        })
    }
}

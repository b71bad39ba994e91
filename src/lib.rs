#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

//! # Cloud Foundry client core
//!
//! This crate implements the request/response pipeline shared by every typed
//! Cloud Foundry API operation: building requests with the right headers and
//! tracing metadata, attaching and refreshing bearer tokens, retrying once on
//! token invalidation, decoding the three error-payload dialects spoken by
//! the platform (v2, v3 and UAA) into typed errors, streaming server-sent
//! multipart bodies without buffering them, and bootstrapping trust for
//! self-signed TLS certificates via a trust-on-first-use workflow.
//!
//! ## Issuing a request
//!
//! ```ignore
//! use cloudfoundry_client::{
//!     ConnectionContext, ErrorPayloadMapper, Operator, OperatorContext, StaticTokenProvider,
//! };
//! use std::sync::Arc;
//! use url::Url;
//!
//! # async fn example() -> cloudfoundry_client::Result<()> {
//! let connection = ConnectionContext::builder().build()?;
//! let context = OperatorContext::new(connection, Url::parse("https://api.example.com").unwrap())
//!     .with_token_provider(Arc::new(StaticTokenProvider::new("my-token")));
//! let operator = Operator::new(context).with_error_payload_mapper(ErrorPayloadMapper::ClientV2);
//!
//! let info: Option<serde_json::Value> = operator
//!     .get()
//!     .uri(|b| b.path_segment("v2").path_segment("info"))
//!     .response()
//!     .parse_body()
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Trusting a self-signed installation
//!
//! ```ignore
//! use cloudfoundry_client::{ConnectionContext, SslCertificateTruster};
//! use std::{sync::Arc, time::Duration};
//!
//! # async fn example() -> cloudfoundry_client::Result<()> {
//! let truster = Arc::new(SslCertificateTruster::new()?);
//! truster.trust("api.local.example", 443, Duration::from_secs(5)).await?;
//!
//! let connection = ConnectionContext::builder()
//!     .ssl_certificate_truster(truster)
//!     .build()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Structure
//!
//! - **[client]** - Operator pipeline, error-dialect mapping, multipart decoding
//! - **[codec]** - Bounded JSON encode/decode
//! - **[context]** - Shared connection context and transport
//! - **[token]** - Bearer-token provider seam
//! - **[tls]** - Trust-on-first-use certificate acceptance
//! - **[error]** - Error types and result handling

pub mod client;
pub mod codec;
pub mod context;
pub mod error;
pub mod tls;
pub mod token;

pub use client::{
    ErrorPayloadMapper, HttpResponse, MultipartDecoder, MultipartEvent, MultipartStream, Operator,
    OperatorContext, RequestTags, StreamedResponse, UriBuilder,
};
pub use codec::JsonCodec;
pub use context::{ConnectionContext, ConnectionContextBuilder};
pub use error::{Error, ErrorDetail, Result};
pub use tls::{CertificateCollectingVerifier, SslCertificateTruster};
pub use token::{StaticTokenProvider, TokenProvider};

//! Error types and result handling.
//!
//! Every failure surfaced by this crate is a variant of [`Error`]. The typed
//! API errors (`ClientV2`, `ClientV3`, `Uaa`, `Unknown`) correspond to the
//! error payload dialects spoken by the Cloud Foundry v2 API, the v3 API and
//! the UAA identity service, plus a fallback for payloads that do not decode.
//! The remaining variants cover transport failures, JSON codec failures,
//! multipart framing problems and the trust-on-first-use TLS workflow.

use serde::Deserialize;
use std::fmt;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// A single error entry from a v3 API error response.
///
/// The v3 API reports a list of these under the `errors` key; each entry
/// renders as `"{title}({code}): {detail}"`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorDetail {
    /// Numeric Cloud Controller error code.
    pub code: i32,
    /// Human-readable description of what went wrong.
    pub detail: String,
    /// Short error title, e.g. `CF-UnprocessableEntity`.
    pub title: String,
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}): {}", self.title, self.code, self.detail)
    }
}

/// Errors produced by the client.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A v2 API error response, e.g. `CF-UnprocessableEntity(10008): ...`.
    #[error("{error_code}({code}): {description}")]
    ClientV2 {
        /// HTTP status code of the response.
        status_code: u16,
        /// Numeric Cloud Controller error code.
        code: i32,
        /// Human-readable description of what went wrong.
        description: String,
        /// Short error code, e.g. `CF-UnprocessableEntity`.
        error_code: String,
    },

    /// A v3 API error response carrying one or more error entries.
    #[error("{}", join_details(.errors))]
    ClientV3 {
        /// HTTP status code of the response.
        status_code: u16,
        /// The error entries reported by the server, in response order.
        errors: Vec<ErrorDetail>,
    },

    /// A UAA identity-service error response, e.g. `unauthorized: Bad credentials`.
    #[error("{error}: {error_description}")]
    Uaa {
        /// HTTP status code of the response.
        status_code: u16,
        /// Short error token, e.g. `unauthorized`.
        error: String,
        /// Human-readable description of the failure.
        error_description: String,
    },

    /// An error response whose body was empty or did not decode as the
    /// expected dialect. Carries the raw payload text when one was present.
    #[error("Unknown Cloud Foundry Exception")]
    Unknown {
        /// HTTP status code of the response.
        status_code: u16,
        /// The raw response body, if the server sent one.
        payload: Option<String>,
    },

    /// A body that was expected to be well-formed JSON failed to parse.
    #[error("problem parsing JSON payload: {source}")]
    JsonParsing {
        /// The raw payload that failed to parse.
        payload: String,
        /// The underlying parse failure.
        #[source]
        source: serde_json::Error,
    },

    /// A request payload could not be serialized to JSON.
    #[error("problem serializing request payload: {0}")]
    JsonEncoding(#[source] serde_json::Error),

    /// A payload exceeded the codec's configured size ceiling.
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge {
        /// Actual payload size in bytes.
        size: usize,
        /// Configured ceiling in bytes.
        limit: usize,
    },

    /// The underlying transport failed to establish a connection, timed out,
    /// or dropped mid-exchange.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// A multipart response's Content-Type did not carry a usable boundary.
    #[error("Content-Type {content_type} does not contain a valid multipart boundary")]
    InvalidMultipartBoundary {
        /// The offending Content-Type header value.
        content_type: String,
    },

    /// The certificate-collection probe did not complete within its deadline.
    #[error("timed out collecting TLS certificates from {host}:{port}")]
    TrustTimeout {
        /// Host the probe targeted.
        host: String,
        /// Port the probe targeted.
        port: u16,
    },

    /// The certificate-collection probe finished without observing a
    /// certificate chain, e.g. because the connection was refused before the
    /// handshake started.
    #[error("could not obtain server certificate chain from {host}:{port}")]
    CertificateChainUnavailable {
        /// Host the probe targeted.
        host: String,
        /// Port the probe targeted.
        port: u16,
    },

    /// A trust store or certificate verifier could not be constructed.
    #[error("problem building trust store: {0}")]
    TrustStore(String),
}

impl Error {
    /// The HTTP status code carried by a typed API error, if this is one.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::ClientV2 { status_code, .. }
            | Error::ClientV3 { status_code, .. }
            | Error::Uaa { status_code, .. }
            | Error::Unknown { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }
}

fn join_details(errors: &[ErrorDetail]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

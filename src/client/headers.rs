//! Outbound header construction.
//!
//! Every request carries a fixed-format User-Agent naming the client, the
//! runtime and the transport, an `Accept: application/json` header when the
//! caller will decode JSON, any caller-supplied request tags, and finally —
//! set exactly once, immediately before transmission — the bearer token
//! obtained from the context's token provider.

use crate::client::operator::OperatorContext;
use crate::error::Result;
use http::header;
use uuid::Uuid;

pub(crate) const APPLICATION_JSON: &str = "application/json";

/// `{name}/{version} (rust; tokio) reqwest`
pub(crate) const USER_AGENT: &str = concat!(
    env!("CARGO_PKG_NAME"),
    "/",
    env!("CARGO_PKG_VERSION"),
    " (rust; tokio) reqwest"
);

/// Caller-supplied name/value pairs applied to a request as extra headers.
///
/// Typically used to propagate tracing metadata alongside a call.
#[derive(Debug, Clone, Default)]
pub struct RequestTags {
    entries: Vec<(String, String)>,
}

impl RequestTags {
    /// An empty tag set.
    pub fn new() -> Self {
        RequestTags::default()
    }

    /// Add a tag; applied verbatim as a header.
    pub fn tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.entries.push((name.into(), value.into()));
        self
    }

    /// Add an `X-Request-Id` tag with a freshly generated id.
    pub fn request_id(self) -> Self {
        self.tag("X-Request-Id", Uuid::new_v4().to_string())
    }

    /// Whether any tags have been added.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }
}

/// Attach the standard headers to an outbound request, ending with the
/// asynchronously acquired bearer token.
pub(crate) async fn attach(
    mut builder: reqwest::RequestBuilder,
    context: &OperatorContext,
    accept_json: bool,
    tags: &RequestTags,
) -> Result<reqwest::RequestBuilder> {
    builder = builder.header(header::USER_AGENT, USER_AGENT);

    if accept_json {
        builder = builder.header(header::ACCEPT, APPLICATION_JSON);
    }

    for (name, value) in tags.iter() {
        builder = builder.header(name, value);
    }

    if let Some(provider) = context.token_provider() {
        let token = provider.token(context.connection()).await?;
        builder = builder.header(header::AUTHORIZATION, format!("bearer {}", token));
    }

    Ok(builder)
}

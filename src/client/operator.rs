//! The request pipeline.
//!
//! Every typed operation funnels through an [`Operator`]: it builds the URI
//! against the context's root, attaches static and dynamic headers (tracing
//! tags, user agent, accept type, bearer token), dispatches the chosen HTTP
//! method, and post-processes the response with token-invalidation retry and
//! error-payload mapping.
//!
//! A call is assembled as a fluent chain and finished with a terminal method
//! that names the response shape:
//!
//! ```ignore
//! use cloudfoundry_client::{ConnectionContext, Operator, OperatorContext};
//! use url::Url;
//!
//! let connection = ConnectionContext::builder().build()?;
//! let root = Url::parse("https://api.example.com")?;
//! let operator = Operator::new(OperatorContext::new(connection, root));
//!
//! let organizations: Option<serde_json::Value> = operator
//!     .get()
//!     .uri(|b| b.path_segment("v2").path_segment("organizations"))
//!     .response()
//!     .parse_body()
//!     .await?;
//! ```
//!
//! Exactly one outcome is produced per logical call: the decoded body (or
//! `None` for an empty one) or a typed error. A 401 response invalidates the
//! token provider's cache and replays the whole pipeline — including a fresh
//! token fetch — up to the configured retry bound; the decision is an
//! explicit [`Attempt`] value rather than control-flow-by-exception. The
//! final response, 401 or otherwise, then runs through the context's
//! error-payload mapper.

use crate::client::error_payload::ErrorPayloadMapper;
use crate::client::headers::{self, RequestTags, APPLICATION_JSON};
use crate::client::multipart::{MultipartDecoder, MultipartStream};
use crate::client::uri::UriBuilder;
use crate::context::ConnectionContext;
use crate::error::{Error, Result};
use crate::token::TokenProvider;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use http::{header, HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use url::Url;

/// Immutable per-client state shared by every request an [`Operator`] issues.
///
/// Cloning is cheap; overriding the error-payload mapper produces a modified
/// copy and leaves the original untouched.
#[derive(Clone)]
pub struct OperatorContext {
    connection: ConnectionContext,
    root: Url,
    token_provider: Option<Arc<dyn TokenProvider>>,
    error_payload_mapper: Option<ErrorPayloadMapper>,
}

impl OperatorContext {
    /// Create a context for requests rooted at `root`.
    pub fn new(connection: ConnectionContext, root: Url) -> Self {
        OperatorContext {
            connection,
            root,
            token_provider: None,
            error_payload_mapper: None,
        }
    }

    /// Attach a bearer-token source consulted before every transmission.
    pub fn with_token_provider(mut self, token_provider: Arc<dyn TokenProvider>) -> Self {
        self.token_provider = Some(token_provider);
        self
    }

    /// A copy of this context with a different error-payload mapper.
    pub fn with_error_payload_mapper(&self, mapper: ErrorPayloadMapper) -> Self {
        let mut copy = self.clone();
        copy.error_payload_mapper = Some(mapper);
        copy
    }

    /// The shared connection context.
    pub fn connection(&self) -> &ConnectionContext {
        &self.connection
    }

    /// The root URL requests are built against.
    pub fn root(&self) -> &Url {
        &self.root
    }

    /// The configured token provider, if any.
    pub fn token_provider(&self) -> Option<&Arc<dyn TokenProvider>> {
        self.token_provider.as_ref()
    }

    /// The effective error-payload mapper for this context.
    pub fn error_payload_mapper(&self) -> ErrorPayloadMapper {
        self.error_payload_mapper
            .unwrap_or(ErrorPayloadMapper::Fallback)
    }
}

/// Entry point of the request pipeline.
pub struct Operator {
    context: OperatorContext,
}

impl Operator {
    /// Create an operator over a context.
    pub fn new(context: OperatorContext) -> Self {
        Operator { context }
    }

    /// The context this operator issues requests from.
    pub fn context(&self) -> &OperatorContext {
        &self.context
    }

    /// Start a DELETE request.
    pub fn delete(&self) -> UriConfiguration {
        self.request(Method::DELETE)
    }

    /// Start a GET request.
    pub fn get(&self) -> UriConfiguration {
        self.request(Method::GET)
    }

    /// Start a PATCH request.
    pub fn patch(&self) -> UriConfiguration {
        self.request(Method::PATCH)
    }

    /// Start a POST request.
    pub fn post(&self) -> UriConfiguration {
        self.request(Method::POST)
    }

    /// Start a PUT request.
    pub fn put(&self) -> UriConfiguration {
        self.request(Method::PUT)
    }

    /// Start a request with an arbitrary method.
    pub fn request(&self, method: Method) -> UriConfiguration {
        UriConfiguration {
            context: self.context.clone(),
            method,
        }
    }

    /// An operator whose requests map errors with a different dialect.
    pub fn with_error_payload_mapper(&self, mapper: ErrorPayloadMapper) -> Operator {
        Operator {
            context: self.context.with_error_payload_mapper(mapper),
        }
    }
}

/// A request with its method chosen, awaiting a URI.
pub struct UriConfiguration {
    context: OperatorContext,
    method: Method,
}

impl UriConfiguration {
    /// Build the request URI by transforming the context's root.
    pub fn uri<F>(self, transform: F) -> PayloadConfiguration
    where
        F: FnOnce(UriBuilder) -> UriBuilder,
    {
        let url = transform(UriBuilder::new(self.context.root().clone())).build();
        PayloadConfiguration {
            context: self.context,
            method: self.method,
            url,
        }
    }
}

enum RequestBody {
    Empty,
    Json(Bytes),
    Form(Box<dyn Fn() -> reqwest::multipart::Form + Send + Sync>),
}

/// A request with its URI fixed, awaiting an optional payload.
pub struct PayloadConfiguration {
    context: OperatorContext,
    method: Method,
    url: Url,
}

impl PayloadConfiguration {
    /// Proceed without a request body.
    pub fn response(self) -> ResponseReceiver {
        self.receiver(RequestBody::Empty)
    }

    /// Serialize a JSON payload through the context's codec.
    ///
    /// Encoding happens up front so every retry re-sends identical bytes.
    pub fn send<T: Serialize>(self, payload: &T) -> Result<ResponseReceiver> {
        let body = self.context.connection().codec().encode(payload)?;
        Ok(self.receiver(RequestBody::Json(body)))
    }

    /// Send a `multipart/form-data` body, e.g. for package uploads.
    ///
    /// The form is rebuilt from the factory on every attempt, since a form
    /// body cannot be replayed once streamed.
    pub fn send_form<F>(self, form: F) -> ResponseReceiver
    where
        F: Fn() -> reqwest::multipart::Form + Send + Sync + 'static,
    {
        self.receiver(RequestBody::Form(Box::new(form)))
    }

    fn receiver(self, body: RequestBody) -> ResponseReceiver {
        ResponseReceiver {
            context: self.context,
            method: self.method,
            url: self.url,
            body,
            tags: RequestTags::new(),
        }
    }
}

/// Outcome of inspecting one response inside the retry loop.
enum Attempt {
    /// The token was rejected and a replay is still allowed.
    Retry,
    /// This response is final; hand it to the error-payload mapper.
    Respond(reqwest::Response),
}

/// A fully configured request, awaiting a terminal method naming the
/// response shape.
pub struct ResponseReceiver {
    context: OperatorContext,
    method: Method,
    url: Url,
    body: RequestBody,
    tags: RequestTags,
}

impl ResponseReceiver {
    /// Apply caller-supplied tags (e.g. a trace id) as additional headers.
    pub fn request_tags(mut self, tags: RequestTags) -> Self {
        self.tags = tags;
        self
    }

    /// Execute and return only the response status and headers.
    ///
    /// The body is dropped, which releases the underlying connection.
    pub async fn get(self) -> Result<HttpResponse> {
        let response = self.execute(false).await?;
        Ok(HttpResponse {
            status: response.status(),
            headers: response.headers().clone(),
        })
    }

    /// Execute and decode the response body.
    ///
    /// An empty body completes with `None`; this is distinct from an error.
    pub async fn parse_body<T: DeserializeOwned>(self) -> Result<Option<T>> {
        let (_, body) = self.parse_body_with_headers().await?;
        Ok(body)
    }

    /// Execute and decode the response body, keeping the response headers.
    pub async fn parse_body_with_headers<T: DeserializeOwned>(
        self,
    ) -> Result<(HeaderMap, Option<T>)> {
        let codec = self.context.connection().codec().clone();
        let response = self.execute(true).await?;
        let headers = response.headers().clone();

        let payload = response.bytes().await.map_err(Error::Transport)?;
        if payload.is_empty() {
            return Ok((headers, None));
        }

        Ok((headers, Some(codec.decode(&payload)?)))
    }

    /// Execute and hand back the raw byte stream with its status and
    /// headers. The connection stays live until the stream is consumed or
    /// dropped.
    pub async fn stream(self) -> Result<StreamedResponse> {
        let response = self.execute(false).await?;
        Ok(StreamedResponse::new(response))
    }

    /// Execute and decode the response as a multipart stream, using the
    /// boundary advertised in its Content-Type header.
    pub async fn multipart(self) -> Result<MultipartStream> {
        let response = self.execute(false).await?;

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let decoder = MultipartDecoder::new(&content_type)?;

        Ok(MultipartStream::spawn(decoder, response))
    }

    async fn execute(&self, accept_json: bool) -> Result<reqwest::Response> {
        let mut remaining = self.context.connection().invalid_token_retries();

        loop {
            let response = self.transmit(accept_json).await?;
            tracing::debug!(
                status = response.status().as_u16(),
                url = %self.url,
                "received response"
            );

            match self.classify(response, remaining) {
                Attempt::Retry => {
                    if let Some(provider) = self.context.token_provider() {
                        provider.invalidate(self.context.connection()).await;
                    }
                    remaining -= 1;
                    tracing::debug!(url = %self.url, "invalidated token, retrying request");
                }
                Attempt::Respond(response) => {
                    return self.context.error_payload_mapper().map(response).await;
                }
            }
        }
    }

    fn classify(&self, response: reqwest::Response, remaining: usize) -> Attempt {
        if response.status() == StatusCode::UNAUTHORIZED
            && remaining > 0
            && self.context.token_provider().is_some()
        {
            Attempt::Retry
        } else {
            Attempt::Respond(response)
        }
    }

    async fn transmit(&self, accept_json: bool) -> Result<reqwest::Response> {
        let mut builder = self
            .context
            .connection()
            .http_client()
            .request(self.method.clone(), self.url.clone());

        builder = match &self.body {
            RequestBody::Empty => builder,
            RequestBody::Json(payload) => builder
                .header(header::CONTENT_TYPE, APPLICATION_JSON)
                .body(payload.clone()),
            RequestBody::Form(form) => builder.multipart(form()),
        };

        builder = headers::attach(builder, &self.context, accept_json, &self.tags).await?;

        tracing::debug!(method = %self.method, url = %self.url, "sending request");
        builder.send().await.map_err(Error::Transport)
    }
}

/// Status and headers of a completed response whose body was discarded.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: StatusCode,
    /// Response headers.
    pub headers: HeaderMap,
}

/// A response whose body is consumed as a raw byte stream.
pub struct StreamedResponse {
    status: StatusCode,
    headers: HeaderMap,
    body: Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>,
}

impl StreamedResponse {
    fn new(response: reqwest::Response) -> Self {
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(Error::Transport));

        StreamedResponse {
            status,
            headers,
            body: Box::pin(body),
        }
    }

    /// HTTP status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

impl Stream for StreamedResponse {
    type Item = Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.body.as_mut().poll_next(cx)
    }
}

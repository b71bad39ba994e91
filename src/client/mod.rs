//! The request/response pipeline and its protocol adapters.
//!
//! This module is the layer every typed operation funnels through before and
//! after the wire:
//!
//! ```text
//! client/
//! ├── operator      - Operator pipeline: URI, headers, dispatch, 401 retry
//! ├── headers       - User-Agent, request tags, bearer-token attachment
//! ├── error_payload - v2 / v3 / UAA / fallback error-dialect mapping
//! ├── multipart     - streaming multipart response decoder
//! └── uri           - request URI construction against the context root
//! ```
//!
//! # Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Operator`] | Entry point: verb → URI → payload → response shape |
//! | [`OperatorContext`] | Root URL, connection, token source, error mapper |
//! | [`ErrorPayloadMapper`] | The error dialect a client instance decodes |
//! | [`MultipartStream`] | Streaming multipart events from a response body |
//! | [`RequestTags`] | Caller-supplied tracing headers |

mod error_payload;
mod headers;
mod multipart;
mod operator;
mod uri;

pub use error_payload::ErrorPayloadMapper;
pub use headers::RequestTags;
pub use multipart::{MultipartDecoder, MultipartEvent, MultipartStream};
pub use operator::{
    HttpResponse, Operator, OperatorContext, PayloadConfiguration, ResponseReceiver,
    StreamedResponse, UriConfiguration,
};
pub use uri::UriBuilder;

//! Mapping of error responses onto typed errors.
//!
//! The v2 API, the v3 API and the UAA identity service each report failures
//! with a different JSON shape. A client instance selects the mapper for the
//! surface it talks to — there is no auto-detection — and every response
//! flows through it after the retry loop:
//!
//! | Mapper | Payload shape |
//! |--------|---------------|
//! | `ClientV2` | `{"code": int, "description": string, "error_code": string}` |
//! | `ClientV3` | `{"errors": [{"code": int, "detail": string, "title": string}, ...]}` |
//! | `Uaa` | `{"error": string, "error_description": string}` |
//! | `Fallback` | raw body text paired with the status code |
//!
//! A response that is not 4xx/5xx passes through untouched. For an erroring
//! response the body is fully buffered (which releases the underlying
//! connection) and decoded; an empty or undecodable body degrades to
//! [`Error::Unknown`] — a parse failure here is never propagated as such.

use crate::error::{Error, ErrorDetail, Result};
use serde::Deserialize;

/// The error-payload dialect a client instance decodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorPayloadMapper {
    /// Cloud Controller v2 error payloads.
    ClientV2,
    /// Cloud Controller v3 error payloads.
    ClientV3,
    /// UAA identity-service error payloads.
    Uaa,
    /// No dialect; erroring responses carry only status and raw text.
    Fallback,
}

#[derive(Deserialize)]
struct ClientV2Payload {
    code: i32,
    description: String,
    error_code: String,
}

#[derive(Deserialize)]
struct ClientV3Payload {
    errors: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
struct UaaPayload {
    error: String,
    error_description: String,
}

impl ErrorPayloadMapper {
    /// Pass a successful response through, or convert an erroring one into
    /// the dialect's typed error.
    pub async fn map(self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if !status.is_client_error() && !status.is_server_error() {
            return Ok(response);
        }

        let payload = response.text().await.map_err(Error::Transport)?;
        Err(self.decode(status.as_u16(), payload))
    }

    fn decode(self, status_code: u16, payload: String) -> Error {
        if payload.is_empty() {
            return Error::Unknown {
                status_code,
                payload: None,
            };
        }

        let decoded = match self {
            ErrorPayloadMapper::ClientV2 => serde_json::from_str::<ClientV2Payload>(&payload)
                .ok()
                .map(|p| Error::ClientV2 {
                    status_code,
                    code: p.code,
                    description: p.description,
                    error_code: p.error_code,
                }),
            ErrorPayloadMapper::ClientV3 => serde_json::from_str::<ClientV3Payload>(&payload)
                .ok()
                .map(|p| Error::ClientV3 {
                    status_code,
                    errors: p.errors,
                }),
            ErrorPayloadMapper::Uaa => serde_json::from_str::<UaaPayload>(&payload)
                .ok()
                .map(|p| Error::Uaa {
                    status_code,
                    error: p.error,
                    error_description: p.error_description,
                }),
            ErrorPayloadMapper::Fallback => None,
        };

        decoded.unwrap_or_else(|| Error::Unknown {
            status_code,
            payload: Some(payload),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const V2_ERROR: &str = r#"{
        "description": "The request is semantically invalid: space_guid and name unique",
        "error_code": "CF-UnprocessableEntity",
        "code": 10008
    }"#;

    const V3_ERROR: &str = r#"{
        "errors": [
            {
                "code": 10008,
                "detail": "something went wrong",
                "title": "CF-UnprocessableEntity"
            }
        ]
    }"#;

    const UAA_ERROR: &str = r#"{
        "error": "unauthorized",
        "error_description": "Bad credentials"
    }"#;

    const INVALID_ERROR: &str = "Invalid Error Response";

    fn response(status: u16, body: &str) -> reqwest::Response {
        let inner = http::Response::builder()
            .status(status)
            .body(body.to_string())
            .unwrap();
        reqwest::Response::from(inner)
    }

    fn all_mappers() -> [ErrorPayloadMapper; 4] {
        [
            ErrorPayloadMapper::ClientV2,
            ErrorPayloadMapper::ClientV3,
            ErrorPayloadMapper::Uaa,
            ErrorPayloadMapper::Fallback,
        ]
    }

    #[tokio::test]
    async fn test_success_passes_through_for_every_mapper() {
        for mapper in all_mappers() {
            let result = mapper.map(response(200, "{}")).await;
            assert_eq!(result.unwrap().status(), 200, "mapper {:?}", mapper);
        }
    }

    #[tokio::test]
    async fn test_redirect_passes_through() {
        let result = ErrorPayloadMapper::ClientV2.map(response(302, "")).await;
        assert_eq!(result.unwrap().status(), 302);
    }

    #[tokio::test]
    async fn test_client_v2_client_error() {
        let error = ErrorPayloadMapper::ClientV2
            .map(response(400, V2_ERROR))
            .await
            .unwrap_err();

        assert_eq!(
            error.to_string(),
            "CF-UnprocessableEntity(10008): The request is semantically invalid: space_guid and name unique"
        );
        match error {
            Error::ClientV2 {
                status_code,
                code,
                description,
                error_code,
            } => {
                assert_eq!(status_code, 400);
                assert_eq!(code, 10008);
                assert_eq!(
                    description,
                    "The request is semantically invalid: space_guid and name unique"
                );
                assert_eq!(error_code, "CF-UnprocessableEntity");
            }
            other => panic!("expected ClientV2, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_v2_server_error() {
        let error = ErrorPayloadMapper::ClientV2
            .map(response(500, V2_ERROR))
            .await
            .unwrap_err();
        assert_eq!(error.status_code(), Some(500));
    }

    #[tokio::test]
    async fn test_client_v3_client_error() {
        let error = ErrorPayloadMapper::ClientV3
            .map(response(400, V3_ERROR))
            .await
            .unwrap_err();

        assert_eq!(error.to_string(), "CF-UnprocessableEntity(10008): something went wrong");
        match error {
            Error::ClientV3 {
                status_code,
                errors,
            } => {
                assert_eq!(status_code, 400);
                assert_eq!(
                    errors,
                    vec![ErrorDetail {
                        code: 10008,
                        detail: "something went wrong".to_string(),
                        title: "CF-UnprocessableEntity".to_string(),
                    }]
                );
            }
            other => panic!("expected ClientV3, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_uaa_client_error() {
        let error = ErrorPayloadMapper::Uaa
            .map(response(400, UAA_ERROR))
            .await
            .unwrap_err();

        assert_eq!(error.to_string(), "unauthorized: Bad credentials");
        match error {
            Error::Uaa {
                status_code,
                error,
                error_description,
            } => {
                assert_eq!(status_code, 400);
                assert_eq!(error, "unauthorized");
                assert_eq!(error_description, "Bad credentials");
            }
            other => panic!("expected Uaa, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_bad_payload_degrades_to_unknown_for_every_mapper() {
        for mapper in all_mappers() {
            let error = mapper.map(response(400, INVALID_ERROR)).await.unwrap_err();

            assert_eq!(error.to_string(), "Unknown Cloud Foundry Exception");
            match error {
                Error::Unknown {
                    status_code,
                    payload,
                } => {
                    assert_eq!(status_code, 400, "mapper {:?}", mapper);
                    assert_eq!(payload.as_deref(), Some(INVALID_ERROR));
                }
                other => panic!("expected Unknown for {:?}, got {:?}", mapper, other),
            }
        }
    }

    #[tokio::test]
    async fn test_empty_body_degrades_to_unknown_without_payload() {
        for mapper in all_mappers() {
            let error = mapper.map(response(502, "")).await.unwrap_err();

            match error {
                Error::Unknown {
                    status_code,
                    payload,
                } => {
                    assert_eq!(status_code, 502);
                    assert_eq!(payload, None);
                }
                other => panic!("expected Unknown for {:?}, got {:?}", mapper, other),
            }
        }
    }

    #[tokio::test]
    async fn test_wrong_dialect_degrades_to_unknown() {
        // A v2 payload handed to the v3 mapper is not silently reinterpreted.
        let error = ErrorPayloadMapper::ClientV3
            .map(response(400, V2_ERROR))
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Unknown { .. }));
    }
}

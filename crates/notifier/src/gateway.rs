//! HTTP client for the remote messaging API.
//!
//! Every call resolves to an [`ApiResponse`]; transport failures never escape
//! as errors. A response is a failure when it is absent or unreadable, when it
//! carries a problem shape (a `status` property), or when the HTTP status is
//! not 2xx.

use reqwest::{RequestBuilder, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use courier_common::error::AppError;
use courier_common::types::{ProblemJson, STATUS_FIELD};

/// Header carrying the API subscription key.
pub const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Outcome of a single API call.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Success(Value),
    /// `None` when the response was absent or could not be read.
    Failure(Option<ProblemJson>),
}

impl ApiResponse {
    pub fn is_failure(&self) -> bool {
        matches!(self, ApiResponse::Failure(_))
    }

    /// Decode a success into `T`. A success that does not have the expected
    /// shape counts as an absent response.
    pub fn decode<T: DeserializeOwned>(self) -> Result<T, Option<ProblemJson>> {
        match self {
            ApiResponse::Success(value) => serde_json::from_value(value).map_err(|e| {
                tracing::debug!(error = %e, "Response does not have the expected shape");
                None
            }),
            ApiResponse::Failure(problem) => Err(problem),
        }
    }
}

/// The error discriminator: the body carries a `status` property.
///
/// String values are exempt: message detail bodies report their lifecycle
/// status (`"PROCESSED"`, ...) under the same key, while problem bodies carry
/// a numeric HTTP status or `null`.
pub fn is_problem(body: &Value) -> bool {
    match body.get(STATUS_FIELD) {
        None | Some(Value::String(_)) => false,
        Some(_) => true,
    }
}

/// Classify a raw HTTP response.
pub fn classify(status: StatusCode, body: &[u8]) -> ApiResponse {
    let parsed: Option<Value> = if body.is_empty() {
        None
    } else {
        serde_json::from_slice(body).ok()
    };

    match parsed {
        Some(value) if is_problem(&value) => {
            let problem = serde_json::from_value(value).unwrap_or_else(|_| http_problem(status));
            ApiResponse::Failure(Some(problem))
        }
        Some(value) if status.is_success() => ApiResponse::Success(value),
        Some(value) => {
            let mut problem = http_problem(status);
            problem.detail = value
                .get("detail")
                .or_else(|| value.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string);
            ApiResponse::Failure(Some(problem))
        }
        None if status.is_success() => ApiResponse::Failure(None),
        None => ApiResponse::Failure(Some(http_problem(status))),
    }
}

fn http_problem(status: StatusCode) -> ProblemJson {
    ProblemJson {
        status: Some(status.as_u16()),
        title: status.canonical_reason().map(str::to_string),
        ..Default::default()
    }
}

/// Client for the remote messaging API.
///
/// No request timeout is set: a stalled call blocks its caller until the
/// connection is closed.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| AppError::Gateway(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key: api_key.into(),
        })
    }

    /// Same client and key, different API endpoint.
    pub fn with_base_url(&self, base_url: impl Into<String>) -> Self {
        Self {
            http: self.http.clone(),
            base_url: base_url.into(),
            api_key: self.api_key.clone(),
        }
    }

    pub async fn get(&self, path: &str) -> ApiResponse {
        self.send(path, self.http.get(self.url(path))).await
    }

    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> ApiResponse {
        self.send(path, self.http.post(self.url(path)).json(body)).await
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn send(&self, path: &str, request: RequestBuilder) -> ApiResponse {
        let response = match request
            .header(SUBSCRIPTION_KEY_HEADER, &self.api_key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(path, error = %e, "API request failed");
                return ApiResponse::Failure(None);
            }
        };

        let status = response.status();
        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                tracing::warn!(
                    path,
                    status = status.as_u16(),
                    error = %e,
                    "Failed to read API response"
                );
                return ApiResponse::Failure(None);
            }
        };

        let outcome = classify(status, &body);
        if let ApiResponse::Failure(problem) = &outcome {
            tracing::debug!(
                path,
                status = status.as_u16(),
                problem = ?problem,
                "API returned an error"
            );
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> Vec<u8> {
        serde_json::to_vec(&value).unwrap()
    }

    #[test]
    fn test_success_body() {
        let outcome = classify(StatusCode::CREATED, &body(json!({"id": "m1"})));
        assert_eq!(outcome, ApiResponse::Success(json!({"id": "m1"})));
    }

    #[test]
    fn test_problem_body() {
        let outcome = classify(
            StatusCode::INTERNAL_SERVER_ERROR,
            &body(json!({"detail": "x", "status": 500, "title": "err"})),
        );
        assert_eq!(
            outcome,
            ApiResponse::Failure(Some(ProblemJson {
                detail: Some("x".to_string()),
                status: Some(500),
                title: Some("err".to_string()),
                ..Default::default()
            }))
        );
    }

    #[test]
    fn test_status_property_is_an_error_even_with_2xx() {
        let outcome = classify(StatusCode::OK, &body(json!({"status": 404, "title": "Not found"})));
        assert!(outcome.is_failure());
    }

    #[test]
    fn test_null_status_still_counts_as_error() {
        let outcome = classify(StatusCode::OK, &body(json!({"status": null, "detail": "?"})));
        match outcome {
            ApiResponse::Failure(Some(problem)) => {
                assert_eq!(problem.status, None);
                assert_eq!(problem.detail.as_deref(), Some("?"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_lifecycle_status_string_is_success() {
        let detail = json!({"message": {"id": "m1"}, "status": "PROCESSED"});
        assert_eq!(
            classify(StatusCode::OK, &body(detail.clone())),
            ApiResponse::Success(detail)
        );
    }

    #[test]
    fn test_absent_body_is_failure_without_problem() {
        assert_eq!(classify(StatusCode::OK, b""), ApiResponse::Failure(None));
        assert_eq!(classify(StatusCode::OK, b"<html>"), ApiResponse::Failure(None));
    }

    #[test]
    fn test_http_error_without_problem_shape() {
        let outcome = classify(StatusCode::BAD_GATEWAY, b"");
        assert_eq!(
            outcome,
            ApiResponse::Failure(Some(ProblemJson {
                status: Some(502),
                title: Some("Bad Gateway".to_string()),
                ..Default::default()
            }))
        );

        let outcome = classify(StatusCode::NOT_FOUND, &body(json!({"message": "no such profile"})));
        match outcome {
            ApiResponse::Failure(Some(problem)) => {
                assert_eq!(problem.status, Some(404));
                assert_eq!(problem.detail.as_deref(), Some("no such profile"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn test_decode_shape_mismatch_is_absent() {
        #[derive(Debug, serde::Deserialize)]
        struct Created {
            #[allow(dead_code)]
            id: String,
        }

        let outcome = ApiResponse::Success(json!({"unexpected": true}));
        assert_eq!(outcome.decode::<Created>().unwrap_err(), None);
    }

    #[test]
    fn test_url_joining() {
        let client = ApiClient::new("http://localhost:8080/api/v1/", "key").unwrap();
        assert_eq!(client.url("/profiles/X"), "http://localhost:8080/api/v1/profiles/X");
        assert_eq!(client.url("messages/X"), "http://localhost:8080/api/v1/messages/X");
    }
}

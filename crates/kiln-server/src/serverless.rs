//! Request/response function adapter.
//!
//! A hosting platform hands the function one JSON event per invocation and
//! expects one JSON response back. [`ServerlessHandler`] turns the event into
//! an `http::Request`, drives the same [`Router`] the HTTP server uses, and
//! turns the response back into JSON, so both surfaces behave identically.
//!
//! Both the HTTP-API (`rawPath`, `requestContext.http.method`) and the
//! REST-style (`path`, `httpMethod`) event shapes are accepted.

use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request, StatusCode, Uri},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tower::ServiceExt;

/// Incoming function event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerlessRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_method: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_context: Option<RequestContext>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_query_string: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,

    #[serde(default)]
    pub is_base64_encoded: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<HttpContext>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpContext {
    pub method: String,
}

impl ServerlessRequest {
    /// Convenience constructor for a bodiless request.
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            http_method: Some(method.to_string()),
            raw_path: Some(path.to_string()),
            ..Self::default()
        }
    }

    fn method(&self) -> Option<&str> {
        self.http_method.as_deref().or_else(|| {
            self.request_context
                .as_ref()
                .and_then(|ctx| ctx.http.as_ref())
                .map(|http| http.method.as_str())
        })
    }

    fn path_and_query(&self) -> String {
        let path = self
            .raw_path
            .as_deref()
            .or(self.path.as_deref())
            .filter(|p| !p.is_empty())
            .unwrap_or("/");

        match self.raw_query_string.as_deref() {
            Some(query) if !query.is_empty() => format!("{path}?{query}"),
            _ => path.to_string(),
        }
    }
}

/// Outgoing function response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerlessResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub is_base64_encoded: bool,
}

impl ServerlessResponse {
    /// A JSON `{"error": ...}` response for events that never reached the router.
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        let body = serde_json::json!({ "error": message.into() }).to_string();
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());

        Self {
            status_code: status.as_u16(),
            headers,
            body,
            is_base64_encoded: false,
        }
    }
}

/// Errors converting an event into a request or a response into JSON.
#[derive(Debug, Error)]
pub enum ServerlessError {
    #[error("event has no http method")]
    MissingMethod,

    #[error("invalid http method: {0:?}")]
    InvalidMethod(String),

    #[error("invalid request uri: {0:?}")]
    InvalidUri(String),

    #[error("invalid header: {0:?}")]
    InvalidHeader(String),

    #[error("body is not valid base64: {0}")]
    InvalidBody(#[from] base64::DecodeError),

    #[error("failed to read response body: {0}")]
    Body(#[from] axum::Error),
}

impl ServerlessError {
    /// Client errors are answered with 400; everything else with 500.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Body(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Drives a [`Router`] with function events.
#[derive(Clone)]
pub struct ServerlessHandler {
    router: Router,
}

impl ServerlessHandler {
    pub fn new(router: Router) -> Self {
        Self { router }
    }

    /// Handles one event.
    ///
    /// # Errors
    ///
    /// Returns `ServerlessError` if the event cannot be turned into a
    /// request. Handler failures are ordinary responses, not errors.
    pub async fn handle(
        &self,
        event: ServerlessRequest,
    ) -> Result<ServerlessResponse, ServerlessError> {
        let request = into_request(event)?;
        let response = match self.router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        };

        let status_code = response.status().as_u16();
        let mut headers = BTreeMap::new();
        for (name, value) in response.headers() {
            let Ok(value) = value.to_str() else {
                tracing::warn!(header = %name, "dropping non-text response header");
                continue;
            };
            headers
                .entry(name.as_str().to_string())
                .and_modify(|existing: &mut String| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let (body, is_base64_encoded) = match String::from_utf8(bytes.to_vec()) {
            Ok(text) => (text, false),
            Err(_) => (STANDARD.encode(&bytes), true),
        };

        Ok(ServerlessResponse {
            status_code,
            headers,
            body,
            is_base64_encoded,
        })
    }
}

fn into_request(event: ServerlessRequest) -> Result<Request<Body>, ServerlessError> {
    let method = event.method().ok_or(ServerlessError::MissingMethod)?;
    let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|_| ServerlessError::InvalidMethod(method.to_string()))?;

    let target = event.path_and_query();
    let uri: Uri = target
        .parse()
        .map_err(|_| ServerlessError::InvalidUri(target.clone()))?;

    let body = match event.body {
        Some(body) if event.is_base64_encoded => Body::from(STANDARD.decode(body)?),
        Some(body) => Body::from(body),
        None => Body::empty(),
    };

    let mut request = Request::new(body);
    *request.method_mut() = method;
    *request.uri_mut() = uri;

    for (name, value) in event.headers.unwrap_or_default() {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ServerlessError::InvalidHeader(name.clone()))?;
        let header_value =
            HeaderValue::from_str(&value).map_err(|_| ServerlessError::InvalidHeader(name))?;
        request.headers_mut().append(header_name, header_value);
    }

    Ok(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::{get, post};

    fn echo_router() -> Router {
        Router::new()
            .route("/", get(|| async { "root" }))
            .route(
                "/echo",
                post(|uri: Uri, body: String| async move {
                    format!("{}|{}", uri.query().unwrap_or(""), body)
                }),
            )
            .route(
                "/bytes",
                get(|| async { axum::body::Bytes::from_static(&[0xff, 0x00, 0xfe]) }),
            )
    }

    #[test]
    fn parses_http_api_event() {
        let event: ServerlessRequest = serde_json::from_value(serde_json::json!({
            "version": "2.0",
            "rawPath": "/prisma",
            "rawQueryString": "a=1",
            "requestContext": { "http": { "method": "GET", "sourceIp": "1.2.3.4" } },
            "headers": { "accept": "application/json" },
            "isBase64Encoded": false
        }))
        .unwrap();

        assert_eq!(event.method(), Some("GET"));
        assert_eq!(event.path_and_query(), "/prisma?a=1");
    }

    #[test]
    fn parses_rest_event_with_null_headers() {
        let event: ServerlessRequest = serde_json::from_value(serde_json::json!({
            "httpMethod": "get",
            "path": "/",
            "headers": null
        }))
        .unwrap();

        let request = into_request(event).unwrap();
        assert_eq!(request.method(), Method::GET);
        assert_eq!(request.uri(), "/");
    }

    #[tokio::test]
    async fn forwards_query_and_base64_body() {
        let mut event = ServerlessRequest::new("POST", "/echo");
        event.raw_query_string = Some("x=y".to_string());
        event.body = Some(STANDARD.encode("hello"));
        event.is_base64_encoded = true;

        let response = ServerlessHandler::new(echo_router())
            .handle(event)
            .await
            .unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(response.body, "x=y|hello");
        assert!(!response.is_base64_encoded);
    }

    #[tokio::test]
    async fn binary_response_is_base64_encoded() {
        let response = ServerlessHandler::new(echo_router())
            .handle(ServerlessRequest::new("GET", "/bytes"))
            .await
            .unwrap();

        assert!(response.is_base64_encoded);
        assert_eq!(STANDARD.decode(response.body).unwrap(), vec![0xff, 0x00, 0xfe]);
    }

    #[tokio::test]
    async fn rejects_bad_events() {
        let handler = ServerlessHandler::new(echo_router());

        let err = handler
            .handle(ServerlessRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ServerlessError::MissingMethod));

        let err = handler
            .handle(ServerlessRequest::new("GE T", "/"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerlessError::InvalidMethod(_)));

        let mut event = ServerlessRequest::new("POST", "/echo");
        event.body = Some("%%%".to_string());
        event.is_base64_encoded = true;
        let err = handler.handle(event).await.unwrap_err();
        assert!(matches!(err, ServerlessError::InvalidBody(_)));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let mut event = ServerlessRequest::new("GET", "/");
        event.headers = Some(BTreeMap::from([(
            "bad header".to_string(),
            "x".to_string(),
        )]));
        let err = handler.handle(event).await.unwrap_err();
        assert!(matches!(err, ServerlessError::InvalidHeader(_)));
    }

    #[test]
    fn error_response_shape() {
        let response = ServerlessResponse::error(StatusCode::BAD_REQUEST, "bad event");
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["statusCode"], 400);
        assert_eq!(json["isBase64Encoded"], false);
        assert_eq!(json["body"], r#"{"error":"bad event"}"#);
    }
}

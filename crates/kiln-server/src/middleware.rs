//! Response security headers.

use crate::config::SecurityConfig;
use axum::{
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use thiserror::Error;

/// A configured header value could not be encoded.
#[derive(Debug, Error)]
#[error("invalid value for {name}: {value:?}")]
pub struct InvalidHeader {
    pub name: &'static str,
    pub value: String,
}

/// The set of headers stamped onto every response.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    headers: Arc<Vec<(HeaderName, HeaderValue)>>,
}

fn configured(name: &'static str, value: &str) -> Result<HeaderValue, InvalidHeader> {
    HeaderValue::from_str(value).map_err(|_| InvalidHeader {
        name,
        value: value.to_string(),
    })
}

impl SecurityHeaders {
    /// Builds the header set, rejecting values that are not valid header text.
    pub fn from_config(config: &SecurityConfig) -> Result<Self, InvalidHeader> {
        let mut headers = vec![
            (
                header::CONTENT_SECURITY_POLICY,
                configured("Content-Security-Policy", &config.content_security_policy)?,
            ),
            (
                HeaderName::from_static("cross-origin-opener-policy"),
                HeaderValue::from_static("same-origin"),
            ),
            (
                HeaderName::from_static("cross-origin-resource-policy"),
                HeaderValue::from_static("same-origin"),
            ),
            (
                HeaderName::from_static("origin-agent-cluster"),
                HeaderValue::from_static("?1"),
            ),
            (
                header::REFERRER_POLICY,
                configured("Referrer-Policy", &config.referrer_policy)?,
            ),
            (
                header::X_CONTENT_TYPE_OPTIONS,
                HeaderValue::from_static("nosniff"),
            ),
            (
                header::X_DNS_PREFETCH_CONTROL,
                HeaderValue::from_static("off"),
            ),
            (
                HeaderName::from_static("x-download-options"),
                HeaderValue::from_static("noopen"),
            ),
            (
                header::X_FRAME_OPTIONS,
                configured("X-Frame-Options", &config.frame_options)?,
            ),
            (
                HeaderName::from_static("x-permitted-cross-domain-policies"),
                HeaderValue::from_static("none"),
            ),
            // `0` turns the legacy XSS auditor off.
            (header::X_XSS_PROTECTION, HeaderValue::from_static("0")),
        ];

        if config.hsts {
            let mut value = format!("max-age={}", config.hsts_max_age);
            if config.hsts_include_subdomains {
                value.push_str("; includeSubDomains");
            }
            headers.push((
                header::STRICT_TRANSPORT_SECURITY,
                configured("Strict-Transport-Security", &value)?,
            ));
        }

        Ok(Self {
            headers: Arc::new(headers),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &(HeaderName, HeaderValue)> {
        self.headers.iter()
    }
}

/// Stamps the configured security headers onto the response.
///
/// Runs for matched routes and fallbacks alike. Existing values set by a
/// handler are overwritten.
pub async fn security_headers_middleware(
    State(security): State<SecurityHeaders>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    for (name, value) in security.iter() {
        headers.insert(name.clone(), value.clone());
    }
    headers.remove("x-powered-by");

    response
}

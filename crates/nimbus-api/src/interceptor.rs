//! Outgoing request interception
//!
//! Interceptors run synchronously on a built [`reqwest::Request`] before it is
//! handed to the transport. A failing interceptor discards the request.

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::Request;
use tracing::{debug, warn};

use crate::error::{ApiError, Result};
use crate::token::AuthTokenProvider;

/// Date header stamped on every intercepted request
pub const X_AMZ_DATE: HeaderName = HeaderName::from_static("x-amz-date");

/// `yyyyMMdd'T'HHmmss'Z'`, in UTC
pub const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

pub const APPLICATION_JSON: &str = "application/json";

/// User agent sent by every API request
pub fn base_user_agent() -> String {
    format!("nimbus-api/{}", env!("CARGO_PKG_VERSION"))
}

/// Mutates a request before it is sent
pub trait RequestInterceptor: Send + Sync {
    fn intercept(&self, request: Request) -> Result<Request>;
}

fn header_value(value: &str) -> Result<HeaderValue> {
    HeaderValue::from_str(value).map_err(|e| ApiError::InvalidHeader(e.to_string()))
}

/// Stamps the date, content type, user agent and authorization token
pub struct AuthTokenInterceptor<P> {
    provider: P,
}

impl<P: AuthTokenProvider> AuthTokenInterceptor<P> {
    pub fn new(provider: P) -> Self {
        Self { provider }
    }

    fn stamp(&self, request: &Request, now: DateTime<Utc>) -> Result<Request> {
        let mut request = request
            .try_clone()
            .ok_or_else(|| ApiError::unknown("Could not get mutable request", ""))?;

        let headers = request.headers_mut();
        headers.insert(X_AMZ_DATE, header_value(&now.format(AMZ_DATE_FORMAT).to_string())?);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));
        headers.insert(USER_AGENT, header_value(&base_user_agent())?);

        let token = self.provider.get_token().map_err(|source| {
            warn!(error = %source, "Authorization token unavailable");
            ApiError::Operation {
                description: "Failed to retrieve authorization token.".to_string(),
                recovery_suggestion: String::new(),
                source,
            }
        })?;
        request
            .headers_mut()
            .insert(AUTHORIZATION, header_value(&token)?);

        debug!(url = %request.url(), "Intercepted request");
        Ok(request)
    }
}

impl<P: AuthTokenProvider> RequestInterceptor for AuthTokenInterceptor<P> {
    fn intercept(&self, request: Request) -> Result<Request> {
        self.stamp(&request, Utc::now())
    }
}

//! API client that runs interceptors before every request

use std::sync::Arc;

use reqwest::{header, Client, Method, Request, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument};
use url::Url;

use crate::config::ApiConfig;
use crate::error::{ApiError, Result};
use crate::interceptor::{AuthTokenInterceptor, RequestInterceptor};
use crate::token::AuthTokenProvider;

/// HTTP client for the Nimbus API
#[derive(Clone)]
pub struct ApiClient {
    config: ApiConfig,
    http: Client,
    interceptors: Vec<Arc<dyn RequestInterceptor>>,
}

impl ApiClient {
    /// Create a new client with the given configuration
    pub fn new(config: ApiConfig) -> Result<Self> {
        Url::parse(config.base_url())
            .map_err(|e| ApiError::Config(format!("invalid endpoint: {}", e)))?;

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            config
                .user_agent
                .parse()
                .map_err(|_| ApiError::Config("invalid user agent".to_string()))?,
        );

        let http = Client::builder()
            .timeout(config.timeout)
            .default_headers(headers)
            .build()
            .map_err(ApiError::Http)?;

        Ok(Self {
            config,
            http,
            interceptors: Vec::new(),
        })
    }

    /// Append an interceptor; interceptors run in the order they were added
    pub fn with_interceptor(mut self, interceptor: impl RequestInterceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Authorize every request with tokens from `provider`
    pub fn with_auth_token<P: AuthTokenProvider + 'static>(self, provider: P) -> Self {
        self.with_interceptor(AuthTokenInterceptor::new(provider))
    }

    /// Get the configuration
    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// Absolute URL for an API path
    pub fn url(&self, path: &str) -> Result<Url> {
        let url = format!("{}/{}", self.config.base_url(), path.trim_start_matches('/'));
        Url::parse(&url).map_err(|e| ApiError::Config(format!("invalid path {}: {}", path, e)))
    }

    /// Start building a request for `path`
    pub fn request(&self, method: Method, path: &str) -> Result<RequestBuilder> {
        Ok(self.http.request(method, self.url(path)?))
    }

    /// Run the interceptors over `request`, then send it.
    ///
    /// No request is sent if an interceptor fails.
    #[instrument(skip(self, request), fields(method = %request.method(), url = %request.url()))]
    pub async fn send(&self, request: Request) -> Result<Response> {
        let mut request = request;
        for interceptor in &self.interceptors {
            request = interceptor.intercept(request)?;
        }

        debug!("Sending {} request to {}", request.method(), request.url());
        let response = self.http.execute(request).await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ApiError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    /// POST `body` as JSON and decode the JSON response
    pub async fn post_json<T, R>(&self, path: &str, body: &T) -> Result<R>
    where
        T: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let request = self.request(Method::POST, path)?.json(body).build()?;
        Ok(self.send(request).await?.json().await?)
    }

    /// GET `path` and decode the JSON response
    pub async fn get<R: DeserializeOwned>(&self, path: &str) -> Result<R> {
        let request = self.request(Method::GET, path)?.build()?;
        Ok(self.send(request).await?.json().await?)
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("config", &self.config)
            .field("interceptors", &self.interceptors.len())
            .finish()
    }
}

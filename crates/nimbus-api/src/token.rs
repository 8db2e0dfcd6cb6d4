//! Authorization token providers

use std::fmt;
use std::sync::Arc;

use crate::error::AuthTokenError;

/// Supplies the raw authorization token for each outgoing request.
///
/// Called synchronously once per request. Caching and refresh are up to the
/// implementation.
pub trait AuthTokenProvider: Send + Sync {
    fn get_token(&self) -> Result<String, AuthTokenError>;
}

impl<P: AuthTokenProvider + ?Sized> AuthTokenProvider for Arc<P> {
    fn get_token(&self) -> Result<String, AuthTokenError> {
        (**self).get_token()
    }
}

/// Always returns the same token
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenProvider")
            .field("token", &"<redacted>")
            .finish()
    }
}

impl AuthTokenProvider for StaticTokenProvider {
    fn get_token(&self) -> Result<String, AuthTokenError> {
        Ok(self.token.clone())
    }
}

/// Provider backed by a closure, see [`token_fn`]
pub struct FnTokenProvider<F> {
    f: F,
}

impl<F> AuthTokenProvider for FnTokenProvider<F>
where
    F: Fn() -> Result<String, AuthTokenError> + Send + Sync,
{
    fn get_token(&self) -> Result<String, AuthTokenError> {
        (self.f)()
    }
}

/// Wrap a closure as an [`AuthTokenProvider`]
pub fn token_fn<F>(f: F) -> FnTokenProvider<F>
where
    F: Fn() -> Result<String, AuthTokenError> + Send + Sync,
{
    FnTokenProvider { f }
}

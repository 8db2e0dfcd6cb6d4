//! # Nimbus API
//!
//! HTTP client for the Nimbus API. Every request passes through a chain of
//! [`RequestInterceptor`]s before it is sent; [`AuthTokenInterceptor`] stamps
//! the standard headers and an authorization token fetched from an
//! [`AuthTokenProvider`].
//!
//! ## Example
//!
//! ```rust,ignore
//! use nimbus_api::{ApiClient, ApiConfig, StaticTokenProvider};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = ApiClient::new(ApiConfig::new("https://api.example.com"))?
//!         .with_auth_token(StaticTokenProvider::new("token"));
//!
//!     let todos: serde_json::Value = client.get("/todos").await?;
//!     println!("{}", todos);
//!     Ok(())
//! }
//! ```

mod client;
mod config;
mod error;
pub mod interceptor;
mod token;

pub use client::ApiClient;
pub use config::ApiConfig;
pub use error::{ApiError, AuthTokenError, Result};
pub use interceptor::{AuthTokenInterceptor, RequestInterceptor};
pub use token::{token_fn, AuthTokenProvider, FnTokenProvider, StaticTokenProvider};

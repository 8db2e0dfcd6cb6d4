use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use nimbus_api::{
    token_fn, ApiClient, ApiConfig, ApiError, AuthTokenError, RequestInterceptor,
    StaticTokenProvider,
};
use reqwest::header::HeaderValue;
use serde_json::{json, Value};
use wiremock::matchers::{body_json, header, header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> anyhow::Result<ApiClient> {
    Ok(ApiClient::new(ApiConfig::new(server.uri()))?)
}

#[tokio::test]
async fn test_get_with_token() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/todos"))
        .and(header("authorization", "tok"))
        .and(header("content-type", "application/json"))
        .and(header_exists("x-amz-date"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1}])))
        .expect(1)
        .mount(&server)
        .await;

    let todos: Value = client(&server)?
        .with_auth_token(StaticTokenProvider::new("tok"))
        .get("/todos")
        .await?;
    assert_eq!(todos, json!([{"id": 1}]));
    Ok(())
}

#[tokio::test]
async fn test_post_json() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_json(json!({"query": "{ todos { id } }"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {"todos": []}})))
        .expect(1)
        .mount(&server)
        .await;

    let response: Value = client(&server)?
        .with_auth_token(StaticTokenProvider::new("tok"))
        .post_json("graphql", &json!({"query": "{ todos { id } }"}))
        .await?;
    assert_eq!(response["data"]["todos"], json!([]));
    Ok(())
}

#[tokio::test]
async fn test_token_failure_sends_nothing() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let err = client(&server)?
        .with_auth_token(token_fn(|| Err(AuthTokenError::new("not signed in"))))
        .get::<Value>("/todos")
        .await
        .unwrap_err();

    match err {
        ApiError::Operation { description, source, .. } => {
            assert_eq!(description, "Failed to retrieve authorization token.");
            assert_eq!(source.message(), "not signed in");
        }
        other => panic!("expected operation error, got {:?}", other),
    }
    Ok(())
}

#[tokio::test]
async fn test_token_fetched_per_request() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let client = client(&server)?.with_auth_token(token_fn(move || {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok("tok".to_string())
    }));

    client.get::<Value>("/a").await?;
    client.get::<Value>("/b").await?;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    Ok(())
}

#[tokio::test]
async fn test_non_success_status() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string("expired"))
        .mount(&server)
        .await;

    let err = client(&server)?
        .with_auth_token(StaticTokenProvider::new("old"))
        .get::<Value>("/todos")
        .await
        .unwrap_err();
    assert!(err.is_status(401));
    assert_eq!(err.to_string(), "HTTP status 401: expired");
    Ok(())
}

struct TraceIdInterceptor;

impl RequestInterceptor for TraceIdInterceptor {
    fn intercept(&self, mut request: reqwest::Request) -> nimbus_api::Result<reqwest::Request> {
        request
            .headers_mut()
            .insert("x-trace-id", HeaderValue::from_static("trace-1"));
        Ok(request)
    }
}

#[tokio::test]
async fn test_interceptors_run_in_order() -> anyhow::Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("x-trace-id", "trace-1"))
        .and(header("authorization", "tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let response: Value = client(&server)?
        .with_interceptor(TraceIdInterceptor)
        .with_auth_token(StaticTokenProvider::new("tok"))
        .get("/health")
        .await?;
    assert_eq!(response["ok"], true);
    Ok(())
}

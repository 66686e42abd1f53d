use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;

use ratewatch_api::app::services::{AppServices, Stores};
use ratewatch_core::CurrencyCode;
use ratewatch_infra::config::AppConfig;
use ratewatch_infra::outbox::OutboxStore;
use ratewatch_infra::rate_api::{RateError, RateFetcher};

struct FixedRate(Option<&'static str>);

#[async_trait]
impl RateFetcher for FixedRate {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn fetch(&self, _base: &CurrencyCode, _target: &CurrencyCode) -> Result<String, RateError> {
        match self.0 {
            Some(rate) => Ok(rate.to_string()),
            None => Err(RateError::Status {
                provider: "fixed".to_string(),
                status: 503,
            }),
        }
    }
}

struct TestServer {
    base_url: String,
    stores: Stores,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(rate: Option<&'static str>) -> Self {
        // Same router as prod, in-memory stores, ephemeral port.
        let config = AppConfig::from_lookup(|_| None).unwrap();
        let stores = Stores::in_memory();
        let services = AppServices::new(&stores, Arc::new(FixedRate(rate)), &config);
        let app = ratewatch_api::app::build_app(services);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            stores,
            client: reqwest::Client::new(),
            handle,
        }
    }

    async fn post_email(&self, path: &str, email: &str) -> reqwest::Response {
        self.client
            .post(format!("{}/api/v1/{}", self.base_url, path))
            .form(&[("email", email)])
            .send()
            .await
            .unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn(Some("41.00")).await;
    let res = srv
        .client
        .get(format!("{}/health", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn rate_reports_provider_price() {
    let srv = TestServer::spawn(Some("41.4500")).await;
    let res = srv
        .client
        .get(format!("{}/api/v1/rate", srv.base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["base_code"], "USD");
    assert_eq!(body["target_code"], "UAH");
    assert_eq!(body["price"], "41.4500");
}

#[tokio::test]
async fn rate_is_unavailable_when_every_provider_fails() {
    let srv = TestServer::spawn(None).await;
    let res = srv
        .client
        .get(format!("{}/api/v1/rate", srv.base_url))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"], "rate_unavailable");
}

#[tokio::test]
async fn subscribe_lifecycle() {
    let srv = TestServer::spawn(Some("41.00")).await;

    let res = srv.post_email("subscribe", "Alice@Example.com").await;
    assert_eq!(res.status(), StatusCode::OK);

    // Stored normalised, so a differently-cased repeat is a duplicate.
    let res = srv.post_email("subscribe", "alice@example.com").await;
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = srv.post_email("unsubscribe", "alice@example.com").await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = srv.post_email("unsubscribe", "alice@example.com").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn malformed_emails_are_rejected() {
    let srv = TestServer::spawn(Some("41.00")).await;

    for path in ["subscribe", "unsubscribe"] {
        let res = srv.post_email(path, "not-an-email").await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{path}");

        let res = srv.post_email(path, "").await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{path}");
    }

    let res = srv
        .client
        .post(format!("{}/api/v1/subscribe", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn send_emails_queues_one_event_per_subscriber() {
    let srv = TestServer::spawn(Some("41.00")).await;
    for email in ["a@example.com", "b@example.com", "c@example.com"] {
        assert_eq!(srv.post_email("subscribe", email).await.status(), StatusCode::OK);
    }

    let res = srv
        .client
        .post(format!("{}/api/v1/sendEmails", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["queued"], 3);

    let events = srv.stores.outbox.fetch_unpublished_events(0).await.unwrap();
    assert_eq!(events.len(), 3);
}

#[tokio::test]
async fn send_emails_fails_without_a_rate() {
    let srv = TestServer::spawn(None).await;
    srv.post_email("subscribe", "a@example.com").await;

    let res = srv
        .client
        .post(format!("{}/api/v1/sendEmails", srv.base_url))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(srv.stores.outbox.fetch_unpublished_events(0).await.unwrap().is_empty());
}

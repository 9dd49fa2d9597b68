// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Climatiq estimate client.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

use crate::config::Config;

/// Unit sent with every electricity estimate.
pub const ENERGY_UNIT: &str = "kWh";

/// Longest slice of an upstream error body kept for logs and responses.
const MAX_ERROR_BODY: usize = 512;

/// Errors from the emission-factor provider.
#[derive(Debug, Error)]
pub enum OriginError {
    #[error("Upstream unavailable: {0}")]
    Unavailable(String),

    #[error("Upstream returned status {status}")]
    Status { status: u16, body: String },

    #[error("Upstream returned a malformed body: {0}")]
    Malformed(String),
}

/// Source of emission records for cache misses.
#[async_trait]
pub trait OriginClient: Send + Sync {
    /// Estimate emissions for `energy` kWh of grid electricity in `region`.
    async fn estimate(&self, region: &str, energy: f64) -> Result<Value, OriginError>;
}

#[derive(Debug, Serialize)]
struct EmissionFactor<'a> {
    activity_id: &'a str,
    region: &'a str,
}

#[derive(Debug, Serialize)]
struct EnergyParameters {
    energy: f64,
    energy_unit: &'static str,
}

/// Body of `POST /estimate`.
#[derive(Debug, Serialize)]
struct EstimateRequest<'a> {
    emission_factor: EmissionFactor<'a>,
    parameters: EnergyParameters,
}

impl<'a> EstimateRequest<'a> {
    fn electricity(activity_id: &'a str, region: &'a str, energy: f64) -> Self {
        Self {
            emission_factor: EmissionFactor {
                activity_id,
                region,
            },
            parameters: EnergyParameters {
                energy,
                energy_unit: ENERGY_UNIT,
            },
        }
    }
}

/// HTTP client for the Climatiq `/estimate` endpoint.
pub struct ClimatiqClient {
    estimate_url: String,
    activity_id: String,
    max_retries: u32,
    http: reqwest::Client,
}

impl ClimatiqClient {
    /// Build a client with the bearer credential and timeout from `config`.
    pub fn new(config: &Config) -> Result<Self, OriginError> {
        let mut headers = HeaderMap::new();
        let mut bearer = HeaderValue::from_str(&format!("Bearer {}", config.climatiq_api_key))
            .map_err(|e| OriginError::Unavailable(format!("Invalid API key header: {e}")))?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.upstream_timeout())
            .build()
            .map_err(|e| OriginError::Unavailable(format!("HTTP client build failed: {e}")))?;

        Ok(Self {
            estimate_url: format!("{}/estimate", config.climatiq_base_url),
            activity_id: config.activity_id.clone(),
            max_retries: config.upstream_max_retries,
            http,
        })
    }

    async fn send(&self, body: &EstimateRequest<'_>) -> Result<reqwest::Response, OriginError> {
        let mut attempt = 0;
        loop {
            match self.http.post(&self.estimate_url).json(body).send().await {
                Ok(resp) => return Ok(resp),
                Err(e) if is_transient(&e) && attempt < self.max_retries => {
                    attempt += 1;
                    tracing::warn!(error = %e, attempt, "Transient upstream failure, retrying");
                    tokio::time::sleep(Duration::from_millis(200 * u64::from(attempt))).await;
                }
                Err(e) => return Err(OriginError::Unavailable(e.to_string())),
            }
        }
    }
}

fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn truncate(body: &str) -> String {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

#[async_trait]
impl OriginClient for ClimatiqClient {
    async fn estimate(&self, region: &str, energy: f64) -> Result<Value, OriginError> {
        let body = EstimateRequest::electricity(&self.activity_id, region, energy);
        tracing::debug!(region = %region, energy, "Requesting estimate");

        let resp = self.send(&body).await?;
        let status = resp.status();

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            tracing::warn!(region = %region, status = status.as_u16(), "Upstream rejected estimate");
            return Err(OriginError::Status {
                status: status.as_u16(),
                body: truncate(&text),
            });
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| OriginError::Unavailable(format!("Reading body failed: {e}")))?;

        serde_json::from_slice(&bytes).map_err(|e| OriginError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        extract::State,
        http::{HeaderMap as RequestHeaders, StatusCode},
        routing::post,
        Json, Router,
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// What a local stand-in for the provider saw.
    #[derive(Default)]
    struct Provider {
        hits: AtomicUsize,
        requests: Mutex<Vec<(Option<String>, Value)>>,
    }

    impl Provider {
        fn record(&self, headers: &RequestHeaders, body: Value) -> usize {
            let auth = headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            self.requests.lock().unwrap().push((auth, body));
            self.hits.fetch_add(1, Ordering::SeqCst)
        }
    }

    async fn estimate_ok(
        State(provider): State<Arc<Provider>>,
        headers: RequestHeaders,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        provider.record(&headers, body);
        Json(json!({ "co2e": 38.5, "co2e_unit": "kg" }))
    }

    async fn estimate_denied(
        State(provider): State<Arc<Provider>>,
        headers: RequestHeaders,
        Json(body): Json<Value>,
    ) -> (StatusCode, &'static str) {
        provider.record(&headers, body);
        (StatusCode::UNAUTHORIZED, "{\"error\":\"invalid_api_key\"}")
    }

    async fn estimate_garbage(
        State(provider): State<Arc<Provider>>,
        headers: RequestHeaders,
        Json(body): Json<Value>,
    ) -> &'static str {
        provider.record(&headers, body);
        "<html>maintenance</html>"
    }

    /// Stalls past the client timeout on the first call only.
    async fn estimate_slow_once(
        State(provider): State<Arc<Provider>>,
        headers: RequestHeaders,
        Json(body): Json<Value>,
    ) -> Json<Value> {
        if provider.record(&headers, body) == 0 {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
        Json(json!({ "co2e": 1.0 }))
    }

    /// Serve the stand-in provider on an ephemeral port and return its base URL.
    async fn spawn_provider() -> (String, Arc<Provider>) {
        let provider = Arc::new(Provider::default());
        let app = Router::new()
            .route("/ok/estimate", post(estimate_ok))
            .route("/denied/estimate", post(estimate_denied))
            .route("/garbage/estimate", post(estimate_garbage))
            .route("/slow/estimate", post(estimate_slow_once))
            .with_state(provider.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        (format!("http://{}", addr), provider)
    }

    fn client_for(base_url: String) -> ClimatiqClient {
        let mut config = Config::default();
        config.climatiq_base_url = base_url;
        config.climatiq_api_key = "test-key".into();
        config.upstream_timeout_secs = 1;
        ClimatiqClient::new(&config).unwrap()
    }

    #[test]
    fn test_estimate_request_shape() {
        let body = EstimateRequest::electricity("electricity-energy_source_grid_mix", "US", 100.0);
        let value = serde_json::to_value(&body).unwrap();

        assert_eq!(
            value,
            json!({
                "emission_factor": {
                    "activity_id": "electricity-energy_source_grid_mix",
                    "region": "US"
                },
                "parameters": {
                    "energy": 100.0,
                    "energy_unit": "kWh"
                }
            })
        );
    }

    #[test]
    fn test_client_targets_estimate_endpoint() {
        let mut config = Config::default();
        config.climatiq_base_url = "http://localhost:9000".into();
        config.climatiq_api_key = "secret".into();

        let client = ClimatiqClient::new(&config).unwrap();
        assert_eq!(client.estimate_url, "http://localhost:9000/estimate");
        assert_eq!(client.max_retries, 1);
    }

    #[test]
    fn test_client_rejects_unprintable_key() {
        let mut config = Config::default();
        config.climatiq_api_key = "bad\nkey".into();
        assert!(matches!(
            ClimatiqClient::new(&config),
            Err(OriginError::Unavailable(_))
        ));
    }

    #[test]
    fn test_truncate_long_bodies() {
        let long = "x".repeat(MAX_ERROR_BODY + 10);
        let short = truncate(&long);
        assert_eq!(short.len(), MAX_ERROR_BODY + 3);
        assert!(short.ends_with("..."));
        assert_eq!(truncate("denied"), "denied");
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_unavailable() {
        let mut config = Config::default();
        // Nothing listens on the discard port.
        config.climatiq_base_url = "http://127.0.0.1:9".into();
        config.upstream_max_retries = 0;
        config.upstream_timeout_secs = 2;

        let client = ClimatiqClient::new(&config).unwrap();
        let err = client.estimate("US", 1.0).await.unwrap_err();
        assert!(matches!(err, OriginError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_posts_estimate_with_bearer_auth() {
        let (base, provider) = spawn_provider().await;
        let client = client_for(format!("{base}/ok"));

        let data = client.estimate("US", 100.0).await.unwrap();
        assert_eq!(data, json!({ "co2e": 38.5, "co2e_unit": "kg" }));

        let requests = provider.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        let (auth, body) = &requests[0];
        assert_eq!(auth.as_deref(), Some("Bearer test-key"));
        assert_eq!(body["emission_factor"]["region"], "US");
        assert_eq!(
            body["emission_factor"]["activity_id"],
            "electricity-energy_source_grid_mix"
        );
        assert_eq!(body["parameters"]["energy"], 100.0);
        assert_eq!(body["parameters"]["energy_unit"], "kWh");
    }

    #[tokio::test]
    async fn test_error_status_is_not_retried() {
        let (base, provider) = spawn_provider().await;
        let client = client_for(format!("{base}/denied"));

        match client.estimate("US", 1.0).await {
            Err(OriginError::Status { status, body }) => {
                assert_eq!(status, 401);
                assert!(body.contains("invalid_api_key"));
            }
            other => panic!("expected status error, got {other:?}"),
        }
        assert_eq!(provider.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_non_json_success_is_malformed() {
        let (base, _provider) = spawn_provider().await;
        let client = client_for(format!("{base}/garbage"));

        let err = client.estimate("DE", 2.0).await.unwrap_err();
        assert!(matches!(err, OriginError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_timeout_is_retried_once() {
        let (base, provider) = spawn_provider().await;
        let client = client_for(format!("{base}/slow"));

        let data = client.estimate("FR", 3.0).await.unwrap();
        assert_eq!(data["co2e"], 1.0);
        assert_eq!(provider.hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timeout_without_retries_is_unavailable() {
        let (base, provider) = spawn_provider().await;
        let mut config = Config::default();
        config.climatiq_base_url = format!("{base}/slow");
        config.upstream_timeout_secs = 1;
        config.upstream_max_retries = 0;
        let client = ClimatiqClient::new(&config).unwrap();

        let err = client.estimate("FR", 3.0).await.unwrap_err();
        assert!(matches!(err, OriginError::Unavailable(_)));
        assert_eq!(provider.hits.load(Ordering::SeqCst), 1);
    }
}

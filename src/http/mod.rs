use crate::calendar::{BulkUpdateRequest, CommitBatch, PendingChangeSet};
use crate::config::Config;
use crate::error::ApiError;
use crate::rate_limit::RateLimitCoordinator;
use crate::retry_after::parse_retry_after;
use chrono::NaiveDate;
use log::{debug, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

pub fn build_client(cfg: &Config) -> Result<Client, ApiError> {
    let mut default_headers = HeaderMap::new();
    if let Ok(ua) = HeaderValue::from_str(&cfg.user_agent) {
        default_headers.insert(USER_AGENT, ua);
    }
    // Authorization header is injected per request so the token can be rotated.
    let builder = Client::builder()
        .default_headers(default_headers)
        .timeout(Duration::from_secs(cfg.timeout_secs))
        .use_rustls_tls();
    Ok(builder.build()?)
}

pub fn map_status_to_error(status: StatusCode, message: String) -> ApiError {
    let code = match status {
        StatusCode::BAD_REQUEST => "bad_request",
        StatusCode::UNAUTHORIZED => "unauthorized",
        StatusCode::FORBIDDEN => "forbidden",
        StatusCode::NOT_FOUND => "not_found",
        StatusCode::CONFLICT => "conflict",
        StatusCode::UNPROCESSABLE_ENTITY => "unprocessable",
        StatusCode::TOO_MANY_REQUESTS => "rate_limited",
        s if s.is_server_error() => "upstream_error",
        _ => "server_error",
    };
    ApiError::Status {
        code,
        status,
        message,
    }
}

fn compute_backoff(attempt: u32) -> Duration {
    // Exponential backoff with jitter: base 200ms * 2^attempt, max 5s.
    let base = 200u64.saturating_mul(1u64 << attempt.min(5));
    let max = 5_000u64.min(base);
    let jitter = fastrand::u64(0..=max / 2);
    Duration::from_millis(max / 2 + jitter)
}

#[derive(Debug, Clone, Deserialize)]
struct HolidaysResponse {
    dates: Vec<NaiveDate>,
}

/// REST client for the TaskMate API. Every 429 it sees is reported to the shared coordinator.
pub struct ApiClient {
    client: Client,
    cfg: Config,
    rate: Arc<RateLimitCoordinator>,
}

impl ApiClient {
    pub fn new(cfg: Config, rate: Arc<RateLimitCoordinator>) -> Result<Self, ApiError> {
        let client = build_client(&cfg)?;
        Ok(Self { client, cfg, rate })
    }

    pub fn rate_limit(&self) -> &Arc<RateLimitCoordinator> {
        &self.rate
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<String, ApiError> {
        let url = self.cfg.api_url.join(path)?;
        let mut attempt: u32 = 0;
        loop {
            let request_id = Uuid::new_v4();
            let mut req = self
                .client
                .request(method.clone(), url.clone())
                .bearer_auth(&self.cfg.token)
                .header(ACCEPT, HeaderValue::from_static("application/json"))
                .header("X-Request-Id", request_id.to_string());
            if !query.is_empty() {
                req = req.query(query);
            }
            if let Some(b) = body {
                req = req.json(b);
            }
            debug!("{} {} request_id={}", method, url, request_id);

            let res = match req.send().await {
                Ok(r) => r,
                Err(e) => {
                    warn!("{} {} error sending request: {}", method, url, e);
                    if attempt < self.cfg.max_retries {
                        tokio::time::sleep(compute_backoff(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(ApiError::Http(e));
                }
            };

            let status = res.status();
            if status.is_success() {
                if self.rate.is_limited() {
                    self.rate.clear();
                }
                return Ok(res.text().await?);
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = res
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| parse_retry_after(s, chrono::Utc::now()));
                if self.rate.report_throttled(retry_after) {
                    let text = self
                        .rate
                        .state()
                        .indicator_text()
                        .unwrap_or_else(|| "Rate limited".to_string());
                    warn!("{}", text);
                }
            }

            if (status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error())
                && attempt < self.cfg.max_retries
            {
                let throttle_ms = if status == StatusCode::TOO_MANY_REQUESTS {
                    self.rate.retry_delay_millis()
                } else {
                    0
                };
                if throttle_ms > self.cfg.max_retry_wait_secs.saturating_mul(1000) {
                    warn!(
                        "{} {} asks to wait {}s (limit {}s); not retrying",
                        method,
                        url,
                        throttle_ms / 1000,
                        self.cfg.max_retry_wait_secs
                    );
                    let text = res.text().await.unwrap_or_default();
                    return Err(map_status_to_error(status, text));
                }
                let backoff = if throttle_ms > 0 {
                    Duration::from_millis(throttle_ms)
                } else {
                    compute_backoff(attempt)
                };
                warn!(
                    "{} {} retrying (status {}), backoff {:?}",
                    method, url, status, backoff
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
                continue;
            }

            let text = res.text().await.unwrap_or_default();
            return Err(map_status_to_error(status, text));
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let text = self.send::<()>(Method::GET, path, query, None).await?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Server-side holidays for `year`.
    pub async fn fetch_holidays(
        &self,
        year: i32,
        dealership_id: Option<u64>,
    ) -> Result<BTreeSet<NaiveDate>, ApiError> {
        let query: Vec<(&str, String)> = dealership_id
            .map(|id| vec![("dealership_id", id.to_string())])
            .unwrap_or_default();
        let resp: HolidaysResponse = self
            .get_json(&format!("calendar/{}/holidays", year), &query)
            .await?;
        Ok(resp.dates.into_iter().collect())
    }

    pub async fn bulk_update(&self, req: &BulkUpdateRequest) -> Result<(), ApiError> {
        self.send(Method::POST, "calendar/bulk", &[], Some(req))
            .await?;
        Ok(())
    }

    /// Send every staged change. The set is cleared only when all requests succeed.
    pub async fn save_pending(
        &self,
        year: i32,
        dealership_id: Option<u64>,
        pending: &mut PendingChangeSet,
    ) -> Result<CommitBatch, ApiError> {
        let batch = pending.commit();
        for req in batch.clone().into_requests(year, dealership_id) {
            if let Err(e) = self.bulk_update(&req).await {
                warn!(
                    "Saving {} {} dates failed; keeping {} pending changes: {}",
                    req.dates.len(),
                    req.kind.as_str(),
                    pending.len(),
                    e
                );
                return Err(e);
            }
        }
        info!(
            "Saved calendar {}: {} holidays, {} workdays",
            year,
            batch.holiday_dates.len(),
            batch.workday_dates.len()
        );
        pending.discard();
        Ok(batch)
    }
}

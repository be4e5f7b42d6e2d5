//! reqwest-backed implementation of [`UpstreamApi`] against the Slack Web
//! API, with 429 retry/backoff.

use std::time::Duration;

use {
    async_trait::async_trait,
    reqwest::{Method, StatusCode},
    serde_json::Value,
    tracing::{debug, info, warn},
};

use crate::{Result, UpstreamApi, UpstreamChannel, UpstreamError};

/// Slack error codes that mean the token itself is bad.
const UNAUTHORIZED_CODES: &[&str] = &[
    "invalid_auth",
    "not_authed",
    "account_inactive",
    "token_revoked",
];

/// Slack error codes that mean the channel name is already taken.
const CONFLICT_CODES: &[&str] = &["name_taken", "already_exists"];

/// HTTP client for the Slack Web API.
///
/// Holds no credentials; every call takes the requester's bot token. On a
/// 429 response the client honors `Retry-After` (falling back to
/// `default_retry_delay`) and retries up to `max_retries` total attempts.
pub struct SlackClient {
    http: reqwest::Client,
    base_url: String,
    max_retries: u32,
    default_retry_delay: Duration,
}

impl SlackClient {
    pub fn new(base_url: impl Into<String>, max_retries: u32, default_retry_delay: Duration) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        debug!(
            base_url = %base_url,
            max_retries,
            default_retry_delay_secs = default_retry_delay.as_secs(),
            "slack client initialized"
        );
        Self {
            http: reqwest::Client::new(),
            base_url,
            max_retries,
            default_retry_delay,
        }
    }

    /// Issue one API call, retrying on rate limits.
    ///
    /// Returns the decoded payload once `ok` is true; all failure shapes are
    /// mapped to [`UpstreamError`].
    async fn call(
        &self,
        token: &str,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value> {
        if token.is_empty() {
            return Err(UpstreamError::unauthorized("slack bot token is not configured"));
        }

        let url = format!("{}/{path}", self.base_url);
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let mut req = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(token)
                .query(query);
            if let Some(json) = body {
                req = req.json(json);
            }

            let resp = req.send().await.map_err(|e| {
                warn!(path, error = %e, "slack request failed to send");
                UpstreamError::unavailable(format!("slack request failed: {e}"))
            })?;

            let status = resp.status();

            if status == StatusCode::TOO_MANY_REQUESTS {
                let delay = resp
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map_or(self.default_retry_delay, Duration::from_secs);

                warn!(
                    path,
                    attempt,
                    delay_secs = delay.as_secs(),
                    "slack rate limited"
                );

                if attempt >= self.max_retries {
                    return Err(UpstreamError::RateLimited {
                        attempts: attempt,
                        last_delay: delay,
                    });
                }
                tokio::time::sleep(delay).await;
                continue;
            }

            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                warn!(path, status = %status, "slack returned transport error");
                return Err(UpstreamError::unavailable(format!(
                    "slack returned HTTP {status}: {text}"
                )));
            }

            let payload: Value = resp.json().await.map_err(|e| {
                warn!(path, error = %e, "slack payload was not valid json");
                UpstreamError::protocol(format!("slack response was not valid JSON: {e}"))
            })?;

            if payload.get("ok").and_then(Value::as_bool) != Some(true) {
                let code = payload
                    .get("error")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown_error")
                    .to_string();
                info!(path, attempt, error_code = %code, "slack api error");

                if UNAUTHORIZED_CODES.contains(&code.as_str()) {
                    return Err(UpstreamError::unauthorized(code));
                }
                if CONFLICT_CODES.contains(&code.as_str()) {
                    return Err(UpstreamError::Conflict);
                }
                return Err(UpstreamError::unavailable(format!(
                    "slack API returned error: {code}"
                )));
            }

            info!(path, attempt, status = %status, "slack api ok");
            return Ok(payload);
        }
    }
}

#[async_trait]
impl UpstreamApi for SlackClient {
    async fn resolve_workspace(&self, token: &str) -> Result<String> {
        let payload = self.call(token, Method::GET, "auth.test", &[], None).await?;

        let workspace = payload
            .get("team_id")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .or_else(|| {
                payload
                    .get("enterprise_id")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
            })
            .map(str::to_string);

        match workspace {
            Some(id) => {
                info!(workspace_id = %id, "workspace resolved");
                Ok(id)
            },
            None => Err(UpstreamError::unauthorized(
                "unable to resolve workspace from slack token",
            )),
        }
    }

    async fn list_channels(&self, token: &str) -> Result<Vec<UpstreamChannel>> {
        let mut channels = Vec::new();
        let mut cursor = String::new();
        let mut pages = 0u32;

        loop {
            let mut query = vec![
                ("limit", "1000"),
                ("exclude_archived", "true"),
                ("types", "public_channel,private_channel"),
            ];
            if !cursor.is_empty() {
                query.push(("cursor", cursor.as_str()));
            }

            let payload = self
                .call(token, Method::GET, "conversations.list", &query, None)
                .await?;
            pages += 1;

            let page = payload
                .get("channels")
                .and_then(Value::as_array)
                .ok_or_else(|| {
                    UpstreamError::protocol("conversations.list response missing channels array")
                })?;

            for entry in page {
                let channel: UpstreamChannel =
                    serde_json::from_value(entry.clone()).map_err(|e| {
                        UpstreamError::protocol(format!("malformed channel entry: {e}"))
                    })?;
                channels.push(channel);
            }

            cursor = payload
                .pointer("/response_metadata/next_cursor")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string();
            if cursor.is_empty() {
                break;
            }
        }

        info!(pages, channels = channels.len(), "channel list fetched");
        Ok(channels)
    }

    async fn create_channel(&self, token: &str, name: &str) -> Result<UpstreamChannel> {
        let body = serde_json::json!({ "name": name });
        let payload = self
            .call(token, Method::POST, "conversations.create", &[], Some(&body))
            .await?;

        let channel = payload.get("channel").cloned().ok_or_else(|| {
            UpstreamError::protocol("conversations.create response missing channel payload")
        })?;
        serde_json::from_value(channel)
            .map_err(|e| UpstreamError::protocol(format!("malformed channel payload: {e}")))
    }
}

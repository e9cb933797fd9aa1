use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::DateTime;
use reqwest::Url;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::config::RelinkConfig;

/// Read access to a wiki, as much of it as the rewriter's surroundings
/// need: page text, rendered HTML for directory harvesting, and revision
/// history for reference timestamps.
pub trait WikiApi {
    fn page_wikitext(&mut self, title: &str) -> Result<Option<RemotePage>>;
    fn rendered_html(&mut self, title: &str) -> Result<Option<String>>;
    fn revision_history(&mut self, title: &str, limit: usize) -> Result<Vec<RevisionInfo>>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePage {
    pub title: String,
    pub content: String,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionInfo {
    pub timestamp: i64,
    pub user: String,
    pub comment: String,
    pub minor: bool,
}

/// The newest revision that is neither minor nor attributable to a bot
/// (by username or edit summary); the oldest known revision when every one
/// of them is. Revisions are expected newest-first, as the API returns
/// them.
pub fn latest_stable_timestamp(revisions: &[RevisionInfo]) -> Option<i64> {
    for revision in revisions {
        if revision.minor {
            continue;
        }
        if revision.user.to_lowercase().contains("bot") {
            continue;
        }
        if revision.comment.to_lowercase().contains("bot") {
            continue;
        }
        return Some(revision.timestamp);
    }
    revisions.last().map(|revision| revision.timestamp)
}

#[derive(Debug, Clone)]
pub struct WikiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub rate_limit_read_ms: u64,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl WikiClientConfig {
    pub fn from_config(config: &RelinkConfig) -> Self {
        Self {
            api_url: config.api_url().unwrap_or_default(),
            user_agent: config.user_agent(),
            timeout_ms: env_value_u64("WIKI_HTTP_TIMEOUT_MS", 30_000),
            rate_limit_read_ms: env_value_u64("WIKI_RATE_LIMIT_READ", 300),
            max_retries: env_value_usize("WIKI_HTTP_RETRIES", 2),
            retry_delay_ms: env_value_u64("WIKI_HTTP_RETRY_DELAY_MS", 500),
        }
    }
}

pub struct HttpWikiApi {
    client: Client,
    config: WikiClientConfig,
    last_request_at: Option<Instant>,
    request_count: usize,
}

impl HttpWikiApi {
    pub fn new(config: WikiClientConfig) -> Result<Self> {
        if config.api_url.trim().is_empty() {
            bail!("no API URL configured; set [remote] api_url or WIKI_API_URL");
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build wiki HTTP client")?;
        Ok(Self {
            client,
            config,
            last_request_at: None,
            request_count: 0,
        })
    }

    fn request_json(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let base_url = Url::parse(&self.config.api_url)
            .with_context(|| format!("invalid API URL: {}", self.config.api_url))?;

        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        for (key, value) in params {
            if !value.is_empty() {
                pairs.push(((*key).to_string(), value.clone()));
            }
        }

        for attempt in 0..=self.config.max_retries {
            self.apply_rate_limit();
            let response = self
                .client
                .get(base_url.clone())
                .header("User-Agent", self.config.user_agent.clone())
                .query(&pairs)
                .send();
            self.request_count += 1;

            match response {
                Ok(response) => {
                    let status = response.status();
                    if !status.is_success() {
                        if attempt < self.config.max_retries && is_retryable_status(status) {
                            self.wait_before_retry(attempt);
                            continue;
                        }
                        bail!("wiki API request failed with HTTP {status}");
                    }

                    let payload: Value = response
                        .json()
                        .context("failed to decode wiki API JSON response")?;
                    if let Some(error) = payload.get("error") {
                        let code = error
                            .get("code")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown_error");
                        let info = error
                            .get("info")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown info");
                        bail!("wiki API error [{code}]: {info}");
                    }
                    return Ok(payload);
                }
                Err(error) => {
                    if attempt < self.config.max_retries && is_retryable_error(&error) {
                        self.wait_before_retry(attempt);
                        continue;
                    }
                    return Err(error).context("failed to call wiki API");
                }
            }
        }

        bail!("wiki API request exhausted retry budget")
    }

    fn apply_rate_limit(&mut self) {
        let delay = Duration::from_millis(self.config.rate_limit_read_ms);
        if let Some(last) = self.last_request_at {
            let elapsed = last.elapsed();
            if elapsed < delay {
                sleep(delay - elapsed);
            }
        }
        self.last_request_at = Some(Instant::now());
    }

    fn wait_before_retry(&self, attempt: usize) {
        sleep(Duration::from_millis(
            self.config.retry_delay_ms.saturating_mul(attempt as u64 + 1),
        ));
    }
}

impl WikiApi for HttpWikiApi {
    fn page_wikitext(&mut self, title: &str) -> Result<Option<RemotePage>> {
        let response = self.request_json(&[
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("prop", "revisions".to_string()),
            ("rvprop", "content|timestamp".to_string()),
            ("rvslots", "main".to_string()),
        ])?;
        let parsed: QueryResponse =
            serde_json::from_value(response).context("failed to decode page content response")?;
        Ok(page_from_query(parsed))
    }

    fn rendered_html(&mut self, title: &str) -> Result<Option<String>> {
        let response = self.request_json(&[
            ("action", "parse".to_string()),
            ("page", title.to_string()),
            ("prop", "text".to_string()),
        ]);
        let response = match response {
            Ok(response) => response,
            Err(error) => {
                // A missing page is an ordinary outcome for directory
                // suffix probing.
                if error.to_string().contains("missingtitle") {
                    return Ok(None);
                }
                return Err(error);
            }
        };
        let parsed: ParseResponse =
            serde_json::from_value(response).context("failed to decode parse response")?;
        Ok(parsed.parse.and_then(|payload| payload.text))
    }

    fn revision_history(&mut self, title: &str, limit: usize) -> Result<Vec<RevisionInfo>> {
        let response = self.request_json(&[
            ("action", "query".to_string()),
            ("titles", title.to_string()),
            ("prop", "revisions".to_string()),
            ("rvprop", "timestamp|user|comment|flags".to_string()),
            ("rvlimit", limit.max(1).to_string()),
        ])?;
        let parsed: QueryResponse =
            serde_json::from_value(response).context("failed to decode revision response")?;
        Ok(revisions_from_query(parsed))
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

fn page_from_query(parsed: QueryResponse) -> Option<RemotePage> {
    let page = parsed.query.pages.into_iter().next()?;
    if page.missing.unwrap_or(false) {
        return None;
    }
    let revision = page.revisions.into_iter().next()?;
    let content = revision.slots.and_then(|slots| slots.main)?.content?;
    let timestamp = revision
        .timestamp
        .as_deref()
        .and_then(parse_api_timestamp)?;
    Some(RemotePage {
        title: page.title,
        content,
        timestamp,
    })
}

fn revisions_from_query(parsed: QueryResponse) -> Vec<RevisionInfo> {
    let mut out = Vec::new();
    for page in parsed.query.pages {
        if page.missing.unwrap_or(false) {
            continue;
        }
        for revision in page.revisions {
            let Some(timestamp) = revision.timestamp.as_deref().and_then(parse_api_timestamp)
            else {
                continue;
            };
            out.push(RevisionInfo {
                timestamp,
                user: revision.user.unwrap_or_default(),
                comment: revision.comment.unwrap_or_default(),
                minor: revision.minor.unwrap_or(false),
            });
        }
    }
    out
}

/// MediaWiki timestamps are RFC 3339 (`2023-01-05T12:00:00Z`).
pub fn parse_api_timestamp(value: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|parsed| parsed.timestamp())
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect()
}

fn env_value_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_value_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    title: String,
    missing: Option<bool>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    timestamp: Option<String>,
    user: Option<String>,
    comment: Option<String>,
    minor: Option<bool>,
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ParseResponse {
    parse: Option<ParsePayload>,
}

#[derive(Debug, Deserialize)]
struct ParsePayload {
    text: Option<String>,
}

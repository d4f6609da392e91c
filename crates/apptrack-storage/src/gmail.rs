//! Gmail REST mailbox. Requests retry on 5xx, 429 and transport errors with
//! capped exponential backoff.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info_span, warn, Instrument};

use crate::{MailMessage, MailQuery, MailThread, MessageSource, SourceError};

pub const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com/gmail/v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct GmailConfig {
    pub base_url: String,
    pub access_token: String,
    pub timeout: Duration,
    pub backoff: BackoffPolicy,
    /// Upper bound on threads pulled per search, across pages.
    pub max_threads: usize,
}

impl GmailConfig {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            access_token: access_token.into(),
            timeout: Duration::from_secs(20),
            backoff: BackoffPolicy::default(),
            max_threads: 500,
        }
    }
}

#[derive(Debug)]
pub struct GmailSource {
    client: reqwest::Client,
    config: GmailConfig,
    label_ids: Mutex<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadList {
    #[serde(default)]
    threads: Vec<ThreadRef>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThreadRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ThreadResource {
    id: String,
    #[serde(default)]
    messages: Vec<MessageResource>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessageResource {
    #[serde(default)]
    label_ids: Vec<String>,
    internal_date: Option<String>,
    payload: Option<MessagePart>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MessagePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct PartBody {
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LabelList {
    #[serde(default)]
    labels: Vec<LabelResource>,
}

#[derive(Debug, Deserialize)]
struct LabelResource {
    id: String,
    name: String,
}

fn decode_body(data: &str) -> Result<String, SourceError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(data.trim_end_matches('='))
        .map_err(|e| SourceError::Decode(e.to_string()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Depth-first search for the first part of `mime` with a body.
fn find_body(part: &MessagePart, mime: &str) -> Result<Option<String>, SourceError> {
    if part.mime_type.eq_ignore_ascii_case(mime) {
        if let Some(data) = part.body.as_ref().and_then(|b| b.data.as_deref()) {
            return decode_body(data).map(Some);
        }
    }
    for child in &part.parts {
        if let Some(found) = find_body(child, mime)? {
            return Ok(Some(found));
        }
    }
    Ok(None)
}

fn header<'a>(part: &'a MessagePart, name: &str) -> Option<&'a str> {
    part.headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

fn message_from_resource(resource: &MessageResource) -> Result<MailMessage, SourceError> {
    let empty = MessagePart::default();
    let payload = resource.payload.as_ref().unwrap_or(&empty);
    let date = resource
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single());
    Ok(MailMessage {
        subject: header(payload, "Subject").unwrap_or_default().to_string(),
        from: header(payload, "From").unwrap_or_default().to_string(),
        plain_body: find_body(payload, "text/plain")?,
        html_body: find_body(payload, "text/html")?,
        date,
    })
}

fn thread_from_resource(resource: ThreadResource) -> Result<MailThread, SourceError> {
    let mut labels: Vec<String> = Vec::new();
    let mut messages = Vec::with_capacity(resource.messages.len());
    for message in &resource.messages {
        for label in &message.label_ids {
            if !labels.contains(label) {
                labels.push(label.clone());
            }
        }
        messages.push(message_from_resource(message)?);
    }
    messages.sort_by_key(|m: &MailMessage| m.date.unwrap_or(DateTime::<Utc>::MIN_UTC));
    Ok(MailThread {
        id: resource.id,
        labels,
        messages,
    })
}

impl GmailSource {
    pub fn new(config: GmailConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .timeout(config.timeout)
            .build()
            .context("building reqwest client")?;
        Ok(Self {
            client,
            config,
            label_ids: Mutex::new(HashMap::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, SourceError> {
        let request = request.bearer_auth(&self.config.access_token);
        let backoff = self.config.backoff;
        let mut attempt = 0;

        loop {
            let attempt_request = request
                .try_clone()
                .ok_or_else(|| SourceError::Message("request body is not cloneable".into()))?;

            match attempt_request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let url = resp.url().to_string();
                    if status.is_success() {
                        return Ok(resp.json::<T>().await?);
                    }
                    if status == StatusCode::UNAUTHORIZED {
                        return Err(SourceError::AuthExpired);
                    }
                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < backoff.max_retries
                    {
                        warn!(%status, attempt, "retrying gmail request");
                        tokio::time::sleep(backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(SourceError::HttpStatus {
                        status: status.as_u16(),
                        url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < backoff.max_retries
                    {
                        warn!(error = %err, attempt, "retrying gmail request");
                        tokio::time::sleep(backoff.delay_for_attempt(attempt)).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(SourceError::Request(err));
                }
            }
        }
    }

    async fn list_thread_ids(&self, q: &str) -> Result<Vec<String>, SourceError> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let mut params = vec![("q", q.to_string()), ("maxResults", "100".to_string())];
            if let Some(token) = &page_token {
                params.push(("pageToken", token.clone()));
            }
            let page: ThreadList = self
                .send_json(self.client.get(self.url("users/me/threads")).query(&params))
                .await?;
            ids.extend(page.threads.into_iter().map(|t| t.id));
            match page.next_page_token {
                Some(token) if ids.len() < self.config.max_threads => page_token = Some(token),
                _ => break,
            }
        }
        ids.truncate(self.config.max_threads);
        Ok(ids)
    }

    async fn fetch_thread(&self, id: &str) -> Result<MailThread, SourceError> {
        let resource: ThreadResource = self
            .send_json(
                self.client
                    .get(self.url(&format!("users/me/threads/{id}")))
                    .query(&[("format", "full")]),
            )
            .await?;
        thread_from_resource(resource)
    }

    async fn label_id(&self, name: &str) -> Result<String, SourceError> {
        let mut cache = self.label_ids.lock().await;
        if let Some(id) = cache.get(name) {
            return Ok(id.clone());
        }

        let existing: LabelList = self
            .send_json(self.client.get(self.url("users/me/labels")))
            .await?;
        for label in existing.labels {
            cache.insert(label.name, label.id);
        }
        if let Some(id) = cache.get(name) {
            return Ok(id.clone());
        }

        let created: LabelResource = self
            .send_json(self.client.post(self.url("users/me/labels")).json(&json!({
                "name": name,
                "labelListVisibility": "labelShow",
                "messageListVisibility": "show",
            })))
            .await?;
        debug!(label = %created.name, "created mailbox label");
        cache.insert(created.name, created.id.clone());
        Ok(created.id)
    }
}

#[async_trait]
impl MessageSource for GmailSource {
    async fn search(&self, query: &MailQuery) -> Result<Vec<MailThread>, SourceError> {
        let q = query.to_search_string();
        let span = info_span!("gmail_search", query = %q);
        async {
            let ids = self.list_thread_ids(&q).await?;
            let mut threads = Vec::with_capacity(ids.len());
            for id in ids {
                threads.push(self.fetch_thread(&id).await?);
            }
            debug!(count = threads.len(), "gmail search complete");
            Ok(threads)
        }
        .instrument(span)
        .await
    }

    async fn add_label(&self, thread_id: &str, label: &str) -> Result<(), SourceError> {
        let label_id = self.label_id(label).await?;
        let _: serde_json::Value = self
            .send_json(
                self.client
                    .post(self.url(&format!("users/me/threads/{thread_id}/modify")))
                    .json(&json!({ "addLabelIds": [label_id] })),
            )
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_logic_is_exponential_and_capped() {
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(350));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_millis(350));
    }

    #[test]
    fn throttling_and_server_errors_are_retryable() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            RetryDisposition::NonRetryable
        );
    }

    #[test]
    fn thread_payload_decodes_nested_parts() {
        let plain = URL_SAFE_NO_PAD.encode("We received your application.");
        let html = URL_SAFE_NO_PAD.encode("<p>We received <b>your</b> application.</p>");
        let raw = json!({
            "id": "18c1",
            "messages": [{
                "labelIds": ["INBOX", "UNREAD"],
                "internalDate": "1788264000000",
                "payload": {
                    "mimeType": "multipart/mixed",
                    "headers": [
                        {"name": "Subject", "value": "Application received"},
                        {"name": "From", "value": "Acme Careers <jobs@acme.com>"}
                    ],
                    "parts": [{
                        "mimeType": "multipart/alternative",
                        "parts": [
                            {"mimeType": "text/plain", "body": {"data": plain}},
                            {"mimeType": "text/html", "body": {"data": format!("{html}==")}}
                        ]
                    }]
                }
            }]
        });
        let resource: ThreadResource = serde_json::from_value(raw).unwrap();
        let thread = thread_from_resource(resource).unwrap();

        assert_eq!(thread.id, "18c1");
        assert_eq!(thread.labels, vec!["INBOX".to_string(), "UNREAD".to_string()]);
        let message = thread.latest().unwrap();
        assert_eq!(message.subject, "Application received");
        assert_eq!(message.from, "Acme Careers <jobs@acme.com>");
        assert_eq!(
            message.plain_body.as_deref(),
            Some("We received your application.")
        );
        assert_eq!(
            message.html_body.as_deref(),
            Some("<p>We received <b>your</b> application.</p>")
        );
        assert_eq!(message.date.unwrap().timestamp(), 1_788_264_000);
    }

    #[test]
    fn invalid_body_encoding_is_a_decode_error() {
        assert!(matches!(decode_body("***"), Err(SourceError::Decode(_))));
    }
}

//! AgentMail REST v0 client — the watched scheduling inbox.
//!
//! Thread listing, thread detail with messages, and replies. Replies go
//! through the reply endpoint of the latest message so AgentMail keeps
//! threading intact.

use async_trait::async_trait;
use serde::Deserialize;

use super::{EmailThread, MailError, MailSource, ThreadMessage, ThreadWithMessages};
use crate::http::{send_with_retry, RetryPolicy};
use crate::util::parse_sender;

const API_BASE: &str = "https://api.agentmail.to/v0";

/// Threads fetched per listing call.
const THREAD_LIST_LIMIT: u32 = 20;

/// Opening-message bodies are truncated to this many bytes before
/// prompting — enough for intent, cheap on tokens.
const BODY_PROMPT_LIMIT: usize = 2000;

// ============================================================================
// API response types
// ============================================================================

#[derive(Debug, Deserialize)]
struct ThreadListResponse {
    #[serde(default)]
    threads: Vec<ThreadStub>,
}

#[derive(Debug, Deserialize)]
struct ThreadStub {
    thread_id: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    preview: Option<String>,
    #[serde(default)]
    senders: Vec<String>,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThreadDetail {
    thread_id: String,
    #[serde(default)]
    subject: Option<String>,
    #[serde(default)]
    preview: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    messages: Vec<MessageDetail>,
}

#[derive(Debug, Deserialize)]
struct MessageDetail {
    message_id: String,
    #[serde(default)]
    from: Option<String>,
    #[serde(default)]
    to: Vec<String>,
    #[serde(default)]
    text: Option<String>,
    /// Plain text extracted from HTML-only messages.
    #[serde(default)]
    extracted_text: Option<String>,
    #[serde(default)]
    timestamp: Option<String>,
}

// ============================================================================
// Client
// ============================================================================

/// AgentMail API client bound to one inbox.
pub struct AgentMailClient {
    client: reqwest::Client,
    api_key: String,
    inbox_id: String,
    policy: RetryPolicy,
}

impl AgentMailClient {
    pub fn new(api_key: String, inbox_id: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            inbox_id,
            policy: RetryPolicy::default(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: String) -> Result<T, MailError> {
        let resp = send_with_retry(
            self.client.get(&url).bearer_auth(&self.api_key),
            &self.policy,
        )
        .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MailError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(resp.json().await?)
    }

    async fn fetch_thread_detail(&self, thread_id: &str) -> Result<ThreadDetail, MailError> {
        self.get_json(format!(
            "{}/inboxes/{}/threads/{}",
            API_BASE, self.inbox_id, thread_id
        ))
        .await
    }
}

fn message_body(message: &MessageDetail) -> String {
    message
        .extracted_text
        .as_deref()
        .or(message.text.as_deref())
        .unwrap_or_default()
        .to_string()
}

fn truncate_body(body: &str) -> String {
    if body.len() <= BODY_PROMPT_LIMIT {
        return body.to_string();
    }
    // Cut on a char boundary at or below the limit
    let mut end = BODY_PROMPT_LIMIT;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

fn detail_to_thread(detail: &ThreadDetail) -> EmailThread {
    let (from, from_email, body) = match detail.messages.first() {
        Some(first) => {
            let (name, email) = parse_sender(first.from.as_deref().unwrap_or("unknown"));
            (name, email, message_body(first))
        }
        None => (
            "Unknown".to_string(),
            "unknown".to_string(),
            detail.preview.clone().unwrap_or_default(),
        ),
    };

    EmailThread {
        thread_id: detail.thread_id.clone(),
        subject: detail
            .subject
            .clone()
            .unwrap_or_else(|| "(No subject)".to_string()),
        from,
        from_email,
        snippet: detail.preview.clone().unwrap_or_default(),
        body: truncate_body(&body),
        date: detail.timestamp.clone().unwrap_or_default(),
    }
}

#[async_trait]
impl MailSource for AgentMailClient {
    fn address(&self) -> &str {
        &self.inbox_id
    }

    async fn list_scheduling_threads(&self) -> Result<Vec<EmailThread>, MailError> {
        let list: ThreadListResponse = self
            .get_json(format!(
                "{}/inboxes/{}/threads?limit={}",
                API_BASE, self.inbox_id, THREAD_LIST_LIMIT
            ))
            .await?;

        let threads = list
            .threads
            .into_iter()
            .map(|stub| {
                let (from, from_email) = stub
                    .senders
                    .first()
                    .map(|s| parse_sender(s))
                    .unwrap_or_else(|| ("Unknown".to_string(), "unknown".to_string()));
                let preview = stub.preview.unwrap_or_default();

                EmailThread {
                    thread_id: stub.thread_id,
                    subject: stub.subject.unwrap_or_else(|| "(No subject)".to_string()),
                    from,
                    from_email,
                    snippet: preview.clone(),
                    body: preview,
                    date: stub.timestamp.unwrap_or_default(),
                }
            })
            .collect();

        Ok(threads)
    }

    async fn get_thread_with_messages(
        &self,
        thread_id: &str,
    ) -> Result<ThreadWithMessages, MailError> {
        let detail = self.fetch_thread_detail(thread_id).await?;

        let thread = detail_to_thread(&detail);
        let messages = detail
            .messages
            .iter()
            .map(|m| {
                let (from_name, from_email) =
                    parse_sender(m.from.as_deref().unwrap_or("unknown"));
                ThreadMessage {
                    id: m.message_id.clone(),
                    from_name,
                    from_email,
                    to: m.to.clone(),
                    text: message_body(m),
                    timestamp: m.timestamp.clone().unwrap_or_default(),
                }
            })
            .collect();

        Ok(ThreadWithMessages { thread, messages })
    }

    async fn get_thread_message_count(&self, thread_id: &str) -> Result<usize, MailError> {
        let detail = self.fetch_thread_detail(thread_id).await?;
        Ok(detail.messages.len())
    }

    async fn send_reply(
        &self,
        thread_id: &str,
        text: &str,
        html: Option<&str>,
    ) -> Result<(), MailError> {
        // Reply goes out via the latest message in the thread
        let detail = self.fetch_thread_detail(thread_id).await?;
        let last = detail
            .messages
            .last()
            .ok_or_else(|| MailError::EmptyThread(thread_id.to_string()))?;

        let mut body = serde_json::json!({ "text": text });
        if let Some(html) = html {
            body["html"] = serde_json::Value::String(html.to_string());
        }

        let url = format!(
            "{}/inboxes/{}/messages/{}/reply",
            API_BASE, self.inbox_id, last.message_id
        );
        let resp = send_with_retry(
            self.client.post(&url).bearer_auth(&self.api_key).json(&body),
            &self.policy,
        )
        .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(MailError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_thread_list_deserialization() {
        let json = r#"{
            "threads": [
                {
                    "thread_id": "thread_abc",
                    "subject": "Coffee next week?",
                    "preview": "Hey, would love to grab coffee...",
                    "senders": ["Jane Doe <jane@customer.com>"],
                    "timestamp": "2026-08-06T15:04:05Z"
                },
                {
                    "thread_id": "thread_def"
                }
            ],
            "count": 2
        }"#;

        let resp: ThreadListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.threads.len(), 2);
        assert_eq!(resp.threads[0].thread_id, "thread_abc");
        assert_eq!(resp.threads[0].senders.len(), 1);
        assert!(resp.threads[1].subject.is_none());
    }

    #[test]
    fn test_thread_detail_deserialization() {
        let json = r#"{
            "thread_id": "thread_abc",
            "subject": "Coffee next week?",
            "preview": "Hey, would love to...",
            "timestamp": "2026-08-06T15:04:05Z",
            "messages": [
                {
                    "message_id": "msg_1",
                    "from": "Jane Doe <jane@customer.com>",
                    "to": ["scheduler@agentmail.to"],
                    "text": "Hey, would love to grab coffee next week. When works?",
                    "timestamp": "2026-08-06T15:04:05Z"
                },
                {
                    "message_id": "msg_2",
                    "from": "scheduler@agentmail.to",
                    "to": ["jane@customer.com"],
                    "extracted_text": "Here are a few times that work for me...",
                    "timestamp": "2026-08-06T15:10:00Z"
                }
            ]
        }"#;

        let detail: ThreadDetail = serde_json::from_str(json).unwrap();
        assert_eq!(detail.messages.len(), 2);

        let thread = detail_to_thread(&detail);
        assert_eq!(thread.from, "Jane Doe");
        assert_eq!(thread.from_email, "jane@customer.com");
        assert!(thread.body.starts_with("Hey, would love"));
    }

    #[test]
    fn test_detail_without_messages_falls_back_to_preview() {
        let json = r#"{
            "thread_id": "thread_empty",
            "preview": "only a preview"
        }"#;

        let detail: ThreadDetail = serde_json::from_str(json).unwrap();
        let thread = detail_to_thread(&detail);
        assert_eq!(thread.from, "Unknown");
        assert_eq!(thread.body, "only a preview");
        assert_eq!(thread.subject, "(No subject)");
    }

    #[test]
    fn test_message_body_prefers_extracted_text() {
        let msg = MessageDetail {
            message_id: "m1".to_string(),
            from: None,
            to: vec![],
            text: Some("raw".to_string()),
            extracted_text: Some("extracted".to_string()),
            timestamp: None,
        };
        assert_eq!(message_body(&msg), "extracted");
    }

    #[test]
    fn test_truncate_body_respects_char_boundary() {
        let body = "é".repeat(BODY_PROMPT_LIMIT); // 2 bytes per char
        let truncated = truncate_body(&body);
        assert!(truncated.len() <= BODY_PROMPT_LIMIT);
        assert!(truncated.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_truncate_body_short_unchanged() {
        assert_eq!(truncate_body("hello"), "hello");
    }
}

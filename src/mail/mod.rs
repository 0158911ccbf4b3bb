//! Mail access: the thread/message model and the source seam.
//!
//! The negotiation engine only sees [`MailSource`]; AgentMail is the
//! production implementation. Threads arrive pre-filtered to the watched
//! inbox, so everything listed is treated as a scheduling candidate.

pub mod agentmail;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },
    #[error("No messages in thread {0} to reply to")]
    EmptyThread(String),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// An email thread as seen by the proposal generator.
#[derive(Debug, Clone)]
pub struct EmailThread {
    pub thread_id: String,
    pub subject: String,
    /// Sender display name.
    pub from: String,
    pub from_email: String,
    pub snippet: String,
    /// Body of the opening message, truncated for prompting.
    pub body: String,
    pub date: String,
}

/// One message within a thread.
#[derive(Debug, Clone)]
pub struct ThreadMessage {
    pub id: String,
    pub from_name: String,
    pub from_email: String,
    pub to: Vec<String>,
    pub text: String,
    pub timestamp: String,
}

/// A thread plus its full ordered message list.
#[derive(Debug, Clone)]
pub struct ThreadWithMessages {
    pub thread: EmailThread,
    pub messages: Vec<ThreadMessage>,
}

/// Mail seam consumed by the negotiation engine.
#[async_trait]
pub trait MailSource: Send + Sync {
    /// The agent's own sending address. Messages from this address are
    /// excluded before reply interpretation so the engine never reacts to
    /// its own replies.
    fn address(&self) -> &str;

    async fn list_scheduling_threads(&self) -> Result<Vec<EmailThread>, MailError>;

    async fn get_thread_with_messages(
        &self,
        thread_id: &str,
    ) -> Result<ThreadWithMessages, MailError>;

    async fn get_thread_message_count(&self, thread_id: &str) -> Result<usize, MailError>;

    async fn send_reply(
        &self,
        thread_id: &str,
        text: &str,
        html: Option<&str>,
    ) -> Result<(), MailError>;
}

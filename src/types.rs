use chrono::Utc;
use serde::{Deserialize, Serialize};

// =============================================================================
// Time slots and proposals
// =============================================================================

/// A candidate meeting time window.
///
/// Start/end are RFC 3339 strings — timestamps cross the mail/calendar/AI
/// boundaries as strings and are only parsed where arithmetic is needed.
/// Slots are immutable once proposed: they are superseded by a new proposal
/// or appended to the rejected list, never mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSlot {
    pub start: String,
    pub end: String,
    /// Human-readable label, e.g. "Wednesday, February 24, 2:00 PM – 2:30 PM".
    pub label: String,
}

/// What the proposal generator decided the source email was asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalIntent {
    ScheduleMeeting,
    Reschedule,
    Cancel,
    Unclear,
}

/// Output of one proposal round. Ephemeral — relevant fields are copied into
/// the thread's [`ConversationState`] once the proposal email is sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulingProposal {
    pub id: String,
    pub email_thread_id: String,
    pub intent: ProposalIntent,
    pub proposed_slots: Vec<TimeSlot>,
    /// Plain-text rendition of the reply (dashboard preview + text/plain part).
    pub draft_reply: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub html_reply: Option<String>,
    pub meeting_duration: u32,
    pub meeting_title: String,
    pub participants: Vec<String>,
}

// =============================================================================
// Reply interpretation
// =============================================================================

/// Classification of the latest human reply in a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyIntent {
    SlotSelected,
    Rejection,
    CounterProposal,
    Unclear,
}

/// Interpreter verdict for the latest reply.
///
/// Advisory — the model's best effort. `confidence` and `reasoning` are
/// logged but gate no transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyAnalysis {
    #[serde(rename = "type")]
    pub intent: ReplyIntent,
    /// Zero-based index into the currently proposed slots.
    #[serde(default)]
    pub selected_slot_index: Option<usize>,
    #[serde(default)]
    pub counter_proposal_text: Option<String>,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default)]
    pub reasoning: String,
}

fn default_confidence() -> f32 {
    0.5
}

// =============================================================================
// Conversation state machine
// =============================================================================

/// Negotiation status of one email thread.
///
/// `Booked` and `Stalled` are terminal. `Error` is recoverable: the next
/// pass either restarts the thread (no slot selected yet) or retries just
/// the booking step (slot already selected).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    New,
    Proposing,
    AwaitingReply,
    ProcessingReply,
    Confirmed,
    Booked,
    ReProposing,
    Stalled,
    Error,
}

impl ConversationStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ConversationStatus::Booked | ConversationStatus::Stalled)
    }
}

impl std::fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConversationStatus::New => "new",
            ConversationStatus::Proposing => "proposing",
            ConversationStatus::AwaitingReply => "awaiting_reply",
            ConversationStatus::ProcessingReply => "processing_reply",
            ConversationStatus::Confirmed => "confirmed",
            ConversationStatus::Booked => "booked",
            ConversationStatus::ReProposing => "re_proposing",
            ConversationStatus::Stalled => "stalled",
            ConversationStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// Durable negotiation record, one per email thread, keyed by thread id.
///
/// The sole source of truth for negotiation progress. Every mutation must
/// also advance `updated_at` (see [`ConversationState::touch`]) — the
/// processor's dedup guard keys on it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub thread_id: String,
    pub status: ConversationStatus,
    pub sender_name: String,
    pub sender_email: String,
    pub subject: String,
    #[serde(default)]
    pub proposed_slots: Vec<TimeSlot>,
    #[serde(default)]
    pub selected_slot: Option<TimeSlot>,
    #[serde(default)]
    pub meeting_title: String,
    #[serde(default)]
    pub participants: Vec<String>,
    /// Id of the last message we replied to (dashboard deep-links only).
    #[serde(default)]
    pub last_message_id: Option<String>,
    /// Last-seen number of messages in the thread. A strictly greater count
    /// on a later pass is the only new-reply signal.
    #[serde(default)]
    pub message_count: usize,
    /// Completed proposal rounds. Monotone; bounded by the attempt ceiling.
    #[serde(default)]
    pub attempts: u32,
    /// Append-only. A slot in here must never reappear in `proposed_slots`.
    #[serde(default)]
    pub previously_rejected_slots: Vec<TimeSlot>,
    #[serde(default)]
    pub calendar_event_id: Option<String>,
    #[serde(default)]
    pub calendar_event_link: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl ConversationState {
    /// Fresh record for a thread seen for the first time.
    pub fn new(thread_id: &str, sender_name: &str, sender_email: &str, subject: &str) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            thread_id: thread_id.to_string(),
            status: ConversationStatus::New,
            sender_name: sender_name.to_string(),
            sender_email: sender_email.to_string(),
            subject: subject.to_string(),
            proposed_slots: Vec::new(),
            selected_slot: None,
            meeting_title: String::new(),
            participants: Vec::new(),
            last_message_id: None,
            message_count: 0,
            attempts: 0,
            previously_rejected_slots: Vec::new(),
            calendar_event_id: None,
            calendar_event_link: None,
            error_message: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Advance `updated_at` to now. Call after every field mutation.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now().to_rfc3339();
    }

    /// Seconds elapsed since the last mutation, or `None` if the stored
    /// timestamp doesn't parse (treated as "long ago" by callers).
    pub fn seconds_since_update(&self) -> Option<i64> {
        chrono::DateTime::parse_from_rfc3339(&self.updated_at)
            .ok()
            .map(|t| (Utc::now() - t.with_timezone(&Utc)).num_seconds())
    }
}

// =============================================================================
// Configuration (~/.slotwise/config.json)
// =============================================================================

/// Which chat-completion provider backs the proposal/interpretation calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AiProvider {
    Anthropic,
    Openai,
}

impl std::fmt::Display for AiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AiProvider::Anthropic => write!(f, "anthropic"),
            AiProvider::Openai => write!(f, "openai"),
        }
    }
}

/// Scheduling preferences fed to the proposal generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default = "default_working_hours_start")]
    pub working_hours_start: String,
    #[serde(default = "default_working_hours_end")]
    pub working_hours_end: String,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_buffer_minutes")]
    pub buffer_minutes: u32,
    /// Default meeting duration in minutes.
    #[serde(default = "default_duration")]
    pub default_duration: u32,
    #[serde(default = "default_location")]
    pub default_location: String,
    #[serde(default = "default_ai_provider")]
    pub ai_provider: AiProvider,
    /// Keys may also come from ANTHROPIC_API_KEY / OPENAI_API_KEY.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anthropic_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,
    /// Name used to sign outgoing replies.
    #[serde(default = "default_signature_name")]
    pub signature_name: String,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            working_hours_start: default_working_hours_start(),
            working_hours_end: default_working_hours_end(),
            timezone: default_timezone(),
            buffer_minutes: default_buffer_minutes(),
            default_duration: default_duration(),
            default_location: default_location(),
            ai_provider: default_ai_provider(),
            anthropic_api_key: None,
            openai_api_key: None,
            signature_name: default_signature_name(),
        }
    }
}

fn default_working_hours_start() -> String {
    "09:00".to_string()
}

fn default_working_hours_end() -> String {
    "18:00".to_string()
}

fn default_timezone() -> String {
    "America/New_York".to_string()
}

fn default_buffer_minutes() -> u32 {
    15
}

fn default_duration() -> u32 {
    30
}

fn default_location() -> String {
    "Google Meet".to_string()
}

fn default_ai_provider() -> AiProvider {
    AiProvider::Anthropic
}

fn default_signature_name() -> String {
    "SlotWise".to_string()
}

/// AgentMail inbox the agent watches and replies from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMailConfig {
    #[serde(default = "default_inbox_id")]
    pub inbox_id: String,
    /// Key may also come from AGENTMAIL_API_KEY.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for AgentMailConfig {
    fn default() -> Self {
        Self {
            inbox_id: default_inbox_id(),
            api_key: None,
        }
    }
}

fn default_inbox_id() -> String {
    "scheduler@agentmail.to".to_string()
}

/// A single schedule entry (5-field cron, evaluated in its own timezone).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleEntry {
    pub enabled: bool,
    pub cron: String,
    pub timezone: String,
}

impl ScheduleEntry {
    /// Default inbox poll: every 5 minutes.
    pub fn default_process() -> Self {
        Self {
            enabled: true,
            cron: "*/5 * * * *".to_string(),
            timezone: default_timezone(),
        }
    }
}

impl Default for ScheduleEntry {
    fn default() -> Self {
        Self::default_process()
    }
}

/// Configuration stored in ~/.slotwise/config.json.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub preferences: Preferences,
    #[serde(default)]
    pub agentmail: AgentMailConfig,
    #[serde(default)]
    pub schedule: ScheduleEntry,
}

// =============================================================================
// Execution triggers
// =============================================================================

/// Why a processing batch ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionTrigger {
    Scheduled,
    Manual,
    Missed,
}

impl std::fmt::Display for ExecutionTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionTrigger::Scheduled => write!(f, "scheduled"),
            ExecutionTrigger::Manual => write!(f, "manual"),
            ExecutionTrigger::Missed => write!(f, "missed"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

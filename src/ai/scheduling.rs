//! Proposal generation and reply interpretation over a chat model.
//!
//! `LiveSchedulingAi` is the production implementation; tests drive the
//! negotiation engine with scripted fakes instead. Parsing is strict: the
//! model was told to return bare JSON, so bare JSON is the only thing
//! accepted.

use async_trait::async_trait;
use serde::Deserialize;

use super::prompts::{proposal_prompt, reply_analysis_prompt};
use super::{provider_for, AiError};
use crate::google_api::calendar::CalendarEvent;
use crate::mail::{EmailThread, ThreadMessage};
use crate::template;
use crate::types::{
    Preferences, ProposalIntent, ReplyAnalysis, SchedulingProposal, TimeSlot,
};
use crate::util::first_name;

/// AI seam consumed by the negotiation engine.
#[async_trait]
pub trait SchedulingAi: Send + Sync {
    /// Analyze a scheduling email and produce a proposal with exactly 3
    /// non-conflicting slots, none of which repeats a rejected slot.
    async fn analyze_and_propose(
        &self,
        email: &EmailThread,
        events: &[CalendarEvent],
        prefs: &Preferences,
        rejected: &[TimeSlot],
        attempt: u32,
    ) -> Result<SchedulingProposal, AiError>;

    /// Classify the latest human reply against the proposed slots.
    async fn analyze_reply(
        &self,
        messages: &[ThreadMessage],
        slots: &[TimeSlot],
        prefs: &Preferences,
    ) -> Result<ReplyAnalysis, AiError>;
}

/// Production implementation: provider chosen per call from preferences.
#[derive(Default)]
pub struct LiveSchedulingAi;

#[async_trait]
impl SchedulingAi for LiveSchedulingAi {
    async fn analyze_and_propose(
        &self,
        email: &EmailThread,
        events: &[CalendarEvent],
        prefs: &Preferences,
        rejected: &[TimeSlot],
        attempt: u32,
    ) -> Result<SchedulingProposal, AiError> {
        let model = provider_for(prefs)?;
        let prompt = proposal_prompt(email, events, prefs, rejected, attempt);
        let text = model.complete(&prompt).await?;
        parse_proposal(&text, email, prefs, rejected)
    }

    async fn analyze_reply(
        &self,
        messages: &[ThreadMessage],
        slots: &[TimeSlot],
        prefs: &Preferences,
    ) -> Result<ReplyAnalysis, AiError> {
        let model = provider_for(prefs)?;
        let prompt = reply_analysis_prompt(messages, slots, prefs);
        let text = model.complete(&prompt).await?;
        parse_reply_analysis(&text)
    }
}

// ============================================================================
// Model output parsing
// ============================================================================

/// Slot count the proposal prompt demands.
const EXPECTED_SLOTS: usize = 3;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProposal {
    intent: ProposalIntent,
    #[serde(default)]
    meeting_title: Option<String>,
    #[serde(default)]
    meeting_duration: Option<u32>,
    #[serde(default)]
    participants: Option<Vec<String>>,
    #[serde(default)]
    proposed_slots: Vec<TimeSlot>,
    #[serde(default)]
    reply_greeting: Option<String>,
    #[serde(default)]
    reply_context: Option<String>,
    #[serde(default)]
    reply_closing: Option<String>,
}

/// Parse and validate a proposal response.
///
/// Validation enforces the generator contract: exactly 3 slots for a
/// scheduling email, and no slot that was previously rejected.
pub fn parse_proposal(
    text: &str,
    email: &EmailThread,
    prefs: &Preferences,
    rejected: &[TimeSlot],
) -> Result<SchedulingProposal, AiError> {
    let raw: RawProposal = serde_json::from_str(text.trim())
        .map_err(|e| AiError::BadResponse(format!("not valid proposal JSON: {}", e)))?;

    if raw.intent == ProposalIntent::ScheduleMeeting {
        if raw.proposed_slots.len() != EXPECTED_SLOTS {
            return Err(AiError::BadResponse(format!(
                "expected exactly {} proposed slots, got {}",
                EXPECTED_SLOTS,
                raw.proposed_slots.len()
            )));
        }
        if let Some(repeat) = raw.proposed_slots.iter().find(|slot| {
            rejected
                .iter()
                .any(|r| r.start == slot.start && r.end == slot.end)
        }) {
            return Err(AiError::BadResponse(format!(
                "proposed a previously rejected slot: {}",
                repeat.label
            )));
        }
    }

    let recipient = first_name(&email.from);
    let greeting = raw
        .reply_greeting
        .unwrap_or_else(|| "Thanks for reaching out!".to_string());
    let context = raw.reply_context.unwrap_or_default();
    let closing = raw
        .reply_closing
        .unwrap_or_else(|| "Let me know if any of these work for you!".to_string());

    let html_reply = template::scheduling_reply_html(&template::ReplyParts {
        recipient_name: recipient,
        greeting: &greeting,
        context: &context,
        slots: &raw.proposed_slots,
        closing: &closing,
        sender_name: &prefs.signature_name,
        slots_header: None,
    });

    // Readable plain-text version (text/plain part + dashboard preview)
    let slot_lines = raw
        .proposed_slots
        .iter()
        .map(|s| format!("  • {}", s.label))
        .collect::<Vec<_>>()
        .join("\n");
    let mut lines = vec![format!("Hi {},", recipient), String::new(), greeting];
    if !context.is_empty() {
        lines.push(context);
    }
    lines.extend([
        String::new(),
        "Here are a few times that work for me:".to_string(),
        slot_lines,
        String::new(),
        closing,
        String::new(),
        "Best regards,".to_string(),
        prefs.signature_name.clone(),
    ]);
    let draft_reply = lines.join("\n");

    Ok(SchedulingProposal {
        id: uuid::Uuid::new_v4().to_string(),
        email_thread_id: email.thread_id.clone(),
        intent: raw.intent,
        proposed_slots: raw.proposed_slots,
        draft_reply,
        html_reply: Some(html_reply),
        meeting_duration: raw.meeting_duration.unwrap_or(prefs.default_duration),
        meeting_title: raw
            .meeting_title
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| email.subject.clone()),
        participants: raw
            .participants
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| vec![email.from_email.clone()]),
    })
}

/// Parse a reply-analysis response.
pub fn parse_reply_analysis(text: &str) -> Result<ReplyAnalysis, AiError> {
    serde_json::from_str(text.trim())
        .map_err(|e| AiError::BadResponse(format!("not valid reply-analysis JSON: {}", e)))
}

// ============================================================================
// Tests
// ============================================================================

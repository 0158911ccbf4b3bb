//! Prompt builders for the scheduling model calls.
//!
//! Both prompts demand strict JSON with a fixed shape — the parsing side
//! treats anything else as a hard failure.

use crate::google_api::calendar::CalendarEvent;
use crate::mail::{EmailThread, ThreadMessage};
use crate::types::{Preferences, TimeSlot};

/// Prompt for analyzing a scheduling email and proposing 3 slots.
pub fn proposal_prompt(
    email: &EmailThread,
    events: &[CalendarEvent],
    prefs: &Preferences,
    rejected: &[TimeSlot],
    attempt: u32,
) -> String {
    let events_context = if events.is_empty() {
        "No events scheduled.".to_string()
    } else {
        events
            .iter()
            .map(|e| format!("- {}: {} to {}", e.summary, e.start, e.end))
            .collect::<Vec<_>>()
            .join("\n")
    };

    let rejected_context = if rejected.is_empty() {
        String::new()
    } else {
        let listing = rejected
            .iter()
            .map(|s| format!("- {} ({} to {})", s.label, s.start, s.end))
            .collect::<Vec<_>>()
            .join("\n");
        format!(
            "\nPREVIOUSLY REJECTED SLOTS (do NOT propose these again):\n{}\n",
            listing
        )
    };

    let attempt_note = if attempt > 1 {
        format!(
            "\nThis is re-proposal attempt {}. Propose DIFFERENT times from the rejected slots above.\n",
            attempt
        )
    } else {
        String::new()
    };

    format!(
        r#"You are {assistant}, an AI scheduling assistant. Analyze this email and propose meeting times.

USER PREFERENCES:
- Timezone: {timezone}
- Working hours: {hours_start} to {hours_end}
- Buffer between meetings: {buffer} minutes
- Default meeting duration: {duration} minutes
- Default location: {location}

CALENDAR (next 7 days):
{events}
{rejected}{attempt_note}
EMAIL:
From: {from} <{from_email}>
Subject: {subject}
Body: {body}

INSTRUCTIONS:
1. Determine if this email contains a scheduling request.
2. If yes, propose exactly 3 time slots that work given the calendar and preferences.
3. Write short reply components (NOT the full email — the HTML is built separately).
4. If this is NOT a scheduling email, set intent to "unclear".

For proposedSlots labels, use a clear format like "Wednesday, February 24, 2:00 PM – 2:30 PM".

Respond in this exact JSON format (no markdown, no code fences):
{{
  "intent": "schedule_meeting",
  "meetingTitle": "string - suggested meeting title",
  "meetingDuration": 30,
  "participants": ["email@example.com"],
  "proposedSlots": [
    {{ "start": "ISO datetime", "end": "ISO datetime", "label": "Wednesday, February 24, 2:00 PM – 2:30 PM" }}
  ],
  "replyGreeting": "string - one warm sentence acknowledging their email",
  "replyContext": "string - optional one sentence of context, or empty string if not needed",
  "replyClosing": "string - one sentence closing"
}}"#,
        assistant = prefs.signature_name,
        timezone = prefs.timezone,
        hours_start = prefs.working_hours_start,
        hours_end = prefs.working_hours_end,
        buffer = prefs.buffer_minutes,
        duration = prefs.default_duration,
        location = prefs.default_location,
        events = events_context,
        rejected = rejected_context,
        attempt_note = attempt_note,
        from = email.from,
        from_email = email.from_email,
        subject = email.subject,
        body = email.body,
    )
}

/// Prompt for classifying the latest reply against the proposed slots.
pub fn reply_analysis_prompt(
    messages: &[ThreadMessage],
    slots: &[TimeSlot],
    prefs: &Preferences,
) -> String {
    let conversation = messages
        .iter()
        .map(|m| {
            format!(
                "[{} <{}> at {}]\n{}",
                m.from_name, m.from_email, m.timestamp, m.text
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n---\n\n");

    let slots_text = slots
        .iter()
        .enumerate()
        .map(|(i, s)| format!("  Option {}: {} ({} to {})", i + 1, s.label, s.start, s.end))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are {assistant}, an AI scheduling assistant. Analyze the latest reply in this email conversation to determine the sender's intent regarding scheduling.

CONVERSATION HISTORY:
{conversation}

CURRENTLY PROPOSED TIME SLOTS:
{slots}

INSTRUCTIONS:
Analyze the LATEST message in the conversation. Determine:
1. Did they select one of the proposed slots? (e.g., "Tuesday works!", "option 2", "the 3pm one", "let's do the first one")
2. Did they reject all slots? (e.g., "none work", "I'm busy all week", "can we do next week instead?")
3. Did they suggest a counter-proposal? (e.g., "how about Thursday at 4?", "could we do 2pm instead?")
4. Is their reply unclear or unrelated to scheduling?

For slot_selected: match their response to the closest proposed slot index (0-based).
For counter_proposal: extract the suggested time text.

Respond in this exact JSON format (no markdown, no code fences):
{{
  "type": "slot_selected" | "rejection" | "counter_proposal" | "unclear",
  "selectedSlotIndex": null or 0-based index number,
  "counterProposalText": null or "the suggested time text",
  "confidence": 0.0 to 1.0,
  "reasoning": "brief explanation of your analysis"
}}"#,
        assistant = prefs.signature_name,
        conversation = conversation,
        slots = slots_text,
    )
}

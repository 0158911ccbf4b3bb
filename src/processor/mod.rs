//! Per-thread negotiation state machine and batch orchestration.
//!
//! One pass drives every open thread through:
//! new → proposing → awaiting_reply → processing_reply →
//! {confirmed → booked} | re_proposing → awaiting_reply | stalled | error
//!
//! `booked` and `stalled` are terminal. `error` is recoverable: the next
//! pass restarts the thread, or — if a slot was already selected — retries
//! just the booking step. A time-based dedup guard makes overlapping
//! passes (manual trigger racing the scheduled poll) a no-op, which is
//! what keeps replies single-send and bookings single-create.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::ai::scheduling::SchedulingAi;
use crate::error::ProcessError;
use crate::google_api::calendar::{find_conflict, CalendarApi, CalendarEvent};
use crate::mail::{EmailThread, MailSource};
use crate::store::ConversationRepository;
use crate::template;
use crate::types::{
    ConversationState, ConversationStatus, Preferences, ProposalIntent, ReplyIntent,
};
use crate::util::first_name;

/// Negotiation rounds before giving up and asking the sender for times.
pub const MAX_ATTEMPTS: u32 = 3;

/// Threads touched more recently than this are skipped — two overlapping
/// passes must not double-send or double-book.
pub const DEDUP_GUARD_SECS: i64 = 10;

/// Calendar snapshot horizon for proposals and pre-booking re-checks.
const CALENDAR_WINDOW_DAYS: i64 = 7;

/// What one pass did to one thread.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadOutcome {
    pub status: ConversationStatus,
    pub action: String,
}

/// Aggregate result of one processing batch.
#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingReport {
    pub processed: usize,
    pub errors: Vec<String>,
    pub details: HashMap<String, ThreadOutcome>,
}

/// The negotiation engine, parameterized over its collaborators so tests
/// can run it against in-memory fakes.
pub struct ThreadProcessor {
    mail: Arc<dyn MailSource>,
    calendar: Arc<dyn CalendarApi>,
    ai: Arc<dyn SchedulingAi>,
    store: Arc<dyn ConversationRepository>,
}

impl ThreadProcessor {
    pub fn new(
        mail: Arc<dyn MailSource>,
        calendar: Arc<dyn CalendarApi>,
        ai: Arc<dyn SchedulingAi>,
        store: Arc<dyn ConversationRepository>,
    ) -> Self {
        Self {
            mail,
            calendar,
            ai,
            store,
        }
    }

    /// Run one full batch: list threads, drive each through the state
    /// machine, persist the store once at the end.
    ///
    /// One thread's failure never aborts the batch — it is recorded into
    /// that thread's state and the report. Failing to list threads at all
    /// aborts the batch (nothing to iterate).
    pub async fn process_all(&self, prefs: &Preferences) -> ProcessingReport {
        let mut report = ProcessingReport::default();

        let mut store_doc = match self.store.load().await {
            Ok(doc) => doc,
            Err(e) => {
                report.errors.push(format!("Failed to load store: {}", e));
                return report;
            }
        };

        let threads = match self.mail.list_scheduling_threads().await {
            Ok(threads) => threads,
            Err(e) => {
                report.errors.push(format!("Failed to fetch threads: {}", e));
                return report;
            }
        };

        // One calendar snapshot for the whole batch
        let now = Utc::now();
        let events = match self
            .calendar
            .list_events(now, now + Duration::days(CALENDAR_WINDOW_DAYS))
            .await
        {
            Ok(events) => events,
            Err(e) => {
                log::warn!("Calendar fetch failed ({}), proceeding without events", e);
                Vec::new()
            }
        };

        for thread in &threads {
            let conv = store_doc
                .conversations
                .entry(thread.thread_id.clone())
                .or_insert_with(|| {
                    log::info!(
                        "New thread {} from {} <{}>: {}",
                        thread.thread_id,
                        thread.from,
                        thread.from_email,
                        thread.subject
                    );
                    ConversationState::new(
                        &thread.thread_id,
                        &thread.from,
                        &thread.from_email,
                        &thread.subject,
                    )
                });

            match self.process_thread(thread, conv, &events, prefs).await {
                Ok(outcome) => {
                    log::info!(
                        "Thread {}: {} ({})",
                        thread.thread_id,
                        outcome.status,
                        outcome.action
                    );
                    report.details.insert(thread.thread_id.clone(), outcome);
                    report.processed += 1;
                }
                Err(e) => {
                    log::warn!(
                        "Thread {} failed ({}retryable): {}",
                        thread.thread_id,
                        if e.is_retryable() { "" } else { "non-" },
                        e
                    );
                    report
                        .errors
                        .push(format!("Thread {}: {}", thread.thread_id, e));
                    report.details.insert(
                        thread.thread_id.clone(),
                        ThreadOutcome {
                            status: ConversationStatus::Error,
                            action: e.to_string(),
                        },
                    );
                    conv.status = ConversationStatus::Error;
                    conv.error_message = Some(e.to_string());
                    conv.touch();
                }
            }
        }

        store_doc.last_processed_at = Some(Utc::now().to_rfc3339());
        if let Err(e) = self.store.save(&store_doc).await {
            log::error!("Failed to persist conversation store: {}", e);
            report.errors.push(format!("Failed to save store: {}", e));
        }

        report
    }

    /// Drive a single thread one step through the state machine.
    async fn process_thread(
        &self,
        thread: &EmailThread,
        conv: &mut ConversationState,
        events: &[CalendarEvent],
        prefs: &Preferences,
    ) -> Result<ThreadOutcome, ProcessError> {
        // Dedup guard — a thread touched within the window is another
        // pass's work in flight. Unparseable timestamps count as old.
        if conv.status != ConversationStatus::New {
            let recent = conv
                .seconds_since_update()
                .is_some_and(|secs| secs < DEDUP_GUARD_SECS);
            if recent {
                return Ok(ThreadOutcome {
                    status: conv.status,
                    action: "skipped (dedup)".to_string(),
                });
            }
        }

        if conv.status.is_terminal() {
            return Ok(ThreadOutcome {
                status: conv.status,
                action: "terminal".to_string(),
            });
        }

        match conv.status {
            ConversationStatus::New => self.handle_new(thread, conv, events, prefs).await,
            ConversationStatus::AwaitingReply => {
                self.handle_awaiting_reply(conv, events, prefs).await
            }
            ConversationStatus::ProcessingReply => {
                self.handle_processing_reply(conv, events, prefs).await
            }
            ConversationStatus::Error => {
                if conv.selected_slot.is_some() {
                    // A slot was agreed — only the booking step failed
                    self.retry_booking(conv, prefs).await
                } else {
                    log::info!("Thread {} restarting after error", conv.thread_id);
                    conv.status = ConversationStatus::New;
                    conv.error_message = None;
                    conv.touch();
                    self.handle_new(thread, conv, events, prefs).await
                }
            }
            // In-flight statuses only exist inside a pass; seeing one here
            // means a pass died before saving — nothing to do this round.
            _ => Ok(ThreadOutcome {
                status: conv.status,
                action: "no action".to_string(),
            }),
        }
    }

    /// First contact: analyze the email and send an initial proposal.
    async fn handle_new(
        &self,
        thread: &EmailThread,
        conv: &mut ConversationState,
        events: &[CalendarEvent],
        prefs: &Preferences,
    ) -> Result<ThreadOutcome, ProcessError> {
        conv.status = ConversationStatus::Proposing;
        conv.touch();

        // Full thread detail gives the model the opening message body
        // rather than the listing snippet
        let thread_data = self.mail.get_thread_with_messages(&thread.thread_id).await;
        let (email, message_count) = match &thread_data {
            Ok(data) => (&data.thread, data.messages.len().max(1)),
            Err(e) => {
                log::warn!(
                    "Thread detail fetch failed ({}), analyzing from listing",
                    e
                );
                (thread, 1)
            }
        };

        let proposal = self
            .ai
            .analyze_and_propose(
                email,
                events,
                prefs,
                &conv.previously_rejected_slots,
                conv.attempts + 1,
            )
            .await?;

        if proposal.intent != ProposalIntent::ScheduleMeeting {
            conv.status = ConversationStatus::Stalled;
            conv.error_message = Some("Email does not appear to be a scheduling request".to_string());
            conv.touch();
            return Ok(ThreadOutcome {
                status: ConversationStatus::Stalled,
                action: "not a scheduling email".to_string(),
            });
        }

        self.mail
            .send_reply(
                &thread.thread_id,
                &proposal.draft_reply,
                proposal.html_reply.as_deref(),
            )
            .await?;

        conv.status = ConversationStatus::AwaitingReply;
        conv.proposed_slots = proposal.proposed_slots;
        conv.meeting_title = proposal.meeting_title;
        conv.participants = proposal.participants;
        conv.attempts += 1;
        conv.message_count = message_count;
        conv.touch();

        Ok(ThreadOutcome {
            status: ConversationStatus::AwaitingReply,
            action: "proposal sent".to_string(),
        })
    }

    /// Poll for a new reply; only a strict message-count increase moves
    /// the thread forward.
    async fn handle_awaiting_reply(
        &self,
        conv: &mut ConversationState,
        events: &[CalendarEvent],
        prefs: &Preferences,
    ) -> Result<ThreadOutcome, ProcessError> {
        let current_count = self.mail.get_thread_message_count(&conv.thread_id).await?;

        if current_count <= conv.message_count {
            return Ok(ThreadOutcome {
                status: ConversationStatus::AwaitingReply,
                action: "no new messages".to_string(),
            });
        }

        conv.status = ConversationStatus::ProcessingReply;
        conv.touch();

        self.handle_processing_reply(conv, events, prefs).await
    }

    /// Interpret the latest reply and act on it.
    async fn handle_processing_reply(
        &self,
        conv: &mut ConversationState,
        events: &[CalendarEvent],
        prefs: &Preferences,
    ) -> Result<ThreadOutcome, ProcessError> {
        let thread_data = self.mail.get_thread_with_messages(&conv.thread_id).await?;

        conv.message_count = thread_data.messages.len();
        conv.touch();

        // Never react to our own replies. The stored count lags by our
        // own outgoing message, so a count increase alone can just be our
        // proposal landing in the thread — only a sender-authored latest
        // message is a reply worth interpreting. The count was caught up
        // above, so the next pass is a clean no-op.
        let own_address = self.mail.address();
        let latest_from_sender = thread_data
            .messages
            .last()
            .is_some_and(|m| !m.from_email.eq_ignore_ascii_case(own_address));
        if !latest_from_sender {
            conv.status = ConversationStatus::AwaitingReply;
            conv.touch();
            return Ok(ThreadOutcome {
                status: ConversationStatus::AwaitingReply,
                action: "no new sender reply".to_string(),
            });
        }

        let analysis = self
            .ai
            .analyze_reply(&thread_data.messages, &conv.proposed_slots, prefs)
            .await?;
        log::debug!(
            "Thread {} reply analysis: {:?} (confidence {:.2}): {}",
            conv.thread_id,
            analysis.intent,
            analysis.confidence,
            analysis.reasoning
        );

        match analysis.intent {
            ReplyIntent::SlotSelected => {
                let slot_idx = analysis.selected_slot_index.unwrap_or(0);
                let slot = conv
                    .proposed_slots
                    .get(slot_idx)
                    .cloned()
                    .ok_or(ProcessError::InvalidSlotIndex(slot_idx))?;

                conv.selected_slot = Some(slot.clone());
                conv.status = ConversationStatus::Confirmed;
                conv.touch();

                // Re-check availability; a stale snapshot is not worth
                // aborting over, and a conflict only warrants a warning —
                // the sender already accepted this time.
                let now = Utc::now();
                let fresh_events = match self
                    .calendar
                    .list_events(now, now + Duration::days(CALENDAR_WINDOW_DAYS))
                    .await
                {
                    Ok(fresh) => fresh,
                    Err(e) => {
                        log::warn!("Calendar re-check failed ({}), using batch snapshot", e);
                        events.to_vec()
                    }
                };
                if let Some(conflict) = find_conflict(&fresh_events, &slot.start, &slot.end) {
                    log::warn!(
                        "Thread {}: selected slot overlaps '{}', booking anyway",
                        conv.thread_id,
                        conflict.summary
                    );
                }

                self.book_slot(conv, prefs).await?;

                Ok(ThreadOutcome {
                    status: ConversationStatus::Booked,
                    action: format!("booked slot {}", slot_idx + 1),
                })
            }

            ReplyIntent::Rejection | ReplyIntent::CounterProposal => {
                // Counter-proposals re-propose like rejections; the
                // counter-offer reaches the model through thread history.
                let rejected_now = std::mem::take(&mut conv.proposed_slots);
                conv.previously_rejected_slots.extend(rejected_now);
                conv.touch();

                if conv.attempts >= MAX_ATTEMPTS {
                    let fallback = template::fallback_text(
                        first_name(&conv.sender_name),
                        &prefs.signature_name,
                    );
                    self.mail
                        .send_reply(&conv.thread_id, &fallback, None)
                        .await?;

                    conv.status = ConversationStatus::Stalled;
                    conv.touch();
                    return Ok(ThreadOutcome {
                        status: ConversationStatus::Stalled,
                        action: "max attempts reached".to_string(),
                    });
                }

                conv.status = ConversationStatus::ReProposing;
                conv.touch();

                let proposal = self
                    .ai
                    .analyze_and_propose(
                        &thread_data.thread,
                        events,
                        prefs,
                        &conv.previously_rejected_slots,
                        conv.attempts + 1,
                    )
                    .await?;

                let html = template::re_proposal_html(
                    first_name(&conv.sender_name),
                    &proposal.proposed_slots,
                    &prefs.signature_name,
                );
                let plain = template::html_to_plain_text(&html);
                self.mail
                    .send_reply(&conv.thread_id, &plain, Some(&html))
                    .await?;

                conv.proposed_slots = proposal.proposed_slots;
                conv.attempts += 1;
                conv.status = ConversationStatus::AwaitingReply;
                conv.touch();

                let action = match analysis.intent {
                    ReplyIntent::CounterProposal => "re-proposed after counter".to_string(),
                    _ => "re-proposed new times".to_string(),
                };
                Ok(ThreadOutcome {
                    status: ConversationStatus::AwaitingReply,
                    action,
                })
            }

            ReplyIntent::Unclear => {
                let html = template::clarification_html(
                    first_name(&conv.sender_name),
                    &conv.proposed_slots,
                    &prefs.signature_name,
                );
                let plain = template::html_to_plain_text(&html);
                self.mail
                    .send_reply(&conv.thread_id, &plain, Some(&html))
                    .await?;

                conv.status = ConversationStatus::AwaitingReply;
                conv.touch();
                Ok(ThreadOutcome {
                    status: ConversationStatus::AwaitingReply,
                    action: "sent clarification".to_string(),
                })
            }
        }
    }

    /// Error recovery when a slot was already agreed: redo only the
    /// booking step.
    async fn retry_booking(
        &self,
        conv: &mut ConversationState,
        prefs: &Preferences,
    ) -> Result<ThreadOutcome, ProcessError> {
        conv.error_message = None;
        conv.status = ConversationStatus::Confirmed;
        conv.touch();

        self.book_slot(conv, prefs).await?;

        Ok(ThreadOutcome {
            status: ConversationStatus::Booked,
            action: "booked (retry)".to_string(),
        })
    }

    /// Create the calendar event (once) and send the confirmation.
    ///
    /// Creation is skipped when `calendar_event_id` is already set, so a
    /// retry after a failed confirmation send can never produce a second
    /// event.
    async fn book_slot(
        &self,
        conv: &mut ConversationState,
        prefs: &Preferences,
    ) -> Result<(), ProcessError> {
        let Some(slot) = conv.selected_slot.clone() else {
            // Selected slot vanished (hand-edited store); start over
            conv.status = ConversationStatus::New;
            conv.touch();
            return Ok(());
        };

        if conv.calendar_event_id.is_none() {
            let created = self
                .calendar
                .create_event(
                    &conv.meeting_title,
                    &slot.start,
                    &slot.end,
                    &conv.participants,
                )
                .await?;
            conv.calendar_event_id = Some(created.id);
            conv.calendar_event_link = created.html_link;
            conv.touch();
        }

        let html = template::confirmation_html(
            first_name(&conv.sender_name),
            &slot,
            &prefs.signature_name,
        );
        let plain = template::html_to_plain_text(&html);
        self.mail
            .send_reply(&conv.thread_id, &plain, Some(&html))
            .await?;

        conv.status = ConversationStatus::Booked;
        conv.error_message = None;
        conv.touch();
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Google Calendar API v3 — event listing and creation.
//!
//! Listing feeds the proposal generator a snapshot of busy times; creation
//! books the agreed slot on the organizer's primary calendar with invites
//! sent to all participants.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::{get_valid_access_token, GoogleApiError};
use crate::http::{send_with_retry, RetryPolicy};

// ============================================================================
// API response types (deserialized from Google Calendar JSON)
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarListResponse {
    #[serde(default)]
    items: Vec<GoogleEventRaw>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEventRaw {
    #[serde(default)]
    id: String,
    #[serde(default)]
    summary: Option<String>,
    start: Option<EventDateTime>,
    end: Option<EventDateTime>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventDateTime {
    date_time: Option<String>,
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertResponse {
    #[serde(default)]
    id: String,
    #[serde(default)]
    html_link: Option<String>,
}

// ============================================================================
// Public types
// ============================================================================

/// A normalized calendar event used as busy-time context.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    pub id: String,
    pub summary: String,
    pub start: String,
    pub end: String,
}

/// Identifiers of a newly created event.
#[derive(Debug, Clone)]
pub struct CreatedEvent {
    pub id: String,
    pub html_link: Option<String>,
}

/// Calendar seam consumed by the negotiation engine.
#[async_trait]
pub trait CalendarApi: Send + Sync {
    async fn list_events(
        &self,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, GoogleApiError>;

    async fn create_event(
        &self,
        title: &str,
        start: &str,
        end: &str,
        attendees: &[String],
    ) -> Result<CreatedEvent, GoogleApiError>;
}

// ============================================================================
// Calendar API
// ============================================================================

/// Production implementation over the primary Google calendar.
#[derive(Default)]
pub struct GoogleCalendar {
    policy: RetryPolicy,
}

#[async_trait]
impl CalendarApi for GoogleCalendar {
    async fn list_events(
        &self,
        time_min: DateTime<Utc>,
        time_max: DateTime<Utc>,
    ) -> Result<Vec<CalendarEvent>, GoogleApiError> {
        let access_token = get_valid_access_token().await?;
        fetch_events(&access_token, time_min, time_max, &self.policy).await
    }

    async fn create_event(
        &self,
        title: &str,
        start: &str,
        end: &str,
        attendees: &[String],
    ) -> Result<CreatedEvent, GoogleApiError> {
        let access_token = get_valid_access_token().await?;
        insert_event(&access_token, title, start, end, attendees, &self.policy).await
    }
}

/// Fetch events from the primary calendar for a time range.
///
/// Handles pagination (maxResults=250, pageToken) and drops cancelled
/// events.
pub async fn fetch_events(
    access_token: &str,
    time_min: DateTime<Utc>,
    time_max: DateTime<Utc>,
    policy: &RetryPolicy,
) -> Result<Vec<CalendarEvent>, GoogleApiError> {
    let client = reqwest::Client::new();
    let time_min = time_min.to_rfc3339();
    let time_max = time_max.to_rfc3339();

    let mut all_events = Vec::new();
    let mut page_token: Option<String> = None;

    loop {
        let mut request = client
            .get("https://www.googleapis.com/calendar/v3/calendars/primary/events")
            .bearer_auth(access_token)
            .query(&[
                ("timeMin", time_min.as_str()),
                ("timeMax", time_max.as_str()),
                ("singleEvents", "true"),
                ("orderBy", "startTime"),
                ("maxResults", "250"),
            ]);

        if let Some(ref token) = page_token {
            request = request.query(&[("pageToken", token.as_str())]);
        }

        let resp = send_with_retry(request, policy).await?;

        let status = resp.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(GoogleApiError::AuthExpired);
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GoogleApiError::ApiError {
                status: status.as_u16(),
                message: body,
            });
        }

        let body: CalendarListResponse = resp.json().await?;

        for item in body.items {
            // Skip cancelled events
            if item.status.as_deref() == Some("cancelled") {
                continue;
            }

            let start_str = event_time(&item.start);
            let end_str = event_time(&item.end);

            all_events.push(CalendarEvent {
                id: item.id,
                summary: item.summary.unwrap_or_else(|| "(No title)".to_string()),
                start: start_str,
                end: end_str,
            });
        }

        page_token = body.next_page_token;
        if page_token.is_none() {
            break;
        }
    }

    Ok(all_events)
}

fn event_time(dt: &Option<EventDateTime>) -> String {
    dt.as_ref()
        .and_then(|s| s.date_time.as_deref().or(s.date.as_deref()))
        .unwrap_or("")
        .to_string()
}

/// Create an event on the primary calendar, inviting all participants.
async fn insert_event(
    access_token: &str,
    title: &str,
    start: &str,
    end: &str,
    attendees: &[String],
    policy: &RetryPolicy,
) -> Result<CreatedEvent, GoogleApiError> {
    let client = reqwest::Client::new();

    let body = serde_json::json!({
        "summary": title,
        "start": { "dateTime": start },
        "end": { "dateTime": end },
        "attendees": attendees
            .iter()
            .map(|email| serde_json::json!({ "email": email }))
            .collect::<Vec<_>>(),
        "reminders": { "useDefault": true }
    });

    let resp = send_with_retry(
        client
            .post("https://www.googleapis.com/calendar/v3/calendars/primary/events")
            .bearer_auth(access_token)
            .query(&[("sendUpdates", "all")])
            .json(&body),
        policy,
    )
    .await?;

    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(GoogleApiError::AuthExpired);
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(GoogleApiError::ApiError {
            status: status.as_u16(),
            message: body,
        });
    }

    let created: InsertResponse = resp.json().await?;
    Ok(CreatedEvent {
        id: created.id,
        html_link: created.html_link,
    })
}

// ============================================================================
// Datetime helpers
// ============================================================================

/// Parse an ISO datetime string to a chrono DateTime<Utc>.
pub fn parse_event_datetime(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if s.contains('T') {
        // Full datetime
        DateTime::parse_from_rfc3339(&s.replace('Z', "+00:00"))
            .or_else(|_| DateTime::parse_from_rfc3339(s))
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    } else {
        // Date-only (all-day event) — treat as midnight UTC
        chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc))
    }
}

/// Find an event overlapping the [start, end) window, if any.
///
/// Used only for a pre-booking warning — a conflict does not block the
/// booking, since the human already accepted the slot.
pub fn find_conflict<'a>(
    events: &'a [CalendarEvent],
    start: &str,
    end: &str,
) -> Option<&'a CalendarEvent> {
    let slot_start = parse_event_datetime(start)?;
    let slot_end = parse_event_datetime(end)?;

    events.iter().find(|event| {
        match (
            parse_event_datetime(&event.start),
            parse_event_datetime(&event.end),
        ) {
            (Some(ev_start), Some(ev_end)) => ev_start < slot_end && slot_start < ev_end,
            _ => false,
        }
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn test_parse_event_datetime_rfc3339() {
        let dt = parse_event_datetime("2026-08-07T09:00:00-05:00").unwrap();
        assert_eq!(dt.hour(), 14); // 9 AM CDT-ish offset = 14:00 UTC
    }

    #[test]
    fn test_parse_event_datetime_z_suffix() {
        let dt = parse_event_datetime("2026-08-07T14:00:00Z").unwrap();
        assert_eq!(dt.hour(), 14);
    }

    #[test]
    fn test_parse_event_datetime_date_only() {
        let dt = parse_event_datetime("2026-08-07").unwrap();
        assert_eq!(dt.hour(), 0);
    }

    #[test]
    fn test_parse_event_datetime_empty() {
        assert!(parse_event_datetime("").is_none());
    }

    #[test]
    fn test_calendar_list_deserialization() {
        let json = r#"{
            "items": [
                {
                    "id": "event123",
                    "summary": "Team Standup",
                    "start": {"dateTime": "2026-08-07T09:00:00-04:00"},
                    "end": {"dateTime": "2026-08-07T09:30:00-04:00"},
                    "status": "confirmed"
                },
                {
                    "id": "event456",
                    "start": {"date": "2026-08-08"},
                    "end": {"date": "2026-08-09"},
                    "status": "cancelled"
                }
            ],
            "nextPageToken": "token123"
        }"#;

        let resp: CalendarListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.items.len(), 2);
        assert_eq!(resp.items[0].summary.as_deref(), Some("Team Standup"));
        assert_eq!(resp.items[1].status.as_deref(), Some("cancelled"));
        assert_eq!(resp.next_page_token.as_deref(), Some("token123"));
    }

    #[test]
    fn test_insert_response_deserialization() {
        let json = r#"{
            "id": "created1",
            "htmlLink": "https://calendar.google.com/event?eid=abc",
            "status": "confirmed"
        }"#;

        let resp: InsertResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.id, "created1");
        assert_eq!(
            resp.html_link.as_deref(),
            Some("https://calendar.google.com/event?eid=abc")
        );
    }

    #[test]
    fn test_event_time_prefers_date_time() {
        let dt = Some(EventDateTime {
            date_time: Some("2026-08-07T09:00:00Z".to_string()),
            date: Some("2026-08-07".to_string()),
        });
        assert_eq!(event_time(&dt), "2026-08-07T09:00:00Z");

        let date_only = Some(EventDateTime {
            date_time: None,
            date: Some("2026-08-07".to_string()),
        });
        assert_eq!(event_time(&date_only), "2026-08-07");
    }

    fn busy(start: &str, end: &str) -> CalendarEvent {
        CalendarEvent {
            id: "e".to_string(),
            summary: "Busy".to_string(),
            start: start.to_string(),
            end: end.to_string(),
        }
    }

    #[test]
    fn test_find_conflict_overlap() {
        let events = vec![busy("2026-08-07T14:00:00Z", "2026-08-07T15:00:00Z")];
        assert!(
            find_conflict(&events, "2026-08-07T14:30:00Z", "2026-08-07T15:30:00Z").is_some()
        );
    }

    #[test]
    fn test_find_conflict_adjacent_is_free() {
        let events = vec![busy("2026-08-07T14:00:00Z", "2026-08-07T15:00:00Z")];
        assert!(
            find_conflict(&events, "2026-08-07T15:00:00Z", "2026-08-07T15:30:00Z").is_none()
        );
    }

    #[test]
    fn test_find_conflict_unparseable_event_skipped() {
        let events = vec![busy("", "")];
        assert!(
            find_conflict(&events, "2026-08-07T15:00:00Z", "2026-08-07T15:30:00Z").is_none()
        );
    }
}

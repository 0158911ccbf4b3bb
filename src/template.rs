//! Outgoing reply formatting.
//!
//! One base HTML layout (greeting / optional context / slot table /
//! closing / signature) that renders acceptably in Gmail, Outlook, and
//! Apple Mail, plus purpose-specific wrappers for the four reply kinds
//! and a plain-text fallback conversion. Pure string work — none of this
//! belongs in the state machine.

use std::sync::OnceLock;

use regex::Regex;

use crate::types::TimeSlot;

/// Components of a scheduling reply email.
pub struct ReplyParts<'a> {
    pub recipient_name: &'a str,
    pub greeting: &'a str,
    pub context: &'a str,
    pub slots: &'a [TimeSlot],
    pub closing: &'a str,
    pub sender_name: &'a str,
    /// Overrides the default "Here are a few times…" header.
    pub slots_header: Option<&'a str>,
}

/// Render the base scheduling reply layout.
pub fn scheduling_reply_html(parts: &ReplyParts<'_>) -> String {
    let slot_rows: String = parts
        .slots
        .iter()
        .map(|slot| {
            format!(
                "\n      <tr>\n        <td style=\"padding: 12px 16px; border-bottom: 1px solid #f0f0f0;\">\n          <span style=\"color: #1a1a1a; font-size: 15px; font-weight: 500;\">{}</span>\n        </td>\n      </tr>",
                slot.label
            )
        })
        .collect();

    let context_block = if parts.context.is_empty() {
        String::new()
    } else {
        format!(
            "<p style=\"font-size: 15px; margin: 0 0 20px 0;\">{}</p>\n\n    ",
            parts.context
        )
    };

    let header = parts.slots_header.unwrap_or(if parts.slots.len() == 1 {
        "Meeting details:"
    } else {
        "Here are a few times that work for me:"
    });

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
</head>
<body style="margin: 0; padding: 0; font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif; color: #1a1a1a; line-height: 1.6; background-color: #ffffff;">
  <div style="max-width: 560px; margin: 0 auto; padding: 0;">
    <p style="font-size: 15px; margin: 0 0 16px 0;">Hi {recipient},</p>

    <p style="font-size: 15px; margin: 0 0 16px 0;">{greeting}</p>

    {context}<p style="font-size: 15px; margin: 0 0 12px 0; font-weight: 500;">{header}</p>

    <table cellpadding="0" cellspacing="0" style="width: 100%; border: 1px solid #e8e8e6; border-radius: 8px; border-collapse: separate; margin: 0 0 20px 0; overflow: hidden;">{rows}
    </table>

    <p style="font-size: 15px; margin: 0 0 16px 0;">{closing}</p>

    <p style="font-size: 15px; margin: 24px 0 0 0;">Best regards,<br>{sender}</p>
  </div>
</body>
</html>"#,
        recipient = parts.recipient_name,
        greeting = parts.greeting,
        context = context_block,
        header = header,
        rows = slot_rows,
        closing = parts.closing,
        sender = parts.sender_name,
    )
}

/// Confirmation for a booked slot (single-slot table).
pub fn confirmation_html(recipient_name: &str, slot: &TimeSlot, sender_name: &str) -> String {
    let greeting = format!("Great news! I've booked us in for {}.", slot.label);
    scheduling_reply_html(&ReplyParts {
        recipient_name,
        greeting: &greeting,
        context: "You should receive a calendar invite shortly.",
        slots: std::slice::from_ref(slot),
        closing: "Looking forward to it!",
        sender_name,
        slots_header: Some("Meeting details:"),
    })
}

/// Fresh slots after the previous round was rejected.
pub fn re_proposal_html(recipient_name: &str, slots: &[TimeSlot], sender_name: &str) -> String {
    scheduling_reply_html(&ReplyParts {
        recipient_name,
        greeting: "Thanks for letting me know those times don't work.",
        context: "",
        slots,
        closing: "Let me know if any of these work better!",
        sender_name,
        slots_header: Some("How about one of these instead?"),
    })
}

/// Re-list the current slots when the reply couldn't be interpreted.
pub fn clarification_html(recipient_name: &str, slots: &[TimeSlot], sender_name: &str) -> String {
    scheduling_reply_html(&ReplyParts {
        recipient_name,
        greeting: "Just wanted to follow up on scheduling.",
        context: "I wasn't quite sure from your last reply which time works for you.",
        slots,
        closing: "Could you let me know which of these works, or suggest another time?",
        sender_name,
        slots_header: Some("Here are the times I proposed:"),
    })
}

/// Plain-text "suggest your own time" message sent when the attempt
/// ceiling is reached. No HTML — a deliberately low-key final note.
pub fn fallback_text(recipient_name: &str, sender_name: &str) -> String {
    format!(
        "Hi {recipient_name},\n\nIt seems like the times I've proposed haven't worked out. \
         Feel free to suggest some times that work better for you, and I'll get us booked in!\n\n\
         Best regards,\n{sender_name}"
    )
}

fn re_cached(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

/// Convert an HTML email to a readable plain-text fallback.
pub fn html_to_plain_text(html: &str) -> String {
    static BR: OnceLock<Regex> = OnceLock::new();
    static P_CLOSE: OnceLock<Regex> = OnceLock::new();
    static TR_CLOSE: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();
    static TRAILING_WS: OnceLock<Regex> = OnceLock::new();
    static MULTI_BLANK: OnceLock<Regex> = OnceLock::new();
    static LEADING_WS: OnceLock<Regex> = OnceLock::new();

    let text = re_cached(&BR, r"(?i)<br\s*/?>").replace_all(html, "\n");
    let text = re_cached(&P_CLOSE, r"(?i)</p>").replace_all(&text, "\n\n");
    let text = re_cached(&TR_CLOSE, r"(?i)</tr>").replace_all(&text, "\n");
    let text = re_cached(&TAG, r"<[^>]+>").replace_all(&text, "");
    let text = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ");
    let text = re_cached(&TRAILING_WS, r"[ \t]+\n").replace_all(&text, "\n");
    let text = re_cached(&MULTI_BLANK, r"\n{3,}").replace_all(&text, "\n\n");
    let text = re_cached(&LEADING_WS, r"(?m)^[ \t]+").replace_all(&text, "");
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slots() -> Vec<TimeSlot> {
        vec![
            TimeSlot {
                start: "2026-02-24T14:00:00-05:00".to_string(),
                end: "2026-02-24T14:30:00-05:00".to_string(),
                label: "Tuesday, February 24, 2:00 PM – 2:30 PM".to_string(),
            },
            TimeSlot {
                start: "2026-02-25T10:00:00-05:00".to_string(),
                end: "2026-02-25T10:30:00-05:00".to_string(),
                label: "Wednesday, February 25, 10:00 AM – 10:30 AM".to_string(),
            },
        ]
    }

    #[test]
    fn test_reply_html_contains_all_parts() {
        let slots = slots();
        let html = scheduling_reply_html(&ReplyParts {
            recipient_name: "Jane",
            greeting: "Thanks for reaching out!",
            context: "Happy to chat about the collaboration.",
            slots: &slots,
            closing: "Let me know if any of these work.",
            sender_name: "Sam",
            slots_header: None,
        });

        assert!(html.contains("Hi Jane,"));
        assert!(html.contains("Thanks for reaching out!"));
        assert!(html.contains("Happy to chat about the collaboration."));
        assert!(html.contains("Tuesday, February 24, 2:00 PM – 2:30 PM"));
        assert!(html.contains("Wednesday, February 25, 10:00 AM – 10:30 AM"));
        assert!(html.contains("Here are a few times that work for me:"));
        assert!(html.contains("Best regards,<br>Sam"));
    }

    #[test]
    fn test_empty_context_omitted() {
        let slots = slots();
        let html = scheduling_reply_html(&ReplyParts {
            recipient_name: "Jane",
            greeting: "Hello!",
            context: "",
            slots: &slots,
            closing: "Bye",
            sender_name: "Sam",
            slots_header: None,
        });
        assert!(!html.contains("<p style=\"font-size: 15px; margin: 0 0 20px 0;\"></p>"));
    }

    #[test]
    fn test_single_slot_header() {
        let all = slots();
        let html = scheduling_reply_html(&ReplyParts {
            recipient_name: "Jane",
            greeting: "Hello!",
            context: "",
            slots: &all[..1],
            closing: "Bye",
            sender_name: "Sam",
            slots_header: None,
        });
        assert!(html.contains("Meeting details:"));
    }

    #[test]
    fn test_confirmation_mentions_slot() {
        let slot = &slots()[0];
        let html = confirmation_html("Jane", slot, "Sam");
        assert!(html.contains("I've booked us in for Tuesday, February 24, 2:00 PM – 2:30 PM."));
        assert!(html.contains("calendar invite"));
    }

    #[test]
    fn test_clarification_relists_slots() {
        let slots = slots();
        let html = clarification_html("Jane", &slots, "Sam");
        assert!(html.contains("Here are the times I proposed:"));
        assert!(html.contains(&slots[0].label));
        assert!(html.contains(&slots[1].label));
    }

    #[test]
    fn test_fallback_text_signs_off() {
        let text = fallback_text("Jane", "Sam");
        assert!(text.starts_with("Hi Jane,"));
        assert!(text.contains("suggest some times"));
        assert!(text.ends_with("Best regards,\nSam"));
    }

    #[test]
    fn test_html_to_plain_text_strips_markup() {
        let slots = slots();
        let html = scheduling_reply_html(&ReplyParts {
            recipient_name: "Jane",
            greeting: "Thanks &amp; hello!",
            context: "",
            slots: &slots,
            closing: "Talk soon.",
            sender_name: "Sam",
            slots_header: None,
        });

        let text = html_to_plain_text(&html);
        assert!(!text.contains('<'));
        assert!(text.contains("Hi Jane,"));
        assert!(text.contains("Thanks & hello!"));
        assert!(text.contains("Tuesday, February 24, 2:00 PM – 2:30 PM"));
        assert!(text.contains("Best regards,\nSam"));
        assert!(!text.contains("\n\n\n"));
    }
}

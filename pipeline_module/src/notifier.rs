//! Threshold-gated Telegram notification building and delivery.

use classify_module::Analysis;
use telegram_module::{InlineKeyboardButton, SendMessage, TelegramApi, TelegramError};
use tracing::{debug, info};

use crate::actions::CallbackCommand;
use crate::filter_store::FilterConfig;

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Delivery seam so the pipeline can be exercised with a recording double.
pub trait NotificationSink: Send + Sync {
    fn deliver(&self, message: &SendMessage) -> Result<(), NotifyError>;
}

/// Real sink over the Bot API.
pub struct TelegramSink {
    api: TelegramApi,
}

impl TelegramSink {
    pub fn new(api: TelegramApi) -> Self {
        Self { api }
    }
}

impl NotificationSink for TelegramSink {
    fn deliver(&self, message: &SendMessage) -> Result<(), NotifyError> {
        self.api
            .send_message(message)
            .map(|_| ())
            .map_err(|err: TelegramError| NotifyError::Delivery(err.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyDecision {
    /// Score below the user's threshold; nothing sent.
    BelowThreshold,
    /// No linked chat to deliver to; nothing sent.
    NoDestination,
    Delivered,
}

pub struct Notifier {
    sink: std::sync::Arc<dyn NotificationSink>,
}

impl Notifier {
    pub fn new(sink: std::sync::Arc<dyn NotificationSink>) -> Self {
        Self { sink }
    }

    /// Deliver the scored message if it clears the user's threshold.
    ///
    /// The threshold is a hard gate, inclusive on the high side; a score
    /// exactly at `min_score_for_telegram` is delivered.
    pub fn notify(
        &self,
        chat_id: Option<i64>,
        message_id: &str,
        analysis: &Analysis,
        final_score: u8,
        filters: &FilterConfig,
    ) -> Result<NotifyDecision, NotifyError> {
        if final_score < filters.min_score_for_telegram {
            info!(
                "score {} below threshold {} for message {}, not notifying",
                final_score, filters.min_score_for_telegram, message_id
            );
            return Ok(NotifyDecision::BelowThreshold);
        }

        let Some(chat_id) = chat_id else {
            debug!(
                "no telegram chat linked, dropping notification for message {}",
                message_id
            );
            return Ok(NotifyDecision::NoDestination);
        };

        let message = build_notification(chat_id, message_id, analysis, final_score);
        self.sink.deliver(&message)?;
        Ok(NotifyDecision::Delivered)
    }
}

/// Message text plus the inline action set: a remind-me button always, an
/// add-to-calendar link only when the event has both endpoints.
pub fn build_notification(
    chat_id: i64,
    message_id: &str,
    analysis: &Analysis,
    final_score: u8,
) -> SendMessage {
    let text = format!(
        "{}\n\nScore: {}\n<a href=\"{}\">Open in Gmail</a>",
        analysis.reply_message,
        final_score,
        gmail_deep_link(message_id)
    );

    let remind = CallbackCommand::RemindMe {
        message_id: message_id.to_string(),
        dateline: analysis.dateline_date.clone(),
    };
    let mut rows = vec![vec![InlineKeyboardButton::callback(
        "⏰ Remind me",
        remind.encode(),
    )]];

    if let Some(event) = analysis
        .calendar_event
        .as_ref()
        .filter(|event| event.is_schedulable())
    {
        if let (Some(start), Some(end)) = (event.start.as_deref(), event.end.as_deref()) {
            rows.push(vec![InlineKeyboardButton::link(
                "📅 Add to calendar",
                calendar_link(&event.summary, start, end),
            )]);
        }
    }

    SendMessage::text(chat_id, text)
        .with_html()
        .with_keyboard(rows)
}

pub fn gmail_deep_link(message_id: &str) -> String {
    format!("https://mail.google.com/mail/u/0/#inbox/{message_id}")
}

fn calendar_link(summary: &str, start: &str, end: &str) -> String {
    format!(
        "https://calendar.google.com/calendar/render?action=TEMPLATE&text={}&dates={}/{}",
        urlencoding::encode(summary),
        gcal_timestamp(start),
        gcal_timestamp(end)
    )
}

/// `2026-03-01T09:00:00Z` -> `20260301T090000Z` (the template-link format).
fn gcal_timestamp(iso: &str) -> String {
    iso.chars().filter(|ch| *ch != '-' && *ch != ':').collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use classify_module::{CalendarEvent, CategoryAssignment, CategoryGroup};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingSink {
        sent: Mutex<Vec<SendMessage>>,
    }

    impl NotificationSink for RecordingSink {
        fn deliver(&self, message: &SendMessage) -> Result<(), NotifyError> {
            self.sent.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn analysis(calendar_event: Option<CalendarEvent>, dateline: Option<&str>) -> Analysis {
        Analysis {
            message_score: 80,
            keywords_flagged: vec!["invoice".to_string()],
            reply_message: "Acme sent invoice #42, due Friday.".to_string(),
            categories: CategoryAssignment {
                primary: CategoryGroup {
                    subcategory: vec!["financial_invoice".to_string()],
                },
                secondary: Vec::new(),
            },
            calendar_event,
            dateline_date: dateline.map(str::to_string),
        }
    }

    fn filters_with_threshold(threshold: u8) -> FilterConfig {
        FilterConfig {
            min_score_for_telegram: threshold,
            ..FilterConfig::default()
        }
    }

    #[test]
    fn below_threshold_sends_nothing() {
        let sink = Arc::new(RecordingSink::default());
        let notifier = Notifier::new(sink.clone());
        let decision = notifier
            .notify(
                Some(42),
                "msg_abc",
                &analysis(None, None),
                65,
                &filters_with_threshold(70),
            )
            .unwrap();
        assert_eq!(decision, NotifyDecision::BelowThreshold);
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn threshold_is_inclusive_on_the_high_side() {
        let sink = Arc::new(RecordingSink::default());
        let notifier = Notifier::new(sink.clone());
        let decision = notifier
            .notify(
                Some(42),
                "msg_abc",
                &analysis(None, None),
                70,
                &filters_with_threshold(70),
            )
            .unwrap();
        assert_eq!(decision, NotifyDecision::Delivered);
        assert_eq!(sink.sent.lock().unwrap().len(), 1);
    }

    #[test]
    fn missing_chat_is_a_soft_skip() {
        let sink = Arc::new(RecordingSink::default());
        let notifier = Notifier::new(sink.clone());
        let decision = notifier
            .notify(
                None,
                "msg_abc",
                &analysis(None, None),
                90,
                &filters_with_threshold(70),
            )
            .unwrap();
        assert_eq!(decision, NotifyDecision::NoDestination);
        assert!(sink.sent.lock().unwrap().is_empty());
    }

    #[test]
    fn notification_carries_deep_link_and_remind_button() {
        let message = build_notification(42, "msg_abc", &analysis(None, Some("2026-03-10")), 83);
        assert!(message.text.contains("mail.google.com/mail/u/0/#inbox/msg_abc"));
        assert!(message.text.contains("Acme sent invoice"));

        let keyboard = message.reply_markup.unwrap().inline_keyboard;
        assert_eq!(keyboard.len(), 1);
        assert_eq!(
            keyboard[0][0].callback_data.as_deref(),
            Some("remind_me:msg_abc:2026-03-10")
        );
    }

    #[test]
    fn calendar_button_requires_both_endpoints() {
        let partial = CalendarEvent {
            summary: "Review".to_string(),
            start: Some("2026-03-01T09:00:00Z".to_string()),
            end: None,
        };
        let message = build_notification(42, "msg_abc", &analysis(Some(partial), None), 83);
        assert_eq!(message.reply_markup.unwrap().inline_keyboard.len(), 1);

        let complete = CalendarEvent {
            summary: "Review & sync".to_string(),
            start: Some("2026-03-01T09:00:00Z".to_string()),
            end: Some("2026-03-01T10:00:00Z".to_string()),
        };
        let message = build_notification(42, "msg_abc", &analysis(Some(complete), None), 83);
        let keyboard = message.reply_markup.unwrap().inline_keyboard;
        assert_eq!(keyboard.len(), 2);
        let url = keyboard[1][0].url.as_deref().unwrap();
        assert!(url.contains("20260301T090000Z/20260301T100000Z"));
        assert!(url.contains("Review%20%26%20sync"));
    }
}

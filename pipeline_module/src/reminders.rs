//! Reminder dispatcher: schedule, deliver, cancel.
//!
//! Rows move `pending` -> `sent` | `canceled`; a row whose external
//! registration failed is parked in `scheduling_failed` and is never picked
//! up automatically.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use telegram_module::{InlineKeyboardButton, SendMessage};
use tracing::{info, warn};
use uuid::Uuid;

use crate::actions::{CallbackCommand, QuickOffset};
use crate::claim_ledger::{ClaimLedger, ClaimLedgerError};
use crate::dates::{
    build_calendar_days, format_friendly_date, local_offset, local_today, parse_time_str,
    parse_user_date, DateParseError, CALENDAR_LOOKAHEAD_DAYS, DEFAULT_REMINDER_HOUR,
};
use crate::notifier::{gmail_deep_link, NotificationSink, NotifyError};
use crate::qstash::{QstashClient, QstashError};
use crate::reminder_store::{ReminderStatus, ReminderStore, ReminderStoreError, ScheduledReminder};

#[derive(Debug, thiserror::Error)]
pub enum ReminderError {
    #[error("{0}")]
    Date(#[from] DateParseError),
    #[error("no processed message found to remind about")]
    UnknownMessage,
    #[error("reminder not found")]
    NotFound,
    #[error("store error: {0}")]
    Store(#[from] ReminderStoreError),
    #[error("ledger error: {0}")]
    Ledger(#[from] ClaimLedgerError),
    /// Row persisted but the external registration failed; parked in
    /// `scheduling_failed`.
    #[error("could not register the reminder with the scheduler: {0}")]
    Scheduling(#[from] QstashError),
    #[error("delivery error: {0}")]
    Delivery(#[from] NotifyError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    /// Row was already sent or canceled; dispatch callbacks are idempotent.
    Skipped,
}

/// Target instant for a reminder: the local date at the given time
/// (default 08:00 local) converted to UTC.
pub fn reminder_timestamp(date: NaiveDate, time: Option<NaiveTime>) -> DateTime<Utc> {
    let time = time
        .or_else(|| NaiveTime::from_hms_opt(DEFAULT_REMINDER_HOUR, 0, 0))
        .unwrap_or_default();
    let local = date.and_time(time);
    match local.and_local_timezone(local_offset()).single() {
        Some(stamped) => stamped.with_timezone(&Utc),
        None => DateTime::<Utc>::from_naive_utc_and_offset(local, Utc),
    }
}

pub struct ReminderService<'a> {
    pub store: &'a ReminderStore,
    pub ledger: &'a dyn ClaimLedger,
    pub scheduler: &'a QstashClient,
    pub sink: &'a dyn NotificationSink,
}

impl<'a> ReminderService<'a> {
    /// Finalize a reminder for an explicit date (and optional time).
    pub fn schedule_explicit(
        &self,
        user_id: Uuid,
        chat_id: i64,
        message_id: &str,
        date_str: &str,
        time_str: Option<&str>,
    ) -> Result<ScheduledReminder, ReminderError> {
        let parsed = parse_user_date(date_str, local_today())?;
        let time = match time_str {
            Some(raw) => Some(parse_time_str(raw)?),
            None => parsed.time,
        };
        let scheduled_at = reminder_timestamp(parsed.date, time);
        self.register(user_id, chat_id, message_id, scheduled_at)
    }

    /// Fixed-offset reminder; only 1-day and 3-day offsets exist.
    pub fn schedule_quick(
        &self,
        user_id: Uuid,
        chat_id: i64,
        message_id: &str,
        offset: QuickOffset,
    ) -> Result<ScheduledReminder, ReminderError> {
        let scheduled_at = Utc::now() + Duration::days(offset.days());
        self.register(user_id, chat_id, message_id, scheduled_at)
    }

    fn register(
        &self,
        user_id: Uuid,
        chat_id: i64,
        message_id: &str,
        scheduled_at: DateTime<Utc>,
    ) -> Result<ScheduledReminder, ReminderError> {
        let claim = self
            .ledger
            .get(user_id, message_id)?
            .ok_or(ReminderError::UnknownMessage)?;
        let content = claim
            .reply_message
            .filter(|content| !content.is_empty())
            .ok_or(ReminderError::UnknownMessage)?;

        let mut reminder =
            self.store
                .insert_pending(user_id, chat_id, message_id, &content, scheduled_at)?;

        match self.scheduler.schedule_callback(reminder.id, scheduled_at) {
            Ok(correlation_id) => {
                self.store.set_correlation(reminder.id, &correlation_id)?;
                reminder.qstash_message_id = Some(correlation_id);
                info!(
                    "reminder {} scheduled for {} (message {})",
                    reminder.id, scheduled_at, message_id
                );
                Ok(reminder)
            }
            Err(err) => {
                if let Err(mark_err) = self.store.mark_scheduling_failed(reminder.id) {
                    warn!(
                        "could not park reminder {} as scheduling_failed: {}",
                        reminder.id, mark_err
                    );
                }
                Err(err.into())
            }
        }
    }

    /// External scheduler callback: deliver and mark sent.
    pub fn dispatch(&self, reminder_id: Uuid) -> Result<DispatchOutcome, ReminderError> {
        let reminder = self.store.get(reminder_id)?.ok_or(ReminderError::NotFound)?;
        if reminder.status != ReminderStatus::Pending {
            info!(
                "reminder {} already {}, skipping dispatch",
                reminder.id,
                reminder.status.as_str()
            );
            return Ok(DispatchOutcome::Skipped);
        }

        let text = format!(
            "⏰ Reminder\n\n{}\n\n<a href=\"{}\">Open in Gmail</a>",
            reminder.message_content,
            gmail_deep_link(&reminder.gmail_message_id)
        );
        let message = SendMessage::text(reminder.chat_id, text).with_html();
        self.sink.deliver(&message)?;

        self.store.mark_sent(reminder.id)?;
        Ok(DispatchOutcome::Sent)
    }

    /// Cancel a pending reminder; anything else is a no-op.
    pub fn cancel(&self, reminder_id: Uuid) -> Result<bool, ReminderError> {
        let reminder = self.store.get(reminder_id)?.ok_or(ReminderError::NotFound)?;
        if reminder.status != ReminderStatus::Pending {
            return Ok(false);
        }
        self.store.mark_canceled(reminder.id)?;
        Ok(true)
    }
}

// ============================================================================
// Prompt builders (inline keyboards for the remind-me flows)
// ============================================================================

/// Quick-suggest prompt: three suggested dates seeded from the dateline,
/// fixed offsets, and an escape hatch into the full calendar.
pub fn build_suggestion_prompt(
    chat_id: i64,
    message_id: &str,
    dateline: Option<&str>,
    today: NaiveDate,
) -> SendMessage {
    let dateline_date =
        dateline.and_then(|raw| NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok());
    let suggestions = crate::dates::suggested_dates(today, dateline_date);

    let date_row = suggestions
        .iter()
        .map(|date| {
            let command = CallbackCommand::RemindSet {
                message_id: message_id.to_string(),
                date: date.format("%Y-%m-%d").to_string(),
                time: None,
            };
            InlineKeyboardButton::callback(format_friendly_date(*date, today), command.encode())
        })
        .collect();

    let quick_row = vec![
        InlineKeyboardButton::callback(
            "In 1 day",
            CallbackCommand::RemindQuick {
                message_id: message_id.to_string(),
                offset: QuickOffset::OneDay,
            }
            .encode(),
        ),
        InlineKeyboardButton::callback(
            "In 3 days",
            CallbackCommand::RemindQuick {
                message_id: message_id.to_string(),
                offset: QuickOffset::ThreeDays,
            }
            .encode(),
        ),
    ];

    let escape_row = vec![
        InlineKeyboardButton::callback(
            "Pick another date",
            CallbackCommand::RemindCustom {
                message_id: message_id.to_string(),
            }
            .encode(),
        ),
        InlineKeyboardButton::callback("Dismiss", CallbackCommand::Noop.encode()),
    ];

    SendMessage::text(chat_id, "When should I remind you?").with_keyboard(vec![
        date_row,
        quick_row,
        escape_row,
    ])
}

/// Calendar prompt: a fixed lookahead of pickable dates plus free-text
/// instructions.
pub fn build_custom_prompt(chat_id: i64, message_id: &str, today: NaiveDate) -> SendMessage {
    let days = build_calendar_days(today, CALENDAR_LOOKAHEAD_DAYS);
    let rows: Vec<Vec<InlineKeyboardButton>> = days
        .chunks(3)
        .map(|chunk| {
            chunk
                .iter()
                .map(|date| {
                    let command = CallbackCommand::CustomDate {
                        message_id: message_id.to_string(),
                        date: date.format("%Y-%m-%d").to_string(),
                    };
                    InlineKeyboardButton::callback(
                        format_friendly_date(*date, today),
                        command.encode(),
                    )
                })
                .collect()
        })
        .collect();

    SendMessage::text(
        chat_id,
        "Pick a date, or reply with one — e.g. \"tomorrow at 3pm\", \"12/03/2026\", \
         \"March 5\".",
    )
    .with_keyboard(rows)
}

/// Confirmation sent after scheduling, with a cancel escape.
pub fn build_confirmation(reminder: &ScheduledReminder) -> SendMessage {
    let local = reminder.scheduled_at.with_timezone(&local_offset());
    let text = format!(
        "Reminder set for {}.",
        local.format("%a %-d %b, %H:%M")
    );
    SendMessage::text(reminder.chat_id, text).with_keyboard(vec![vec![
        InlineKeyboardButton::callback(
            "Cancel reminder",
            CallbackCommand::RemindCancel {
                reminder_id: reminder.id.to_string(),
            }
            .encode(),
        ),
    ]])
}

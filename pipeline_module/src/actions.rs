//! Colon-delimited callback commands carried in inline-keyboard buttons.
//!
//! Wire form: `action:messageId[:extra...]`. Encoding and parsing live
//! together so the two sides cannot drift.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuickOffset {
    OneDay,
    ThreeDays,
}

impl QuickOffset {
    pub fn days(&self) -> i64 {
        match self {
            QuickOffset::OneDay => 1,
            QuickOffset::ThreeDays => 3,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            QuickOffset::OneDay => "1d",
            QuickOffset::ThreeDays => "3d",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackCommand {
    /// User wants to type the reply themselves.
    ManualReply { message_id: String },
    /// User wants an AI-drafted reply.
    AiReply { message_id: String },
    /// Open the remind-me prompt (suggested dates).
    RemindMe {
        message_id: String,
        dateline: Option<String>,
    },
    /// Finalize a reminder for an explicit date.
    RemindSet {
        message_id: String,
        date: String,
        time: Option<String>,
    },
    /// Fixed-offset reminder.
    RemindQuick {
        message_id: String,
        offset: QuickOffset,
    },
    /// Open the free-text / calendar prompt.
    RemindCustom { message_id: String },
    /// Calendar-button date pick.
    CustomDate { message_id: String, date: String },
    /// Cancel a pending reminder.
    RemindCancel { reminder_id: String },
    Noop,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ActionParseError {
    #[error("empty callback data")]
    Empty,
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("missing argument for {0}")]
    MissingArgument(&'static str),
    #[error("unsupported quick offset: {0}")]
    UnsupportedOffset(String),
}

impl CallbackCommand {
    pub fn encode(&self) -> String {
        match self {
            CallbackCommand::ManualReply { message_id } => format!("manual_reply:{message_id}"),
            CallbackCommand::AiReply { message_id } => format!("ai_reply:{message_id}"),
            CallbackCommand::RemindMe {
                message_id,
                dateline,
            } => match dateline {
                Some(dateline) => format!("remind_me:{message_id}:{dateline}"),
                None => format!("remind_me:{message_id}"),
            },
            CallbackCommand::RemindSet {
                message_id,
                date,
                time,
            } => match time {
                Some(time) => format!("remind_set:{message_id}:{date}:{time}"),
                None => format!("remind_set:{message_id}:{date}"),
            },
            CallbackCommand::RemindQuick { message_id, offset } => {
                format!("remind_quick:{}:{}", message_id, offset.as_str())
            }
            CallbackCommand::RemindCustom { message_id } => format!("remind_custom:{message_id}"),
            CallbackCommand::CustomDate { message_id, date } => {
                format!("custom_date:{message_id}:{date}")
            }
            CallbackCommand::RemindCancel { reminder_id } => {
                format!("remind_cancel:{reminder_id}")
            }
            CallbackCommand::Noop => "noop".to_string(),
        }
    }
}

pub fn parse_callback(data: &str) -> Result<CallbackCommand, ActionParseError> {
    let trimmed = data.trim();
    if trimmed.is_empty() {
        return Err(ActionParseError::Empty);
    }

    let mut parts = trimmed.split(':');
    let action = parts.next().unwrap_or_default();
    let rest: Vec<&str> = parts.collect();

    let require_first = |label: &'static str| -> Result<String, ActionParseError> {
        rest.first()
            .filter(|value| !value.is_empty())
            .map(|value| value.to_string())
            .ok_or(ActionParseError::MissingArgument(label))
    };

    match action {
        "manual_reply" => Ok(CallbackCommand::ManualReply {
            message_id: require_first("message id")?,
        }),
        "ai_reply" => Ok(CallbackCommand::AiReply {
            message_id: require_first("message id")?,
        }),
        "remind_me" => Ok(CallbackCommand::RemindMe {
            message_id: require_first("message id")?,
            dateline: rest
                .get(1)
                .filter(|value| !value.is_empty())
                .map(|value| value.to_string()),
        }),
        "remind_set" => {
            let message_id = require_first("message id")?;
            let date = rest
                .get(1)
                .filter(|value| !value.is_empty())
                .map(|value| value.to_string())
                .ok_or(ActionParseError::MissingArgument("date"))?;
            // The time itself may contain a colon (`15:00`); rejoin the tail.
            let time = if rest.len() > 2 {
                Some(rest[2..].join(":")).filter(|value| !value.is_empty())
            } else {
                None
            };
            Ok(CallbackCommand::RemindSet {
                message_id,
                date,
                time,
            })
        }
        "remind_quick" => {
            let message_id = require_first("message id")?;
            let offset = match rest.get(1).copied() {
                Some("1d") => QuickOffset::OneDay,
                Some("3d") => QuickOffset::ThreeDays,
                other => {
                    return Err(ActionParseError::UnsupportedOffset(
                        other.unwrap_or_default().to_string(),
                    ))
                }
            };
            Ok(CallbackCommand::RemindQuick { message_id, offset })
        }
        "remind_custom" => Ok(CallbackCommand::RemindCustom {
            message_id: require_first("message id")?,
        }),
        "custom_date" => {
            let message_id = require_first("message id")?;
            let date = rest
                .get(1)
                .filter(|value| !value.is_empty())
                .map(|value| value.to_string())
                .ok_or(ActionParseError::MissingArgument("date"))?;
            Ok(CallbackCommand::CustomDate { message_id, date })
        }
        "remind_cancel" => Ok(CallbackCommand::RemindCancel {
            reminder_id: require_first("reminder id")?,
        }),
        "noop" => Ok(CallbackCommand::Noop),
        other => Err(ActionParseError::UnknownAction(other.to_string())),
    }
}

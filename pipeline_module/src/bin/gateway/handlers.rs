use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tokio::task;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use pipeline_module::actions::{parse_callback, CallbackCommand};
use pipeline_module::dates::local_today;
use pipeline_module::gmail::push::decode_push;
use pipeline_module::notifier::gmail_deep_link;
use pipeline_module::pipeline::{handle_push, PushError, PushStores};
use pipeline_module::reminders::{
    build_confirmation, build_custom_prompt, build_suggestion_prompt, ReminderError,
    ReminderService,
};
use telegram_module::SendMessage;

use super::state::GatewayState;
use super::update::TelegramUpdate;
use super::verify::verify_shared_token;

pub(super) async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

// ============================================================================
// Gmail push webhook
// ============================================================================

pub(super) async fn ingest_gmail(
    State(state): State<Arc<GatewayState>>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> impl IntoResponse {
    if let Err(reason) = verify_shared_token(
        state.config.pubsub_token.as_deref(),
        params.get("token").map(String::as_str),
    ) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"status": reason})));
    }

    let notification = match decode_push(&body) {
        Ok(notification) => notification,
        Err(err) => {
            warn!("gateway rejecting malformed push payload: {}", err);
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"status": "bad_payload"})),
            );
        }
    };

    debug!(
        "gmail push for {} (historyId {})",
        notification.email_address, notification.history_id
    );

    let worker_state = state.clone();
    let result = task::spawn_blocking(move || {
        let stores = PushStores {
            connections: &worker_state.connections,
            filters: &worker_state.filters,
            subscriptions: &worker_state.subscriptions,
            vault: &worker_state.vault,
        };
        handle_push(&worker_state.deps, &stores, &notification)
    })
    .await;

    match result {
        Ok(Ok(summary)) => (
            StatusCode::OK,
            Json(json!({
                "status": "processed",
                "seen": summary.messages_seen,
                "notified": summary.notified,
                "below_threshold": summary.below_threshold,
                "duplicate": summary.already_claimed,
                "failed": summary.failed,
            })),
        ),
        Ok(Err(PushError::UnknownMailbox(address))) => {
            info!("gateway no connection for mailbox {}", address);
            (StatusCode::OK, Json(json!({"status": "no_route"})))
        }
        Ok(Err(PushError::Reauth)) => {
            // Acknowledged so the provider stops retrying; the connection is
            // parked until the user re-links.
            (StatusCode::OK, Json(json!({"status": "reauth_required"})))
        }
        Ok(Err(err)) => {
            error!("gateway push processing failed: {}", err);
            (StatusCode::BAD_GATEWAY, Json(json!({"status": "error"})))
        }
        Err(join_err) => {
            error!("gateway push worker panicked: {}", join_err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error"})),
            )
        }
    }
}

// ============================================================================
// Telegram webhook (action callbacks + free-text reminder dates)
// ============================================================================

pub(super) async fn ingest_telegram(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let provided = headers
        .get("x-telegram-bot-api-secret-token")
        .and_then(|value| value.to_str().ok());
    if let Err(reason) =
        verify_shared_token(state.config.telegram_webhook_secret.as_deref(), provided)
    {
        return (StatusCode::UNAUTHORIZED, Json(json!({"status": reason})));
    }

    let update: TelegramUpdate = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(err) => {
            debug!("gateway ignoring unparseable telegram update: {}", err);
            return (StatusCode::OK, Json(json!({"status": "ignored"})));
        }
    };

    let worker_state = state.clone();
    let result = task::spawn_blocking(move || process_update(&worker_state, update)).await;
    if let Err(join_err) = result {
        error!("gateway telegram worker panicked: {}", join_err);
    }

    // Always 200: Telegram redelivers anything else.
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

fn process_update(state: &GatewayState, update: TelegramUpdate) {
    if let Some(callback) = update.callback_query {
        let Some(chat_id) = callback.message.as_ref().map(|message| message.chat.id) else {
            debug!("callback {} without originating message, ignoring", callback.id);
            return;
        };

        let ack = match callback.data.as_deref().map(parse_callback) {
            Some(Ok(command)) => process_callback(state, chat_id, command),
            Some(Err(err)) => {
                warn!("bad callback data: {}", err);
                Some("Sorry, that button no longer works.".to_string())
            }
            None => None,
        };

        if let Err(err) = state
            .telegram
            .answer_callback_query(&callback.id, ack.as_deref())
        {
            warn!("could not answer callback query {}: {}", callback.id, err);
        }
        return;
    }

    if let Some(message) = update.message {
        let chat_id = message.chat.id;
        let pending = state
            .pending_custom_dates
            .lock()
            .unwrap_or_else(|err| err.into_inner())
            .remove(&chat_id);
        match (pending, message.text) {
            (Some(message_id), Some(text)) => {
                handle_free_text_date(state, chat_id, &message_id, &text)
            }
            _ => debug!("ignoring telegram message in chat {}", chat_id),
        }
    }
}

fn reminder_service(state: &GatewayState) -> ReminderService<'_> {
    ReminderService {
        store: &state.reminders,
        ledger: state.deps.ledger.as_ref(),
        scheduler: &state.qstash,
        sink: state.sink.as_ref(),
    }
}

fn send_to_chat(state: &GatewayState, message: &SendMessage) {
    if let Err(err) = state.telegram.send_message(message) {
        warn!("could not send telegram message: {}", err);
    }
}

/// Dispatch one parsed callback command; returns the toast shown on the
/// user's client.
fn process_callback(
    state: &GatewayState,
    chat_id: i64,
    command: CallbackCommand,
) -> Option<String> {
    match command {
        CallbackCommand::Noop => None,

        CallbackCommand::ManualReply { message_id } => {
            let text = format!(
                "Reply directly from your inbox:\n<a href=\"{}\">Open in Gmail</a>",
                gmail_deep_link(&message_id)
            );
            send_to_chat(state, &SendMessage::text(chat_id, text).with_html());
            None
        }

        CallbackCommand::AiReply { message_id } => {
            let Some(user_id) = lookup_user(state, chat_id) else {
                return Some("This chat is not linked to an account.".to_string());
            };
            match state.deps.ledger.get(user_id, &message_id) {
                Ok(Some(record)) => {
                    let draft = record
                        .reply_message
                        .unwrap_or_else(|| "No draft available for this email.".to_string());
                    send_to_chat(
                        state,
                        &SendMessage::text(chat_id, format!("Suggested reply:\n\n{draft}")),
                    );
                    None
                }
                Ok(None) => Some("I have no record of that email.".to_string()),
                Err(err) => {
                    error!("ledger lookup failed: {}", err);
                    Some("Something went wrong, try again.".to_string())
                }
            }
        }

        CallbackCommand::RemindMe {
            message_id,
            dateline,
        } => {
            let prompt = build_suggestion_prompt(
                chat_id,
                &message_id,
                dateline.as_deref(),
                local_today(),
            );
            send_to_chat(state, &prompt);
            None
        }

        CallbackCommand::RemindSet {
            message_id,
            date,
            time,
        } => schedule_and_confirm(state, chat_id, &message_id, &date, time.as_deref()),

        CallbackCommand::RemindQuick { message_id, offset } => {
            let Some(user_id) = lookup_user(state, chat_id) else {
                return Some("This chat is not linked to an account.".to_string());
            };
            match reminder_service(state).schedule_quick(user_id, chat_id, &message_id, offset) {
                Ok(reminder) => {
                    send_to_chat(state, &build_confirmation(&reminder));
                    None
                }
                Err(err) => Some(user_facing_reminder_error(&err)),
            }
        }

        CallbackCommand::RemindCustom { message_id } => {
            state
                .pending_custom_dates
                .lock()
                .unwrap_or_else(|err| err.into_inner())
                .insert(chat_id, message_id.clone());
            let prompt = build_custom_prompt(chat_id, &message_id, local_today());
            send_to_chat(state, &prompt);
            None
        }

        CallbackCommand::CustomDate { message_id, date } => {
            schedule_and_confirm(state, chat_id, &message_id, &date, None)
        }

        CallbackCommand::RemindCancel { reminder_id } => {
            let Ok(reminder_id) = Uuid::parse_str(&reminder_id) else {
                return Some("Sorry, that button no longer works.".to_string());
            };
            match reminder_service(state).cancel(reminder_id) {
                Ok(true) => Some("Reminder canceled.".to_string()),
                Ok(false) => Some("That reminder was already handled.".to_string()),
                Err(err) => {
                    error!("cancel failed: {}", err);
                    Some("Something went wrong, try again.".to_string())
                }
            }
        }
    }
}

fn schedule_and_confirm(
    state: &GatewayState,
    chat_id: i64,
    message_id: &str,
    date: &str,
    time: Option<&str>,
) -> Option<String> {
    let Some(user_id) = lookup_user(state, chat_id) else {
        return Some("This chat is not linked to an account.".to_string());
    };
    match reminder_service(state).schedule_explicit(user_id, chat_id, message_id, date, time) {
        Ok(reminder) => {
            send_to_chat(state, &build_confirmation(&reminder));
            None
        }
        Err(err) => Some(user_facing_reminder_error(&err)),
    }
}

fn handle_free_text_date(state: &GatewayState, chat_id: i64, message_id: &str, text: &str) {
    let Some(user_id) = lookup_user(state, chat_id) else {
        send_to_chat(
            state,
            &SendMessage::text(chat_id, "This chat is not linked to an account."),
        );
        return;
    };
    match reminder_service(state).schedule_explicit(user_id, chat_id, message_id, text, None) {
        Ok(reminder) => send_to_chat(state, &build_confirmation(&reminder)),
        Err(err) => {
            // Give the chat another shot at the same message.
            state
                .pending_custom_dates
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .insert(chat_id, message_id.to_string());
            send_to_chat(
                state,
                &SendMessage::text(chat_id, user_facing_reminder_error(&err)),
            );
        }
    }
}

fn user_facing_reminder_error(err: &ReminderError) -> String {
    match err {
        ReminderError::Date(date_err) => {
            format!("{date_err}. Try \"tomorrow at 3pm\" or \"12/03/2026\".")
        }
        ReminderError::UnknownMessage => "I have no record of that email.".to_string(),
        ReminderError::Scheduling(_) => {
            "I saved the reminder but could not schedule it; please try again.".to_string()
        }
        _ => "Something went wrong, try again.".to_string(),
    }
}

fn lookup_user(state: &GatewayState, chat_id: i64) -> Option<Uuid> {
    match state.filters.find_user_by_chat(chat_id) {
        Ok(user) => user,
        Err(err) => {
            error!("chat lookup failed for {}: {}", chat_id, err);
            None
        }
    }
}

// ============================================================================
// Reminder dispatch callback (QStash)
// ============================================================================

#[derive(Debug, Deserialize)]
pub(super) struct DispatchRequest {
    #[serde(rename = "reminderId")]
    reminder_id: Uuid,
}

pub(super) async fn dispatch_reminder(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(request): Json<DispatchRequest>,
) -> impl IntoResponse {
    let provided = headers
        .get("x-reminder-token")
        .and_then(|value| value.to_str().ok());
    if let Err(reason) = verify_shared_token(
        state.config.reminder_dispatch_token.as_deref(),
        provided,
    ) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"status": reason})));
    }

    let worker_state = state.clone();
    let result =
        task::spawn_blocking(move || reminder_service(&worker_state).dispatch(request.reminder_id))
            .await;

    match result {
        Ok(Ok(outcome)) => (
            StatusCode::OK,
            Json(json!({"status": format!("{outcome:?}").to_lowercase()})),
        ),
        Ok(Err(ReminderError::NotFound)) => {
            (StatusCode::NOT_FOUND, Json(json!({"status": "not_found"})))
        }
        Ok(Err(err)) => {
            error!("reminder dispatch failed: {}", err);
            (StatusCode::BAD_GATEWAY, Json(json!({"status": "error"})))
        }
        Err(join_err) => {
            error!("reminder dispatch worker panicked: {}", join_err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"status": "error"})),
            )
        }
    }
}

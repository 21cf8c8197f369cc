//! Inbound Telegram webhook payloads (the slice the gateway reacts to).

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(super) struct TelegramUpdate {
    #[allow(dead_code)]
    pub(super) update_id: i64,
    pub(super) message: Option<IncomingMessage>,
    pub(super) callback_query: Option<CallbackQuery>,
}

#[derive(Debug, Deserialize)]
pub(super) struct IncomingMessage {
    #[allow(dead_code)]
    pub(super) message_id: i64,
    pub(super) chat: Chat,
    pub(super) text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct Chat {
    pub(super) id: i64,
}

#[derive(Debug, Deserialize)]
pub(super) struct CallbackQuery {
    pub(super) id: String,
    pub(super) data: Option<String>,
    pub(super) message: Option<IncomingMessage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_callback_query_update() {
        let payload = r#"{
            "update_id": 99,
            "callback_query": {
                "id": "cb-1",
                "data": "remind_me:msg_abc",
                "message": {"message_id": 5, "chat": {"id": 42}, "text": "notification"}
            }
        }"#;
        let update: TelegramUpdate = serde_json::from_str(payload).unwrap();
        let callback = update.callback_query.unwrap();
        assert_eq!(callback.data.as_deref(), Some("remind_me:msg_abc"));
        assert_eq!(callback.message.unwrap().chat.id, 42);
    }

    #[test]
    fn parses_plain_text_update() {
        let payload = r#"{
            "update_id": 100,
            "message": {"message_id": 6, "chat": {"id": 42}, "text": "tomorrow at 3pm"}
        }"#;
        let update: TelegramUpdate = serde_json::from_str(payload).unwrap();
        assert_eq!(
            update.message.unwrap().text.as_deref(),
            Some("tomorrow at 3pm")
        );
    }
}

//! Outbound Telegram Bot API client.
//!
//! Sends notification messages with inline action keyboards and answers
//! callback queries. Inbound webhook parsing lives with the gateway; this
//! crate only talks *to* the Bot API.

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum TelegramError {
    #[error("http error: {0}")]
    Http(String),
    #[error("telegram api error: {0}")]
    Api(String),
}

/// Bot API client bound to one bot token.
#[derive(Debug, Clone)]
pub struct TelegramApi {
    bot_token: String,
    base_url: String,
}

impl TelegramApi {
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            base_url: "https://api.telegram.org".to_string(),
        }
    }

    /// Override the API host; used by tests.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.bot_token, method)
    }

    /// Send a message, returning the Telegram message id.
    pub fn send_message(&self, message: &SendMessage) -> Result<i64, TelegramError> {
        let url = self.api_url("sendMessage");
        let client = reqwest::blocking::Client::new();
        let response = client
            .post(&url)
            .json(message)
            .send()
            .map_err(|err| TelegramError::Http(err.to_string()))?;

        let api_response: ApiResponse<MessageRef> = response
            .json()
            .map_err(|err| TelegramError::Http(err.to_string()))?;

        if !api_response.ok {
            return Err(TelegramError::Api(
                api_response
                    .description
                    .unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(api_response
            .result
            .map(|message| message.message_id)
            .unwrap_or_default())
    }

    /// Acknowledge a callback query so the client stops showing a spinner.
    pub fn answer_callback_query(
        &self,
        callback_query_id: &str,
        text: Option<&str>,
    ) -> Result<(), TelegramError> {
        let url = self.api_url("answerCallbackQuery");
        let body = AnswerCallbackQuery {
            callback_query_id: callback_query_id.to_string(),
            text: text.map(str::to_string),
        };
        let client = reqwest::blocking::Client::new();
        let response = client
            .post(&url)
            .json(&body)
            .send()
            .map_err(|err| TelegramError::Http(err.to_string()))?;

        let api_response: ApiResponse<serde_json::Value> = response
            .json()
            .map_err(|err| TelegramError::Http(err.to_string()))?;

        if !api_response.ok {
            return Err(TelegramError::Api(
                api_response
                    .description
                    .unwrap_or_else(|| "unknown error".to_string()),
            ));
        }
        Ok(())
    }
}

/// Request body for `sendMessage`.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessage {
    pub chat_id: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_web_page_preview: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<InlineKeyboardMarkup>,
}

impl SendMessage {
    pub fn text(chat_id: i64, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            parse_mode: None,
            disable_web_page_preview: None,
            reply_markup: None,
        }
    }

    pub fn with_html(mut self) -> Self {
        self.parse_mode = Some("HTML".to_string());
        self
    }

    pub fn with_keyboard(mut self, rows: Vec<Vec<InlineKeyboardButton>>) -> Self {
        self.reply_markup = Some(InlineKeyboardMarkup {
            inline_keyboard: rows,
        });
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InlineKeyboardMarkup {
    pub inline_keyboard: Vec<Vec<InlineKeyboardButton>>,
}

/// One inline button: either a callback action or an external link.
#[derive(Debug, Clone, Serialize)]
pub struct InlineKeyboardButton {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callback_data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl InlineKeyboardButton {
    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: Some(data.into()),
            url: None,
        }
    }

    pub fn link(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: None,
            url: Some(url.into()),
        }
    }
}

#[derive(Debug, Serialize)]
struct AnswerCallbackQuery {
    callback_query_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    description: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct MessageRef {
    message_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_message_serializes_keyboard() {
        let message = SendMessage::text(12345, "hello").with_keyboard(vec![vec![
            InlineKeyboardButton::callback("Remind me", "remind_me:abc"),
            InlineKeyboardButton::link("Open", "https://example.test"),
        ]]);
        let json = serde_json::to_value(&message).unwrap();
        let buttons = &json["reply_markup"]["inline_keyboard"][0];
        assert_eq!(buttons[0]["callback_data"], "remind_me:abc");
        assert!(buttons[0].get("url").is_none());
        assert_eq!(buttons[1]["url"], "https://example.test");
        assert!(buttons[1].get("callback_data").is_none());
        assert!(json.get("parse_mode").is_none());
    }

    #[test]
    fn send_message_returns_message_id() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/bottest-token/sendMessage")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok": true, "result": {"message_id": 77}}"#)
            .create();

        let api = TelegramApi::new("test-token".to_string()).with_base_url(server.url());
        let id = api
            .send_message(&SendMessage::text(12345, "hello"))
            .unwrap();

        mock.assert();
        assert_eq!(id, 77);
    }

    #[test]
    fn send_message_surfaces_api_error() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("POST", "/bottest-token/sendMessage")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok": false, "description": "Bad Request: chat not found"}"#)
            .create();

        let api = TelegramApi::new("test-token".to_string()).with_base_url(server.url());
        let err = api
            .send_message(&SendMessage::text(0, "hello"))
            .unwrap_err();
        assert!(matches!(err, TelegramError::Api(ref d) if d.contains("chat not found")));
    }

    #[test]
    fn answer_callback_query_ok() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/bottest-token/answerCallbackQuery")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok": true, "result": true}"#)
            .create();

        let api = TelegramApi::new("test-token".to_string()).with_base_url(server.url());
        api.answer_callback_query("cb-1", Some("Scheduled")).unwrap();
        mock.assert();
    }
}

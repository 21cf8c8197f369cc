use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::messages::MessageResource;
use super::{HistoryDelta, MailApi, MailApiError, MailMessage, WatchRegistration};

const DEFAULT_BASE_URL: &str = "https://gmail.googleapis.com";

/// REST client for the Gmail API, scoped to the authenticated user (`me`).
#[derive(Debug, Clone)]
pub struct GmailClient {
    base_url: String,
    /// Pub/Sub topic new-mail notifications are published to.
    topic_name: String,
}

impl GmailClient {
    pub fn new(topic_name: String) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            topic_name,
        }
    }

    /// Override the API host; used by tests.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn check_status(response: reqwest::blocking::Response) -> Result<reqwest::blocking::Response, MailApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().unwrap_or_default();
        if status.as_u16() == 401 || body.contains("invalid_grant") {
            return Err(MailApiError::Auth(body));
        }
        Err(MailApiError::Api {
            status: status.as_u16(),
            body,
        })
    }
}

impl MailApi for GmailClient {
    fn register_watch(&self, access_token: &str) -> Result<WatchRegistration, MailApiError> {
        let url = format!("{}/gmail/v1/users/me/watch", self.base_url);
        let request = WatchRequest {
            topic_name: self.topic_name.clone(),
            label_ids: vec!["INBOX".to_string()],
            label_filter_behavior: "INCLUDE".to_string(),
        };

        let client = reqwest::blocking::Client::new();
        let response = client
            .post(&url)
            .bearer_auth(access_token)
            .json(&request)
            .send()
            .map_err(|err| MailApiError::Http(err.to_string()))?;
        let response = Self::check_status(response)?;

        let payload: WatchResponse = response
            .json()
            .map_err(|err| MailApiError::Decode(err.to_string()))?;

        let history_id = payload
            .history_id
            .parse::<u64>()
            .map_err(|err| MailApiError::Decode(format!("bad historyId: {err}")))?;
        let expiration_ms = payload
            .expiration
            .parse::<i64>()
            .map_err(|err| MailApiError::Decode(format!("bad expiration: {err}")))?;
        let expiration = Utc
            .timestamp_millis_opt(expiration_ms)
            .single()
            .ok_or_else(|| MailApiError::Decode(format!("bad expiration ms: {expiration_ms}")))?;

        debug!("watch registered, cursor={} expires={}", history_id, expiration);
        Ok(WatchRegistration {
            history_id,
            expiration,
        })
    }

    fn list_history(
        &self,
        access_token: &str,
        start_history_id: u64,
    ) -> Result<Vec<HistoryDelta>, MailApiError> {
        let client = reqwest::blocking::Client::new();
        let mut deltas = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!(
                "{}/gmail/v1/users/me/history?startHistoryId={}&labelId=INBOX&historyTypes=messageAdded",
                self.base_url, start_history_id
            );
            if let Some(ref token) = page_token {
                url.push_str(&format!("&pageToken={token}"));
            }

            let response = client
                .get(&url)
                .bearer_auth(access_token)
                .send()
                .map_err(|err| MailApiError::Http(err.to_string()))?;
            let response = Self::check_status(response)?;

            let payload: HistoryResponse = response
                .json()
                .map_err(|err| MailApiError::Decode(err.to_string()))?;

            for entry in payload.history {
                let id = entry.id.parse::<u64>().unwrap_or_default();
                let added_message_ids = entry
                    .messages_added
                    .into_iter()
                    .filter_map(|added| added.message.map(|message| message.id))
                    .collect();
                deltas.push(HistoryDelta {
                    id,
                    added_message_ids,
                });
            }

            match payload.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(deltas)
    }

    fn get_message(
        &self,
        access_token: &str,
        message_id: &str,
    ) -> Result<MailMessage, MailApiError> {
        let url = format!(
            "{}/gmail/v1/users/me/messages/{}?format=full",
            self.base_url, message_id
        );
        let client = reqwest::blocking::Client::new();
        let response = client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .map_err(|err| MailApiError::Http(err.to_string()))?;
        let response = Self::check_status(response)?;

        let resource: MessageResource = response
            .json()
            .map_err(|err| MailApiError::Decode(err.to_string()))?;
        Ok(resource.into_mail_message())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WatchRequest {
    topic_name: String,
    label_ids: Vec<String>,
    label_filter_behavior: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchResponse {
    history_id: String,
    expiration: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryResponse {
    #[serde(default)]
    history: Vec<HistoryEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryEntry {
    id: String,
    #[serde(default)]
    messages_added: Vec<MessageAdded>,
}

#[derive(Debug, Deserialize)]
struct MessageAdded {
    message: Option<MessageStub>,
}

#[derive(Debug, Deserialize)]
struct MessageStub {
    id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(base_url: String) -> GmailClient {
        GmailClient::new("projects/p/topics/mail".to_string()).with_base_url(base_url)
    }

    #[test]
    fn register_watch_parses_cursor_and_expiration() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("POST", "/gmail/v1/users/me/watch")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"historyId": "424242", "expiration": "1767225600000"}"#)
            .create();

        let registration = client(server.url()).register_watch("token").unwrap();
        mock.assert();
        assert_eq!(registration.history_id, 424242);
        assert_eq!(registration.expiration.timestamp_millis(), 1767225600000);
    }

    #[test]
    fn list_history_collects_added_message_ids() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock(
                "GET",
                mockito::Matcher::Regex("/gmail/v1/users/me/history.*".to_string()),
            )
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{
                    "history": [
                        {"id": "1001", "messagesAdded": [{"message": {"id": "msg_a"}}, {"message": {"id": "msg_b"}}]},
                        {"id": "1002"}
                    ]
                }"#,
            )
            .create();

        let deltas = client(server.url()).list_history("token", 1000).unwrap();
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].added_message_ids, vec!["msg_a", "msg_b"]);
        assert!(deltas[1].added_message_ids.is_empty());
    }

    #[test]
    fn unauthorized_maps_to_auth_error() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock(
                "GET",
                mockito::Matcher::Regex("/gmail/v1/users/me/history.*".to_string()),
            )
            .with_status(401)
            .with_body(r#"{"error": {"code": 401, "message": "Invalid Credentials"}}"#)
            .create();

        let err = client(server.url()).list_history("token", 1000).unwrap_err();
        assert!(err.is_auth());
    }

    #[test]
    fn server_errors_are_not_auth_errors() {
        let mut server = mockito::Server::new();
        let _mock = server
            .mock("GET", mockito::Matcher::Regex(".*".to_string()))
            .with_status(500)
            .with_body("boom")
            .create();

        let err = client(server.url()).get_message("token", "msg_a").unwrap_err();
        assert!(!err.is_auth());
    }
}

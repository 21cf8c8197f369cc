//! Gmail message resource parsing: headers and body extraction.

use base64::Engine;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

use super::MailMessage;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessageResource {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) thread_id: String,
    #[serde(default)]
    pub(crate) snippet: String,
    pub(crate) payload: Option<MessagePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct MessagePart {
    #[serde(default)]
    mime_type: String,
    #[serde(default)]
    headers: Vec<Header>,
    body: Option<PartBody>,
    #[serde(default)]
    parts: Vec<MessagePart>,
}

#[derive(Debug, Deserialize)]
struct Header {
    name: String,
    value: String,
}

#[derive(Debug, Deserialize)]
struct PartBody {
    data: Option<String>,
}

impl MessageResource {
    fn header(&self, name: &str) -> Option<&str> {
        self.payload.as_ref().and_then(|payload| {
            payload
                .headers
                .iter()
                .find(|header| header.name.eq_ignore_ascii_case(name))
                .map(|header| header.value.as_str())
        })
    }

    pub(crate) fn into_mail_message(self) -> MailMessage {
        let sender = self.header("From").unwrap_or_default().to_string();
        let subject = self.header("Subject").unwrap_or_default().to_string();
        let body = self
            .payload
            .as_ref()
            .and_then(extract_body)
            .unwrap_or_else(|| self.snippet.clone());
        MailMessage {
            id: self.id,
            thread_id: self.thread_id,
            sender,
            subject,
            body,
        }
    }
}

/// Depth-first search for a text body, preferring `text/plain` over
/// `text/html`; HTML falls back to tag-stripped text.
fn extract_body(payload: &MessagePart) -> Option<String> {
    if let Some(text) = find_part(payload, "text/plain") {
        return Some(text);
    }
    find_part(payload, "text/html").map(|html| strip_html(&html))
}

fn find_part(part: &MessagePart, mime_type: &str) -> Option<String> {
    if part.mime_type.eq_ignore_ascii_case(mime_type) {
        if let Some(data) = part.body.as_ref().and_then(|body| body.data.as_deref()) {
            if let Some(decoded) = decode_body_data(data) {
                return Some(decoded);
            }
        }
    }
    part.parts
        .iter()
        .find_map(|child| find_part(child, mime_type))
}

/// Gmail body data is URL-safe base64, padded or not depending on the part.
fn decode_body_data(data: &str) -> Option<String> {
    let trimmed = data.trim();
    let bytes = base64::engine::general_purpose::URL_SAFE
        .decode(trimmed)
        .or_else(|_| base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(trimmed))
        .ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<script[^>]*>.*?</script>|<style[^>]*>.*?</style>|<[^>]+>")
            .expect("invalid html pattern")
    })
}

fn strip_html(html: &str) -> String {
    let without_tags = tag_regex().replace_all(html, " ");
    let decoded = without_tags
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'");
    let collapsed: Vec<&str> = decoded.split_whitespace().collect();
    collapsed.join(" ")
}

use std::env;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingVar(&'static str),
    #[error("invalid value for {key}: {value}")]
    InvalidVar { key: &'static str, value: String },
}

/// Explicit service configuration, loaded once and passed into each
/// component's constructor.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// 64-char hex AES-256 key for tokens at rest.
    pub token_encryption_key: String,
    pub google_client_id: String,
    pub google_client_secret: String,
    /// Pub/Sub topic the Gmail watch publishes to.
    pub pubsub_topic: String,
    /// Shared token expected on the Pub/Sub push URL; unset disables the check.
    pub pubsub_token: Option<String>,
    pub gemini_api_key: String,
    pub gemini_model: Option<String>,
    pub telegram_bot_token: String,
    /// Secret expected in X-Telegram-Bot-Api-Secret-Token; unset disables the check.
    pub telegram_webhook_secret: Option<String>,
    pub qstash_url: String,
    pub qstash_token: String,
    /// Public URL QStash calls back into (`/reminders/dispatch`).
    pub reminder_callback_url: String,
    /// Shared token expected on the dispatch callback; unset disables the check.
    pub reminder_dispatch_token: Option<String>,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let host = env::var("GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = match env::var("GATEWAY_PORT") {
            Ok(raw) => raw
                .parse::<u16>()
                .map_err(|_| ConfigError::InvalidVar {
                    key: "GATEWAY_PORT",
                    value: raw,
                })?,
            Err(_) => 9002,
        };

        Ok(Self {
            host,
            port,
            database_url: require("DATABASE_URL")?,
            token_encryption_key: require("TOKEN_ENCRYPTION_KEY")?,
            google_client_id: require("GOOGLE_CLIENT_ID")?,
            google_client_secret: require("GOOGLE_CLIENT_SECRET")?,
            pubsub_topic: require("GMAIL_PUBSUB_TOPIC")?,
            pubsub_token: optional("GMAIL_PUBSUB_TOKEN"),
            gemini_api_key: require("GEMINI_API_KEY")?,
            gemini_model: optional("GEMINI_MODEL"),
            telegram_bot_token: require("TELEGRAM_BOT_TOKEN")?,
            telegram_webhook_secret: optional("TELEGRAM_WEBHOOK_SECRET"),
            qstash_url: optional("QSTASH_URL")
                .unwrap_or_else(|| "https://qstash.upstash.io".to_string()),
            qstash_token: require("QSTASH_TOKEN")?,
            reminder_callback_url: require("REMINDER_CALLBACK_URL")?,
            reminder_dispatch_token: optional("REMINDER_DISPATCH_TOKEN"),
        })
    }
}

fn require(key: &'static str) -> Result<String, ConfigError> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .ok_or(ConfigError::MissingVar(key))
}

fn optional(key: &'static str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use classify_module::GeminiClient;
use telegram_module::TelegramApi;

use pipeline_module::claim_ledger::PostgresClaimLedger;
use pipeline_module::config::ServiceConfig;
use pipeline_module::connection_store::ConnectionStore;
use pipeline_module::crypto::TokenCipher;
use pipeline_module::filter_store::FilterStore;
use pipeline_module::gmail::GmailClient;
use pipeline_module::notifier::{NotificationSink, Notifier, TelegramSink};
use pipeline_module::pipeline::PipelineDeps;
use pipeline_module::qstash::QstashClient;
use pipeline_module::reminder_store::ReminderStore;
use pipeline_module::subscription_store::SubscriptionStore;
use pipeline_module::token_vault::TokenVault;

pub(super) type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub(super) struct GatewayState {
    pub(super) config: ServiceConfig,
    pub(super) deps: PipelineDeps,
    pub(super) connections: ConnectionStore,
    pub(super) filters: FilterStore,
    pub(super) subscriptions: SubscriptionStore,
    pub(super) reminders: ReminderStore,
    pub(super) vault: TokenVault,
    pub(super) qstash: QstashClient,
    pub(super) telegram: TelegramApi,
    pub(super) sink: Arc<dyn NotificationSink>,
    /// Chats that tapped "pick another date" and owe us a free-text reply.
    pub(super) pending_custom_dates: Mutex<HashMap<i64, String>>,
}

pub(super) fn build_state(config: ServiceConfig) -> Result<GatewayState, BoxError> {
    let cipher = TokenCipher::from_hex(&config.token_encryption_key)?;
    let vault = TokenVault::new(
        config.google_client_id.clone(),
        config.google_client_secret.clone(),
        cipher,
    );

    let connections = ConnectionStore::new(&config.database_url)?;
    let filters = FilterStore::new(&config.database_url)?;
    let subscriptions = SubscriptionStore::new(&config.database_url)?;
    let reminders = ReminderStore::new(&config.database_url)?;
    let ledger = Arc::new(PostgresClaimLedger::new(&config.database_url)?);

    let telegram = TelegramApi::new(config.telegram_bot_token.clone());
    let sink: Arc<dyn NotificationSink> = Arc::new(TelegramSink::new(telegram.clone()));

    let mut classifier = GeminiClient::new(config.gemini_api_key.clone());
    if let Some(ref model) = config.gemini_model {
        classifier = classifier.with_model(model.clone());
    }

    let qstash = QstashClient::new(
        config.qstash_url.clone(),
        config.qstash_token.clone(),
        config.reminder_callback_url.clone(),
    );

    let deps = PipelineDeps {
        ledger,
        mail: Arc::new(GmailClient::new(config.pubsub_topic.clone())),
        classifier: Arc::new(classifier),
        notifier: Notifier::new(sink.clone()),
    };

    Ok(GatewayState {
        config,
        deps,
        connections,
        filters,
        subscriptions,
        reminders,
        vault,
        qstash,
        telegram,
        sink,
        pending_custom_dates: Mutex::new(HashMap::new()),
    })
}

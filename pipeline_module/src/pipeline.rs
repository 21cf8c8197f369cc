//! Per-push orchestration: claim, classify, score, notify.
//!
//! Every per-message failure is caught and isolated; one bad message never
//! aborts its siblings in the same history delta. Once a message is
//! claimed, every exit route lands the claim in `completed` or `failed`.

use std::sync::Arc;

use classify_module::{Classifier, ClassifyError, ClassifyRequest, CustomCategorySpec};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::claim_ledger::{ClaimLedger, ClaimLedgerError, ClaimOutcome};
use crate::connection_store::{ConnectionStatus, ConnectionStore, ConnectionStoreError};
use crate::filter_store::{CustomCategory, FilterConfig, FilterStore, FilterStoreError};
use crate::gmail::history::{fetch_history, HistoryError};
use crate::gmail::push::PushNotification;
use crate::gmail::watch::{ensure_valid_watch, WatchError};
use crate::gmail::{HistoryDelta, MailApi, MailApiError};
use crate::notifier::{Notifier, NotifyDecision, NotifyError};
use crate::scoring::{score, ScoringContext};
use crate::subscription_store::{SubscriptionStore, SubscriptionStoreError};
use crate::token_vault::TokenVault;

/// The seams per-message processing runs against.
pub struct PipelineDeps {
    pub ledger: Arc<dyn ClaimLedger>,
    pub mail: Arc<dyn MailApi>,
    pub classifier: Arc<dyn Classifier>,
    pub notifier: Notifier,
}

/// Per-user state resolved once per push, shared by every message in it.
pub struct MessageContext {
    pub user_id: Uuid,
    pub chat_id: Option<i64>,
    pub access_token: String,
    pub filters: FilterConfig,
    pub custom: Vec<CustomCategory>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Another invocation already claimed this message; zero side effects.
    AlreadyClaimed,
    BelowThreshold(u8),
    Notified(u8),
    /// Claimed but a downstream step failed; claim marked `failed`.
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
enum StepError {
    #[error("message fetch failed: {0}")]
    Fetch(#[from] MailApiError),
    #[error("classification failed: {0}")]
    Classify(#[from] ClassifyError),
    #[error("persisting analysis failed: {0}")]
    Persist(ClaimLedgerError),
    #[error("notification failed: {0}")]
    Notify(#[from] NotifyError),
}

/// Process one message end to end under its claim.
pub fn process_message(
    deps: &PipelineDeps,
    ctx: &MessageContext,
    message_id: &str,
) -> Result<MessageOutcome, ClaimLedgerError> {
    let Some(claim_id) = deps.ledger.claim(ctx.user_id, message_id)? else {
        debug!("message {} already claimed, skipping", message_id);
        return Ok(MessageOutcome::AlreadyClaimed);
    };

    match run_claimed(deps, ctx, claim_id, message_id) {
        Ok(outcome) => Ok(outcome),
        Err(err) => {
            warn!("message {} failed: {}", message_id, err);
            if let Err(mark_err) = deps.ledger.fail(claim_id, &err.to_string()) {
                warn!(
                    "could not mark claim {} failed for message {}: {}",
                    claim_id, message_id, mark_err
                );
            }
            Ok(MessageOutcome::Failed(err.to_string()))
        }
    }
}

fn run_claimed(
    deps: &PipelineDeps,
    ctx: &MessageContext,
    claim_id: Uuid,
    message_id: &str,
) -> Result<MessageOutcome, StepError> {
    let message = deps.mail.get_message(&ctx.access_token, message_id)?;

    let request = ClassifyRequest {
        sender: message.sender,
        subject: message.subject,
        body: message.body,
        watch_tags: ctx.filters.watch_tags.clone(),
        ignore_tags: ctx.filters.ignore_tags.clone(),
        custom_categories: ctx
            .custom
            .iter()
            .map(|custom| CustomCategorySpec {
                category: custom.category.clone(),
                label: custom.user_facing_category.clone(),
                description: custom.description.clone(),
            })
            .collect(),
    };
    let outcome = deps.classifier.classify(&request)?;

    let scoring_ctx = ScoringContext::new(&ctx.filters, &ctx.custom);
    let final_score = score(&outcome.analysis, &scoring_ctx);

    // Analysis lands in the ledger before delivery is attempted, so a
    // delivery failure never loses the computed result.
    let calendar = outcome
        .analysis
        .calendar_event
        .as_ref()
        .map(|event| serde_json::to_value(event).unwrap_or_default());
    deps.ledger
        .complete(
            claim_id,
            &ClaimOutcome {
                message_score: i32::from(final_score),
                flagged_keywords: outcome.analysis.keywords_flagged.clone(),
                reply_message: outcome.analysis.reply_message.clone(),
                calendar,
                usage_tokens: outcome.usage.total_tokens,
            },
        )
        .map_err(StepError::Persist)?;

    match deps.notifier.notify(
        ctx.chat_id,
        message_id,
        &outcome.analysis,
        final_score,
        &ctx.filters,
    )? {
        NotifyDecision::Delivered => Ok(MessageOutcome::Notified(final_score)),
        NotifyDecision::BelowThreshold | NotifyDecision::NoDestination => {
            Ok(MessageOutcome::BelowThreshold(final_score))
        }
    }
}

/// Tally of one push notification's processing.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PushSummary {
    pub messages_seen: usize,
    pub notified: usize,
    pub below_threshold: usize,
    pub already_claimed: usize,
    pub failed: usize,
}

/// Walk every added message in every delta, isolating failures.
pub fn process_deltas(
    deps: &PipelineDeps,
    ctx: &MessageContext,
    deltas: &[HistoryDelta],
) -> PushSummary {
    let mut summary = PushSummary::default();

    for delta in deltas {
        for message_id in &delta.added_message_ids {
            summary.messages_seen += 1;
            match process_message(deps, ctx, message_id) {
                Ok(MessageOutcome::Notified(_)) => summary.notified += 1,
                Ok(MessageOutcome::BelowThreshold(_)) => summary.below_threshold += 1,
                Ok(MessageOutcome::AlreadyClaimed) => summary.already_claimed += 1,
                Ok(MessageOutcome::Failed(_)) => summary.failed += 1,
                Err(err) => {
                    // Claim insert itself failed; skip this message only.
                    warn!("claim error for message {}: {}", message_id, err);
                    summary.failed += 1;
                }
            }
        }
    }

    summary
}

// ============================================================================
// Full push handling (store-backed entry point for the gateway)
// ============================================================================

pub struct PushStores<'a> {
    pub connections: &'a ConnectionStore,
    pub filters: &'a FilterStore,
    pub subscriptions: &'a SubscriptionStore,
    pub vault: &'a TokenVault,
}

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("no connection for mailbox {0}")]
    UnknownMailbox(String),
    #[error("mailbox requires re-authentication")]
    Reauth,
    #[error("watch renewal failed: {0}")]
    Watch(#[from] WatchError),
    #[error("history fetch failed: {0}")]
    History(HistoryError),
    #[error("store error: {0}")]
    Connection(#[from] ConnectionStoreError),
    #[error("store error: {0}")]
    Filter(#[from] FilterStoreError),
    #[error("store error: {0}")]
    Subscription(#[from] SubscriptionStoreError),
    #[error("token error: {0}")]
    Token(String),
}

/// Resolve a decoded push notification into per-message processing.
pub fn handle_push(
    deps: &PipelineDeps,
    stores: &PushStores<'_>,
    notification: &PushNotification,
) -> Result<PushSummary, PushError> {
    let mut connection = stores
        .connections
        .find_by_email(&notification.email_address)?
        .ok_or_else(|| PushError::UnknownMailbox(notification.email_address.clone()))?;

    if connection.status == ConnectionStatus::ReauthRequired {
        info!(
            "connection {} awaiting re-auth, ignoring push",
            connection.email_address
        );
        return Ok(PushSummary::default());
    }

    let access = stores.subscriptions.plan_access(connection.user_id)?;

    ensure_valid_watch(
        deps.mail.as_ref(),
        stores.vault,
        stores.connections,
        &mut connection,
        access,
        chrono::Utc::now(),
    )?;

    let deltas = match fetch_history(
        deps.mail.as_ref(),
        stores.vault,
        stores.connections,
        &mut connection,
        access,
    ) {
        Ok(deltas) => deltas,
        Err(HistoryError::Reauth) => return Err(PushError::Reauth),
        Err(err) => return Err(PushError::History(err)),
    };

    if deltas.is_empty() {
        debug!(
            "no new history for {} since cursor {:?}",
            connection.email_address, connection.watch_history_id
        );
        return Ok(PushSummary::default());
    }

    let filters = stores.filters.load_for_user(connection.user_id)?;
    let custom = stores.filters.custom_categories(connection.user_id)?;

    let access_token = stores
        .vault
        .access_token(stores.connections, &mut connection)
        .map_err(|err| {
            if err.is_auth() {
                PushError::Reauth
            } else {
                PushError::Token(err.to_string())
            }
        })?;

    let ctx = MessageContext {
        user_id: connection.user_id,
        chat_id: filters.telegram_chat_id,
        access_token,
        filters,
        custom,
    };

    let summary = process_deltas(deps, &ctx, &deltas);
    info!(
        "push for {} done: {} seen, {} notified, {} below threshold, {} duplicate, {} failed",
        connection.email_address,
        summary.messages_seen,
        summary.notified,
        summary.below_threshold,
        summary.already_claimed,
        summary.failed
    );
    Ok(summary)
}

pub mod actions;
pub mod claim_ledger;
pub mod config;
pub mod connection_store;
pub mod crypto;
pub mod dates;
pub mod db;
pub mod filter_store;
pub mod gmail;
pub mod notifier;
pub mod pipeline;
pub mod qstash;
pub mod reminder_store;
pub mod reminders;
pub mod scoring;
pub mod subscription_store;
pub mod token_vault;

#[cfg(test)]
pub(crate) mod test_support;

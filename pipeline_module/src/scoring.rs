//! Deterministic weighted relevance scoring.
//!
//! Blends the classifier's intrinsic importance judgment with the user's
//! per-category weight preferences: the classifier says how important the
//! message looks, the weights say how much the user wants to hear about
//! that kind of message, and secondary tags nudge without dominating.

use classify_module::Analysis;

use crate::filter_store::{CategoryToggles, CustomCategory, FilterConfig};

const MESSAGE_SCORE_WEIGHT: f64 = 0.25;
const SECONDARY_DAMPING: f64 = 0.25;
const PRIMARY_WEIGHT_SOLO: f64 = 0.75;
const PRIMARY_WEIGHT_WITH_SECONDARY: f64 = 0.5;

/// Top-level toggle a built-in subcategory key resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToggleField {
    Financial,
    Marketing,
    Security,
    Deadline,
    Work,
    Personal,
    Legal,
}

/// Static prefix dispatch; keys outside this table fall through to the
/// custom-category branch.
const PREFIX_TOGGLES: &[(&str, ToggleField)] = &[
    ("financial_", ToggleField::Financial),
    ("marketing_", ToggleField::Marketing),
    ("security_", ToggleField::Security),
    ("deadline_", ToggleField::Deadline),
    ("work_", ToggleField::Work),
    ("personal_", ToggleField::Personal),
    ("legal_", ToggleField::Legal),
];

/// Built-in subcategory taxonomy the classifier is prompted with.
pub const CATEGORY_TAXONOMY: &[&str] = &[
    "financial_invoice",
    "financial_receipt",
    "financial_statement",
    "financial_payment_due",
    "marketing_newsletter",
    "marketing_promotion",
    "security_alert",
    "security_login",
    "security_password",
    "deadline_due_date",
    "deadline_renewal",
    "deadline_expiry",
    "work_meeting",
    "work_project",
    "work_request",
    "personal_family",
    "personal_friend",
    "personal_event",
    "legal_contract",
    "legal_notice",
];

#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    #[error("taxonomy key resolves to no toggle prefix: {0}")]
    UnmappedKey(&'static str),
}

/// Startup check: every built-in subcategory key must resolve through the
/// prefix table.
pub fn validate_taxonomy() -> Result<(), ScoringError> {
    for key in CATEGORY_TAXONOMY {
        if resolve_prefix(key).is_none() {
            return Err(ScoringError::UnmappedKey(key));
        }
    }
    Ok(())
}

pub fn resolve_prefix(key: &str) -> Option<ToggleField> {
    PREFIX_TOGGLES
        .iter()
        .find(|(prefix, _)| key.starts_with(prefix))
        .map(|(_, toggle)| *toggle)
}

impl CategoryToggles {
    pub fn enabled(&self, field: ToggleField) -> bool {
        match field {
            ToggleField::Financial => self.financial,
            ToggleField::Marketing => self.marketing,
            ToggleField::Security => self.security,
            ToggleField::Deadline => self.deadline,
            ToggleField::Work => self.work,
            ToggleField::Personal => self.personal,
            ToggleField::Legal => self.legal,
        }
    }
}

/// Everything weight resolution needs for one user.
#[derive(Debug, Clone, Copy)]
pub struct ScoringContext<'a> {
    pub filters: &'a FilterConfig,
    pub custom: &'a [CustomCategory],
}

impl<'a> ScoringContext<'a> {
    pub fn new(filters: &'a FilterConfig, custom: &'a [CustomCategory]) -> Self {
        Self { filters, custom }
    }

    /// Weight contributed by one subcategory key. Disabled toggles and
    /// unknown keys contribute 0; a missing weight entry also counts as 0.
    fn contribution(&self, key: &str) -> f64 {
        if let Some(toggle) = resolve_prefix(key) {
            if !self.filters.toggles.enabled(toggle) {
                return 0.0;
            }
            return f64::from(*self.filters.weights.get(key).unwrap_or(&0));
        }

        // Custom fallback branch.
        if let Some(custom) = self.custom.iter().find(|custom| custom.category == key) {
            if self.filters.toggles.custom {
                return f64::from(custom.weight);
            }
        }
        0.0
    }
}

fn average_contribution(ctx: &ScoringContext<'_>, keys: &[String]) -> f64 {
    if keys.is_empty() {
        return 0.0;
    }
    let total: f64 = keys.iter().map(|key| ctx.contribution(key)).sum();
    total / keys.len() as f64
}

/// Compute the final relevance score, an integer in `[0, 100]`.
pub fn score(analysis: &Analysis, ctx: &ScoringContext<'_>) -> u8 {
    let message_contribution = f64::from(analysis.message_score) * MESSAGE_SCORE_WEIGHT;

    let primary_score = average_contribution(ctx, &analysis.categories.primary.subcategory);

    let secondary_keys: Vec<String> = analysis
        .categories
        .secondary
        .iter()
        .flat_map(|group| group.subcategory.iter().cloned())
        .collect();
    let secondary_raw = average_contribution(ctx, &secondary_keys);
    let secondary_score = secondary_raw * SECONDARY_DAMPING;

    let primary_weight = if analysis.categories.secondary.is_empty() {
        PRIMARY_WEIGHT_SOLO
    } else {
        PRIMARY_WEIGHT_WITH_SECONDARY
    };

    let total = message_contribution + primary_score * primary_weight + secondary_score;
    total.min(100.0).round().clamp(0.0, 100.0) as u8
}

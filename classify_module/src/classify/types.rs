use serde::{Deserialize, Deserializer, Serialize};

use super::errors::ClassifyError;

/// A user-defined monitoring rule forwarded to the classifier so it can
/// assign the matching machine key.
#[derive(Debug, Clone)]
pub struct CustomCategorySpec {
    /// Machine key, e.g. `custom_homelab_alerts`.
    pub category: String,
    /// Human-facing label shown in prompts.
    pub label: String,
    pub description: String,
}

/// Input to a single classification call.
#[derive(Debug, Clone, Default)]
pub struct ClassifyRequest {
    pub sender: String,
    pub subject: String,
    pub body: String,
    /// Senders/topics the user explicitly watches.
    pub watch_tags: Vec<String>,
    /// Senders/topics the user explicitly ignores.
    pub ignore_tags: Vec<String>,
    pub custom_categories: Vec<CustomCategorySpec>,
}

/// The strict response contract the upstream model must satisfy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analysis {
    /// Intrinsic importance judgment, 0-100.
    #[serde(deserialize_with = "bounded_score")]
    pub message_score: u8,
    #[serde(default)]
    pub keywords_flagged: Vec<String>,
    pub reply_message: String,
    pub categories: CategoryAssignment,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub calendar_event: Option<CalendarEvent>,
    /// Deadline date extracted from the message content, ISO `YYYY-MM-DD`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dateline_date: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryAssignment {
    pub primary: CategoryGroup,
    #[serde(default)]
    pub secondary: Vec<CategoryGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryGroup {
    #[serde(default)]
    pub subcategory: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub summary: String,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
}

impl CalendarEvent {
    /// Only events with both endpoints are actionable.
    pub fn is_schedulable(&self) -> bool {
        self.start.is_some() && self.end.is_some()
    }
}

/// Token accounting reported by the upstream model.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: i32,
    pub completion_tokens: i32,
    pub total_tokens: i32,
}

#[derive(Debug, Clone)]
pub struct ClassifyOutcome {
    pub analysis: Analysis,
    pub usage: TokenUsage,
}

/// Black-box classification seam; the pipeline only sees this trait.
pub trait Classifier: Send + Sync {
    fn classify(&self, request: &ClassifyRequest) -> Result<ClassifyOutcome, ClassifyError>;
}

/// Accept any numeric score and clamp into 0-100.
fn bounded_score<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    Ok(raw.clamp(0.0, 100.0).round() as u8)
}

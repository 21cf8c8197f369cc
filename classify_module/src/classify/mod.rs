mod client;
mod errors;
mod prompt;
mod response;
mod types;

pub use client::GeminiClient;
pub use errors::ClassifyError;
pub use types::{
    Analysis, CalendarEvent, CategoryAssignment, CategoryGroup, Classifier, ClassifyOutcome,
    ClassifyRequest, CustomCategorySpec, TokenUsage,
};

mod classify;

pub use classify::{
    Analysis, CalendarEvent, CategoryAssignment, CategoryGroup, Classifier, ClassifyError,
    ClassifyOutcome, ClassifyRequest, CustomCategorySpec, GeminiClient, TokenUsage,
};

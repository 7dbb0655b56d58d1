//! Emotion log: per-user local-first store plus weekly aggregation.

pub mod model;
pub mod report;
pub mod store;

pub use model::{EmotionDraft, EmotionEntry};
pub use report::{MoodSlice, WeeklyReport, weekly_report};
pub use store::EmotionStore;

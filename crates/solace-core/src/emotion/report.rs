//! Weekly report aggregation.
//!
//! Pure functions over the local entry list, so reports are always
//! computable offline and deterministic for a given entry set.

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::emotion::model::EmotionEntry;

/// Share of the top mood above which the dominant-mood insight fires.
const DOMINANT_MOOD_THRESHOLD: u32 = 30;

/// Average intensity below which the low-energy insight fires.
const LOW_ENERGY_THRESHOLD: f64 = 4.0;

/// Entry count at which the consistency insight fires.
const CONSISTENCY_THRESHOLD: usize = 5;

/// One mood's share of the week.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoodSlice {
    pub mood: String,
    pub count: u32,
    /// Rounded to the nearest integer percent.
    pub percentage: u32,
}

/// Aggregated view of one week of entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeeklyReport {
    pub week_start: DateTime<Utc>,
    pub week_end: DateTime<Utc>,
    pub total_entries: u32,
    pub most_frequent_mood: Option<String>,
    /// Moods in first-seen order; ties keep the first-seen mood on top.
    pub mood_distribution: Vec<MoodSlice>,
    pub average_intensity: f64,
    pub insights: Vec<String>,
}

/// Builds the weekly report for the week containing `now`.
///
/// The week starts on Sunday (`now - weekday * 86400s`) and spans six days
/// forward, matching the report window the backend computes.
pub fn weekly_report(entries: &[EmotionEntry], now: DateTime<Utc>) -> WeeklyReport {
    let week_start = now - Duration::seconds(i64::from(now.weekday().num_days_from_sunday()) * 86_400);
    let week_end = week_start + Duration::days(6);

    let in_week: Vec<&EmotionEntry> = entries
        .iter()
        .filter(|e| e.timestamp >= week_start && e.timestamp <= week_end)
        .collect();

    let total = in_week.len() as u32;
    if total == 0 {
        return WeeklyReport {
            week_start,
            week_end,
            total_entries: 0,
            most_frequent_mood: None,
            mood_distribution: Vec::new(),
            average_intensity: 0.0,
            insights: Vec::new(),
        };
    }

    // First-seen order keeps tie-breaking stable across recomputation
    let mut histogram: Vec<(String, u32)> = Vec::new();
    let mut intensity_sum: u64 = 0;
    for entry in &in_week {
        intensity_sum += u64::from(entry.intensity);
        match histogram.iter_mut().find(|(mood, _)| *mood == entry.mood) {
            Some((_, count)) => *count += 1,
            None => histogram.push((entry.mood.clone(), 1)),
        }
    }

    let mood_distribution: Vec<MoodSlice> = histogram
        .iter()
        .map(|(mood, count)| MoodSlice {
            mood: mood.clone(),
            count: *count,
            percentage: ((f64::from(*count) * 100.0) / f64::from(total)).round() as u32,
        })
        .collect();

    let mut most_frequent: Option<&MoodSlice> = None;
    for slice in &mood_distribution {
        if most_frequent.is_none_or(|top| slice.count > top.count) {
            most_frequent = Some(slice);
        }
    }

    let average_intensity =
        ((intensity_sum as f64 / f64::from(total)) * 10.0).round() / 10.0;

    let mut insights = Vec::new();
    if let Some(top) = most_frequent {
        if top.percentage > DOMINANT_MOOD_THRESHOLD {
            insights.push(format!(
                "You've been feeling {} a lot this week.",
                top.mood
            ));
        }
    }
    if average_intensity < LOW_ENERGY_THRESHOLD {
        insights.push("Your energy has been on the lower side this week.".to_string());
    }
    if in_week.len() >= CONSISTENCY_THRESHOLD {
        insights.push(format!(
            "Nice consistency: {} check-ins this week.",
            in_week.len()
        ));
    }

    WeeklyReport {
        week_start,
        week_end,
        total_entries: total,
        most_frequent_mood: most_frequent.map(|s| s.mood.clone()),
        mood_distribution,
        average_intensity,
        insights,
    }
}

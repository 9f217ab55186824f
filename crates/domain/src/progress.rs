//! Per-user progress aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of most-recent quiz scores the performance band is derived from.
pub const BAND_WINDOW: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizScore {
    pub timestamp: DateTime<Utc>,
    pub subject: String,
    pub topic: String,
    /// In [0, 100]; validated at the gateway boundary.
    pub score: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerformanceBand {
    Excellent,
    Good,
    Average,
    NeedsHelp,
}

impl PerformanceBand {
    /// Derive the band from the last [`BAND_WINDOW`] scores. With no scores
    /// yet the user sits in the neutral `average` band.
    pub fn from_scores(scores: &[QuizScore]) -> Self {
        let window: Vec<u32> = scores
            .iter()
            .rev()
            .take(BAND_WINDOW)
            .map(|s| s.score)
            .collect();
        if window.is_empty() {
            return Self::Average;
        }
        let mean = window.iter().sum::<u32>() as f64 / window.len() as f64;
        if mean >= 80.0 {
            Self::Excellent
        } else if mean >= 70.0 {
            Self::Good
        } else if mean >= 60.0 {
            Self::Average
        } else {
            Self::NeedsHelp
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProgress {
    pub user_id: String,
    pub quiz_scores: Vec<QuizScore>,
    pub lessons_completed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_intervention_at: Option<DateTime<Utc>>,
    pub performance_band: PerformanceBand,
}

impl UserProgress {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            quiz_scores: Vec::new(),
            lessons_completed: 0,
            last_intervention_at: None,
            performance_band: PerformanceBand::Average,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn score(subject: &str, value: u32) -> QuizScore {
        QuizScore {
            timestamp: Utc::now(),
            subject: subject.into(),
            topic: "t".into(),
            score: value,
        }
    }

    #[test]
    fn band_thresholds() {
        assert_eq!(
            PerformanceBand::from_scores(&[score("math", 85)]),
            PerformanceBand::Excellent
        );
        assert_eq!(
            PerformanceBand::from_scores(&[score("math", 80)]),
            PerformanceBand::Excellent
        );
        assert_eq!(
            PerformanceBand::from_scores(&[score("math", 75)]),
            PerformanceBand::Good
        );
        assert_eq!(
            PerformanceBand::from_scores(&[score("math", 65)]),
            PerformanceBand::Average
        );
        assert_eq!(
            PerformanceBand::from_scores(&[score("math", 45)]),
            PerformanceBand::NeedsHelp
        );
    }

    #[test]
    fn band_uses_last_ten_only() {
        // Ten failing scores followed by ten perfect ones: only the recent
        // ten count.
        let mut scores: Vec<QuizScore> = (0..10).map(|_| score("math", 10)).collect();
        scores.extend((0..10).map(|_| score("math", 100)));
        assert_eq!(
            PerformanceBand::from_scores(&scores),
            PerformanceBand::Excellent
        );
    }

    #[test]
    fn band_empty_is_average() {
        assert_eq!(PerformanceBand::from_scores(&[]), PerformanceBand::Average);
    }

    #[test]
    fn band_serialization() {
        assert_eq!(
            serde_json::to_string(&PerformanceBand::NeedsHelp).unwrap(),
            "\"needs_help\""
        );
    }
}

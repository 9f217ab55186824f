//! Per-user state, trigger rules, and dispatch windows.
//!
//! All mutation happens under the write lock keyed by user, which gives
//! the per-user serialization contract: reads see the latest completed
//! write, derived fields (the performance band) are recomputed on every
//! write.
//!
//! Trigger evaluation is pure over a snapshot. Dispatch bookkeeping is a
//! separate step (`begin_dispatch`) so the gateway can evaluate without
//! committing — only triggers that clear their dedup window are returned
//! and recorded.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;

use guru_domain::config::InterventionConfig;
use guru_domain::error::ErrorKind;
use guru_domain::progress::{PerformanceBand, QuizScore, UserProgress};

/// Scores below this fire `low_recent_score`.
const LOW_SCORE_THRESHOLD: u32 = 60;
/// How many trailing per-subject scores the trend rule inspects.
const TREND_LEN: usize = 5;
/// Total strict decline (points) that makes a trend "declining".
const TREND_DROP: u32 = 15;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Triggers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    LowRecentScore,
    DecliningTrend,
    Inactivity,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LowRecentScore => "low_recent_score",
            Self::DecliningTrend => "declining_trend",
            Self::Inactivity => "inactivity",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    pub reason: String,
}

impl Trigger {
    /// Key for the per-window dedup: rule-specific scope.
    fn dedup_key(&self) -> String {
        match self.kind {
            TriggerKind::LowRecentScore => format!(
                "low_recent_score:{}:{}",
                self.subject.as_deref().unwrap_or(""),
                self.topic.as_deref().unwrap_or("")
            ),
            TriggerKind::DecliningTrend => format!(
                "declining_trend:{}",
                self.subject.as_deref().unwrap_or("")
            ),
            TriggerKind::Inactivity => "inactivity".into(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, thiserror::Error)]
pub enum TrackerError {
    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("unknown user: {0}")]
    UnknownUser(String),
}

impl TrackerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            // The progress surface has no task ids; unknown users map to
            // the same 404 class.
            Self::UnknownUser(_) => ErrorKind::UnknownTask,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tracker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

struct UserState {
    progress: UserProgress,
    /// dedup_key → last fire time, for trigger windows.
    fired: HashMap<String, DateTime<Utc>>,
    last_activity_at: DateTime<Utc>,
}

pub struct ProgressTracker {
    config: InterventionConfig,
    users: RwLock<HashMap<String, UserState>>,
}

impl ProgressTracker {
    pub fn new(config: InterventionConfig) -> Self {
        Self {
            config,
            users: RwLock::new(HashMap::new()),
        }
    }

    // ── recording ────────────────────────────────────────────────────

    pub fn record_quiz(
        &self,
        user_id: &str,
        subject: &str,
        topic: &str,
        score: u32,
        at: DateTime<Utc>,
    ) -> Result<UserProgress, TrackerError> {
        if score > 100 {
            return Err(TrackerError::InvalidInput {
                message: format!("quiz score {score} out of range [0, 100]"),
            });
        }

        let mut users = self.users.write();
        let state = entry(&mut users, user_id, at);
        state.progress.quiz_scores.push(QuizScore {
            timestamp: at,
            subject: subject.to_owned(),
            topic: topic.to_owned(),
            score,
        });
        state.progress.performance_band =
            PerformanceBand::from_scores(&state.progress.quiz_scores);
        state.last_activity_at = at;
        tracing::debug!(user_id, subject, topic, score, "quiz recorded");
        Ok(state.progress.clone())
    }

    pub fn record_lesson_completion(
        &self,
        user_id: &str,
        subject: &str,
        topic: &str,
        at: DateTime<Utc>,
    ) -> UserProgress {
        let mut users = self.users.write();
        let state = entry(&mut users, user_id, at);
        state.progress.lessons_completed += 1;
        state.last_activity_at = at;
        tracing::debug!(user_id, subject, topic, "lesson completion recorded");
        state.progress.clone()
    }

    // ── reads ────────────────────────────────────────────────────────

    pub fn get(&self, user_id: &str) -> Option<UserProgress> {
        self.users.read().get(user_id).map(|s| s.progress.clone())
    }

    // ── triggers ─────────────────────────────────────────────────────

    /// Evaluate all trigger rules over the user's current state. Pure:
    /// no dedup bookkeeping, no mutation.
    pub fn evaluate_triggers(&self, user_id: &str, now: DateTime<Utc>) -> Vec<Trigger> {
        let users = self.users.read();
        let Some(state) = users.get(user_id) else {
            return Vec::new();
        };

        let mut triggers = Vec::new();
        let scores = &state.progress.quiz_scores;

        // 1. low_recent_score: most recent score below the threshold.
        if let Some(last) = scores.last() {
            if last.score < LOW_SCORE_THRESHOLD {
                triggers.push(Trigger {
                    kind: TriggerKind::LowRecentScore,
                    user_id: user_id.to_owned(),
                    subject: Some(last.subject.clone()),
                    topic: Some(last.topic.clone()),
                    reason: format!(
                        "latest {} score {} is below {LOW_SCORE_THRESHOLD}",
                        last.subject, last.score
                    ),
                });
            }
        }

        // 2. declining_trend: per subject, the last TREND_LEN scores are
        // strictly decreasing with a total drop ≥ TREND_DROP.
        let mut subjects: Vec<&str> = scores.iter().map(|s| s.subject.as_str()).collect();
        subjects.sort_unstable();
        subjects.dedup();
        for subject in subjects {
            let recent: Vec<u32> = scores
                .iter()
                .filter(|s| s.subject == subject)
                .rev()
                .take(TREND_LEN)
                .map(|s| s.score)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            if recent.len() == TREND_LEN
                && recent.windows(2).all(|w| w[1] < w[0])
                && recent[0] - recent[TREND_LEN - 1] >= TREND_DROP
            {
                triggers.push(Trigger {
                    kind: TriggerKind::DecliningTrend,
                    user_id: user_id.to_owned(),
                    subject: Some(subject.to_owned()),
                    topic: None,
                    reason: format!(
                        "{subject} scores fell from {} to {} over the last {TREND_LEN} quizzes",
                        recent[0],
                        recent[TREND_LEN - 1]
                    ),
                });
            }
        }

        // 3. inactivity: no quiz or lesson event for the configured span.
        let idle = now - state.last_activity_at;
        if idle >= Duration::days(self.config.inactivity_after_days as i64) {
            triggers.push(Trigger {
                kind: TriggerKind::Inactivity,
                user_id: user_id.to_owned(),
                subject: None,
                topic: None,
                reason: format!("no activity for {} days", idle.num_days()),
            });
        }

        triggers
    }

    /// Filter triggers through their dedup windows and record fire times
    /// for those that pass. The returned triggers are the ones to
    /// dispatch.
    pub fn begin_dispatch(
        &self,
        user_id: &str,
        triggers: Vec<Trigger>,
        now: DateTime<Utc>,
    ) -> Vec<Trigger> {
        if triggers.is_empty() {
            return triggers;
        }

        let mut users = self.users.write();
        let Some(state) = users.get_mut(user_id) else {
            return Vec::new();
        };

        let mut dispatchable = Vec::new();
        for trigger in triggers {
            let window = self.window_for(trigger.kind);
            let key = trigger.dedup_key();
            let recently_fired = state
                .fired
                .get(&key)
                .is_some_and(|last| now - *last < window);
            if recently_fired {
                continue;
            }
            state.fired.insert(key, now);
            dispatchable.push(trigger);
        }

        if !dispatchable.is_empty() {
            state.progress.last_intervention_at = Some(now);
        }
        dispatchable
    }

    fn window_for(&self, kind: TriggerKind) -> Duration {
        match kind {
            TriggerKind::LowRecentScore => {
                Duration::hours(self.config.low_score_window_hours as i64)
            }
            TriggerKind::DecliningTrend => Duration::hours(self.config.trend_window_hours as i64),
            TriggerKind::Inactivity => Duration::days(self.config.inactivity_window_days as i64),
        }
    }
}

fn entry<'a>(
    users: &'a mut HashMap<String, UserState>,
    user_id: &str,
    now: DateTime<Utc>,
) -> &'a mut UserState {
    users.entry(user_id.to_owned()).or_insert_with(|| UserState {
        progress: UserProgress::new(user_id),
        fired: HashMap::new(),
        last_activity_at: now,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> ProgressTracker {
        ProgressTracker::new(InterventionConfig::default())
    }

    // ── recording & bands ───────────────────────────────────────────

    #[test]
    fn quiz_recording_updates_band() {
        let t = tracker();
        let now = Utc::now();
        let progress = t.record_quiz("u1", "math", "algebra", 45, now).unwrap();
        assert_eq!(progress.quiz_scores.len(), 1);
        assert_eq!(progress.performance_band, PerformanceBand::NeedsHelp);

        let progress = t.record_quiz("u1", "math", "algebra", 95, now).unwrap();
        // Mean of 45 and 95 is 70 → good.
        assert_eq!(progress.performance_band, PerformanceBand::Good);
    }

    #[test]
    fn score_out_of_range_rejected() {
        let t = tracker();
        let err = t
            .record_quiz("u1", "math", "algebra", 101, Utc::now())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        assert!(t.get("u1").is_none());
    }

    #[test]
    fn lesson_completion_increments() {
        let t = tracker();
        t.record_lesson_completion("u1", "science", "motion", Utc::now());
        let progress = t.record_lesson_completion("u1", "science", "energy", Utc::now());
        assert_eq!(progress.lessons_completed, 2);
    }

    #[test]
    fn user_created_on_first_event() {
        let t = tracker();
        assert!(t.get("ghost").is_none());
        t.record_quiz("u1", "math", "algebra", 80, Utc::now()).unwrap();
        assert!(t.get("u1").is_some());
    }

    // ── trigger: low_recent_score ───────────────────────────────────

    #[test]
    fn low_score_fires_trigger() {
        let t = tracker();
        let now = Utc::now();
        t.record_quiz("u2", "math", "algebra", 45, now).unwrap();

        let triggers = t.evaluate_triggers("u2", now);
        assert_eq!(triggers.len(), 1);
        assert_eq!(triggers[0].kind, TriggerKind::LowRecentScore);
        assert_eq!(triggers[0].subject.as_deref(), Some("math"));
        assert_eq!(triggers[0].topic.as_deref(), Some("algebra"));
    }

    #[test]
    fn passing_score_no_trigger() {
        let t = tracker();
        let now = Utc::now();
        t.record_quiz("u2", "math", "algebra", 75, now).unwrap();
        assert!(t.evaluate_triggers("u2", now).is_empty());
    }

    #[test]
    fn low_score_deduped_within_window() {
        let t = tracker();
        let now = Utc::now();
        t.record_quiz("u2", "math", "algebra", 45, now).unwrap();

        let first = t.begin_dispatch("u2", t.evaluate_triggers("u2", now), now);
        assert_eq!(first.len(), 1);

        // Second low score ten minutes later: trigger evaluates but the
        // 24 h window suppresses dispatch.
        let later = now + Duration::minutes(10);
        t.record_quiz("u2", "math", "algebra", 40, later).unwrap();
        let second = t.begin_dispatch("u2", t.evaluate_triggers("u2", later), later);
        assert!(second.is_empty());

        // Past the window it may fire again.
        let next_day = now + Duration::hours(25);
        t.record_quiz("u2", "math", "algebra", 30, next_day).unwrap();
        let third = t.begin_dispatch("u2", t.evaluate_triggers("u2", next_day), next_day);
        assert_eq!(third.len(), 1);
    }

    #[test]
    fn low_score_window_scoped_per_topic() {
        let t = tracker();
        let now = Utc::now();
        t.record_quiz("u2", "math", "algebra", 45, now).unwrap();
        let first = t.begin_dispatch("u2", t.evaluate_triggers("u2", now), now);
        assert_eq!(first.len(), 1);

        // A different topic is a different dedup scope.
        t.record_quiz("u2", "math", "geometry", 30, now).unwrap();
        let second = t.begin_dispatch("u2", t.evaluate_triggers("u2", now), now);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].topic.as_deref(), Some("geometry"));
    }

    // ── trigger: declining_trend ────────────────────────────────────

    #[test]
    fn declining_trend_fires_on_strict_decline() {
        let t = tracker();
        let now = Utc::now();
        for score in [90, 85, 80, 75, 70] {
            t.record_quiz("u3", "math", "algebra", score, now).unwrap();
        }

        let triggers = t.evaluate_triggers("u3", now);
        assert!(triggers
            .iter()
            .any(|tr| tr.kind == TriggerKind::DecliningTrend));
    }

    #[test]
    fn shallow_decline_does_not_fire() {
        let t = tracker();
        let now = Utc::now();
        // Strictly decreasing but only 10 points total.
        for score in [90, 88, 86, 84, 80] {
            t.record_quiz("u3", "math", "algebra", score, now).unwrap();
        }
        assert!(!t
            .evaluate_triggers("u3", now)
            .iter()
            .any(|tr| tr.kind == TriggerKind::DecliningTrend));
    }

    #[test]
    fn non_monotonic_decline_does_not_fire() {
        let t = tracker();
        let now = Utc::now();
        for score in [90, 70, 75, 65, 62] {
            t.record_quiz("u3", "math", "algebra", score, now).unwrap();
        }
        assert!(!t
            .evaluate_triggers("u3", now)
            .iter()
            .any(|tr| tr.kind == TriggerKind::DecliningTrend));
    }

    #[test]
    fn trend_is_per_subject() {
        let t = tracker();
        let now = Utc::now();
        // Interleave subjects: math declines, science is flat.
        for (subject, score) in [
            ("math", 90),
            ("science", 80),
            ("math", 85),
            ("science", 80),
            ("math", 80),
            ("math", 72),
            ("math", 65),
        ] {
            t.record_quiz("u3", subject, "t", score, now).unwrap();
        }
        let triggers = t.evaluate_triggers("u3", now);
        let trend: Vec<_> = triggers
            .iter()
            .filter(|tr| tr.kind == TriggerKind::DecliningTrend)
            .collect();
        assert_eq!(trend.len(), 1);
        assert_eq!(trend[0].subject.as_deref(), Some("math"));
    }

    // ── trigger: inactivity ─────────────────────────────────────────

    #[test]
    fn inactivity_fires_after_seven_days() {
        let t = tracker();
        let start = Utc::now();
        t.record_quiz("u4", "math", "algebra", 80, start).unwrap();

        let six_days = start + Duration::days(6);
        assert!(!t
            .evaluate_triggers("u4", six_days)
            .iter()
            .any(|tr| tr.kind == TriggerKind::Inactivity));

        let eight_days = start + Duration::days(8);
        assert!(t
            .evaluate_triggers("u4", eight_days)
            .iter()
            .any(|tr| tr.kind == TriggerKind::Inactivity));
    }

    #[test]
    fn activity_resets_inactivity_clock() {
        let t = tracker();
        let start = Utc::now();
        t.record_quiz("u4", "math", "algebra", 80, start).unwrap();
        t.record_lesson_completion("u4", "math", "algebra", start + Duration::days(5));

        let day_nine = start + Duration::days(9);
        // Only four days since the lesson completion.
        assert!(!t
            .evaluate_triggers("u4", day_nine)
            .iter()
            .any(|tr| tr.kind == TriggerKind::Inactivity));
    }

    // ── dispatch bookkeeping ────────────────────────────────────────

    #[test]
    fn dispatch_records_last_intervention() {
        let t = tracker();
        let now = Utc::now();
        t.record_quiz("u5", "math", "algebra", 30, now).unwrap();
        assert!(t.get("u5").unwrap().last_intervention_at.is_none());

        let fired = t.begin_dispatch("u5", t.evaluate_triggers("u5", now), now);
        assert_eq!(fired.len(), 1);
        assert_eq!(t.get("u5").unwrap().last_intervention_at, Some(now));
    }

    #[test]
    fn dispatch_for_unknown_user_is_empty() {
        let t = tracker();
        let fired = t.begin_dispatch("ghost", Vec::new(), Utc::now());
        assert!(fired.is_empty());
    }
}

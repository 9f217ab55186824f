//! Lesson request and artifact model.
//!
//! A [`LessonRequest`] selects which content stores participate via two
//! explicit flags; the four combinations produce behaviorally distinct
//! lessons (source isolation is a hard invariant, enforced by the
//! composer and checked in its tests). There are no implicit defaults —
//! a store participates only when its flag is set.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Normalized inputs to the lesson composer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonRequest {
    pub subject: String,
    pub topic: String,
    pub user_id: String,
    #[serde(default)]
    pub include_encyclopedia: bool,
    #[serde(default)]
    pub use_knowledge_store: bool,
    #[serde(default)]
    pub force_regenerate: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Artifact
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Which store a lesson source came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStore {
    KnowledgeBase,
    Encyclopedia,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonSource {
    pub text: String,
    pub source_name: String,
    pub store: SourceStore,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// How the lesson body was produced.
///
/// `enhanced`: every requested store contributed. `standard`: at least one
/// requested store was unavailable and the lesson degraded to what was
/// reachable. `template`: deterministic template only, no store content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMethod {
    Enhanced,
    Standard,
    Template,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LessonMetadata {
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub generation_method: GenerationMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lesson {
    pub subject: String,
    pub topic: String,
    pub title: String,
    pub body: String,
    pub activity: String,
    pub question: String,
    pub sources: Vec<LessonSource>,
    pub knowledge_base_used: bool,
    pub encyclopedia_used: bool,
    pub metadata: LessonMetadata,
}

impl Lesson {
    /// The usage flags must agree with the attached sources.
    pub fn flags_consistent(&self) -> bool {
        let has_kb = self
            .sources
            .iter()
            .any(|s| s.store == SourceStore::KnowledgeBase);
        let has_enc = self
            .sources
            .iter()
            .any(|s| s.store == SourceStore::Encyclopedia);
        self.knowledge_base_used == has_kb && self.encyclopedia_used == has_enc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lesson_with(sources: Vec<LessonSource>, kb: bool, enc: bool) -> Lesson {
        Lesson {
            subject: "science".into(),
            topic: "motion".into(),
            title: "t".into(),
            body: "b".into(),
            activity: "a".into(),
            question: "q".into(),
            sources,
            knowledge_base_used: kb,
            encyclopedia_used: enc,
            metadata: LessonMetadata {
                created_at: Utc::now(),
                created_by: "test".into(),
                generation_method: GenerationMethod::Template,
            },
        }
    }

    #[test]
    fn flags_consistent_empty_sources() {
        assert!(lesson_with(vec![], false, false).flags_consistent());
        assert!(!lesson_with(vec![], true, false).flags_consistent());
    }

    #[test]
    fn flags_consistent_kb_source() {
        let src = LessonSource {
            text: "x".into(),
            source_name: "kb".into(),
            store: SourceStore::KnowledgeBase,
            url: None,
        };
        assert!(lesson_with(vec![src.clone()], true, false).flags_consistent());
        assert!(!lesson_with(vec![src], false, false).flags_consistent());
    }

    #[test]
    fn source_store_serialization() {
        assert_eq!(
            serde_json::to_string(&SourceStore::KnowledgeBase).unwrap(),
            "\"knowledge_base\""
        );
        assert_eq!(
            serde_json::to_string(&SourceStore::Encyclopedia).unwrap(),
            "\"encyclopedia\""
        );
    }

    #[test]
    fn request_flags_default_false() {
        let req: LessonRequest =
            serde_json::from_str(r#"{"subject":"s","topic":"t","user_id":"u"}"#).unwrap();
        assert!(!req.include_encyclopedia);
        assert!(!req.use_knowledge_store);
        assert!(!req.force_regenerate);
    }
}

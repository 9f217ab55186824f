//! Lesson storage seam.
//!
//! The real deployment keeps lessons in an external document store; the
//! core only needs get-by-identity and put. Keys are normalized so
//! `("Science", " Motion ")` and `("science", "motion")` address the same
//! lesson.

use std::collections::HashMap;

use parking_lot::RwLock;

use guru_domain::lesson::Lesson;

#[derive(Default)]
pub struct LessonStore {
    lessons: RwLock<HashMap<(String, String), Lesson>>,
}

fn key(subject: &str, topic: &str) -> (String, String) {
    (
        subject.trim().to_lowercase(),
        topic.trim().to_lowercase(),
    )
}

impl LessonStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, subject: &str, topic: &str) -> Option<Lesson> {
        self.lessons.read().get(&key(subject, topic)).cloned()
    }

    pub fn contains(&self, subject: &str, topic: &str) -> bool {
        self.lessons.read().contains_key(&key(subject, topic))
    }

    pub fn put(&self, lesson: Lesson) {
        let k = key(&lesson.subject, &lesson.topic);
        self.lessons.write().insert(k, lesson);
    }

    pub fn len(&self) -> usize {
        self.lessons.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lessons.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use guru_domain::lesson::{GenerationMethod, LessonMetadata};

    fn lesson(subject: &str, topic: &str) -> Lesson {
        Lesson {
            subject: subject.into(),
            topic: topic.into(),
            title: "t".into(),
            body: "b".into(),
            activity: "a".into(),
            question: "q".into(),
            sources: vec![],
            knowledge_base_used: false,
            encyclopedia_used: false,
            metadata: LessonMetadata {
                created_at: Utc::now(),
                created_by: "test".into(),
                generation_method: GenerationMethod::Template,
            },
        }
    }

    #[test]
    fn put_and_get() {
        let store = LessonStore::new();
        assert!(store.get("science", "motion").is_none());
        store.put(lesson("science", "motion"));
        assert!(store.get("science", "motion").is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn keys_normalized() {
        let store = LessonStore::new();
        store.put(lesson("Science", " Motion "));
        assert!(store.contains("science", "motion"));
        assert!(store.get("SCIENCE", "MOTION").is_some());
    }

    #[test]
    fn put_overwrites() {
        let store = LessonStore::new();
        store.put(lesson("science", "motion"));
        let mut updated = lesson("science", "motion");
        updated.body = "new body".into();
        store.put(updated);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("science", "motion").unwrap().body, "new body");
    }
}

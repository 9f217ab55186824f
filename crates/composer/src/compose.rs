//! The composition pipeline and its source-isolation guarantees.
//!
//! The two request flags select the operating mode:
//!
//! | knowledge store | encyclopedia | result |
//! |---|---|---|
//! | on  | off | knowledge passages only |
//! | off | on  | encyclopedia summary only, clearly attributed |
//! | on  | on  | knowledge section, then a delimited encyclopedia section |
//! | off | off | deterministic template |
//!
//! A store contributes if and only if its flag is set — encyclopedia
//! phrasing never leaks into a knowledge-only lesson, including via
//! poisoned store content (passages carrying the attribution marker are
//! dropped). When every store a mode requires is unreachable the
//! composition fails with `upstream_unavailable`; when only some are, the
//! lesson degrades to what was reachable and the usage flags report what
//! actually went in.

use std::sync::Arc;

use chrono::Utc;

use guru_domain::cancel::CancelToken;
use guru_domain::error::ErrorKind;
use guru_domain::lesson::{
    GenerationMethod, Lesson, LessonMetadata, LessonRequest, LessonSource, SourceStore,
};
use guru_upstream::{
    EncyclopediaFetcher, EncyclopediaSummary, KnowledgeRetriever, Passage, UpstreamError,
};

use crate::template;

/// The literal attribution marker that delimits encyclopedia content.
/// Must never appear in a lesson whose request excluded the encyclopedia.
pub const ENCYCLOPEDIA_MARKER: &str = "According to Encyclopedia";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Errors
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, thiserror::Error)]
pub enum ComposeError {
    #[error("no lesson source available: {message}")]
    UpstreamUnavailable { message: String },

    #[error("composition cancelled")]
    Cancelled,
}

impl ComposeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UpstreamUnavailable { .. } => ErrorKind::UpstreamUnavailable,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Composer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct LessonComposer {
    knowledge: Arc<dyn KnowledgeRetriever>,
    encyclopedia: Arc<dyn EncyclopediaFetcher>,
    created_by: String,
}

impl LessonComposer {
    pub fn new(
        knowledge: Arc<dyn KnowledgeRetriever>,
        encyclopedia: Arc<dyn EncyclopediaFetcher>,
    ) -> Self {
        Self {
            knowledge,
            encyclopedia,
            created_by: "gurukul-core".into(),
        }
    }

    /// Produce a lesson for the request. Content is always generated
    /// fresh; the composer neither reads nor writes lesson storage.
    pub async fn compose(
        &self,
        req: &LessonRequest,
        cancel: &CancelToken,
    ) -> Result<Lesson, ComposeError> {
        if cancel.is_cancelled() {
            return Err(ComposeError::Cancelled);
        }

        match (req.use_knowledge_store, req.include_encyclopedia) {
            (false, false) => Ok(self.template_lesson(req)),
            (true, false) => self.knowledge_only(req, cancel).await,
            (false, true) => self.encyclopedia_only(req, cancel).await,
            (true, true) => self.combined(req, cancel).await,
        }
    }

    // ── modes ────────────────────────────────────────────────────────

    async fn knowledge_only(
        &self,
        req: &LessonRequest,
        cancel: &CancelToken,
    ) -> Result<Lesson, ComposeError> {
        let passages = self.fetch_passages(req, cancel).await?;
        match passages {
            Some(passages) => Ok(self.build(req, Some(&passages), None, GenerationMethod::Enhanced)),
            None => Err(ComposeError::UpstreamUnavailable {
                message: "knowledge store produced no usable passages".into(),
            }),
        }
    }

    async fn encyclopedia_only(
        &self,
        req: &LessonRequest,
        cancel: &CancelToken,
    ) -> Result<Lesson, ComposeError> {
        let summary = self.fetch_summary(req, cancel).await?;
        match summary {
            Some(summary) => Ok(self.build(req, None, Some(&summary), GenerationMethod::Enhanced)),
            None => Err(ComposeError::UpstreamUnavailable {
                message: "encyclopedia lookup failed".into(),
            }),
        }
    }

    async fn combined(
        &self,
        req: &LessonRequest,
        cancel: &CancelToken,
    ) -> Result<Lesson, ComposeError> {
        let passages = self.fetch_passages(req, cancel).await?;
        if cancel.is_cancelled() {
            return Err(ComposeError::Cancelled);
        }
        let summary = self.fetch_summary(req, cancel).await?;

        let method = if passages.is_some() && summary.is_some() {
            GenerationMethod::Enhanced
        } else {
            GenerationMethod::Standard
        };

        match (&passages, &summary) {
            (None, None) => Err(ComposeError::UpstreamUnavailable {
                message: "neither knowledge store nor encyclopedia is reachable".into(),
            }),
            _ => Ok(self.build(req, passages.as_deref(), summary.as_ref(), method)),
        }
    }

    // ── fetch helpers ────────────────────────────────────────────────

    /// `Ok(None)` means the store failed or produced nothing usable;
    /// cancellation propagates as an error.
    async fn fetch_passages(
        &self,
        req: &LessonRequest,
        cancel: &CancelToken,
    ) -> Result<Option<Vec<Passage>>, ComposeError> {
        match self.knowledge.retrieve(&req.subject, &req.topic, cancel).await {
            Ok(passages) => {
                let clean = sanitize_passages(passages);
                Ok(if clean.is_empty() { None } else { Some(clean) })
            }
            Err(UpstreamError::Cancelled) => Err(ComposeError::Cancelled),
            Err(e) => {
                tracing::warn!(
                    subject = %req.subject,
                    topic = %req.topic,
                    error = %e,
                    "knowledge retrieval failed"
                );
                Ok(None)
            }
        }
    }

    async fn fetch_summary(
        &self,
        req: &LessonRequest,
        cancel: &CancelToken,
    ) -> Result<Option<EncyclopediaSummary>, ComposeError> {
        match self.encyclopedia.summary(&req.topic, cancel).await {
            Ok(summary) if !summary.summary.is_empty() => Ok(Some(summary)),
            Ok(_) => Ok(None),
            Err(UpstreamError::Cancelled) => Err(ComposeError::Cancelled),
            Err(e) => {
                tracing::warn!(topic = %req.topic, error = %e, "encyclopedia lookup failed");
                Ok(None)
            }
        }
    }

    // ── assembly ─────────────────────────────────────────────────────

    fn template_lesson(&self, req: &LessonRequest) -> Lesson {
        self.build(req, None, None, GenerationMethod::Template)
    }

    fn build(
        &self,
        req: &LessonRequest,
        passages: Option<&[Passage]>,
        summary: Option<&EncyclopediaSummary>,
        method: GenerationMethod,
    ) -> Lesson {
        let mut sections: Vec<String> = Vec::new();
        let mut sources: Vec<LessonSource> = Vec::new();

        if let Some(passages) = passages {
            let mut section = format!(
                "Key ideas about {} from the knowledge base:\n",
                req.topic
            );
            for passage in passages {
                section.push('\n');
                section.push_str(&passage.text);
                sources.push(LessonSource {
                    text: passage.text.clone(),
                    source_name: passage.source_name.clone(),
                    store: SourceStore::KnowledgeBase,
                    url: None,
                });
            }
            sections.push(section);
        }

        if let Some(summary) = summary {
            sections.push(format!(
                "{ENCYCLOPEDIA_MARKER} \"{}\": {}",
                summary.title, summary.summary
            ));
            sources.push(LessonSource {
                text: summary.summary.clone(),
                source_name: summary.title.clone(),
                store: SourceStore::Encyclopedia,
                url: summary.url.clone(),
            });
        }

        if sections.is_empty() {
            sections.push(template::body_for(&req.subject, &req.topic));
        }

        let knowledge_base_used = sources
            .iter()
            .any(|s| s.store == SourceStore::KnowledgeBase);
        let encyclopedia_used = sources
            .iter()
            .any(|s| s.store == SourceStore::Encyclopedia);

        Lesson {
            subject: req.subject.clone(),
            topic: req.topic.clone(),
            title: template::title_for(&req.subject, &req.topic),
            body: sections.join("\n\n---\n\n"),
            activity: template::activity_for(&req.topic),
            question: template::question_for(&req.topic),
            sources,
            knowledge_base_used,
            encyclopedia_used,
            metadata: LessonMetadata {
                created_at: Utc::now(),
                created_by: self.created_by.clone(),
                generation_method: method,
            },
        }
    }
}

/// Drop passages that carry the encyclopedia attribution marker — store
/// content must never smuggle encyclopedia phrasing into a lesson whose
/// request excluded it.
fn sanitize_passages(passages: Vec<Passage>) -> Vec<Passage> {
    passages
        .into_iter()
        .filter(|p| !p.text.contains(ENCYCLOPEDIA_MARKER))
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

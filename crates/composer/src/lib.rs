//! Lesson composer — fuses knowledge-store and encyclopedia content under
//! strict source-isolation rules.

pub mod compose;
pub mod template;

pub use compose::{ComposeError, LessonComposer, ENCYCLOPEDIA_MARKER};

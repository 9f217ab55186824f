//! Deterministic lesson scaffolding derived from subject and topic alone.
//!
//! The template path is the floor of the fallback chain: it never touches
//! an upstream, so two calls with the same inputs produce the same text.

pub fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

pub fn title_for(subject: &str, topic: &str) -> String {
    format!("{}: {}", capitalize(subject), capitalize(topic))
}

pub fn body_for(subject: &str, topic: &str) -> String {
    format!(
        "This lesson introduces {topic} as part of {subject}. \
         Start by recalling what you already know about {topic}, then work \
         through the key ideas one at a time, checking your understanding \
         as you go. By the end you should be able to explain {topic} in \
         your own words and connect it to the rest of {subject}."
    )
}

pub fn activity_for(topic: &str) -> String {
    format!(
        "Write a short explanation of {topic} for a classmate who has \
         never heard of it, then list two real-world situations where \
         {topic} shows up."
    )
}

pub fn question_for(topic: &str) -> String {
    format!("In your own words, what is {topic} and why does it matter?")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capitalize_basic() {
        assert_eq!(capitalize("science"), "Science");
        assert_eq!(capitalize(""), "");
        assert_eq!(capitalize("x"), "X");
    }

    #[test]
    fn title_composed_from_both_parts() {
        assert_eq!(title_for("science", "motion"), "Science: Motion");
    }

    #[test]
    fn template_is_deterministic() {
        assert_eq!(body_for("science", "motion"), body_for("science", "motion"));
        assert_eq!(activity_for("motion"), activity_for("motion"));
        assert_eq!(question_for("motion"), question_for("motion"));
    }

    #[test]
    fn body_mentions_subject_and_topic() {
        let body = body_for("finance", "compound interest");
        assert!(body.contains("finance"));
        assert!(body.contains("compound interest"));
    }
}

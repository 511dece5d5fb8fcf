use serde::{Deserialize, Serialize};

pub const DEFAULT_COLOR: &str = "#BDBDBD";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StatusCategory {
    Todo,
    Done,
    Backlog,
    InProgress,
    Canceled,
    InReview,
    Duplicate,
    Blocked,
}

impl StatusCategory {
    pub fn color(&self) -> &'static str {
        match self {
            StatusCategory::Todo => "#42A5F5",
            StatusCategory::Done => "#66BB6A",
            StatusCategory::Backlog => DEFAULT_COLOR,
            StatusCategory::InProgress | StatusCategory::Blocked => "#FFA726",
            StatusCategory::Canceled => "#EF5350",
            StatusCategory::InReview => "#AB47BC",
            StatusCategory::Duplicate => "#78909C",
        }
    }
}

/// Ordered keyword table. Earlier rows win when a label contains keywords
/// from several rows.
const KEYWORDS: &[(StatusCategory, &[&str])] = &[
    (
        StatusCategory::Todo,
        &["todo", "to do", "new", "open", "reopened", "unstarted"],
    ),
    (
        StatusCategory::Done,
        &["done", "completed", "complete", "closed", "resolved"],
    ),
    (StatusCategory::Backlog, &["backlog"]),
    (
        StatusCategory::InProgress,
        &[
            "in progress",
            "in-progress",
            "inprogress",
            "active",
            "started",
            "working",
        ],
    ),
    (
        StatusCategory::Canceled,
        &["canceled", "cancelled", "rejected", "abandoned"],
    ),
    (
        StatusCategory::InReview,
        &[
            "in review",
            "in-review",
            "inreview",
            "review",
            "testing",
            "pending review",
            "pending-review",
        ],
    ),
    (StatusCategory::Duplicate, &["duplicate", "duplicated"]),
    (
        StatusCategory::Blocked,
        &["blocked", "waiting", "on hold", "paused"],
    ),
];

/// Maps a free-form status label onto a category: case-insensitive exact
/// match first, then a whole-word match, both in table order. Keywords never
/// match inside a longer word, so "Incomplete" is not "complete".
pub fn categorize(status: &str) -> Option<StatusCategory> {
    let normalized = status.trim().to_lowercase();
    if normalized.is_empty() {
        return None;
    }

    let exact = KEYWORDS.iter().find_map(|(category, words)| {
        words
            .iter()
            .any(|word| *word == normalized)
            .then_some(*category)
    });
    if exact.is_some() {
        return exact;
    }

    let label = words(&normalized);
    KEYWORDS.iter().find_map(|(category, keywords)| {
        keywords
            .iter()
            .any(|keyword| contains_phrase(&label, &words(keyword)))
            .then_some(*category)
    })
}

fn words(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .collect()
}

fn contains_phrase(label: &[&str], phrase: &[&str]) -> bool {
    !phrase.is_empty() && label.windows(phrase.len()).any(|window| window == phrase)
}

pub fn status_color(status: &str) -> &'static str {
    categorize(status)
        .map(|category| category.color())
        .unwrap_or(DEFAULT_COLOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_matches_ignore_case() {
        assert_eq!(categorize("Done"), Some(StatusCategory::Done));
        assert_eq!(categorize("  IN PROGRESS "), Some(StatusCategory::InProgress));
        assert_eq!(categorize("Backlog"), Some(StatusCategory::Backlog));
    }

    #[test]
    fn multi_word_labels_match_exactly() {
        assert_eq!(categorize("duplicate"), Some(StatusCategory::Duplicate));
        assert_eq!(categorize("In Review"), Some(StatusCategory::InReview));
    }

    #[test]
    fn word_fallback_follows_table_order() {
        assert_eq!(categorize("Ready for review"), Some(StatusCategory::InReview));
        assert_eq!(categorize("Reopened"), Some(StatusCategory::Todo));
        assert_eq!(categorize("Blocked by vendor"), Some(StatusCategory::Blocked));
    }

    #[test]
    fn keywords_do_not_match_inside_longer_words() {
        assert_eq!(categorize("Incomplete"), None);
        assert_eq!(categorize("Renewal"), None);
        assert_eq!(categorize("Work in-progress"), Some(StatusCategory::InProgress));
        assert_eq!(categorize("Put on hold"), Some(StatusCategory::Blocked));
        assert_eq!(categorize("Closed (won't fix)"), Some(StatusCategory::Done));
    }

    #[test]
    fn unknown_labels_use_default_color() {
        assert_eq!(categorize("Triage"), None);
        assert_eq!(status_color("Triage"), DEFAULT_COLOR);
        assert_eq!(status_color(""), DEFAULT_COLOR);
        assert_eq!(status_color("Canceled"), "#EF5350");
    }
}

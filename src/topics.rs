//! Static topic keyword table.
//!
//! Maps canonical survey topics to the keywords that signal them in a query.
//! Keyword matching here is deliberately cheap and deterministic; anything
//! this table cannot resolve with confidence goes to the external semantic
//! matcher instead.

/// Keywords signalling one canonical topic.
pub struct TopicKeywords {
    pub topic_id: &'static str,
    pub keywords: &'static [&'static str],
}

/// Canonical topics of the survey, with their trigger keywords. Multi-word
/// keywords score higher than single words when computing match confidence.
pub const TOPIC_KEYWORDS: &[TopicKeywords] = &[
    TopicKeywords {
        topic_id: "work_life_balance",
        keywords: &["work life balance", "work-life", "balance", "overtime", "burnout"],
    },
    TopicKeywords {
        topic_id: "job_satisfaction",
        keywords: &["job satisfaction", "satisfied", "satisfaction", "happy at work"],
    },
    TopicKeywords {
        topic_id: "compensation",
        keywords: &["pay", "salary", "compensation", "wage", "paid fairly"],
    },
    TopicKeywords {
        topic_id: "career_growth",
        keywords: &["career growth", "promotion", "career", "development", "progression"],
    },
    TopicKeywords {
        topic_id: "remote_work",
        keywords: &["remote work", "remote", "hybrid", "work from home", "office days"],
    },
    TopicKeywords {
        topic_id: "wellbeing",
        keywords: &["wellbeing", "well-being", "stress", "mental health"],
    },
    TopicKeywords {
        topic_id: "retention",
        keywords: &["retention", "attrition", "turnover", "quit", "leave their job"],
    },
    TopicKeywords {
        topic_id: "leadership_trust",
        keywords: &["leadership", "trust in leadership", "manager", "management"],
    },
    TopicKeywords {
        topic_id: "inclusion",
        keywords: &["inclusion", "diversity", "belonging", "discrimination"],
    },
    TopicKeywords {
        topic_id: "ai_adoption",
        keywords: &["ai", "artificial intelligence", "automation", "ai tools"],
    },
];

/// Confidence score of `topic` against a normalized (lowercased,
/// punctuation-stripped) query. Multi-word keyword hits are near-certain;
/// single-word hits are suggestive and need reinforcement to clear the usual
/// identification threshold.
pub fn score(topic: &TopicKeywords, normalized_query: &str) -> f64 {
    let padded = format!(" {} ", normalized_query);
    let mut total = 0.0;
    for keyword in topic.keywords {
        if padded.contains(&format!(" {} ", keyword)) {
            total += if keyword.contains(' ') { 1.0 } else { 0.4 };
        }
    }
    total.min(1.0)
}

/// Topic ids with at least one keyword hit, in table order.
pub fn matched_topics(normalized_query: &str) -> Vec<String> {
    TOPIC_KEYWORDS
        .iter()
        .filter(|t| score(t, normalized_query) > 0.0)
        .map(|t| t.topic_id.to_string())
        .collect()
}

/// Topic ids scoring at or above `threshold`, best first.
pub fn confident_topics(normalized_query: &str, threshold: f64) -> Vec<String> {
    let mut scored: Vec<(f64, &str)> = TOPIC_KEYWORDS
        .iter()
        .map(|t| (score(t, normalized_query), t.topic_id))
        .filter(|(s, _)| *s >= threshold)
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().map(|(_, id)| id.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_multiword_keyword_scores_full() {
        let topic = &TOPIC_KEYWORDS[0];
        assert!((score(topic, "how is work life balance these days") - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_word_scores_partial() {
        let topic = TOPIC_KEYWORDS
            .iter()
            .find(|t| t.topic_id == "compensation")
            .unwrap();
        let s = score(topic, "what about pay");
        assert!(s > 0.0 && s < 0.5);
    }

    #[test]
    fn test_two_single_words_clear_default_threshold() {
        let topic = TOPIC_KEYWORDS
            .iter()
            .find(|t| t.topic_id == "compensation")
            .unwrap();
        assert!(score(topic, "is the salary and wage fair") >= 0.5);
    }

    #[test]
    fn test_no_substring_false_positives() {
        // "ai" must not match inside "maintain"
        let topic = TOPIC_KEYWORDS
            .iter()
            .find(|t| t.topic_id == "ai_adoption")
            .unwrap();
        assert_eq!(score(topic, "how do teams maintain quality"), 0.0);
    }

    #[test]
    fn test_confident_topics_ordering() {
        let topics = confident_topics("work life balance and burnout", 0.5);
        assert_eq!(topics.first().map(String::as_str), Some("work_life_balance"));
    }
}

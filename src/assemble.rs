//! Deterministic result assembly.
//!
//! Renders the filtered statistics and compatibility caveats into the text
//! block handed to the downstream text-generation collaborator. Same inputs,
//! same block, byte for byte: records are grouped by file, then question,
//! then response, with stable ordering throughout.

use std::collections::BTreeMap;

use crate::models::{CompatibilityMetadata, StatRecord};

/// Build the statistics block plus caveat lines.
pub fn assemble_block(
    stats: &[StatRecord],
    compat: &CompatibilityMetadata,
    missing_segments: &[String],
    extra_caveats: &[String],
) -> String {
    let mut out = String::new();

    if stats.is_empty() {
        out.push_str("No matching survey data was found for this question.\n");
    } else {
        // file id → question → response → lines
        let mut by_file: BTreeMap<&str, BTreeMap<&str, BTreeMap<&str, Vec<String>>>> =
            BTreeMap::new();
        for stat in stats {
            by_file
                .entry(&stat.file_id)
                .or_default()
                .entry(&stat.question)
                .or_default()
                .entry(&stat.response)
                .or_default()
                .push(format!(
                    "{}:{} = {:.1}%",
                    stat.category, stat.value, stat.percentage
                ));
        }

        for (file_id, questions) in &by_file {
            out.push_str(&format!("[{}]\n", file_id));
            for (question, responses) in questions {
                out.push_str(&format!("Q: {}\n", question));
                for (response, mut lines) in responses.clone() {
                    lines.sort();
                    out.push_str(&format!("  {} — {}\n", response, lines.join(", ")));
                }
            }
            out.push('\n');
        }
    }

    let caveats = collect_caveats(compat, missing_segments, extra_caveats);
    if !caveats.is_empty() {
        out.push_str("Caveats:\n");
        for caveat in caveats {
            out.push_str(&format!("- {}\n", caveat));
        }
    }

    out
}

fn collect_caveats(
    compat: &CompatibilityMetadata,
    missing_segments: &[String],
    extra: &[String],
) -> Vec<String> {
    let mut caveats = Vec::new();

    if !missing_segments.is_empty() {
        caveats.push(format!(
            "No data is available for: {}.",
            missing_segments.join(", ")
        ));
    }

    if let Some(error) = &compat.error {
        caveats.push(format!(
            "Comparability could not be verified ({}).",
            error.message
        ));
    }

    for (topic_id, topic) in &compat.topic_compatibility {
        if !topic.comparable {
            if let Some(message) = &topic.user_message {
                caveats.push(format!("{}: {}", topic_id, message));
            }
        }
    }

    for (segment_type, segment) in &compat.segment_compatibility {
        if let Some(message) = &segment.user_message {
            caveats.push(format!("{}: {}", segment_type, message));
        }
    }

    for caveat in extra {
        caveats.push(caveat.clone());
    }

    // The comparison filter and the topic assessment can surface the same
    // message; keep the first occurrence.
    let mut seen = std::collections::BTreeSet::new();
    caveats.retain(|c| seen.insert(c.clone()));
    caveats
}

//! Segment filtering.
//!
//! Turns loaded data files into flat statistic records for exactly the
//! segments a query asked about, translating source category names to the
//! canonical vocabulary on the way. The `overall` baseline rides along
//! unconditionally so every answer has an anchor figure. Requested segments
//! with no data anywhere are reported, never raised.

use std::collections::{BTreeMap, BTreeSet};

use crate::models::{DataFile, FilterResult, MetricValue, StatRecord};
use crate::segments;

/// Filter files down to the requested canonical segments.
///
/// Properties relied on elsewhere:
/// - `missing_segments == requested − found_segments`
/// - `found_segments ⊆ requested` (the baseline never counts as found)
pub fn filter_by_segments(files: &[DataFile], requested: &[String]) -> FilterResult {
    let requested_set: BTreeSet<String> = requested.iter().cloned().collect();

    let mut stats = Vec::new();
    let mut found: BTreeSet<String> = BTreeSet::new();
    let mut filtered_data = Vec::new();

    for file in files {
        let mut trimmed = file.clone();
        trimmed.retain_segments(&requested_set);
        if !trimmed.responses.is_empty() {
            filtered_data.push(trimmed);
        }

        for row in &file.responses {
            for (category, values) in &row.data {
                let Some(canonical) = segments::canonical_category(category) else {
                    continue;
                };

                let is_overall = canonical == segments::OVERALL;
                if !is_overall && !requested_set.contains(canonical) {
                    continue;
                }

                emit_rows(&mut stats, file, &row.response, canonical, values);
                if !is_overall {
                    found.insert(canonical.to_string());
                }
            }
        }
    }

    let missing: Vec<String> = requested_set.difference(&found).cloned().collect();

    FilterResult {
        filtered_data,
        stats,
        found_segments: found.into_iter().collect(),
        missing_segments: missing,
    }
}

/// Baseline-only variant for general queries: emits just the `overall`
/// category, keeping the prompt handed to text generation small.
pub fn base_data(files: &[DataFile]) -> FilterResult {
    let mut stats = Vec::new();
    let mut filtered_data = Vec::new();

    for file in files {
        let mut trimmed = file.clone();
        trimmed.retain_segments(&BTreeSet::new());
        if !trimmed.responses.is_empty() {
            filtered_data.push(trimmed);
        }

        for row in &file.responses {
            for (category, values) in &row.data {
                if segments::canonical_category(category) == Some(segments::OVERALL) {
                    emit_rows(&mut stats, file, &row.response, segments::OVERALL, values);
                }
            }
        }
    }

    FilterResult {
        filtered_data,
        stats,
        found_segments: Vec::new(),
        missing_segments: Vec::new(),
    }
}

fn emit_rows(
    stats: &mut Vec<StatRecord>,
    file: &DataFile,
    response: &str,
    canonical: &str,
    values: &BTreeMap<String, MetricValue>,
) {
    for (segment_value, metric) in values {
        let value = if canonical == "org_size" {
            segments::canonical_org_bucket(segment_value).to_string()
        } else {
            segment_value.clone()
        };
        stats.push(StatRecord {
            file_id: file.id.clone(),
            question: file.question.clone(),
            response: response.to_string(),
            category: canonical.to_string(),
            value,
            percentage: metric.as_percentage(),
        });
    }
}

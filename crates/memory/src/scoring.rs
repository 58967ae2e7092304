//! Ranking formulas for similarity retrieval.

use chrono::{DateTime, Utc};
use colony_core::{MemoryRecord, WorkerId};
use std::collections::HashSet;

const SECS_PER_DAY: f64 = 86_400.0;

/// `1 / (1 + age_days)`: 1.0 for a fresh record, 0.5 after one day.
pub fn recency(record: &MemoryRecord, now: DateTime<Utc>) -> f32 {
    (1.0 / (1.0 + record.age_secs(now) / SECS_PER_DAY)) as f32
}

/// Fraction of the query's tags that the record carries. 0 without query tags.
pub fn tag_overlap(query_tags: &[String], record: &MemoryRecord) -> f32 {
    let query: HashSet<&str> = query_tags.iter().map(String::as_str).collect();
    if query.is_empty() {
        return 0.0;
    }
    let shared = record
        .tags
        .iter()
        .map(String::as_str)
        .collect::<HashSet<_>>()
        .intersection(&query)
        .count();
    shared as f32 / query.len() as f32
}

/// Relevance used by `find_similar`.
pub fn relevance(record: &MemoryRecord, query_tags: &[String], now: DateTime<Utc>) -> f32 {
    let access = (record.access_count as f32 / 10.0).min(1.0);
    0.3 * recency(record, now)
        + 0.2 * access
        + 0.3 * record.confidence
        + 0.2 * tag_overlap(query_tags, record)
}

/// Combined score used by `dynamic_find_similar`.
///
/// The owner bonus is a flat 0.1 weighted by 0.1, so it only breaks near-ties.
pub fn combined(
    record: &MemoryRecord,
    cosine: f32,
    query_tags: &[String],
    owner: Option<&WorkerId>,
    now: DateTime<Utc>,
) -> f32 {
    let bonus = match owner {
        Some(owner) if &record.owner == owner => 0.1,
        _ => 0.0,
    };
    0.6 * cosine + 0.2 * tag_overlap(query_tags, record) + 0.1 * recency(record, now) + 0.1 * bonus
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use colony_core::MemoryKind;
    use serde_json::json;

    fn record(tags: &[&str]) -> MemoryRecord {
        MemoryRecord::from_content(
            MemoryKind::Experience,
            WorkerId::from("w1"),
            json!({ "tags": tags }),
        )
    }

    fn tags(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn recency_halves_after_a_day() {
        let r = record(&[]);
        let now = r.created_at + Duration::days(1);
        assert!((recency(&r, now) - 0.5).abs() < 1e-4);
        assert!((recency(&r, r.created_at) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn overlap_is_fraction_of_query_tags() {
        let r = record(&["a", "b"]);
        assert_eq!(tag_overlap(&tags(&["a", "c"]), &r), 0.5);
        assert_eq!(tag_overlap(&tags(&["a", "b"]), &r), 1.0);
        assert_eq!(tag_overlap(&[], &r), 0.0);
        assert_eq!(tag_overlap(&tags(&["a", "a"]), &r), 1.0);
    }

    #[test]
    fn relevance_of_fresh_confident_record() {
        let r = record(&["a"]);
        // 0.3 * 1.0 + 0.2 * 0 + 0.3 * 1.0 + 0.2 * 1.0
        let score = relevance(&r, &tags(&["a"]), r.created_at);
        assert!((score - 0.8).abs() < 1e-5);
    }

    #[test]
    fn combined_score_grows_with_overlap() {
        let now = Utc::now();
        let none = record(&[]);
        let half = record(&["x"]);
        let full = record(&["x", "y"]);
        let q = tags(&["x", "y"]);
        let s0 = combined(&none, 0.5, &q, None, now);
        let s1 = combined(&half, 0.5, &q, None, now);
        let s2 = combined(&full, 0.5, &q, None, now);
        assert!(s0 < s1 && s1 < s2);
    }

    #[test]
    fn owner_bonus_applies_only_to_matching_owner() {
        let r = record(&[]);
        let now = r.created_at;
        let mine = combined(&r, 0.0, &[], Some(&WorkerId::from("w1")), now);
        let theirs = combined(&r, 0.0, &[], Some(&WorkerId::from("w2")), now);
        assert!((mine - theirs - 0.01).abs() < 1e-6);
    }
}

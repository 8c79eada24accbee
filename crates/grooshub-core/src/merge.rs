//! Confidence-scored merging of learned facts.
//!
//! Agreeing observations reinforce each other with a noisy-OR:
//! `1 - (1 - a)(1 - b)`. A contradicting observation replaces the old value
//! only when it is at least as confident; otherwise the old value loses
//! confidence by [`CONTRADICTION_DECAY`].

use chrono::Utc;
use serde::Serialize;

use crate::model::{clamp_confidence, MemoryItem, SoftContextEntry};

/// Multiplier applied to an item's confidence when a weaker observation contradicts it.
pub const CONTRADICTION_DECAY: f32 = 0.8;

/// Counts of what a merge did. Used for audit summaries and logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub added: usize,
    pub reinforced: usize,
    pub replaced: usize,
    pub contradicted: usize,
    pub removed: usize,
}

impl MergeReport {
    pub fn changed(&self) -> usize {
        self.added + self.reinforced + self.replaced + self.contradicted + self.removed
    }

    pub fn absorb(&mut self, other: MergeReport) {
        self.added += other.added;
        self.reinforced += other.reinforced;
        self.replaced += other.replaced;
        self.contradicted += other.contradicted;
        self.removed += other.removed;
    }
}

impl std::fmt::Display for MergeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} added, {} reinforced, {} replaced, {} contradicted, {} removed",
            self.added, self.reinforced, self.replaced, self.contradicted, self.removed
        )
    }
}

/// Lowercase, trim, and collapse internal whitespace.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Noisy-OR combination of two independent confirmations.
pub fn reinforce(a: f32, b: f32) -> f32 {
    let a = clamp_confidence(a);
    let b = clamp_confidence(b);
    clamp_confidence(1.0 - (1.0 - a) * (1.0 - b))
}

/// Merge `incoming` items into `existing`, keyed by (kind, normalized key).
pub fn merge_items(existing: &mut Vec<MemoryItem>, incoming: Vec<MemoryItem>) -> MergeReport {
    let mut report = MergeReport::default();
    let now = Utc::now();

    for item in incoming {
        let key = normalize_text(&item.key);
        if key.is_empty() || item.value.trim().is_empty() {
            continue;
        }
        let confidence = clamp_confidence(item.confidence);

        let slot = existing
            .iter_mut()
            .find(|e| e.kind == item.kind && normalize_text(&e.key) == key);

        match slot {
            Some(current) if normalize_text(&current.value) == normalize_text(&item.value) => {
                current.confidence = reinforce(current.confidence, confidence);
                current.updated_at = now;
                report.reinforced += 1;
            }
            Some(current) if confidence >= current.confidence => {
                current.value = item.value.trim().to_string();
                current.confidence = confidence;
                current.updated_at = now;
                report.replaced += 1;
            }
            Some(current) => {
                current.confidence = clamp_confidence(current.confidence * CONTRADICTION_DECAY);
                current.updated_at = now;
                report.contradicted += 1;
            }
            None => {
                existing.push(MemoryItem {
                    kind: item.kind,
                    key: item.key.trim().to_string(),
                    value: item.value.trim().to_string(),
                    confidence,
                    updated_at: now,
                });
                report.added += 1;
            }
        }
    }

    report
}

/// Remove items whose key matches any of `keys` (any kind). Returns the count removed.
pub fn remove_keys(existing: &mut Vec<MemoryItem>, keys: &[String]) -> usize {
    let keys: Vec<String> = keys.iter().map(|k| normalize_text(k)).collect();
    let before = existing.len();
    existing.retain(|item| !keys.contains(&normalize_text(&item.key)));
    before - existing.len()
}

/// Drop items below `min_confidence`. Returns the count removed.
pub fn prune(existing: &mut Vec<MemoryItem>, min_confidence: f32) -> usize {
    let before = existing.len();
    existing.retain(|item| item.confidence >= min_confidence);
    before - existing.len()
}

/// Merge soft-context entries, keyed by (category, normalized text).
pub fn merge_soft_context(
    existing: &mut Vec<SoftContextEntry>,
    incoming: Vec<SoftContextEntry>,
) -> MergeReport {
    let mut report = MergeReport::default();
    let now = Utc::now();

    for entry in incoming {
        let text = normalize_text(&entry.text);
        if text.is_empty() {
            continue;
        }
        match existing
            .iter_mut()
            .find(|e| e.category == entry.category && normalize_text(&e.text) == text)
        {
            Some(current) => {
                current.confidence = reinforce(current.confidence, entry.confidence);
                current.updated_at = now;
                if entry.source_chat_id.is_some() {
                    current.source_chat_id = entry.source_chat_id;
                }
                report.reinforced += 1;
            }
            None => {
                let mut entry = entry;
                entry.text = entry.text.trim().to_string();
                entry.confidence = clamp_confidence(entry.confidence);
                existing.push(entry);
                report.added += 1;
            }
        }
    }

    report
}

/// Keep at most `max` entries, dropping the lowest confidence first and the
/// oldest among equals. Surviving entries keep their original order.
pub fn cap_soft_context(existing: &mut Vec<SoftContextEntry>, max: usize) -> usize {
    if existing.len() <= max {
        return 0;
    }
    let mut ranked: Vec<(usize, f32, chrono::DateTime<Utc>)> = existing
        .iter()
        .enumerate()
        .map(|(i, e)| (i, e.confidence, e.updated_at))
        .collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.2.cmp(&a.2))
    });
    let mut keep: Vec<usize> = ranked.into_iter().take(max).map(|(i, _, _)| i).collect();
    keep.sort_unstable();

    let removed = existing.len() - keep.len();
    let mut index = 0;
    existing.retain(|_| {
        let kept = keep.binary_search(&index).is_ok();
        index += 1;
        kept
    });
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MemoryItemKind, SoftContextCategory};

    fn pref(key: &str, value: &str, confidence: f32) -> MemoryItem {
        MemoryItem::new(
            MemoryItemKind::Preference,
            key.to_string(),
            value.to_string(),
            confidence,
        )
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Prefers   DUTCH\nreplies "), "prefers dutch replies");
    }

    #[test]
    fn test_reinforce() {
        assert!((reinforce(0.5, 0.5) - 0.75).abs() < 1e-6);
        assert!((reinforce(0.0, 0.6) - 0.6).abs() < 1e-6);
        assert_eq!(reinforce(1.0, 0.2), 1.0);
        assert!(reinforce(0.9, 0.9) <= 1.0);
    }

    #[test]
    fn test_merge_adds_new_keys() {
        let mut items = vec![];
        let report = merge_items(&mut items, vec![pref("language", " Dutch ", 0.7)]);
        assert_eq!(report.added, 1);
        assert_eq!(items[0].value, "Dutch");
    }

    #[test]
    fn test_merge_reinforces_same_value() {
        let mut items = vec![pref("Language", "Dutch", 0.5)];
        let report = merge_items(&mut items, vec![pref("language", "dutch", 0.5)]);
        assert_eq!(report.reinforced, 1);
        assert_eq!(items.len(), 1);
        assert!((items[0].confidence - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_merge_replaces_with_stronger_contradiction() {
        let mut items = vec![pref("units", "imperial", 0.4)];
        let report = merge_items(&mut items, vec![pref("units", "metric", 0.8)]);
        assert_eq!(report.replaced, 1);
        assert_eq!(items[0].value, "metric");
        assert!((items[0].confidence - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_merge_decays_on_weaker_contradiction() {
        let mut items = vec![pref("units", "metric", 0.9)];
        let report = merge_items(&mut items, vec![pref("units", "imperial", 0.3)]);
        assert_eq!(report.contradicted, 1);
        assert_eq!(items[0].value, "metric");
        assert!((items[0].confidence - 0.72).abs() < 1e-6);
    }

    #[test]
    fn test_merge_keys_are_per_kind() {
        let mut items = vec![pref("focus", "LCA", 0.6)];
        let pattern = MemoryItem::new(
            MemoryItemKind::Pattern,
            "focus".into(),
            "asks follow-up questions".into(),
            0.6,
        );
        let report = merge_items(&mut items, vec![pattern]);
        assert_eq!(report.added, 1);
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_merge_skips_blank_items() {
        let mut items = vec![];
        let report = merge_items(&mut items, vec![pref(" ", "x", 0.9), pref("k", "  ", 0.9)]);
        assert_eq!(report.changed(), 0);
        assert!(items.is_empty());
    }

    #[test]
    fn test_remove_keys_and_prune() {
        let mut items = vec![
            pref("employer", "Gemeente Utrecht", 0.9),
            pref("language", "Dutch", 0.2),
            pref("units", "metric", 0.6),
        ];
        assert_eq!(remove_keys(&mut items, &["Employer".to_string()]), 1);
        assert_eq!(prune(&mut items, 0.3), 1);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].key, "units");
    }

    fn soft(category: SoftContextCategory, text: &str, confidence: f32) -> SoftContextEntry {
        SoftContextEntry::new(category, text.to_string(), confidence)
    }

    #[test]
    fn test_merge_soft_context_dedups_within_category() {
        let mut entries = vec![soft(SoftContextCategory::Goal, "Reach MPG below 0.8", 0.5)];
        let report = merge_soft_context(
            &mut entries,
            vec![
                soft(SoftContextCategory::Goal, "reach mpg  below 0.8", 0.5),
                soft(SoftContextCategory::Constraint, "Reach MPG below 0.8", 0.5),
            ],
        );
        assert_eq!(report.reinforced, 1);
        assert_eq!(report.added, 1);
        assert_eq!(entries.len(), 2);
        assert!((entries[0].confidence - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_cap_soft_context_drops_weakest_and_keeps_order() {
        let mut entries = vec![
            soft(SoftContextCategory::Note, "a", 0.9),
            soft(SoftContextCategory::Note, "b", 0.1),
            soft(SoftContextCategory::Note, "c", 0.5),
            soft(SoftContextCategory::Note, "d", 0.7),
        ];
        let removed = cap_soft_context(&mut entries, 3);
        assert_eq!(removed, 1);
        let texts: Vec<&str> = entries.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "c", "d"]);
    }

    #[test]
    fn test_cap_soft_context_under_limit_is_noop() {
        let mut entries = vec![soft(SoftContextCategory::Note, "a", 0.9)];
        assert_eq!(cap_soft_context(&mut entries, 5), 0);
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_report_display() {
        let report = MergeReport {
            added: 2,
            reinforced: 1,
            ..Default::default()
        };
        assert_eq!(report.changed(), 3);
        assert_eq!(
            report.to_string(),
            "2 added, 1 reinforced, 0 replaced, 0 contradicted, 0 removed"
        );
    }
}

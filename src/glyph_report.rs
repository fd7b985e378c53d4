use std::collections::{BTreeMap, BTreeSet};

/// Characters a render could not draw with the font it had, keyed by codepoint.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlyphCoverageReport {
    missing: BTreeMap<u32, MissingGlyph>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MissingGlyph {
    pub codepoint: u32,
    pub ch: char,
    pub font: String,
    pub fields: BTreeSet<String>,
    pub count: usize,
}

impl GlyphCoverageReport {
    pub fn record_missing(&mut self, ch: char, font: &str, field: &str) {
        let codepoint = ch as u32;
        let entry = self.missing.entry(codepoint).or_insert_with(|| MissingGlyph {
            codepoint,
            ch,
            font: font.to_string(),
            fields: BTreeSet::new(),
            count: 0,
        });
        entry.fields.insert(field.to_string());
        entry.count = entry.count.saturating_add(1);
    }

    pub fn merge(&mut self, other: GlyphCoverageReport) {
        for (codepoint, missing) in other.missing {
            let entry = self.missing.entry(codepoint).or_insert_with(|| MissingGlyph {
                codepoint,
                ch: missing.ch,
                font: missing.font.clone(),
                fields: BTreeSet::new(),
                count: 0,
            });
            entry.fields.extend(missing.fields);
            entry.count = entry.count.saturating_add(missing.count);
        }
    }

    pub fn missing(&self) -> Vec<MissingGlyph> {
        self.missing.values().cloned().collect()
    }

    pub fn affected_fields(&self) -> BTreeSet<String> {
        self.missing
            .values()
            .flat_map(|m| m.fields.iter().cloned())
            .collect()
    }

    pub fn total_missing(&self) -> usize {
        self.missing.values().map(|m| m.count).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.missing.is_empty()
    }

    /// Short human-readable form for log lines, e.g. `U+D64D 홍 x2`.
    pub fn summary(&self, limit: usize) -> String {
        let mut parts: Vec<String> = self
            .missing
            .values()
            .take(limit)
            .map(|m| format!("U+{:04X} {} x{}", m.codepoint, m.ch, m.count))
            .collect();
        if self.missing.len() > limit {
            parts.push(format!("(+{} more)", self.missing.len() - limit));
        }
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_fields_accumulate_per_codepoint() {
        let mut report = GlyphCoverageReport::default();
        report.record_missing('홍', "Helvetica", "worker_name");
        report.record_missing('홍', "Helvetica", "manager_name");
        report.record_missing('정', "Helvetica", "exam_result");
        assert_eq!(report.total_missing(), 3);
        let first = &report.missing()[0];
        assert_eq!(first.ch, '정');
        assert_eq!(report.affected_fields().len(), 3);
        assert_eq!(report.summary(1), "U+C815 정 x1, (+1 more)");
    }

    #[test]
    fn merge_sums_counts() {
        let mut a = GlyphCoverageReport::default();
        a.record_missing('길', "Helvetica", "worker_name");
        let mut b = GlyphCoverageReport::default();
        b.record_missing('길', "Helvetica", "company_name");
        a.merge(b);
        let missing = a.missing();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].count, 2);
        assert_eq!(missing[0].fields.len(), 2);
    }
}

//! Aligns caller data keys with discovered field names.
//!
//! Per field, first hit wins: exact key, case-insensitive key, then the
//! bilingual synonym table. A synonym concept is chosen from the field's
//! name and label alone; the caller key must then be one of that concept's
//! aliases (or the concept term itself).

use crate::config::SynonymMatch;
use crate::discovery::DiscoveredField;
use formstamp_catalog::SynonymDef;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Exact,
    CaseInsensitive,
    Synonym,
    Unmatched,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldQuery {
    pub name: String,
    pub label: Option<String>,
}

impl FieldQuery {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            label: None,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

impl From<&DiscoveredField> for FieldQuery {
    fn from(field: &DiscoveredField) -> Self {
        Self {
            name: field.name.clone(),
            label: field.label.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappingResult {
    pub field: String,
    pub tier: MatchTier,
    /// Caller key the value came from.
    pub source_key: Option<String>,
    pub value: Option<Value>,
    /// Synonym concept that decided a synonym-tier match (or failed to).
    pub concept: Option<&'static str>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MappingReport {
    pub results: IndexMap<String, MappingResult>,
}

impl MappingReport {
    /// Matched fields and their values, in field order.
    pub fn values(&self) -> IndexMap<String, Value> {
        self.results
            .iter()
            .filter_map(|(name, r)| r.value.clone().map(|v| (name.clone(), v)))
            .collect()
    }

    pub fn unmatched(&self) -> Vec<&str> {
        self.results
            .values()
            .filter(|r| r.tier == MatchTier::Unmatched)
            .map(|r| r.field.as_str())
            .collect()
    }

    pub fn matched_count(&self) -> usize {
        self.results.len() - self.unmatched().len()
    }

    pub fn tier(&self, field: &str) -> MatchTier {
        self.results
            .get(field)
            .map(|r| r.tier)
            .unwrap_or(MatchTier::Unmatched)
    }
}

pub struct FieldMappingResolver {
    synonyms: &'static [SynonymDef],
    mode: SynonymMatch,
}

impl Default for FieldMappingResolver {
    fn default() -> Self {
        Self::new(SynonymMatch::default())
    }
}

impl FieldMappingResolver {
    pub fn new(mode: SynonymMatch) -> Self {
        Self::with_table(formstamp_catalog::synonym_defs_v1(), mode)
    }

    pub fn with_table(synonyms: &'static [SynonymDef], mode: SynonymMatch) -> Self {
        Self { synonyms, mode }
    }

    pub fn resolve<'q, I>(&self, fields: I, data: &IndexMap<String, Value>) -> MappingReport
    where
        I: IntoIterator<Item = &'q FieldQuery>,
    {
        let mut report = MappingReport::default();
        for query in fields {
            let result = self.resolve_one(query, data);
            log::debug!(
                "mapping {} -> {:?} via {:?}",
                query.name,
                result.source_key,
                result.tier
            );
            report.results.insert(query.name.clone(), result);
        }
        report
    }

    pub fn resolve_discovered<'f, I>(&self, fields: I, data: &IndexMap<String, Value>) -> MappingReport
    where
        I: IntoIterator<Item = &'f DiscoveredField>,
    {
        let queries: Vec<FieldQuery> = fields.into_iter().map(FieldQuery::from).collect();
        self.resolve(&queries, data)
    }

    fn resolve_one(&self, query: &FieldQuery, data: &IndexMap<String, Value>) -> MappingResult {
        let usable = || data.iter().filter(|(_, v)| !v.is_null());
        let hit = |tier: MatchTier, key: &String, value: &Value, concept: Option<&'static str>| MappingResult {
            field: query.name.clone(),
            tier,
            source_key: Some(key.clone()),
            value: Some(value.clone()),
            concept,
        };

        if let Some((key, value)) = data.get_key_value(&query.name).filter(|(_, v)| !v.is_null()) {
            return hit(MatchTier::Exact, key, value, None);
        }
        let lowered = query.name.to_lowercase();
        if let Some((key, value)) = usable().find(|(k, _)| k.to_lowercase() == lowered) {
            return hit(MatchTier::CaseInsensitive, key, value, None);
        }
        let concept = self.concept_for(&query.name, query.label.as_deref());
        if let Some(def) = concept {
            if let Some((key, value)) = usable().find(|(k, _)| is_alias_of(def, k)) {
                return hit(MatchTier::Synonym, key, value, Some(def.concept));
            }
        }
        MappingResult {
            field: query.name.clone(),
            tier: MatchTier::Unmatched,
            source_key: None,
            value: None,
            concept: concept.map(|d| d.concept),
        }
    }

    /// Concept a field name or label refers to. Substring mode takes the
    /// first concept in table order whose canonical Korean term or one of
    /// whose English aliases occurs anywhere; Korean aliases only identify
    /// caller keys. Token mode requires whole-token alias hits and prefers
    /// the longest.
    pub fn concept_for(&self, name: &str, label: Option<&str>) -> Option<&'static SynonymDef> {
        let mut haystacks = vec![name.to_lowercase()];
        if let Some(label) = label {
            haystacks.push(label.to_lowercase());
        }
        match self.mode {
            SynonymMatch::Substring => self.synonyms.iter().find(|def| {
                containment_terms(def).any(|term| haystacks.iter().any(|h| h.contains(&term)))
            }),
            SynonymMatch::Token => {
                let tokenized: Vec<Vec<&str>> = haystacks.iter().map(|h| tokens(h)).collect();
                let mut best: Option<(&'static SynonymDef, usize)> = None;
                for def in self.synonyms {
                    let longest = terms(def)
                        .filter(|term| {
                            if term.is_ascii() {
                                let needle = tokens(term);
                                tokenized.iter().any(|hay| contains_run(hay, &needle))
                            } else {
                                haystacks.iter().any(|h| h.contains(term.as_str()))
                            }
                        })
                        .map(|term| term.chars().count())
                        .max();
                    if let Some(len) = longest {
                        if best.is_none_or(|(_, best_len)| len > best_len) {
                            best = Some((def, len));
                        }
                    }
                }
                best.map(|(def, _)| def)
            }
        }
    }
}

fn terms(def: &SynonymDef) -> impl Iterator<Item = String> + '_ {
    std::iter::once(def.concept)
        .chain(def.aliases.iter().copied())
        .map(str::to_lowercase)
}

fn containment_terms(def: &SynonymDef) -> impl Iterator<Item = String> + '_ {
    std::iter::once(def.concept)
        .chain(def.aliases.iter().copied().filter(|alias| alias.is_ascii()))
        .map(str::to_lowercase)
}

fn is_alias_of(def: &SynonymDef, key: &str) -> bool {
    let key = key.trim().to_lowercase();
    terms(def).any(|term| term == key)
}

fn tokens(text: &str) -> Vec<&str> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect()
}

fn contains_run(hay: &[&str], needle: &[&str]) -> bool {
    !needle.is_empty() && hay.windows(needle.len()).any(|w| w == needle)
}

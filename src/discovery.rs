//! Field discovery over arbitrary uploaded documents.
//!
//! Three strategies run against the same parsed document in a fixed order
//! and are merged into one name-keyed map. A strategy that errors counts as
//! having found nothing; discovery itself never fails.

use crate::error::{FormError, Result};
use crate::text_blocks::{self, TextBlock};
use crate::types::FieldRect;
use indexmap::IndexMap;
use lopdf::{Dictionary, Document as LoDocument, Object as LoObject, ObjectId};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Labels must start at most this far left of the widget's left edge.
pub const LABEL_HORIZONTAL_WINDOW: f32 = 200.0;
pub const LABEL_VERTICAL_TOLERANCE: f32 = 20.0;
pub const LABEL_MAX_CHARS: usize = 20;
const MAX_FIELD_DEPTH: usize = 32;
const LABEL_SUFFIXES: [&str; 5] = ["명", "일자", "일", "번호", "호"];
const LABEL_SUFFIXES_EN: [&str; 4] = ["name", "date", "no", "number"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    NativeField,
    AnnotationWidget,
    HeuristicLabel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveredField {
    pub name: String,
    /// Zero-based page index.
    pub page: usize,
    pub rect: FieldRect,
    pub value: Option<String>,
    pub label: Option<String>,
    /// AcroForm `/FT` when known (`Tx`, `Ch`, `Btn`, `Sig`).
    pub field_type: Option<String>,
    /// Every strategy that reported this name, in merge order.
    pub sources: Vec<FieldSource>,
}

impl DiscoveredField {
    pub fn new(name: impl Into<String>, page: usize, rect: FieldRect, source: FieldSource) -> Self {
        Self {
            name: name.into(),
            page,
            rect,
            value: None,
            label: None,
            field_type: None,
            sources: vec![source],
        }
    }

    /// The strategy whose rectangle the merged entry carries.
    pub fn source(&self) -> Option<FieldSource> {
        self.sources
            .iter()
            .rev()
            .find(|s| **s != FieldSource::HeuristicLabel)
            .or_else(|| self.sources.last())
            .copied()
    }

    pub fn is_native(&self) -> bool {
        self.sources.contains(&FieldSource::NativeField)
    }
}

pub type DiscoveredFields = IndexMap<String, DiscoveredField>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// A later report for the same name replaces rect and page. Value,
    /// label and type fall back to the earlier report when the later one
    /// has none.
    Replace,
    /// Only attaches labels to names already present; never inserts.
    LabelOnly,
}

pub trait DiscoveryStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    fn merge_mode(&self) -> MergeMode {
        MergeMode::Replace
    }

    fn discover(&self, doc: &LoDocument) -> Result<Vec<DiscoveredField>>;
}

pub fn merge_into(acc: &mut DiscoveredFields, found: DiscoveredField, mode: MergeMode) {
    match mode {
        MergeMode::LabelOnly => {
            let Some(existing) = acc.get_mut(&found.name) else {
                log::debug!("label {:?} has no matching field {}", found.label, found.name);
                return;
            };
            if found.label.is_some() {
                existing.label = found.label;
                existing.sources.extend(found.sources);
            }
        }
        MergeMode::Replace => {
            let mut found = found;
            if let Some(previous) = acc.get(&found.name) {
                if previous.rect != found.rect {
                    log::debug!(
                        "{}: later strategy replaces rect {:?} with {:?}",
                        found.name,
                        previous.rect,
                        found.rect
                    );
                }
                found.value = found.value.or_else(|| previous.value.clone());
                found.label = found.label.or_else(|| previous.label.clone());
                found.field_type = found.field_type.or_else(|| previous.field_type.clone());
                let mut sources = previous.sources.clone();
                sources.extend(found.sources);
                found.sources = sources;
            }
            acc.insert(found.name.clone(), found);
        }
    }
}

pub struct DiscoveryEngine {
    strategies: Vec<Box<dyn DiscoveryStrategy>>,
}

impl Default for DiscoveryEngine {
    fn default() -> Self {
        Self::standard()
    }
}

impl DiscoveryEngine {
    /// Native fields, then annotation widgets, then heuristic labels.
    pub fn standard() -> Self {
        Self::with_strategies(vec![
            Box::new(NativeFieldStrategy),
            Box::new(AnnotationWidgetStrategy),
            Box::new(HeuristicLabelStrategy),
        ])
    }

    pub fn with_strategies(strategies: Vec<Box<dyn DiscoveryStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn discover(&self, bytes: &[u8]) -> DiscoveredFields {
        match LoDocument::load_mem(bytes) {
            Ok(doc) => self.discover_document(&doc),
            Err(err) => {
                log::warn!("field discovery skipped, document does not parse: {err}");
                DiscoveredFields::new()
            }
        }
    }

    pub fn discover_document(&self, doc: &LoDocument) -> DiscoveredFields {
        let mut merged = DiscoveredFields::new();
        for strategy in &self.strategies {
            match strategy.discover(doc) {
                Ok(found) => {
                    log::debug!("{} strategy found {} fields", strategy.name(), found.len());
                    for field in found {
                        merge_into(&mut merged, field, strategy.merge_mode());
                    }
                }
                Err(err) => {
                    log::warn!("{} strategy failed, treating as empty: {err}", strategy.name());
                }
            }
        }
        merged
    }
}

pub struct NativeFieldStrategy;

impl DiscoveryStrategy for NativeFieldStrategy {
    fn name(&self) -> &'static str {
        "native-field"
    }

    fn discover(&self, doc: &LoDocument) -> Result<Vec<DiscoveredField>> {
        let pages = widget_pages(doc);
        let mut out = Vec::new();
        for node in acroform_fields(doc)? {
            let widget = node.widgets.first().copied().unwrap_or(node.id);
            let Some(widget_dict) = doc.get_object(widget).ok().and_then(|o| o.as_dict().ok()) else {
                continue;
            };
            let rect = rect_of(doc, widget_dict).unwrap_or(FieldRect::new(0.0, 0.0, 0.0, 0.0));
            let page = pages
                .get(&widget)
                .map(|(page, _)| *page)
                .or_else(|| page_from_p(doc, widget_dict))
                .unwrap_or(0);
            let mut field = DiscoveredField::new(node.name, page, rect, FieldSource::NativeField);
            field.value = node.value;
            field.field_type = node.field_type;
            out.push(field);
        }
        Ok(out)
    }
}

pub struct AnnotationWidgetStrategy;

impl DiscoveryStrategy for AnnotationWidgetStrategy {
    fn name(&self) -> &'static str {
        "annotation-widget"
    }

    fn discover(&self, doc: &LoDocument) -> Result<Vec<DiscoveredField>> {
        Ok(page_widgets(doc)?
            .into_iter()
            .map(|w| {
                let mut field = DiscoveredField::new(w.name, w.page, w.rect, FieldSource::AnnotationWidget);
                field.value = w.value;
                field.field_type = w.field_type;
                field
            })
            .collect())
    }
}

pub struct HeuristicLabelStrategy;

impl DiscoveryStrategy for HeuristicLabelStrategy {
    fn name(&self) -> &'static str {
        "heuristic-label"
    }

    fn merge_mode(&self) -> MergeMode {
        MergeMode::LabelOnly
    }

    fn discover(&self, doc: &LoDocument) -> Result<Vec<DiscoveredField>> {
        let widgets = page_widgets(doc)?;
        if widgets.is_empty() {
            return Ok(Vec::new());
        }
        let mut blocks = Vec::new();
        for (index, page_id) in doc.get_pages().into_values().enumerate() {
            match text_blocks::page_text_blocks(doc, index, page_id) {
                Ok(page_blocks) => blocks.extend(page_blocks),
                Err(err) => log::warn!("no label text from page {}: {err}", index + 1),
            }
        }
        Ok(attach_labels(&blocks, &widgets))
    }
}

/// One widget annotation as found on a page.
#[derive(Debug, Clone, PartialEq)]
pub struct PageWidget {
    pub id: Option<ObjectId>,
    pub name: String,
    pub page: usize,
    pub rect: FieldRect,
    pub value: Option<String>,
    pub field_type: Option<String>,
}

/// Nearest label-like block to the left of each widget, at most one label
/// per widget. Returned as label-only reports.
pub fn attach_labels(blocks: &[TextBlock], widgets: &[PageWidget]) -> Vec<DiscoveredField> {
    let labels: Vec<(&TextBlock, String)> = blocks
        .iter()
        .filter_map(|b| label_text(&b.text).map(|clean| (b, clean)))
        .collect();
    let mut out = Vec::new();
    for widget in widgets {
        let best = labels
            .iter()
            .filter(|(block, _)| block.page == widget.page)
            .filter_map(|(block, clean)| {
                let dx = widget.rect.x0 - block.x;
                let dy = (widget.rect.center_y() - block.y).abs();
                let in_window = dx > 0.0 && dx <= LABEL_HORIZONTAL_WINDOW && dy <= LABEL_VERTICAL_TOLERANCE;
                in_window.then_some((dx + dy, clean))
            })
            .min_by(|a, b| a.0.total_cmp(&b.0));
        if let Some((_, clean)) = best {
            let mut field = DiscoveredField::new(
                widget.name.clone(),
                widget.page,
                widget.rect,
                FieldSource::HeuristicLabel,
            );
            field.label = Some(clean.clone());
            out.push(field);
        }
    }
    out
}

/// The cleaned label when `text` looks like one: short, and either carrying
/// a colon, an underscore run, or a name/date/number suffix.
pub fn label_text(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() || text.chars().count() > LABEL_MAX_CHARS {
        return None;
    }
    let has_marker = text.contains(':') || text.contains('：') || text.contains("__");
    let clean: String = text
        .trim_end_matches(|c: char| c == ':' || c == '：' || c == '_' || c.is_whitespace())
        .split("__")
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();
    if clean.is_empty() {
        return None;
    }
    let lower = clean.to_lowercase();
    let has_suffix = LABEL_SUFFIXES.iter().any(|s| clean.ends_with(s))
        || LABEL_SUFFIXES_EN
            .iter()
            .any(|s| lower.ends_with(s) && !lower[..lower.len() - s.len()].ends_with(char::is_alphanumeric));
    (has_marker || has_suffix).then_some(clean)
}

/// AcroForm terminal field with its fully qualified name.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NativeFieldNode {
    pub id: ObjectId,
    pub name: String,
    pub field_type: Option<String>,
    pub value: Option<String>,
    pub widgets: Vec<ObjectId>,
}

pub(crate) fn acroform_dict(doc: &LoDocument) -> Option<&Dictionary> {
    let catalog = doc.catalog().ok()?;
    resolve(doc, catalog.get(b"AcroForm").ok()?)?.as_dict().ok()
}

pub(crate) fn acroform_fields(doc: &LoDocument) -> Result<Vec<NativeFieldNode>> {
    let Some(acroform) = acroform_dict(doc) else {
        return Ok(Vec::new());
    };
    let Ok(fields) = acroform.get(b"Fields") else {
        return Ok(Vec::new());
    };
    let fields = resolve(doc, fields)
        .and_then(|o| o.as_array().ok())
        .ok_or_else(|| FormError::InvalidDocument("AcroForm /Fields is not an array".to_string()))?;
    let mut out = Vec::new();
    let mut visited = HashSet::new();
    for entry in fields {
        if let Ok(id) = entry.as_reference() {
            collect_field(doc, id, None, None, 0, &mut visited, &mut out);
        }
    }
    Ok(out)
}

fn collect_field(
    doc: &LoDocument,
    id: ObjectId,
    parent_name: Option<&str>,
    inherited_type: Option<&str>,
    depth: usize,
    visited: &mut HashSet<ObjectId>,
    out: &mut Vec<NativeFieldNode>,
) {
    if depth > MAX_FIELD_DEPTH || !visited.insert(id) {
        return;
    }
    let Some(dict) = doc.get_object(id).ok().and_then(|o| o.as_dict().ok()) else {
        return;
    };
    let partial = dict.get(b"T").ok().and_then(text_string);
    let name = match (parent_name, partial.as_deref()) {
        (Some(parent), Some(part)) => format!("{parent}.{part}"),
        (None, Some(part)) => part.to_string(),
        (Some(parent), None) => parent.to_string(),
        (None, None) => String::new(),
    };
    let field_type = dict
        .get(b"FT")
        .ok()
        .and_then(|o| o.as_name().ok())
        .map(|n| String::from_utf8_lossy(n).to_string())
        .or_else(|| inherited_type.map(str::to_string));

    let kids: Vec<ObjectId> = dict
        .get(b"Kids")
        .ok()
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_array().ok())
        .map(|arr| arr.iter().filter_map(|k| k.as_reference().ok()).collect())
        .unwrap_or_default();
    let (child_fields, widgets): (Vec<ObjectId>, Vec<ObjectId>) = kids.into_iter().partition(|kid| {
        doc.get_object(*kid)
            .ok()
            .and_then(|o| o.as_dict().ok())
            .map(|d| d.has(b"T"))
            .unwrap_or(false)
    });

    if child_fields.is_empty() {
        if name.is_empty() {
            return;
        }
        let widgets = if widgets.is_empty() { vec![id] } else { widgets };
        out.push(NativeFieldNode {
            id,
            name,
            field_type,
            value: dict.get(b"V").ok().and_then(|v| field_value(doc, v)),
            widgets,
        });
        return;
    }
    let parent = (!name.is_empty()).then_some(name.as_str());
    for child in child_fields {
        collect_field(doc, child, parent, field_type.as_deref(), depth + 1, visited, out);
    }
}

/// Widget annotations on every page, named by their field's fully qualified
/// name or `field_<page>_<index>` when anonymous.
pub fn page_widgets(doc: &LoDocument) -> Result<Vec<PageWidget>> {
    let mut out = Vec::new();
    for (page, page_id) in doc.get_pages().into_values().enumerate() {
        let page_dict = doc.get_object(page_id)?.as_dict()?;
        let Ok(annots) = page_dict.get(b"Annots") else {
            continue;
        };
        let Some(annots) = resolve(doc, annots).and_then(|o| o.as_array().ok()) else {
            log::debug!("page {page}: /Annots is not an array");
            continue;
        };
        for (index, entry) in annots.iter().enumerate() {
            let id = entry.as_reference().ok();
            let Some(annot) = resolve(doc, entry).and_then(|o| o.as_dict().ok()) else {
                continue;
            };
            let is_widget = annot
                .get(b"Subtype")
                .and_then(LoObject::as_name)
                .map(|n| n == b"Widget")
                .unwrap_or(false);
            if !is_widget {
                continue;
            }
            let Some(rect) = rect_of(doc, annot) else {
                continue;
            };
            let name = qualified_name(doc, annot).unwrap_or_else(|| format!("field_{page}_{index}"));
            out.push(PageWidget {
                id,
                name,
                page,
                rect,
                value: inherited(doc, annot, b"V").and_then(|v| field_value(doc, v)),
                field_type: inherited(doc, annot, b"FT")
                    .and_then(|o| o.as_name().ok())
                    .map(|n| String::from_utf8_lossy(n).to_string()),
            });
        }
    }
    Ok(out)
}

fn qualified_name(doc: &LoDocument, dict: &Dictionary) -> Option<String> {
    let mut parts = Vec::new();
    let mut current = Some(dict);
    let mut depth = 0;
    while let Some(node) = current {
        if depth > MAX_FIELD_DEPTH {
            break;
        }
        if let Some(part) = node.get(b"T").ok().and_then(text_string) {
            parts.push(part);
        }
        current = node
            .get(b"Parent")
            .ok()
            .and_then(|p| resolve(doc, p))
            .and_then(|o| o.as_dict().ok());
        depth += 1;
    }
    if parts.is_empty() {
        return None;
    }
    parts.reverse();
    Some(parts.join("."))
}

fn inherited<'a>(doc: &'a LoDocument, dict: &'a Dictionary, key: &[u8]) -> Option<&'a LoObject> {
    let mut current = Some(dict);
    let mut depth = 0;
    while let Some(node) = current {
        if let Ok(value) = node.get(key) {
            return resolve(doc, value);
        }
        if depth > MAX_FIELD_DEPTH {
            return None;
        }
        current = node
            .get(b"Parent")
            .ok()
            .and_then(|p| resolve(doc, p))
            .and_then(|o| o.as_dict().ok());
        depth += 1;
    }
    None
}

/// Annotation object id to (page index, position in `/Annots`).
fn widget_pages(doc: &LoDocument) -> HashMap<ObjectId, (usize, usize)> {
    let mut out = HashMap::new();
    for (page, page_id) in doc.get_pages().into_values().enumerate() {
        let Some(annots) = doc
            .get_object(page_id)
            .ok()
            .and_then(|o| o.as_dict().ok())
            .and_then(|d| d.get(b"Annots").ok())
            .and_then(|a| resolve(doc, a))
            .and_then(|a| a.as_array().ok())
        else {
            continue;
        };
        for (index, entry) in annots.iter().enumerate() {
            if let Ok(id) = entry.as_reference() {
                out.insert(id, (page, index));
            }
        }
    }
    out
}

fn page_from_p(doc: &LoDocument, widget: &Dictionary) -> Option<usize> {
    let target = widget.get(b"P").ok()?.as_reference().ok()?;
    doc.get_pages().into_values().position(|id| id == target)
}

fn rect_of(doc: &LoDocument, dict: &Dictionary) -> Option<FieldRect> {
    let arr = resolve(doc, dict.get(b"Rect").ok()?)?.as_array().ok()?;
    let nums: Vec<f32> = arr
        .iter()
        .filter_map(|o| resolve(doc, o))
        .filter_map(obj_to_f32)
        .collect();
    match nums[..] {
        [x0, y0, x1, y1] => Some(FieldRect::new(x0, y0, x1, y1)),
        _ => None,
    }
}

fn field_value(doc: &LoDocument, obj: &LoObject) -> Option<String> {
    let value = match resolve(doc, obj)? {
        LoObject::Name(name) => String::from_utf8_lossy(name).to_string(),
        LoObject::Array(items) => items
            .iter()
            .filter_map(|item| field_value(doc, item))
            .collect::<Vec<_>>()
            .join(", "),
        other => text_string(other)?,
    };
    (!value.is_empty()).then_some(value)
}

/// Decodes a PDF text string (UTF-16BE with BOM or PDFDocEncoding).
pub(crate) fn text_string(obj: &LoObject) -> Option<String> {
    match obj {
        LoObject::String(bytes, _) => {
            let decoded = lopdf::decode_text_string(obj)
                .unwrap_or_else(|_| String::from_utf8_lossy(bytes).to_string());
            Some(decoded)
        }
        LoObject::Name(name) => Some(String::from_utf8_lossy(name).to_string()),
        _ => None,
    }
}

pub(crate) fn resolve<'a>(doc: &'a LoDocument, obj: &'a LoObject) -> Option<&'a LoObject> {
    match obj {
        LoObject::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn obj_to_f32(obj: &LoObject) -> Option<f32> {
    if let Ok(v) = obj.as_float() {
        return Some(v);
    }
    obj.as_i64().ok().map(|v| v as f32)
}

//! Native AcroForm fill: writes `/V` on terminal fields matched by fully
//! qualified name and asks viewers to rebuild appearances.

use crate::discovery::{NativeFieldNode, acroform_fields};
use crate::error::{FormError, Result};
use crate::overlay::display_value;
use indexmap::IndexMap;
use lopdf::{Document as LoDocument, Object as LoObject, ObjectId, StringFormat};
use serde_json::Value;

const CHECKED_WORDS: [&str; 8] = ["true", "yes", "y", "1", "on", "checked", "v", "x"];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FillSummary {
    pub filled: Vec<String>,
    /// Matched names that were left alone (signature fields, unknown names).
    pub skipped: Vec<String>,
}

/// PDF text string: literal for printable ASCII, UTF-16BE with BOM otherwise.
pub fn pdf_text_string(text: &str) -> LoObject {
    if text.chars().all(|c| (' '..='~').contains(&c)) {
        return LoObject::String(text.as_bytes().to_vec(), StringFormat::Literal);
    }
    let mut bytes = vec![0xFE, 0xFF];
    for unit in text.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    LoObject::String(bytes, StringFormat::Hexadecimal)
}

pub fn fill_native_fields(bytes: &[u8], values: &IndexMap<String, Value>) -> Result<(Vec<u8>, FillSummary)> {
    let mut doc = LoDocument::load_mem(bytes)
        .map_err(|err| FormError::InvalidDocument(format!("fill target: {err}")))?;
    let summary = fill_document(&mut doc, values)?;
    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    Ok((out, summary))
}

pub fn fill_document(doc: &mut LoDocument, values: &IndexMap<String, Value>) -> Result<FillSummary> {
    let nodes: IndexMap<String, NativeFieldNode> = acroform_fields(doc)?
        .into_iter()
        .map(|node| (node.name.clone(), node))
        .collect();
    let mut summary = FillSummary::default();
    for (name, value) in values {
        let Some(node) = nodes.get(name) else {
            summary.skipped.push(name.clone());
            continue;
        };
        let Some(text) = display_value(value) else {
            continue;
        };
        match node.field_type.as_deref() {
            Some("Sig") => {
                log::debug!("not filling signature field {name}");
                summary.skipped.push(name.clone());
                continue;
            }
            Some("Btn") => set_checkbox(doc, node, &text)?,
            _ => set_text(doc, node, &text)?,
        }
        summary.filled.push(name.clone());
    }
    if !summary.filled.is_empty() {
        set_need_appearances(doc)?;
    }
    Ok(summary)
}

fn set_text(doc: &mut LoDocument, node: &NativeFieldNode, text: &str) -> Result<()> {
    if node.field_type.as_deref() == Some("Ch") && !choice_options(doc, node.id).iter().any(|o| o == text) {
        log::debug!("{}: value {text:?} is not among its options, setting anyway", node.name);
    }
    doc.get_object_mut(node.id)?
        .as_dict_mut()?
        .set("V", pdf_text_string(text));
    // Stale appearance streams would keep showing the old value.
    for widget in &node.widgets {
        if let Ok(dict) = doc.get_object_mut(*widget).and_then(LoObject::as_dict_mut) {
            dict.remove(b"AP");
        }
    }
    Ok(())
}

fn set_checkbox(doc: &mut LoDocument, node: &NativeFieldNode, text: &str) -> Result<()> {
    let checked = CHECKED_WORDS.contains(&text.trim().to_lowercase().as_str());
    let state = if checked {
        node.widgets
            .first()
            .and_then(|w| on_state(doc, *w))
            .unwrap_or_else(|| "Yes".to_string())
    } else {
        "Off".to_string()
    };
    doc.get_object_mut(node.id)?
        .as_dict_mut()?
        .set("V", LoObject::Name(state.clone().into_bytes()));
    for widget in &node.widgets {
        if let Ok(dict) = doc.get_object_mut(*widget).and_then(LoObject::as_dict_mut) {
            dict.set("AS", LoObject::Name(state.clone().into_bytes()));
        }
    }
    Ok(())
}

/// First non-`Off` appearance state name of a checkbox widget.
fn on_state(doc: &LoDocument, widget: ObjectId) -> Option<String> {
    let dict = doc.get_object(widget).ok()?.as_dict().ok()?;
    let ap = crate::discovery::resolve(doc, dict.get(b"AP").ok()?)?.as_dict().ok()?;
    let normal = crate::discovery::resolve(doc, ap.get(b"N").ok()?)?.as_dict().ok()?;
    normal
        .iter()
        .map(|(k, _)| String::from_utf8_lossy(k).to_string())
        .find(|k| k != "Off")
}

fn choice_options(doc: &LoDocument, field: ObjectId) -> Vec<String> {
    let Some(opts) = doc
        .get_object(field)
        .ok()
        .and_then(|o| o.as_dict().ok())
        .and_then(|d| d.get(b"Opt").ok())
        .and_then(|o| crate::discovery::resolve(doc, o))
        .and_then(|o| o.as_array().ok())
    else {
        return Vec::new();
    };
    opts.iter()
        .filter_map(|opt| match opt {
            // [export display] pairs show the display value.
            LoObject::Array(pair) => pair.last().and_then(crate::discovery::text_string),
            other => crate::discovery::text_string(other),
        })
        .collect()
}

fn set_need_appearances(doc: &mut LoDocument) -> Result<()> {
    let catalog_id = doc.trailer.get(b"Root")?.as_reference()?;
    let acroform = doc.get_object(catalog_id)?.as_dict()?.get(b"AcroForm")?.clone();
    let dict = match acroform {
        LoObject::Reference(id) => doc.get_object_mut(id)?.as_dict_mut()?,
        _ => doc
            .get_object_mut(catalog_id)?
            .as_dict_mut()?
            .get_mut(b"AcroForm")?
            .as_dict_mut()?,
    };
    dict.set("NeedAppearances", true);
    Ok(())
}

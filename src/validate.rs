//! Configuration-health check for hand-authored field anchors.

use crate::error::Result;
use crate::registry::{FormDefinition, FormRegistry};
use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinateIssue {
    pub form_id: String,
    pub field: String,
    pub x: f32,
    pub y: f32,
    pub page_width: f32,
    pub page_height: f32,
}

impl std::fmt::Display for CoordinateIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}.{} at ({}, {}) lies outside the {}x{} page",
            self.form_id, self.field, self.x, self.y, self.page_width, self.page_height
        )
    }
}

/// First field whose anchor falls outside `0..=width` x `0..=height`.
pub fn first_violation(
    form: &FormDefinition,
    page_width: f32,
    page_height: f32,
) -> Option<CoordinateIssue> {
    form.fields.iter().find_map(|(name, spec)| {
        let inside = spec.x >= 0.0 && spec.x <= page_width && spec.y >= 0.0 && spec.y <= page_height;
        (!inside).then(|| CoordinateIssue {
            form_id: form.id.clone(),
            field: name.clone(),
            x: spec.x,
            y: spec.y,
            page_width,
            page_height,
        })
    })
}

/// Checks one form against an explicit page size. Violations are logged,
/// never raised; only an unknown `form_id` is an error.
pub fn validate(
    registry: &FormRegistry,
    form_id: &str,
    page_width: f32,
    page_height: f32,
) -> Result<bool> {
    let form = registry.get_form(form_id)?;
    Ok(check_form(form, page_width, page_height))
}

/// One entry per registered form, each checked against its own page size.
pub fn validate_all(registry: &FormRegistry) -> IndexMap<String, bool> {
    registry
        .iter()
        .map(|form| {
            let (width, height) = form.page_size.dimensions();
            let ok = check_form(form, width, height);
            (form.id.clone(), ok)
        })
        .collect()
}

fn check_form(form: &FormDefinition, page_width: f32, page_height: f32) -> bool {
    match first_violation(form, page_width, page_height) {
        Some(issue) => {
            log::warn!("field anchor out of bounds: {issue}");
            false
        }
        None => true,
    }
}

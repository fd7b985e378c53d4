//! Static catalog of known form layouts.
//!
//! Layouts are loaded once from the compiled-in catalog (or a caller-supplied
//! JSON document of the same shape) and never mutated afterwards. Field
//! anchors use PDF user space: origin at the bottom-left corner, y growing up.

use crate::error::{FormError, Result};
use crate::types::{A4, LETTER, Size};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    Text,
    Date,
    Number,
    Signature,
    Multiline,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum PageFormat {
    #[default]
    A4,
    Letter,
    #[serde(rename = "custom")]
    Custom { width: f32, height: f32 },
}

impl PageFormat {
    /// Width and height in points as authored, before fixed-point rounding.
    pub fn dimensions(&self) -> (f32, f32) {
        match *self {
            PageFormat::A4 => A4,
            PageFormat::Letter => LETTER,
            PageFormat::Custom { width, height } => (width, height),
        }
    }

    pub fn size(&self) -> Size {
        let (width, height) = self.dimensions();
        Size::new(width, height)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub x: f32,
    pub y: f32,
    pub label: String,
    #[serde(rename = "type", default)]
    pub kind: FieldKind,
    /// Informational only; values outside the list are still drawn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
    #[serde(default)]
    pub required: bool,
}

impl FieldSpec {
    pub fn text(x: f32, y: f32, label: impl Into<String>) -> Self {
        Self {
            x,
            y,
            label: label.into(),
            kind: FieldKind::Text,
            choices: None,
            required: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub page_size: PageFormat,
    pub fields: IndexMap<String, FieldSpec>,
}

impl FormDefinition {
    pub fn page_size(&self) -> Size {
        self.page_size.size()
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.get(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormSummary {
    pub id: String,
    pub name: String,
    pub category: String,
    pub page_size: PageFormat,
    pub field_count: usize,
}

/// UI projection of one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldInfo {
    pub name: String,
    pub label: String,
    pub kind: FieldKind,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct CatalogFile {
    forms: Vec<FormDefinition>,
}

#[derive(Debug, Clone, Default)]
pub struct FormRegistry {
    forms: IndexMap<String, FormDefinition>,
}

impl FormRegistry {
    /// Registry over the catalog compiled into `formstamp_catalog`.
    pub fn builtin() -> Result<Self> {
        Self::from_json_str(formstamp_catalog::forms_v1_json())
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(text)
            .map_err(|err| FormError::InvalidConfiguration(format!("form catalog: {err}")))?;
        Self::from_forms(file.forms)
    }

    pub fn from_forms(forms: impl IntoIterator<Item = FormDefinition>) -> Result<Self> {
        let mut map = IndexMap::new();
        for form in forms {
            if map.contains_key(&form.id) {
                return Err(FormError::InvalidConfiguration(format!(
                    "duplicate form id {}",
                    form.id
                )));
            }
            map.insert(form.id.clone(), form);
        }
        Ok(Self { forms: map })
    }

    pub fn get_form(&self, form_id: &str) -> Result<&FormDefinition> {
        self.forms
            .get(form_id)
            .ok_or_else(|| FormError::UnknownForm(form_id.to_string()))
    }

    pub fn get_field_spec(&self, form_id: &str, field: &str) -> Result<&FieldSpec> {
        self.get_form(form_id)?
            .fields
            .get(field)
            .ok_or_else(|| FormError::UnknownField {
                form_id: form_id.to_string(),
                field: field.to_string(),
            })
    }

    pub fn list_forms(&self) -> Vec<FormSummary> {
        self.forms
            .values()
            .map(|form| FormSummary {
                id: form.id.clone(),
                name: form.name.clone(),
                category: form.category.clone(),
                page_size: form.page_size,
                field_count: form.fields.len(),
            })
            .collect()
    }

    pub fn form_fields(&self, form_id: &str) -> Result<Vec<FieldInfo>> {
        let form = self.get_form(form_id)?;
        Ok(form
            .fields
            .iter()
            .map(|(name, spec)| FieldInfo {
                name: name.clone(),
                label: spec.label.clone(),
                kind: spec.kind,
                required: spec.required,
                choices: spec.choices.clone(),
            })
            .collect())
    }

    pub fn first(&self) -> Option<&FormDefinition> {
        self.forms.values().next()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FormDefinition> {
        self.forms.values()
    }

    pub fn len(&self) -> usize {
        self.forms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_catalog_loads_every_form() {
        let registry = FormRegistry::builtin().unwrap();
        assert_eq!(registry.len(), 5);
        let form = registry.get_form("유소견자_관리대장").unwrap();
        assert_eq!(form.page_size, PageFormat::A4);
        let result = form.field("exam_result").unwrap();
        assert!(result.required);
        assert!(result.choices.as_ref().unwrap().contains(&"정상".to_string()));
        assert_eq!(form.field("follow_up_measures").unwrap().kind, FieldKind::Multiline);
    }

    #[test]
    fn unknown_lookups_are_client_errors() {
        let registry = FormRegistry::builtin().unwrap();
        let err = registry.get_form("no_such_form").unwrap_err();
        assert!(matches!(err, FormError::UnknownForm(ref id) if id == "no_such_form"));
        let err = registry
            .get_field_spec("MSDS_관리대장", "worker_name")
            .unwrap_err();
        assert!(err.is_client_error());
        assert!(registry.get_field_spec("MSDS_관리대장", "cas_number").is_ok());
    }

    #[test]
    fn summaries_and_field_projection_follow_catalog_order() {
        let registry = FormRegistry::builtin().unwrap();
        let summaries = registry.list_forms();
        assert_eq!(summaries[0].id, "유소견자_관리대장");
        assert_eq!(summaries[0].field_count, 14);

        let fields = registry.form_fields("유소견자_관리대장").unwrap();
        assert_eq!(fields[0].name, "company_name");
        assert_eq!(fields[0].label, "사업장명");
        assert!(fields.iter().any(|f| f.kind == FieldKind::Signature));
        let json = serde_json::to_value(&fields[0]).unwrap();
        assert_eq!(json["kind"], "text");
        assert!(json.get("choices").is_none());
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let form = FormDefinition {
            id: "dup".into(),
            name: "Dup".into(),
            category: String::new(),
            page_size: PageFormat::Letter,
            fields: IndexMap::new(),
        };
        let err = FormRegistry::from_forms([form.clone(), form]).unwrap_err();
        assert!(matches!(err, FormError::InvalidConfiguration(_)));
    }

    #[test]
    fn custom_page_format_parses() {
        let registry = FormRegistry::from_json_str(
            r#"{"forms":[{"id":"wide","name":"Wide","page_size":{"custom":{"width":800,"height":400}},
                "fields":{"a":{"x":790,"y":10,"label":"A"}}}]}"#,
        )
        .unwrap();
        let form = registry.get_form("wide").unwrap();
        assert_eq!(form.page_size().width.to_f32(), 800.0);
        assert_eq!(form.field("a").unwrap().kind, FieldKind::Text);
    }
}

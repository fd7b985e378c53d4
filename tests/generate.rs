mod common;

use async_trait::async_trait;
use common::{build_pdf, data, engine, text_at, text_blocks};
use formstamp::{
    DocumentConverter, EngineConfig, FieldSpec, FontRegistry, FormData, FormDefinition, FormError, FormRegistry,
    FormStamp, LoadedFont, PageFormat, page_count,
};
use lopdf::{Document, Object, Stream, dictionary};
use serde_json::json;
use std::sync::Arc;

const FINDINGS_FORM: &str = "유소견자_관리대장";

#[test]
fn generated_findings_register_places_values_at_their_anchors() {
    let engine = engine();
    let values = data(&[("worker_name", json!("홍길동")), ("exam_result", json!("정상"))]);

    let overlay = engine.render_overlay(FINDINGS_FORM, &values).unwrap();
    assert_eq!(overlay.page.text_at(80.0, 702.0), Some("홍길동"));
    assert_eq!(overlay.page.text_at(250.0, 642.0), Some("정상"));
    assert_eq!(overlay.page.text_at(80.0, 752.0), None);
    assert_eq!(overlay.drawn_fields, vec!["worker_name", "exam_result"]);

    let bytes = engine.generate(FINDINGS_FORM, &values).unwrap();
    assert!(!bytes.is_empty());
    assert_eq!(page_count(&bytes).unwrap(), 1);
    let blocks = text_blocks(&bytes);
    assert!(text_at(&blocks, 0, 80.0, 702.0).is_some());
    assert!(text_at(&blocks, 0, 250.0, 642.0).is_some());
    // company_name was not supplied: nothing at its anchor.
    assert!(text_at(&blocks, 0, 80.0, 752.0).is_none());
    assert!(
        blocks.iter().any(|b| b.text.starts_with("Generated: ")),
        "footer stamp missing"
    );
}

#[test]
fn ascii_values_survive_the_builtin_font() {
    let engine = engine();
    let bytes = engine
        .generate(FINDINGS_FORM, &data(&[("employee_id", json!("E-1042")), ("exam_type", json!(2))]))
        .unwrap();
    let blocks = text_blocks(&bytes);
    assert_eq!(text_at(&blocks, 0, 250.0, 702.0).as_deref(), Some("E-1042"));
    assert_eq!(text_at(&blocks, 0, 80.0, 642.0).as_deref(), Some("2"));
}

#[test]
fn empty_data_draws_only_the_footer() {
    let engine = engine();
    for form in engine.forms() {
        let output = engine.render_overlay(&form.id, &FormData::new()).unwrap();
        let strings = output.page.drawn_strings();
        assert_eq!(strings.len(), 1, "{}", form.id);
        assert!(strings[0].2.starts_with("Generated: "));
    }
}

#[test]
fn base_document_keeps_its_pages() {
    let engine = engine();
    let base = build_pdf(&[("Cover", 72.0, 800.0)], &[], &["Appendix A", "Appendix B"]);
    let bytes = engine
        .generate_with_base(FINDINGS_FORM, &data(&[("employee_id", json!("E-7"))]), &base)
        .unwrap();
    assert_eq!(page_count(&bytes).unwrap(), 3);
    let blocks = text_blocks(&bytes);
    assert_eq!(text_at(&blocks, 0, 72.0, 800.0).as_deref(), Some("Cover"));
    assert_eq!(text_at(&blocks, 0, 250.0, 702.0).as_deref(), Some("E-7"));
    assert_eq!(text_at(&blocks, 1, 72.0, 720.0).as_deref(), Some("Appendix A"));
    assert!(blocks.iter().filter(|b| b.page > 0).all(|b| !b.text.starts_with("Generated")));
}

/// One page whose fonts and media box are declared on the `/Pages` node.
fn inherited_resources_pdf() -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let content_id = doc.add_object(Stream::new(
        dictionary! {},
        b"BT /F1 12 Tf 72 800 Td (Uploaded) Tj ET".to_vec(),
    ));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        }),
    );
    let catalog_id = doc.add_object(dictionary! { "Type" => "Catalog", "Pages" => pages_id });
    doc.trailer.set("Root", catalog_id);
    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

#[test]
fn base_with_inherited_resources_keeps_its_fonts() {
    let engine = engine();
    let bytes = engine
        .generate_with_base(FINDINGS_FORM, &data(&[("employee_id", json!("E-3"))]), &inherited_resources_pdf())
        .unwrap();
    let doc = Document::load_mem(&bytes).unwrap();
    let page_id = *doc.get_pages().values().next().unwrap();
    let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
    let resources = match page.get(b"Resources").unwrap() {
        Object::Reference(id) => doc.get_object(*id).unwrap().as_dict().unwrap(),
        other => other.as_dict().unwrap(),
    };
    assert!(resources.has(b"Font"), "page lost the fonts it inherited");
    assert!(resources.has(b"XObject"));

    let blocks = text_blocks(&bytes);
    assert_eq!(text_at(&blocks, 0, 72.0, 800.0).as_deref(), Some("Uploaded"));
    assert_eq!(text_at(&blocks, 0, 250.0, 702.0).as_deref(), Some("E-3"));
}

#[test]
fn unknown_form_surfaces_as_client_error() {
    let engine = engine();
    for err in [
        engine.generate("nope", &FormData::new()).unwrap_err(),
        engine.form_fields("nope").unwrap_err(),
        engine.render_blank_template("nope").unwrap_err(),
    ] {
        assert!(matches!(err, FormError::UnknownForm(ref id) if id == "nope"));
        assert!(err.is_client_error());
    }
}

#[test]
fn validate_all_flags_exactly_the_broken_form() {
    let builtin = FormRegistry::builtin().unwrap();
    let mut broken = FormDefinition {
        id: "broken".to_string(),
        name: "Broken".to_string(),
        category: "test".to_string(),
        page_size: PageFormat::A4,
        fields: Default::default(),
    };
    broken.fields.insert("ok".to_string(), FieldSpec::text(10.0, 10.0, "ok"));
    broken.fields.insert("off_page".to_string(), FieldSpec::text(700.0, 10.0, "off"));
    let registry = FormRegistry::from_forms(builtin.iter().cloned().chain([broken])).unwrap();

    let engine = FormStamp::builder()
        .registry(registry)
        .fonts(FontRegistry::builtin_only())
        .build()
        .unwrap();
    let results = engine.validate_all();
    assert_eq!(results.len(), builtin.len() + 1);
    for (form_id, ok) in &results {
        let single = engine.validate(form_id, 595.28, 841.89).unwrap();
        assert_eq!(*ok, single, "{form_id}");
        assert_eq!(*ok, form_id != "broken", "{form_id}");
    }
    assert_eq!(engine.startup_validation(), &results);
    assert!(engine.validate("broken", 800.0, 900.0).unwrap());
}

#[test]
fn form_field_projection_lists_labels_and_kinds() {
    let engine = engine();
    let fields = engine.form_fields(FINDINGS_FORM).unwrap();
    let form = engine.registry().get_form(FINDINGS_FORM).unwrap();
    assert_eq!(fields.len(), form.fields.len());
    assert_eq!(fields[0].name, "company_name");
    assert!(fields.iter().all(|f| !f.label.is_empty()));
    assert_eq!(engine.forms().len(), engine.registry().len());
}

#[test]
fn calibration_sheet_renders_every_anchor() {
    let engine = engine();
    let bytes = engine.render_calibration(FINDINGS_FORM).unwrap();
    let blocks = text_blocks(&bytes);
    let form = engine.registry().get_form(FINDINGS_FORM).unwrap();
    assert_eq!(blocks.len(), form.fields.len());
    assert!(blocks.iter().any(|b| b.text == "worker_name (80, 700)"));
}

#[test]
fn catalog_metadata_is_stable() {
    let engine = engine();
    let a = engine.catalog_metadata();
    let b = engine.catalog_metadata();
    assert_eq!(a.catalog_fingerprint_sha256, b.catalog_fingerprint_sha256);
    assert_eq!(a.catalog_fingerprint_sha256.len(), 64);
}

#[test]
fn embedded_font_text_is_recoverable_from_the_generated_document() {
    let font = LoadedFont::from_bytes(
        include_bytes!("fixtures/DejaVuSansMono.ttf").to_vec(),
        "fixtures/DejaVuSansMono.ttf",
    )
    .unwrap();
    let engine = FormStamp::builder()
        .fonts(FontRegistry::with_font(font))
        .build()
        .unwrap();
    assert!(engine.font_status().is_ready_for_script());

    let values = data(&[("worker_name", json!("\u{3A9}mega Kim")), ("employee_id", json!("E-12"))]);
    let overlay = engine.render_overlay(FINDINGS_FORM, &values).unwrap();
    assert!(overlay.glyph_report.is_empty());

    let bytes = engine.generate(FINDINGS_FORM, &values).unwrap();
    let blocks = text_blocks(&bytes);
    assert_eq!(text_at(&blocks, 0, 80.0, 702.0).as_deref(), Some("\u{3A9}mega Kim"));
    assert_eq!(text_at(&blocks, 0, 250.0, 702.0).as_deref(), Some("E-12"));
}

#[test]
fn builder_rejects_unusable_configuration() {
    for config in [
        EngineConfig { max_display_len: 2, ..EngineConfig::default() },
        EngineConfig { font_size: f32::NAN, ..EngineConfig::default() },
    ] {
        let err = FormStamp::builder()
            .config(config)
            .fonts(FontRegistry::builtin_only())
            .build()
            .err().expect("config should be rejected");
        assert!(matches!(err, FormError::InvalidConfiguration(_)));
    }
}

struct FailingConverter;

#[async_trait]
impl DocumentConverter for FailingConverter {
    fn name(&self) -> &str {
        "failing"
    }

    async fn convert_to_pdf(&self, _source: &[u8], _file_name: &str) -> formstamp::Result<Vec<u8>> {
        Err(FormError::Conversion("timed out after 30s".to_string()))
    }
}

struct FixedConverter(Vec<u8>);

#[async_trait]
impl DocumentConverter for FixedConverter {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn convert_to_pdf(&self, _source: &[u8], _file_name: &str) -> formstamp::Result<Vec<u8>> {
        Ok(self.0.clone())
    }
}

fn engine_with(converter: Arc<dyn DocumentConverter>) -> FormStamp {
    FormStamp::builder()
        .fonts(FontRegistry::builtin_only())
        .converter(converter)
        .build()
        .unwrap()
}

#[tokio::test]
async fn failed_conversion_degrades_to_blank_template() {
    let engine = engine_with(Arc::new(FailingConverter));
    let bytes = engine
        .generate_from_source(FINDINGS_FORM, &data(&[("employee_id", json!("E-9"))]), b"PK\x03\x04", "form.docx")
        .await
        .unwrap();
    assert_eq!(page_count(&bytes).unwrap(), 1);
    let blocks = text_blocks(&bytes);
    assert_eq!(text_at(&blocks, 0, 250.0, 702.0).as_deref(), Some("E-9"));
}

#[tokio::test]
async fn converted_source_is_used_as_base() {
    let converted = build_pdf(&[("Converted", 72.0, 800.0)], &[], &["Second"]);
    let engine = engine_with(Arc::new(FixedConverter(converted)));
    let bytes = engine
        .generate_from_source(FINDINGS_FORM, &FormData::new(), b"PK\x03\x04", "form.hwp")
        .await
        .unwrap();
    assert_eq!(page_count(&bytes).unwrap(), 2);
    assert_eq!(text_at(&text_blocks(&bytes), 0, 72.0, 800.0).as_deref(), Some("Converted"));
}

#[tokio::test]
async fn pdf_sources_skip_conversion() {
    let engine = engine_with(Arc::new(FailingConverter));
    let source = build_pdf(&[("Original", 72.0, 800.0)], &[], &[]);
    let bytes = engine
        .generate_from_source(FINDINGS_FORM, &FormData::new(), &source, "form.pdf")
        .await
        .unwrap();
    assert_eq!(text_at(&text_blocks(&bytes), 0, 72.0, 800.0).as_deref(), Some("Original"));
}

#[tokio::test]
async fn unknown_form_fails_before_conversion() {
    let engine = engine_with(Arc::new(FailingConverter));
    let err = engine
        .generate_from_source("nope", &FormData::new(), b"x", "a.docx")
        .await
        .unwrap_err();
    assert!(err.is_client_error());
}

#![allow(dead_code)]

use formstamp::{FontRegistry, FormData, FormStamp, TextBlock, document_text_blocks};
use lopdf::{Document, Object, Stream, dictionary};

pub fn engine() -> FormStamp {
    FormStamp::builder()
        .fonts(FontRegistry::builtin_only())
        .build()
        .unwrap()
}

pub fn data(pairs: &[(&str, serde_json::Value)]) -> FormData {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

pub struct Widget<'a> {
    pub name: Option<&'a str>,
    pub rect: [f32; 4],
    /// Registered in the AcroForm `/Fields` array.
    pub native: bool,
}

/// Builds a document whose first page carries `labels` (Helvetica, size 10)
/// and `widgets`; later pages hold a single line of text each.
pub fn build_pdf(labels: &[(&str, f32, f32)], widgets: &[Widget], extra_pages: &[&str]) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { "F1" => font_id },
    });

    let mut first_content = String::new();
    for (text, x, y) in labels {
        first_content.push_str(&format!("BT /F1 10 Tf {x} {y} Td ({text}) Tj ET\n"));
    }
    let mut kids: Vec<Object> = Vec::new();
    let mut page_ids = Vec::new();
    let page_texts = std::iter::once(first_content)
        .chain(extra_pages.iter().map(|t| format!("BT /F1 12 Tf 72 720 Td ({t}) Tj ET")));
    for content in page_texts {
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => resources_id,
            "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
        });
        kids.push(page_id.into());
        page_ids.push(page_id);
    }

    let mut annots: Vec<Object> = Vec::new();
    let mut fields: Vec<Object> = Vec::new();
    for widget in widgets {
        let [x0, y0, x1, y1] = widget.rect;
        let mut dict = dictionary! {
            "Type" => "Annot",
            "Subtype" => "Widget",
            "FT" => "Tx",
            "Rect" => vec![x0.into(), y0.into(), x1.into(), y1.into()],
            "P" => page_ids[0],
        };
        if let Some(name) = widget.name {
            dict.set("T", Object::string_literal(name));
        }
        let id = doc.add_object(dict);
        annots.push(id.into());
        if widget.native {
            fields.push(id.into());
        }
    }
    if !annots.is_empty() {
        doc.get_object_mut(page_ids[0])
            .unwrap()
            .as_dict_mut()
            .unwrap()
            .set("Annots", annots);
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let mut catalog = dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    };
    if !fields.is_empty() {
        let acroform_id = doc.add_object(dictionary! { "Fields" => fields });
        catalog.set("AcroForm", acroform_id);
    }
    let catalog_id = doc.add_object(catalog);
    doc.trailer.set("Root", catalog_id);
    let mut out = Vec::new();
    doc.save_to(&mut out).unwrap();
    out
}

pub fn text_blocks(bytes: &[u8]) -> Vec<TextBlock> {
    let doc = Document::load_mem(bytes).unwrap();
    document_text_blocks(&doc).unwrap()
}

/// Text drawn on `page` with its origin within 0.5pt of (x, y).
pub fn text_at(blocks: &[TextBlock], page: usize, x: f32, y: f32) -> Option<String> {
    blocks
        .iter()
        .find(|b| b.page == page && (b.x - x).abs() < 0.5 && (b.y - y).abs() < 0.5)
        .map(|b| b.text.clone())
}

//! Serializes a recorded [`Page`] into a one-page PDF.
//!
//! Text uses the registry's embedded font as a Type0/Identity-H composite
//! font when one is loaded, otherwise built-in Helvetica with WinAnsi
//! encoding. Characters Helvetica cannot encode become `?` and are counted.

use crate::canvas::{Command, Page};
use crate::error::Result;
use crate::font::{BUILTIN_FONT, FontProgramKind, FontRegistry, LoadedFont, winansi_byte};
use crate::types::{Color, Pt};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document as LoDocument, Object as LoObject, ObjectId, Stream as LoStream, StringFormat, dictionary};
use std::collections::{BTreeMap, BTreeSet};

const FONT_RESOURCE: &str = "F1";

#[derive(Debug)]
pub struct RenderedPage {
    pub document: LoDocument,
    /// Characters the built-in font could not encode.
    pub replaced_chars: usize,
}

impl RenderedPage {
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.document.save_to(&mut out)?;
        Ok(out)
    }
}

enum TextEncoder<'a> {
    Embedded {
        font: &'a LoadedFont,
        glyph_map: BTreeMap<u16, String>,
        used: BTreeSet<u16>,
    },
    Builtin {
        replaced: usize,
    },
}

impl<'a> TextEncoder<'a> {
    fn new(fonts: &'a FontRegistry) -> Self {
        match fonts.primary() {
            Some(font) => TextEncoder::Embedded {
                font,
                glyph_map: BTreeMap::new(),
                used: BTreeSet::new(),
            },
            None => TextEncoder::Builtin { replaced: 0 },
        }
    }

    fn encode(&mut self, text: &str) -> Vec<u8> {
        match self {
            TextEncoder::Embedded {
                font,
                glyph_map,
                used,
            } => {
                let Some(run) = font.shape(text) else {
                    return Vec::new();
                };
                let mut out = Vec::with_capacity(run.glyph_ids.len() * 2);
                for gid in &run.glyph_ids {
                    out.extend_from_slice(&gid.to_be_bytes());
                    used.insert(*gid);
                }
                for (gid, source) in run.glyph_map {
                    glyph_map.entry(gid).or_insert(source);
                }
                out
            }
            TextEncoder::Builtin { replaced } => text
                .chars()
                .map(|ch| {
                    winansi_byte(ch).unwrap_or_else(|| {
                        *replaced += 1;
                        b'?'
                    })
                })
                .collect(),
        }
    }

    fn string_format(&self) -> StringFormat {
        match self {
            TextEncoder::Embedded { .. } => StringFormat::Hexadecimal,
            TextEncoder::Builtin { .. } => StringFormat::Literal,
        }
    }
}

pub fn page_to_document(page: &Page, fonts: &FontRegistry) -> Result<RenderedPage> {
    let mut encoder = TextEncoder::new(fonts);
    let operations = page_operations(page, &mut encoder);
    let content = Content { operations }.encode()?;

    let mut doc = LoDocument::with_version("1.7");
    let pages_id = doc.new_object_id();
    let (font_id, replaced_chars) = match encoder {
        TextEncoder::Embedded {
            font,
            glyph_map,
            used,
        } => {
            let used: Vec<u16> = used.into_iter().collect();
            (add_embedded_font(&mut doc, font, &used, &glyph_map), 0)
        }
        TextEncoder::Builtin { replaced } => (add_builtin_font(&mut doc), replaced),
    };
    let resources_id = doc.add_object(dictionary! {
        "Font" => dictionary! { FONT_RESOURCE => font_id },
    });
    let content_id = doc.add_object(LoStream::new(dictionary! {}, content));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "Contents" => content_id,
        "Resources" => resources_id,
        "MediaBox" => vec![
            0.into(),
            0.into(),
            LoObject::Real(page.size.width.to_f32()),
            LoObject::Real(page.size.height.to_f32()),
        ],
    });
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => vec![page_id.into()],
        "Count" => 1,
    };
    doc.objects.insert(pages_id, LoObject::Dictionary(pages));
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    if replaced_chars > 0 {
        log::warn!(
            "{replaced_chars} characters not encodable in {BUILTIN_FONT} were drawn as '?'; install a Korean font or set FORMSTAMP_FONT_PATH"
        );
    }
    Ok(RenderedPage {
        document: doc,
        replaced_chars,
    })
}

pub fn page_to_pdf_bytes(page: &Page, fonts: &FontRegistry) -> Result<Vec<u8>> {
    page_to_document(page, fonts)?.to_bytes()
}

fn page_operations(page: &Page, encoder: &mut TextEncoder<'_>) -> Vec<Operation> {
    let mut ops = Vec::new();
    let mut font_size = Pt::from_f32(12.0);
    let mut size_stack: Vec<Pt> = Vec::new();
    for command in &page.commands {
        match command {
            Command::SaveState => {
                size_stack.push(font_size);
                ops.push(Operation::new("q", vec![]));
            }
            Command::RestoreState => {
                if let Some(size) = size_stack.pop() {
                    font_size = size;
                }
                ops.push(Operation::new("Q", vec![]));
            }
            Command::Meta { .. } => {}
            Command::SetFillColor(color) => ops.push(Operation::new("rg", color_operands(*color))),
            Command::SetStrokeColor(color) => ops.push(Operation::new("RG", color_operands(*color))),
            Command::SetLineWidth(width) => ops.push(Operation::new("w", vec![real(*width)])),
            Command::SetFontSize(size) => font_size = *size,
            Command::MoveTo { x, y } => ops.push(Operation::new("m", vec![real(*x), real(*y)])),
            Command::LineTo { x, y } => ops.push(Operation::new("l", vec![real(*x), real(*y)])),
            Command::Stroke => ops.push(Operation::new("S", vec![])),
            Command::DrawString { x, y, text } => {
                let bytes = encoder.encode(text);
                if bytes.is_empty() {
                    continue;
                }
                ops.push(Operation::new("BT", vec![]));
                ops.push(Operation::new(
                    "Tf",
                    vec![LoObject::Name(FONT_RESOURCE.as_bytes().to_vec()), real(font_size)],
                ));
                ops.push(Operation::new("Td", vec![real(*x), real(*y)]));
                ops.push(Operation::new(
                    "Tj",
                    vec![LoObject::String(bytes, encoder.string_format())],
                ));
                ops.push(Operation::new("ET", vec![]));
            }
        }
    }
    ops
}

fn real(value: Pt) -> LoObject {
    let milli = value.to_milli_i64();
    if milli % 1000 == 0 {
        LoObject::Integer(milli / 1000)
    } else {
        LoObject::Real(value.to_f32())
    }
}

fn color_operands(color: Color) -> Vec<LoObject> {
    [color.r, color.g, color.b]
        .into_iter()
        .map(|c| LoObject::Real(c.clamp(0.0, 1.0)))
        .collect()
}

fn add_builtin_font(doc: &mut LoDocument) -> ObjectId {
    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => BUILTIN_FONT,
        "Encoding" => "WinAnsiEncoding",
    })
}

fn add_embedded_font(
    doc: &mut LoDocument,
    font: &LoadedFont,
    used_gids: &[u16],
    glyph_map: &BTreeMap<u16, String>,
) -> ObjectId {
    let base = sanitize_font_name(&font.name);
    let metrics = &font.metrics;

    let mut file_dict = dictionary! { "Length1" => font.data.len() as i64 };
    let (file_key, cid_subtype) = match font.program_kind {
        FontProgramKind::TrueType => ("FontFile2", "CIDFontType2"),
        FontProgramKind::OpenTypeCff => {
            file_dict.set("Subtype", "OpenType");
            ("FontFile3", "CIDFontType0")
        }
    };
    let file_id = doc.add_object(LoStream::new(file_dict, font.data.clone()));

    let mut flags: i64 = 32;
    if metrics.is_fixed_pitch {
        flags |= 1;
    }
    let mut descriptor = dictionary! {
        "Type" => "FontDescriptor",
        "FontName" => LoObject::Name(base.clone().into_bytes()),
        "Flags" => flags,
        "FontBBox" => vec![
            (metrics.bbox.0 as i64).into(),
            (metrics.bbox.1 as i64).into(),
            (metrics.bbox.2 as i64).into(),
            (metrics.bbox.3 as i64).into(),
        ],
        "ItalicAngle" => metrics.italic_angle as i64,
        "Ascent" => metrics.ascent as i64,
        "Descent" => metrics.descent as i64,
        "CapHeight" => metrics.cap_height as i64,
        "StemV" => metrics.stem_v as i64,
        "MissingWidth" => metrics.missing_width as i64,
    };
    descriptor.set(file_key, file_id);
    let descriptor_id = doc.add_object(descriptor);

    let mut widths: Vec<LoObject> = Vec::with_capacity(used_gids.len() * 2);
    for gid in used_gids {
        let adv = font.glyph_advance(*gid);
        let width = if adv > 0 { adv } else { metrics.missing_width };
        widths.push((*gid as i64).into());
        widths.push(LoObject::Array(vec![(width as i64).into()]));
    }

    let mut cid_font = dictionary! {
        "Type" => "Font",
        "Subtype" => cid_subtype,
        "BaseFont" => LoObject::Name(base.clone().into_bytes()),
        "CIDSystemInfo" => dictionary! {
            "Registry" => LoObject::string_literal("Adobe"),
            "Ordering" => LoObject::string_literal("Identity"),
            "Supplement" => 0,
        },
        "FontDescriptor" => descriptor_id,
        "DW" => metrics.missing_width as i64,
    };
    if !widths.is_empty() {
        cid_font.set("W", LoObject::Array(widths));
    }
    if matches!(font.program_kind, FontProgramKind::TrueType) {
        cid_font.set("CIDToGIDMap", "Identity");
    }
    let cid_font_id = doc.add_object(cid_font);

    let to_unicode_id = doc.add_object(LoStream::new(
        Dictionary::new(),
        to_unicode_cmap(glyph_map).into_bytes(),
    ));

    doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type0",
        "BaseFont" => LoObject::Name(base.into_bytes()),
        "Encoding" => "Identity-H",
        "DescendantFonts" => vec![cid_font_id.into()],
        "ToUnicode" => to_unicode_id,
    })
}

pub(crate) fn to_unicode_cmap(glyph_map: &BTreeMap<u16, String>) -> String {
    let entries: Vec<(&u16, &String)> = glyph_map.iter().collect();

    let mut out = String::new();
    out.push_str("/CIDInit /ProcSet findresource begin\n");
    out.push_str("12 dict begin\n");
    out.push_str("begincmap\n");
    out.push_str("/CIDSystemInfo << /Registry (Adobe) /Ordering (UCS) /Supplement 0 >> def\n");
    out.push_str("/CMapName /Adobe-Identity-UCS def\n");
    out.push_str("/CMapType 2 def\n");
    out.push_str("1 begincodespacerange\n<0000> <FFFF>\nendcodespacerange\n");

    // bfchar blocks hold at most 100 entries.
    for chunk in entries.chunks(100) {
        out.push_str(&format!("{} beginbfchar\n", chunk.len()));
        for (gid, text) in chunk {
            let mut units = String::new();
            for unit in text.encode_utf16() {
                units.push_str(&format!("{:04X}", unit));
            }
            out.push_str(&format!("<{:04X}> <{}>\n", gid, units));
        }
        out.push_str("endbfchar\n");
    }

    out.push_str("endcmap\n");
    out.push_str("CMapName currentdict /CMap defineresource pop\n");
    out.push_str("end\nend\n");
    out
}

fn sanitize_font_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_')
        .collect();
    if cleaned.is_empty() {
        "EmbeddedFont".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::Canvas;
    use crate::text_blocks::document_text_blocks;
    use crate::types::Size;

    const FIXTURE_FONT: &[u8] = include_bytes!("../tests/fixtures/DejaVuSansMono.ttf");

    fn fixture_fonts() -> FontRegistry {
        FontRegistry::with_font(LoadedFont::from_bytes(FIXTURE_FONT.to_vec(), "DejaVuSansMono.ttf").unwrap())
    }

    fn sample_page(text: &str) -> Page {
        let mut canvas = Canvas::new(Size::a4());
        canvas.set_font_size(Pt::from_f32(10.0));
        canvas.draw_string(Pt::from_f32(80.0), Pt::from_f32(702.0), text);
        canvas.finish()
    }

    #[test]
    fn builtin_font_page_round_trips_through_lopdf() {
        let fonts = FontRegistry::builtin_only();
        let bytes = page_to_pdf_bytes(&sample_page("Kim (tester)"), &fonts).unwrap();
        let doc = LoDocument::load_mem(&bytes).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 1);
        let page_id = *pages.values().next().unwrap();
        let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
        let tj = content
            .operations
            .iter()
            .find(|op| op.operator == "Tj")
            .expect("Tj operator");
        assert_eq!(tj.operands[0].as_str().unwrap(), b"Kim (tester)");
        let td = content.operations.iter().find(|op| op.operator == "Td").unwrap();
        assert_eq!(td.operands[0].as_i64().unwrap(), 80);
        assert_eq!(td.operands[1].as_i64().unwrap(), 702);
    }

    #[test]
    fn embedded_font_writes_identity_h_glyph_ids() {
        let text = "Kim \u{3A9}";
        let mut rendered = page_to_document(&sample_page(text), &fixture_fonts()).unwrap();
        assert_eq!(rendered.replaced_chars, 0);
        let bytes = rendered.to_bytes().unwrap();
        let doc = LoDocument::load_mem(&bytes).unwrap();
        let page_id = *doc.get_pages().values().next().unwrap();
        let page = doc.get_object(page_id).unwrap().as_dict().unwrap();
        let resources_id = page.get(b"Resources").unwrap().as_reference().unwrap();
        let resources = doc.get_object(resources_id).unwrap().as_dict().unwrap();
        let font_id = resources
            .get(b"Font")
            .and_then(LoObject::as_dict)
            .and_then(|fonts| fonts.get(FONT_RESOURCE.as_bytes()))
            .and_then(LoObject::as_reference)
            .unwrap();
        let font = doc.get_object(font_id).unwrap().as_dict().unwrap();
        assert_eq!(font.get(b"Subtype").unwrap().as_name().unwrap(), b"Type0");
        assert_eq!(font.get(b"Encoding").unwrap().as_name().unwrap(), b"Identity-H");

        let face = ttf_parser::Face::parse(FIXTURE_FONT, 0).unwrap();
        let gid = |ch: char| face.glyph_index(ch).unwrap().0;
        let expected: Vec<u8> = text.chars().flat_map(|ch| gid(ch).to_be_bytes()).collect();
        let content = Content::decode(&doc.get_page_content(page_id).unwrap()).unwrap();
        let tj = content.operations.iter().find(|op| op.operator == "Tj").unwrap();
        assert!(matches!(tj.operands[0], LoObject::String(_, StringFormat::Hexadecimal)));
        assert_eq!(tj.operands[0].as_str().unwrap(), expected.as_slice());

        let cmap_id = font.get(b"ToUnicode").unwrap().as_reference().unwrap();
        let cmap = doc.get_object(cmap_id).unwrap().as_stream().unwrap().get_plain_content().unwrap();
        let cmap = String::from_utf8(cmap).unwrap();
        assert!(cmap.contains(&format!("<{:04X}> <03A9>", gid('\u{3A9}'))), "{cmap}");

        let blocks = document_text_blocks(&doc).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].text, text);
        assert_eq!((blocks[0].x, blocks[0].y), (80.0, 702.0));
    }

    #[test]
    fn embedded_widths_cover_every_used_glyph() {
        let rendered = page_to_document(&sample_page("ab"), &fixture_fonts()).unwrap();
        let cid_font = rendered
            .document
            .objects
            .values()
            .filter_map(|o| o.as_dict().ok())
            .find(|d| d.get(b"Subtype").and_then(LoObject::as_name).ok() == Some(b"CIDFontType2".as_slice()))
            .unwrap();
        let widths = cid_font.get(b"W").unwrap().as_array().unwrap();
        assert_eq!(widths.len(), 4);
        assert_eq!(cid_font.get(b"CIDToGIDMap").unwrap().as_name().unwrap(), b"Identity");
    }

    #[test]
    fn builtin_font_counts_unencodable_characters() {
        let fonts = FontRegistry::builtin_only();
        let rendered = page_to_document(&sample_page("홍길동 OK"), &fonts).unwrap();
        assert_eq!(rendered.replaced_chars, 3);
    }

    #[test]
    fn empty_page_still_serializes() {
        let fonts = FontRegistry::builtin_only();
        let page = Canvas::new(Size::letter()).finish();
        let bytes = page_to_pdf_bytes(&page, &fonts).unwrap();
        let doc = LoDocument::load_mem(&bytes).unwrap();
        assert_eq!(doc.get_pages().len(), 1);
    }

    #[test]
    fn to_unicode_cmap_uses_surrogate_pairs_and_chunks() {
        let mut map = BTreeMap::new();
        map.insert(3u16, "홍".to_string());
        map.insert(4u16, "\u{1F600}".to_string());
        let cmap = to_unicode_cmap(&map);
        assert!(cmap.contains("<0003> <D64D>"));
        assert!(cmap.contains("<0004> <D83DDE00>"));

        let big: BTreeMap<u16, String> = (1..=150u16).map(|g| (g, "a".to_string())).collect();
        let cmap = to_unicode_cmap(&big);
        assert!(cmap.contains("100 beginbfchar"));
        assert!(cmap.contains("50 beginbfchar"));
    }

    #[test]
    fn font_names_are_pdf_safe() {
        assert_eq!(sanitize_font_name("Nanum Gothic"), "NanumGothic");
        assert_eq!(sanitize_font_name("나눔"), "EmbeddedFont");
    }
}

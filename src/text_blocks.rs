//! Positioned text extraction from page content streams.
//!
//! Only what label detection needs: each text-showing operator becomes one
//! block with its starting baseline in page space and an effective font
//! size. Glyph widths are estimated, not measured.

use crate::compose::inherited_attribute;
use crate::error::Result;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document as LoDocument, Object as LoObject, ObjectId};
use std::collections::{HashMap, HashSet};

const EST_ADVANCE_EM: f32 = 0.5;
/// TJ adjustments below this (thousandths of an em) read as a word gap.
const TJ_SPACE_THRESHOLD: f32 = -200.0;

#[derive(Debug, Clone, PartialEq)]
pub struct TextBlock {
    pub page: usize,
    pub text: String,
    pub x: f32,
    pub y: f32,
    pub font_size: f32,
}

#[derive(Clone, Copy, Debug)]
struct Matrix {
    a: f32,
    b: f32,
    c: f32,
    d: f32,
    e: f32,
    f: f32,
}

impl Matrix {
    fn identity() -> Self {
        Self::from_operands(1.0, 0.0, 0.0, 1.0, 0.0, 0.0)
    }

    fn from_operands(a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) -> Self {
        Self { a, b, c, d, e, f }
    }

    fn translation(tx: f32, ty: f32) -> Self {
        Self::from_operands(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    fn concat(self, rhs: Self) -> Self {
        Self {
            a: self.a * rhs.a + self.b * rhs.c,
            b: self.a * rhs.b + self.b * rhs.d,
            c: self.c * rhs.a + self.d * rhs.c,
            d: self.c * rhs.b + self.d * rhs.d,
            e: self.e * rhs.a + self.f * rhs.c + rhs.e,
            f: self.e * rhs.b + self.f * rhs.d + rhs.f,
        }
    }

    fn transform_point(self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    fn scale_y(self) -> f32 {
        (self.b * self.b + self.d * self.d).sqrt()
    }
}

#[derive(Clone, Default)]
struct FontDecoder {
    to_unicode: HashMap<u16, String>,
    two_byte: bool,
}

impl FontDecoder {
    fn decode(&self, bytes: &[u8]) -> String {
        if self.two_byte && bytes.len() % 2 == 0 {
            return bytes
                .chunks_exact(2)
                .map(|pair| {
                    let code = u16::from_be_bytes([pair[0], pair[1]]);
                    self.to_unicode.get(&code).cloned().unwrap_or_else(|| {
                        char::from_u32(code as u32)
                            .map(String::from)
                            .unwrap_or_else(|| "?".to_string())
                    })
                })
                .collect();
        }
        bytes
            .iter()
            .map(|b| {
                self.to_unicode
                    .get(&(*b as u16))
                    .cloned()
                    .unwrap_or_else(|| char::from(*b).to_string())
            })
            .collect()
    }
}

#[derive(Clone, Default)]
struct Resources {
    fonts: HashMap<String, FontDecoder>,
    xobjects: HashMap<String, ObjectId>,
}

#[derive(Clone)]
struct ParseState {
    ctm: Matrix,
    font: Option<String>,
    font_size: f32,
    text_matrix: Matrix,
    text_line_matrix: Matrix,
    leading: f32,
}

impl Default for ParseState {
    fn default() -> Self {
        Self {
            ctm: Matrix::identity(),
            font: None,
            font_size: 12.0,
            text_matrix: Matrix::identity(),
            text_line_matrix: Matrix::identity(),
            leading: 0.0,
        }
    }
}

struct Extractor<'a> {
    doc: &'a LoDocument,
    page: usize,
    blocks: Vec<TextBlock>,
    visited_forms: HashSet<ObjectId>,
}

/// Text blocks of every page, in page order.
pub fn document_text_blocks(doc: &LoDocument) -> Result<Vec<TextBlock>> {
    let mut out = Vec::new();
    for (index, page_id) in doc.get_pages().into_values().enumerate() {
        out.extend(page_text_blocks(doc, index, page_id)?);
    }
    Ok(out)
}

pub fn page_text_blocks(doc: &LoDocument, page: usize, page_id: ObjectId) -> Result<Vec<TextBlock>> {
    let page_dict = doc.get_object(page_id)?.as_dict()?;
    let resources = resources_from(doc, inherited_attribute(doc, page_dict, b"Resources"));
    let content = Content::decode(&doc.get_page_content(page_id)?)?;
    let mut extractor = Extractor {
        doc,
        page,
        blocks: Vec::new(),
        visited_forms: HashSet::new(),
    };
    let mut state = ParseState::default();
    extractor.run(&content.operations, &resources, &mut state);
    Ok(extractor.blocks)
}

impl Extractor<'_> {
    fn run(&mut self, operations: &[Operation], resources: &Resources, state: &mut ParseState) {
        let mut stack: Vec<ParseState> = Vec::new();
        for op in operations {
            match op.operator.as_str() {
                "q" => stack.push(state.clone()),
                "Q" => {
                    if let Some(prev) = stack.pop() {
                        *state = prev;
                    }
                }
                "cm" => {
                    if let Some([a, b, c, d, e, f]) = op_f32_6(op) {
                        state.ctm = Matrix::from_operands(a, b, c, d, e, f).concat(state.ctm);
                    }
                }
                "BT" => {
                    state.text_matrix = Matrix::identity();
                    state.text_line_matrix = Matrix::identity();
                }
                "TL" => {
                    if let Some(leading) = op_f32(op, 0) {
                        state.leading = leading;
                    }
                }
                "Tf" => {
                    if let Some(name) = op_name(op, 0) {
                        state.font = Some(name);
                    }
                    if let Some(size) = op_f32(op, 1) {
                        state.font_size = size.abs();
                    }
                }
                "Td" | "TD" => {
                    if let (Some(tx), Some(ty)) = (op_f32(op, 0), op_f32(op, 1)) {
                        if op.operator == "TD" {
                            state.leading = -ty;
                        }
                        next_line(state, tx, ty);
                    }
                }
                "T*" => {
                    let leading = state.leading;
                    next_line(state, 0.0, -leading);
                }
                "Tm" => {
                    if let Some([a, b, c, d, e, f]) = op_f32_6(op) {
                        state.text_matrix = Matrix::from_operands(a, b, c, d, e, f);
                        state.text_line_matrix = state.text_matrix;
                    }
                }
                "Tj" | "'" | "\"" => {
                    if op.operator != "Tj" {
                        let leading = state.leading;
                        next_line(state, 0.0, -leading);
                    }
                    let decoder = font_decoder(resources, state);
                    if let Some(bytes) = op.operands.last().and_then(|o| o.as_str().ok()) {
                        let text = decoder.decode(bytes);
                        self.emit(state, &text);
                        let advance = text.chars().count() as f32 * state.font_size * EST_ADVANCE_EM;
                        advance_text(state, advance);
                    }
                }
                "TJ" => {
                    let decoder = font_decoder(resources, state);
                    let Some(items) = op.operands.first().and_then(|o| o.as_array().ok()) else {
                        continue;
                    };
                    let mut text = String::new();
                    let mut advance = 0.0;
                    for item in items {
                        if let Ok(bytes) = item.as_str() {
                            let part = decoder.decode(bytes);
                            advance += part.chars().count() as f32 * state.font_size * EST_ADVANCE_EM;
                            text.push_str(&part);
                        } else if let Some(adj) = obj_to_f32(item) {
                            if adj < TJ_SPACE_THRESHOLD && !text.ends_with(' ') {
                                text.push(' ');
                            }
                            advance -= adj / 1000.0 * state.font_size;
                        }
                    }
                    self.emit(state, &text);
                    advance_text(state, advance);
                }
                "Do" => {
                    if let Some(id) = op_name(op, 0).and_then(|n| resources.xobjects.get(&n).copied()) {
                        self.form_xobject(id, resources, state);
                    }
                }
                _ => {}
            }
        }
    }

    fn emit(&mut self, state: &ParseState, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }
        let (tx, ty) = state.text_matrix.transform_point(0.0, 0.0);
        let (x, y) = state.ctm.transform_point(tx, ty);
        let font_size = state.font_size * state.text_matrix.scale_y() * state.ctm.scale_y();
        self.blocks.push(TextBlock {
            page: self.page,
            text: trimmed.to_string(),
            x,
            y,
            font_size,
        });
    }

    fn form_xobject(&mut self, id: ObjectId, parent: &Resources, state: &ParseState) {
        if !self.visited_forms.insert(id) {
            return;
        }
        let Ok(stream) = self.doc.get_object(id).and_then(LoObject::as_stream) else {
            return;
        };
        let is_form = stream
            .dict
            .get(b"Subtype")
            .and_then(LoObject::as_name)
            .map(|n| n == b"Form")
            .unwrap_or(false);
        if !is_form {
            return;
        }
        let Ok(content) = stream
            .decompressed_content()
            .or_else(|_| Ok::<_, lopdf::Error>(stream.content.clone()))
            .and_then(|bytes| Content::decode(&bytes))
        else {
            log::debug!("skipping undecodable form xobject {id:?}");
            return;
        };
        let mut resources = parent.clone();
        let own = resources_from(self.doc, stream.dict.get(b"Resources").ok());
        resources.fonts.extend(own.fonts);
        resources.xobjects.extend(own.xobjects);

        let mut inner = state.clone();
        if let Some(Ok(m)) = stream.dict.get(b"Matrix").ok().map(LoObject::as_array) {
            let values: Vec<f32> = m.iter().filter_map(obj_to_f32).collect();
            if let [a, b, c, d, e, f] = values[..] {
                inner.ctm = Matrix::from_operands(a, b, c, d, e, f).concat(inner.ctm);
            }
        }
        self.run(&content.operations, &resources, &mut inner);
    }
}

fn next_line(state: &mut ParseState, tx: f32, ty: f32) {
    state.text_line_matrix = Matrix::translation(tx, ty).concat(state.text_line_matrix);
    state.text_matrix = state.text_line_matrix;
}

fn advance_text(state: &mut ParseState, tx: f32) {
    state.text_matrix = Matrix::translation(tx, 0.0).concat(state.text_matrix);
}

fn font_decoder(resources: &Resources, state: &ParseState) -> FontDecoder {
    state
        .font
        .as_ref()
        .and_then(|name| resources.fonts.get(name))
        .cloned()
        .unwrap_or_default()
}

fn resolve<'a>(doc: &'a LoDocument, obj: &'a LoObject) -> Option<&'a LoObject> {
    match obj {
        LoObject::Reference(id) => doc.get_object(*id).ok(),
        other => Some(other),
    }
}

fn resolve_dict<'a>(doc: &'a LoDocument, obj: Option<&'a LoObject>) -> Option<&'a Dictionary> {
    obj.and_then(|o| resolve(doc, o)).and_then(|o| o.as_dict().ok())
}

fn resources_from(doc: &LoDocument, obj: Option<&LoObject>) -> Resources {
    let mut out = Resources::default();
    let Some(dict) = resolve_dict(doc, obj) else {
        return out;
    };
    if let Some(fonts) = resolve_dict(doc, dict.get(b"Font").ok()) {
        for (name, font_obj) in fonts.iter() {
            let Some(font) = resolve_dict(doc, Some(font_obj)) else {
                continue;
            };
            let two_byte = font
                .get(b"Subtype")
                .and_then(LoObject::as_name)
                .map(|s| s == b"Type0")
                .unwrap_or(false);
            out.fonts.insert(
                String::from_utf8_lossy(name).to_string(),
                FontDecoder {
                    to_unicode: parse_to_unicode_cmap(doc, font),
                    two_byte,
                },
            );
        }
    }
    if let Some(xobjects) = resolve_dict(doc, dict.get(b"XObject").ok()) {
        for (name, obj) in xobjects.iter() {
            if let Ok(id) = obj.as_reference() {
                out.xobjects.insert(String::from_utf8_lossy(name).to_string(), id);
            }
        }
    }
    out
}

fn parse_to_unicode_cmap(doc: &LoDocument, font: &Dictionary) -> HashMap<u16, String> {
    let mut map = HashMap::new();
    let Some(stream) = font
        .get(b"ToUnicode")
        .ok()
        .and_then(|o| resolve(doc, o))
        .and_then(|o| o.as_stream().ok())
    else {
        return map;
    };
    let Ok(bytes) = stream.get_plain_content() else {
        return map;
    };
    let text = String::from_utf8_lossy(&bytes);
    let mut in_bfchar = false;
    let mut in_bfrange = false;
    for line in text.lines().map(str::trim) {
        if line.ends_with("beginbfchar") {
            in_bfchar = true;
            continue;
        }
        if line.ends_with("beginbfrange") {
            in_bfrange = true;
            continue;
        }
        if line.ends_with("endbfchar") || line.ends_with("endbfrange") {
            in_bfchar = false;
            in_bfrange = false;
            continue;
        }
        let tokens = hex_tokens(line);
        if in_bfchar && tokens.len() >= 2 {
            if let Some(src) = be_u16(&tokens[0]) {
                map.insert(src, utf16_be(&tokens[1]));
            }
        } else if in_bfrange && tokens.len() >= 3 {
            let (Some(start), Some(end)) = (be_u16(&tokens[0]), be_u16(&tokens[1])) else {
                continue;
            };
            if start > end {
                continue;
            }
            if line.contains('[') {
                for (code, token) in (start..=end).zip(tokens.iter().skip(2)) {
                    map.insert(code, utf16_be(token));
                }
            } else if let Some(base) = be_u16(&tokens[2]) {
                for code in start..=end {
                    if let Some(ch) = char::from_u32(base as u32 + (code - start) as u32) {
                        map.insert(code, ch.to_string());
                    }
                }
            }
        }
    }
    map
}

fn hex_tokens(line: &str) -> Vec<Vec<u8>> {
    let mut out = Vec::new();
    let mut rest = line;
    while let Some(open) = rest.find('<') {
        let after = &rest[open + 1..];
        let Some(close) = after.find('>') else {
            break;
        };
        if let Some(bytes) = parse_hex(&after[..close]) {
            out.push(bytes);
        }
        rest = &after[close + 1..];
    }
    out
}

fn parse_hex(token: &str) -> Option<Vec<u8>> {
    let mut nibbles: Vec<u8> = token
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_digit(16).map(|d| d as u8))
        .collect::<Option<_>>()?;
    if nibbles.len() % 2 != 0 {
        nibbles.push(0);
    }
    Some(nibbles.chunks_exact(2).map(|p| (p[0] << 4) | p[1]).collect())
}

fn be_u16(bytes: &[u8]) -> Option<u16> {
    match bytes {
        [hi, lo] => Some(u16::from_be_bytes([*hi, *lo])),
        [lo] => Some(*lo as u16),
        _ => None,
    }
}

fn utf16_be(bytes: &[u8]) -> String {
    if bytes.len() % 2 != 0 {
        return String::from_utf8_lossy(bytes).to_string();
    }
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|p| u16::from_be_bytes([p[0], p[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

fn op_name(op: &Operation, idx: usize) -> Option<String> {
    let name = op.operands.get(idx)?.as_name().ok()?;
    Some(String::from_utf8_lossy(name).to_string())
}

fn op_f32(op: &Operation, idx: usize) -> Option<f32> {
    obj_to_f32(op.operands.get(idx)?)
}

fn op_f32_6(op: &Operation) -> Option<[f32; 6]> {
    Some([
        op_f32(op, 0)?,
        op_f32(op, 1)?,
        op_f32(op, 2)?,
        op_f32(op, 3)?,
        op_f32(op, 4)?,
        op_f32(op, 5)?,
    ])
}

fn obj_to_f32(obj: &LoObject) -> Option<f32> {
    if let Ok(v) = obj.as_float() {
        return Some(v);
    }
    obj.as_i64().ok().map(|v| v as f32)
}

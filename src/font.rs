use crate::error::{FormError, Result};
use crate::glyph_report::GlyphCoverageReport;
use crate::types::Pt;
use rustybuzz::{Face as HbFace, UnicodeBuffer};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use ttf_parser::GlyphId;

/// Name of the built-in font used when no script-capable file is found.
pub const BUILTIN_FONT: &str = "Helvetica";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FontProgramKind {
    TrueType,
    OpenTypeCff,
}

/// Metrics in 1000-unit glyph space, as PDF font descriptors expect.
#[derive(Debug, Clone)]
pub(crate) struct FontMetrics {
    pub(crate) ascent: i16,
    pub(crate) descent: i16,
    pub(crate) cap_height: i16,
    pub(crate) italic_angle: i16,
    pub(crate) stem_v: i16,
    pub(crate) bbox: (i16, i16, i16, i16),
    pub(crate) missing_width: u16,
    pub(crate) is_fixed_pitch: bool,
}

impl FontMetrics {
    fn from_face(face: &ttf_parser::Face<'_>) -> (Self, FontProgramKind) {
        let units_per_em = face.units_per_em().max(1);
        let scale = 1000.0 / units_per_em as f32;
        let ascent = scale_i16(face.ascender(), scale);
        let descent = scale_i16(face.descender(), scale);
        let cap_height = face
            .capital_height()
            .map(|value| scale_i16(value, scale))
            .unwrap_or(ascent);
        let bbox = face.global_bounding_box();
        let bbox = (
            scale_i16(bbox.x_min, scale),
            scale_i16(bbox.y_min, scale),
            scale_i16(bbox.x_max, scale),
            scale_i16(bbox.y_max, scale),
        );
        let italic_angle = face
            .italic_angle()
            .map(|value| value.round() as i16)
            .unwrap_or(0);
        let missing_width = face
            .glyph_index(' ')
            .and_then(|id| face.glyph_hor_advance(id))
            .map(|adv| (adv as f32 * scale).round().clamp(0.0, u16::MAX as f32) as u16)
            .unwrap_or(500);
        let program_kind = if face.tables().cff.is_some() {
            FontProgramKind::OpenTypeCff
        } else {
            FontProgramKind::TrueType
        };
        (
            Self {
                ascent,
                descent,
                cap_height,
                italic_angle,
                stem_v: 80,
                bbox,
                missing_width,
                is_fixed_pitch: face.is_monospaced(),
            },
            program_kind,
        )
    }
}

/// Glyph run produced by shaping one string with an embedded font.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ShapedRun {
    pub(crate) glyph_ids: Vec<u16>,
    /// Source text per glyph id, for the ToUnicode map.
    pub(crate) glyph_map: BTreeMap<u16, String>,
    pub(crate) advance_units: i32,
}

#[derive(Debug)]
pub struct LoadedFont {
    pub(crate) name: String,
    pub(crate) path: PathBuf,
    pub(crate) data: Vec<u8>,
    pub(crate) metrics: FontMetrics,
    pub(crate) program_kind: FontProgramKind,
}

impl LoadedFont {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let ext = path
            .extension()
            .and_then(|v| v.to_str())
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_default();
        if ext != "ttf" && ext != "otf" {
            return Err(FormError::Font(format!(
                "{} is not a .ttf or .otf file",
                path.display()
            )));
        }
        let data = fs::read(path)?;
        Self::from_bytes(data, path)
    }

    pub fn from_bytes(data: Vec<u8>, source: impl AsRef<Path>) -> Result<Self> {
        let source = source.as_ref();
        let face = ttf_parser::Face::parse(&data, 0).map_err(|err| {
            FormError::Font(format!("invalid font data in {}: {err}", source.display()))
        })?;
        let name = font_name(&face, source);
        let (metrics, program_kind) = FontMetrics::from_face(&face);
        Ok(Self {
            name,
            path: source.to_path_buf(),
            data,
            metrics,
            program_kind,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn supports_char(&self, ch: char) -> bool {
        if ch.is_whitespace() {
            return true;
        }
        match ttf_parser::Face::parse(&self.data, 0) {
            Ok(face) => face.glyph_index(ch).is_some(),
            Err(_) => false,
        }
    }

    /// Horizontal advance of `gid` scaled to 1000 units per em.
    pub(crate) fn glyph_advance(&self, gid: u16) -> u16 {
        let Ok(face) = ttf_parser::Face::parse(&self.data, 0) else {
            return 0;
        };
        let advance = face.glyph_hor_advance(GlyphId(gid)).unwrap_or(0);
        let units = face.units_per_em().max(1) as i64;
        let scaled = ((advance as i64) * 1000 + (units / 2)) / units;
        scaled.clamp(0, u16::MAX as i64) as u16
    }

    pub(crate) fn shape(&self, text: &str) -> Option<ShapedRun> {
        let face = HbFace::from_slice(&self.data, 0)?;
        let units_per_em = face.units_per_em().max(1) as i64;
        let mut buffer = UnicodeBuffer::new();
        buffer.push_str(text);
        let output = rustybuzz::shape(&face, &[], buffer);
        let infos = output.glyph_infos();
        let positions = output.glyph_positions();
        if infos.is_empty() {
            return None;
        }

        let mut clusters: Vec<usize> = infos.iter().map(|g| g.cluster as usize).collect();
        clusters.push(text.len());
        let mut run = ShapedRun::default();
        for (i, info) in infos.iter().enumerate() {
            let gid = info.glyph_id as u16;
            run.glyph_ids.push(gid);
            let start = clusters[i].min(text.len());
            let end = clusters[i + 1].min(text.len());
            if gid != 0 && start < end {
                if let Some(source) = text.get(start..end) {
                    run.glyph_map.entry(gid).or_insert_with(|| source.to_string());
                }
            }
            if let Some(pos) = positions.get(i) {
                let adv = ((pos.x_advance as i64) * 1000 + (units_per_em / 2)) / units_per_em;
                run.advance_units = run.advance_units.saturating_add(adv as i32);
            }
        }
        Some(run)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FontStatus {
    Embedded { name: String, path: PathBuf },
    /// No script-capable font was found; non-Latin text renders as `?`.
    BuiltinFallback,
}

impl FontStatus {
    /// Readiness check: false means Korean values will not render correctly.
    pub fn is_ready_for_script(&self) -> bool {
        matches!(self, FontStatus::Embedded { .. })
    }
}

#[derive(Debug, Default)]
pub struct FontRegistry {
    primary: Option<LoadedFont>,
}

impl FontRegistry {
    pub fn builtin_only() -> Self {
        Self { primary: None }
    }

    pub fn with_font(font: LoadedFont) -> Self {
        Self {
            primary: Some(font),
        }
    }

    /// First candidate that loads wins. Missing files are expected and only
    /// logged at debug; finding none at all is logged as an error once here.
    pub fn discover(paths: &[PathBuf]) -> Self {
        for path in paths {
            if !path.is_file() {
                continue;
            }
            match LoadedFont::from_file(path) {
                Ok(font) => {
                    log::info!("using font {} from {}", font.name, path.display());
                    return Self::with_font(font);
                }
                Err(err) => log::debug!("skipping font candidate {}: {err}", path.display()),
            }
        }
        log::error!(
            "no script-capable font found in {} candidate paths; falling back to {BUILTIN_FONT}, Korean text will not render",
            paths.len()
        );
        Self::builtin_only()
    }

    pub fn primary(&self) -> Option<&LoadedFont> {
        self.primary.as_ref()
    }

    pub fn status(&self) -> FontStatus {
        match &self.primary {
            Some(font) => FontStatus::Embedded {
                name: font.name.clone(),
                path: font.path.clone(),
            },
            None => FontStatus::BuiltinFallback,
        }
    }

    pub fn font_label(&self) -> &str {
        self.primary
            .as_ref()
            .map(|f| f.name.as_str())
            .unwrap_or(BUILTIN_FONT)
    }

    pub fn supports_char(&self, ch: char) -> bool {
        match &self.primary {
            Some(font) => font.supports_char(ch),
            None => winansi_byte(ch).is_some(),
        }
    }

    pub fn report_missing_glyphs(&self, field: &str, text: &str, report: &mut GlyphCoverageReport) {
        let font = self.font_label().to_string();
        for ch in text.chars() {
            if !self.supports_char(ch) {
                report.record_missing(ch, &font, field);
            }
        }
    }

    pub fn measure_text_width(&self, font_size: Pt, text: &str) -> Pt {
        if let Some(run) = self.primary.as_ref().and_then(|font| font.shape(text)) {
            return font_size * (run.advance_units.max(0) as f32 / 1000.0);
        }
        // Helvetica averages a little over half an em per glyph.
        font_size * (0.55 * text.chars().count() as f32)
    }
}

/// WinAnsi (cp1252) byte for `ch`, if the built-in encoding has one.
pub(crate) fn winansi_byte(ch: char) -> Option<u8> {
    let byte = match ch {
        '\u{0020}'..='\u{007E}' => ch as u8,
        '\u{00A0}'..='\u{00FF}' => ch as u8,
        '\u{20AC}' => 0x80,
        '\u{201A}' => 0x82,
        '\u{0192}' => 0x83,
        '\u{201E}' => 0x84,
        '\u{2026}' => 0x85,
        '\u{2020}' => 0x86,
        '\u{2021}' => 0x87,
        '\u{02C6}' => 0x88,
        '\u{2030}' => 0x89,
        '\u{0160}' => 0x8A,
        '\u{2039}' => 0x8B,
        '\u{0152}' => 0x8C,
        '\u{017D}' => 0x8E,
        '\u{2018}' => 0x91,
        '\u{2019}' => 0x92,
        '\u{201C}' => 0x93,
        '\u{201D}' => 0x94,
        '\u{2022}' => 0x95,
        '\u{2013}' => 0x96,
        '\u{2014}' => 0x97,
        '\u{02DC}' => 0x98,
        '\u{2122}' => 0x99,
        '\u{0161}' => 0x9A,
        '\u{203A}' => 0x9B,
        '\u{0153}' => 0x9C,
        '\u{017E}' => 0x9E,
        '\u{0178}' => 0x9F,
        _ => return None,
    };
    Some(byte)
}

fn scale_i16(value: i16, scale: f32) -> i16 {
    let scaled = (value as f32 * scale).round() as i32;
    scaled.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

fn font_name(face: &ttf_parser::Face<'_>, path: &Path) -> String {
    use ttf_parser::name::name_id;

    let mut family = None;
    let mut post = None;
    for entry in face.names() {
        let Some(name) = entry.to_string() else {
            continue;
        };
        match entry.name_id {
            name_id::POST_SCRIPT_NAME if post.is_none() => post = Some(name),
            name_id::TYPOGRAPHIC_FAMILY | name_id::FAMILY if family.is_none() => {
                family = Some(name)
            }
            _ => {}
        }
    }
    post.or(family)
        .or_else(|| {
            path.file_stem()
                .and_then(|v| v.to_str())
                .map(|v| v.to_string())
        })
        .unwrap_or_else(|| "EmbeddedFont".to_string())
}

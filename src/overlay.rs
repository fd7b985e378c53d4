//! Text overlay rendering.
//!
//! An overlay is a single transparent page that carries only the caller's
//! values, drawn at each field's anchor. Rendering never fails for a field
//! problem: bad anchors and undrawable values are logged and skipped, and a
//! missing script font degrades to the built-in font.

use crate::canvas::{Canvas, Page};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::font::FontRegistry;
use crate::glyph_report::GlyphCoverageReport;
use crate::pdf;
use crate::registry::{FieldKind, FieldSpec, FormDefinition};
use crate::types::{Color, Pt};
use chrono::NaiveDateTime;
use indexmap::IndexMap;
use serde_json::Value;

/// Caller-supplied values keyed by field name, in caller order.
pub type FormData = IndexMap<String, Value>;

pub const ELLIPSIS: &str = "...";
const LINE_LEADING: f32 = 1.2;
const LABEL_FONT_SIZE: f32 = 8.0;
const TITLE_FONT_SIZE: f32 = 14.0;
const CROSSHAIR_ARM: f32 = 5.0;

#[derive(Debug)]
pub struct OverlayOutput {
    pub bytes: Vec<u8>,
    pub page: Page,
    pub glyph_report: GlyphCoverageReport,
    /// Field names that produced at least one drawn string.
    pub drawn_fields: Vec<String>,
}

/// Display string for a caller value. `None` means "draw nothing".
pub fn display_value(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => items
            .iter()
            .filter_map(display_value)
            .collect::<Vec<_>>()
            .join(", "),
        Value::Object(_) => value.to_string(),
    };
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

/// Values longer than `max_len` characters keep their first `max_len - 3`
/// characters followed by `...`, so the result is exactly `max_len` long.
/// Limits too short for the ellipsis cut hard at `max_len`.
pub fn truncate_display(value: &str, max_len: usize) -> String {
    if value.chars().count() <= max_len {
        return value.to_string();
    }
    if max_len <= ELLIPSIS.len() {
        return value.chars().take(max_len).collect();
    }
    let keep = max_len - ELLIPSIS.len();
    let mut out: String = value.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

fn strip_controls(line: &str) -> String {
    line.chars()
        .map(|ch| if ch == '\t' { ' ' } else { ch })
        .filter(|ch| !ch.is_control())
        .collect()
}

pub struct OverlayRenderer<'a> {
    fonts: &'a FontRegistry,
    config: &'a EngineConfig,
}

impl<'a> OverlayRenderer<'a> {
    pub fn new(fonts: &'a FontRegistry, config: &'a EngineConfig) -> Self {
        Self { fonts, config }
    }

    /// Lines to draw for one field, already sanitized and truncated.
    pub fn field_lines(&self, spec: &FieldSpec, value: &str) -> Vec<String> {
        let max_len = self.config.max_display_len;
        match spec.kind {
            FieldKind::Multiline => value
                .lines()
                .map(|line| truncate_display(strip_controls(line).trim_end(), max_len))
                .collect(),
            _ => {
                let flat = value.replace("\r\n", " ").replace(['\n', '\r'], " ");
                let flat = strip_controls(&flat);
                let flat = flat.trim();
                if flat.is_empty() {
                    Vec::new()
                } else {
                    vec![truncate_display(flat, max_len)]
                }
            }
        }
    }

    /// Records the overlay for `form` without serializing it.
    pub fn layout(
        &self,
        form: &FormDefinition,
        data: &FormData,
        generated_at: Option<NaiveDateTime>,
    ) -> (Page, GlyphCoverageReport, Vec<String>) {
        let size = form.page_size();
        let font_size = Pt::from_f32(self.config.font_size);
        let leading = self.config.font_size * LINE_LEADING;
        let mut canvas = Canvas::new(size);
        let mut report = GlyphCoverageReport::default();
        let mut drawn = Vec::new();

        canvas.set_fill_color(Color::BLACK);
        canvas.set_font_size(font_size);
        for (name, spec) in &form.fields {
            let Some(raw) = data.get(name) else {
                continue;
            };
            let Some(text) = display_value(raw) else {
                continue;
            };
            if !(spec.x.is_finite() && spec.y.is_finite()) {
                log::warn!("skipping {}.{name}: anchor is not a finite coordinate", form.id);
                continue;
            }
            let lines = self.field_lines(spec, &text);
            if lines.iter().all(|l| l.is_empty()) {
                log::debug!("skipping {}.{name}: nothing printable in value", form.id);
                continue;
            }
            canvas.meta("field", name.as_str());
            let x = Pt::from_f32(spec.x);
            for (i, line) in lines.iter().enumerate() {
                if line.is_empty() {
                    continue;
                }
                let y = spec.y + self.config.baseline_offset - leading * i as f32;
                self.fonts.report_missing_glyphs(name, line, &mut report);
                canvas.draw_string(x, Pt::from_f32(y), line.as_str());
            }
            drawn.push(name.clone());
        }

        if !report.is_empty() {
            log::warn!(
                "{} cannot render {} characters on {} (fields: {}): {}",
                self.fonts.font_label(),
                report.total_missing(),
                form.id,
                report.affected_fields().into_iter().collect::<Vec<_>>().join(", "),
                report.summary(8)
            );
        }

        if let Some(at) = generated_at {
            self.draw_footer(&mut canvas, at);
        }
        (canvas.finish(), report, drawn)
    }

    pub fn render(
        &self,
        form: &FormDefinition,
        data: &FormData,
        generated_at: Option<NaiveDateTime>,
    ) -> Result<OverlayOutput> {
        let (page, glyph_report, drawn_fields) = self.layout(form, data, generated_at);
        let bytes = pdf::page_to_pdf_bytes(&page, self.fonts)?;
        Ok(OverlayOutput {
            bytes,
            page,
            glyph_report,
            drawn_fields,
        })
    }

    fn draw_footer(&self, canvas: &mut Canvas, at: NaiveDateTime) {
        let footer = &self.config.footer;
        if !footer.enabled {
            return;
        }
        canvas.save_state();
        canvas.set_fill_color(Color::gray(0.4));
        canvas.set_font_size(Pt::from_f32(footer.font_size));
        canvas.draw_string(
            Pt::from_f32(footer.x),
            Pt::from_f32(footer.y),
            format!("Generated: {}", at.format("%Y-%m-%d %H:%M:%S")),
        );
        canvas.restore_state();
    }

    /// Blank base page: the form's title plus each field's label just above
    /// its anchor, with a guide rule under where the value will sit.
    pub fn blank_template(&self, form: &FormDefinition) -> Page {
        let size = form.page_size();
        let mut canvas = Canvas::new(size);

        let title_size = Pt::from_f32(TITLE_FONT_SIZE);
        let title_width = self.fonts.measure_text_width(title_size, &form.name);
        let title_x = ((size.width - title_width).to_f32() / 2.0).max(20.0);
        canvas.set_font_size(title_size);
        canvas.draw_string(
            Pt::from_f32(title_x),
            size.height - Pt::from_f32(50.0),
            form.name.as_str(),
        );

        canvas.set_font_size(Pt::from_f32(LABEL_FONT_SIZE));
        canvas.set_fill_color(Color::gray(0.3));
        canvas.set_stroke_color(Color::gray(0.6));
        canvas.set_line_width(Pt::from_f32(0.5));
        let label_rise = self.config.baseline_offset + self.config.font_size + 2.0;
        for spec in form.fields.values() {
            if !(spec.x.is_finite() && spec.y.is_finite()) {
                continue;
            }
            canvas.draw_string(
                Pt::from_f32(spec.x),
                Pt::from_f32(spec.y + label_rise),
                spec.label.as_str(),
            );
            let rule_y = Pt::from_f32(spec.y);
            canvas.move_to(Pt::from_f32(spec.x), rule_y);
            let rule_end = (spec.x + 120.0).min(size.width.to_f32() - 10.0).max(spec.x);
            canvas.line_to(Pt::from_f32(rule_end), rule_y);
            canvas.stroke();
        }
        canvas.finish()
    }

    /// Crosshair and field name at every anchor, for tuning coordinates
    /// against a printed form.
    pub fn calibration_page(&self, form: &FormDefinition) -> Page {
        let mut canvas = Canvas::new(form.page_size());
        canvas.set_stroke_color(Color::rgb(0.85, 0.1, 0.1));
        canvas.set_fill_color(Color::rgb(0.85, 0.1, 0.1));
        canvas.set_line_width(Pt::from_f32(0.3));
        canvas.set_font_size(Pt::from_f32(6.0));
        for (name, spec) in &form.fields {
            if !(spec.x.is_finite() && spec.y.is_finite()) {
                continue;
            }
            let (x, y) = (spec.x, spec.y);
            canvas.move_to(Pt::from_f32(x - CROSSHAIR_ARM), Pt::from_f32(y));
            canvas.line_to(Pt::from_f32(x + CROSSHAIR_ARM), Pt::from_f32(y));
            canvas.move_to(Pt::from_f32(x), Pt::from_f32(y - CROSSHAIR_ARM));
            canvas.line_to(Pt::from_f32(x), Pt::from_f32(y + CROSSHAIR_ARM));
            canvas.stroke();
            canvas.draw_string(
                Pt::from_f32(x + CROSSHAIR_ARM + 1.0),
                Pt::from_f32(y + 1.0),
                format!("{name} ({x}, {y})"),
            );
        }
        canvas.finish()
    }
}

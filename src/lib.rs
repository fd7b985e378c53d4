mod cache;
mod canvas;
mod compose;
mod config;
mod convert;
mod discovery;
mod error;
mod fill;
mod font;
mod glyph_report;
mod mapping;
mod overlay;
mod pdf;
mod registry;
mod text_blocks;
mod types;
mod validate;

pub use cache::{BoundedDiscoveryCache, DiscoveryCache, DocumentKey};
pub use canvas::{Canvas, Command, Page};
pub use compose::{compose, compose_documents, first_page_size, load_document, page_count};
pub use config::{ConverterConfig, EngineConfig, FooterConfig, SynonymMatch};
pub use convert::{DocumentConverter, SofficeConverter, is_pdf};
pub use discovery::{
    AnnotationWidgetStrategy, DiscoveredField, DiscoveredFields, DiscoveryEngine, DiscoveryStrategy,
    FieldSource, HeuristicLabelStrategy, MergeMode, NativeFieldStrategy, PageWidget, attach_labels,
    label_text, merge_into, page_widgets,
};
pub use error::{FormError, Result};
pub use fill::{FillSummary, fill_document, fill_native_fields, pdf_text_string};
pub use font::{BUILTIN_FONT, FontRegistry, FontStatus, LoadedFont};
pub use formstamp_catalog::{CatalogMetadata, SynonymDef};
pub use glyph_report::{GlyphCoverageReport, MissingGlyph};
pub use mapping::{FieldMappingResolver, FieldQuery, MappingReport, MappingResult, MatchTier};
pub use overlay::{ELLIPSIS, FormData, OverlayOutput, OverlayRenderer, display_value, truncate_display};
pub use registry::{FieldInfo, FieldKind, FieldSpec, FormDefinition, FormRegistry, FormSummary, PageFormat};
pub use text_blocks::{TextBlock, document_text_blocks};
pub use types::{Color, FieldRect, Pt, Size};
pub use validate::{CoordinateIssue, first_violation};

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use std::sync::Arc;

const DISCOVERED_FORM_ID: &str = "discovered";
const WIDGET_TEXT_INSET: f32 = 2.0;

/// How `auto_fill` produced its document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FillPath {
    /// Values were written into the document's own AcroForm fields.
    NativeFields,
    /// Text was stamped at widget rectangles found on the first page.
    WidgetOverlay,
    /// Text was stamped using a registered form's anchors.
    TemplateOverlay { form_id: String },
}

#[derive(Debug)]
pub struct AutoFillOutcome {
    pub bytes: Vec<u8>,
    pub path: FillPath,
    pub mapping: MappingReport,
}

pub struct FormStamp {
    config: EngineConfig,
    registry: FormRegistry,
    fonts: FontRegistry,
    discovery: DiscoveryEngine,
    resolver: FieldMappingResolver,
    cache: Option<Arc<dyn DiscoveryCache>>,
    converter: Arc<dyn DocumentConverter>,
    validation: IndexMap<String, bool>,
}

pub struct FormStampBuilder {
    config: EngineConfig,
    registry: Option<FormRegistry>,
    fonts: Option<FontRegistry>,
    discovery: Option<DiscoveryEngine>,
    // `Some(None)` disables caching regardless of the configured size.
    cache: Option<Option<Arc<dyn DiscoveryCache>>>,
    converter: Option<Arc<dyn DocumentConverter>>,
}

impl Default for FormStampBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FormStampBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            registry: None,
            fonts: None,
            discovery: None,
            cache: None,
            converter: None,
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the compiled-in catalog.
    pub fn registry(mut self, registry: FormRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Skips font discovery and uses `fonts` as is.
    pub fn fonts(mut self, fonts: FontRegistry) -> Self {
        self.fonts = Some(fonts);
        self
    }

    pub fn discovery_engine(mut self, engine: DiscoveryEngine) -> Self {
        self.discovery = Some(engine);
        self
    }

    pub fn discovery_cache(mut self, cache: Arc<dyn DiscoveryCache>) -> Self {
        self.cache = Some(Some(cache));
        self
    }

    pub fn without_discovery_cache(mut self) -> Self {
        self.cache = Some(None);
        self
    }

    pub fn converter(mut self, converter: Arc<dyn DocumentConverter>) -> Self {
        self.converter = Some(converter);
        self
    }

    pub fn build(self) -> Result<FormStamp> {
        let config = self.config.validated()?;
        let registry = match self.registry {
            Some(registry) => registry,
            None => FormRegistry::builtin()?,
        };
        let fonts = self
            .fonts
            .unwrap_or_else(|| FontRegistry::discover(&config.font_paths));
        let cache = self.cache.unwrap_or_else(|| {
            (config.discovery_cache_entries > 0).then(|| {
                Arc::new(BoundedDiscoveryCache::new(config.discovery_cache_entries))
                    as Arc<dyn DiscoveryCache>
            })
        });
        let converter = self
            .converter
            .unwrap_or_else(|| Arc::new(SofficeConverter::from_config(&config.converter)));

        let validation = validate::validate_all(&registry);
        let invalid = validation.values().filter(|ok| !**ok).count();
        if invalid > 0 {
            log::warn!("{invalid} of {} forms have out-of-bounds anchors", validation.len());
        }
        log::info!(
            "formstamp ready: {} forms, font {}, catalog {}",
            registry.len(),
            fonts.font_label(),
            formstamp_catalog::CATALOG_VERSION
        );

        Ok(FormStamp {
            resolver: FieldMappingResolver::new(config.synonym_match),
            discovery: self.discovery.unwrap_or_default(),
            config,
            registry,
            fonts,
            cache,
            converter,
            validation,
        })
    }
}

impl FormStamp {
    pub fn builder() -> FormStampBuilder {
        FormStampBuilder::new()
    }

    pub fn new(config: EngineConfig) -> Result<Self> {
        Self::builder().config(config).build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &FormRegistry {
        &self.registry
    }

    pub fn forms(&self) -> Vec<FormSummary> {
        self.registry.list_forms()
    }

    pub fn form_fields(&self, form_id: &str) -> Result<Vec<FieldInfo>> {
        self.registry.form_fields(form_id)
    }

    pub fn font_status(&self) -> FontStatus {
        self.fonts.status()
    }

    pub fn catalog_metadata(&self) -> CatalogMetadata {
        formstamp_catalog::metadata()
    }

    pub fn validate(&self, form_id: &str, page_width: f32, page_height: f32) -> Result<bool> {
        validate::validate(&self.registry, form_id, page_width, page_height)
    }

    /// Fresh check of every registered form against its own page size.
    pub fn validate_all(&self) -> IndexMap<String, bool> {
        validate::validate_all(&self.registry)
    }

    /// Result of the check run when the engine was built.
    pub fn startup_validation(&self) -> &IndexMap<String, bool> {
        &self.validation
    }

    fn renderer(&self) -> OverlayRenderer<'_> {
        OverlayRenderer::new(&self.fonts, &self.config)
    }

    fn now() -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }

    pub fn render_overlay(&self, form_id: &str, data: &FormData) -> Result<OverlayOutput> {
        let form = self.registry.get_form(form_id)?;
        self.renderer().render(form, data, Some(Self::now()))
    }

    pub fn render_blank_template(&self, form_id: &str) -> Result<Vec<u8>> {
        let form = self.registry.get_form(form_id)?;
        pdf::page_to_pdf_bytes(&self.renderer().blank_template(form), &self.fonts)
    }

    pub fn render_calibration(&self, form_id: &str) -> Result<Vec<u8>> {
        let form = self.registry.get_form(form_id)?;
        pdf::page_to_pdf_bytes(&self.renderer().calibration_page(form), &self.fonts)
    }

    /// Overlay stamped onto a freshly generated blank template.
    pub fn generate(&self, form_id: &str, data: &FormData) -> Result<Vec<u8>> {
        let form = self.registry.get_form(form_id)?;
        self.stamp(form, data, None)
    }

    /// Overlay stamped onto the first page of `base`. An unreadable or
    /// page-less base is replaced by the blank template.
    pub fn generate_with_base(&self, form_id: &str, data: &FormData, base: &[u8]) -> Result<Vec<u8>> {
        let form = self.registry.get_form(form_id)?;
        self.stamp(form, data, Some(base))
    }

    /// Like `generate_with_base`, converting `source` to PDF first when it
    /// is not one already. Conversion failures fall back to the blank
    /// template.
    pub async fn generate_from_source(
        &self,
        form_id: &str,
        data: &FormData,
        source: &[u8],
        file_name: &str,
    ) -> Result<Vec<u8>> {
        let form = self.registry.get_form(form_id)?;
        if is_pdf(source) {
            return self.stamp(form, data, Some(source));
        }
        match self.converter.convert_to_pdf(source, file_name).await {
            Ok(converted) => self.stamp(form, data, Some(&converted)),
            Err(err) => {
                log::warn!(
                    "{} could not convert {file_name}, using blank template: {err}",
                    self.converter.name()
                );
                self.stamp(form, data, None)
            }
        }
    }

    fn stamp(&self, form: &FormDefinition, data: &FormData, base: Option<&[u8]>) -> Result<Vec<u8>> {
        let overlay = self.renderer().render(form, data, Some(Self::now()))?;
        if let Some(base) = base {
            match compose::page_count(base) {
                Ok(0) => log::warn!("base document for {} has no pages, using blank template", form.id),
                Ok(_) => match compose::compose(base, &overlay.bytes) {
                    Ok(bytes) => return Ok(bytes),
                    Err(err) => log::warn!("could not stamp {} onto base document: {err}", form.id),
                },
                Err(err) => log::warn!("base document for {} is unusable, using blank template: {err}", form.id),
            }
        }
        let blank = pdf::page_to_pdf_bytes(&self.renderer().blank_template(form), &self.fonts)?;
        compose::compose(&blank, &overlay.bytes)
    }

    /// Discovered fields for `document`, served from the cache when the
    /// same bytes were seen before.
    pub fn discover(&self, document: &[u8]) -> Arc<DiscoveredFields> {
        let Some(cache) = &self.cache else {
            return Arc::new(self.discovery.discover(document));
        };
        let key = DocumentKey::of(document);
        if let Some(hit) = cache.get(&key) {
            log::debug!("discovery cache hit for {}", key.as_str());
            return hit;
        }
        let fields = Arc::new(self.discovery.discover(document));
        cache.insert(key, Arc::clone(&fields));
        fields
    }

    /// Drops any cached discovery result for `document`.
    pub fn invalidate_discovery(&self, document: &[u8]) -> bool {
        self.cache
            .as_ref()
            .is_some_and(|cache| cache.invalidate(&DocumentKey::of(document)))
    }

    pub fn map_fields(&self, fields: &DiscoveredFields, data: &FormData) -> MappingReport {
        self.resolver.resolve_discovered(fields.values(), data)
    }

    /// Fills an arbitrary uploaded document. Tries native AcroForm fields,
    /// then widgets on the first page, then the fallback form's anchors.
    pub fn auto_fill(&self, document: &[u8], data: &FormData) -> Result<AutoFillOutcome> {
        let discovered = self.discover(document);

        let native: Vec<&DiscoveredField> = discovered.values().filter(|f| f.is_native()).collect();
        if !native.is_empty() {
            let mapping = self.resolver.resolve_discovered(native.iter().copied(), data);
            match fill::fill_native_fields(document, &mapping.values()) {
                Ok((bytes, summary)) => {
                    log::info!(
                        "auto-fill wrote {} of {} native fields",
                        summary.filled.len(),
                        native.len()
                    );
                    return Ok(AutoFillOutcome {
                        bytes,
                        path: FillPath::NativeFields,
                        mapping,
                    });
                }
                Err(err) => log::warn!("native fill failed, trying overlay: {err}"),
            }
        }

        let widgets: Vec<&DiscoveredField> = discovered
            .values()
            .filter(|f| !f.is_native() && f.page == 0)
            .collect();
        if !widgets.is_empty() {
            match self.widget_overlay(document, &widgets, data) {
                Ok(Some(outcome)) => return Ok(outcome),
                Ok(None) => log::debug!("no caller value matched any of {} widgets", widgets.len()),
                Err(err) => log::warn!("widget overlay failed, using fallback form: {err}"),
            }
        }

        self.template_overlay(document, data)
    }

    fn widget_overlay(
        &self,
        document: &[u8],
        widgets: &[&DiscoveredField],
        data: &FormData,
    ) -> Result<Option<AutoFillOutcome>> {
        let mapping = self.resolver.resolve_discovered(widgets.iter().copied(), data);
        if mapping.matched_count() == 0 {
            return Ok(None);
        }
        let base = compose::load_document(document, "uploaded")?;
        let size = compose::first_page_size(&base).unwrap_or_else(Size::a4);
        let form = self.form_from_widgets(widgets, size);
        let overlay = self.renderer().render(&form, &mapping.values(), Some(Self::now()))?;
        let bytes = compose::compose_documents(base, compose::load_document(&overlay.bytes, "overlay")?)
            .and_then(|mut merged| {
                let mut out = Vec::new();
                merged.save_to(&mut out)?;
                Ok(out)
            })?;
        Ok(Some(AutoFillOutcome {
            bytes,
            path: FillPath::WidgetOverlay,
            mapping,
        }))
    }

    /// Transient form whose anchors sit inside each widget rectangle.
    fn form_from_widgets(&self, widgets: &[&DiscoveredField], size: Size) -> FormDefinition {
        let font_size = self.config.font_size;
        let fields = widgets
            .iter()
            .map(|w| {
                let rect = w.rect;
                let rise = ((rect.height() - font_size) / 2.0).max(0.0);
                let mut spec = FieldSpec::text(
                    rect.x0 + WIDGET_TEXT_INSET,
                    rect.y0 + rise,
                    w.label.clone().unwrap_or_else(|| w.name.clone()),
                );
                if rect.height() >= font_size * 2.5 {
                    spec.kind = FieldKind::Multiline;
                    spec.y = rect.y1 - font_size - WIDGET_TEXT_INSET;
                }
                (w.name.clone(), spec)
            })
            .collect();
        FormDefinition {
            id: DISCOVERED_FORM_ID.to_string(),
            name: "Discovered fields".to_string(),
            category: String::new(),
            page_size: PageFormat::Custom {
                width: size.width.to_f32(),
                height: size.height.to_f32(),
            },
            fields,
        }
    }

    fn fallback_form(&self) -> Result<&FormDefinition> {
        if let Some(form_id) = &self.config.fallback_form_id {
            match self.registry.get_form(form_id) {
                Ok(form) => return Ok(form),
                Err(_) => log::warn!("fallback form {form_id} is not registered, using the first form"),
            }
        }
        self.registry
            .first()
            .ok_or_else(|| FormError::UnknownForm("<no forms registered>".to_string()))
    }

    fn template_overlay(&self, document: &[u8], data: &FormData) -> Result<AutoFillOutcome> {
        let form = self.fallback_form()?;
        let queries: Vec<FieldQuery> = form
            .fields
            .iter()
            .map(|(name, spec)| FieldQuery::named(name.as_str()).with_label(spec.label.as_str()))
            .collect();
        let mapping = self.resolver.resolve(&queries, data);
        let bytes = self.stamp(form, &mapping.values(), Some(document))?;
        Ok(AutoFillOutcome {
            bytes,
            path: FillPath::TemplateOverlay {
                form_id: form.id.clone(),
            },
            mapping,
        })
    }
}

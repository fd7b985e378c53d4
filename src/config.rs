//! Engine configuration.

use crate::error::{FormError, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_FONT_PATHS: [&str; 8] = [
    "/usr/share/fonts/truetype/nanum/NanumGothic.ttf",
    "/usr/share/fonts/nanum/NanumGothic.ttf",
    "/usr/share/fonts/opentype/noto/NotoSansCJKkr-Regular.otf",
    "/usr/share/fonts/noto-cjk/NotoSansCJKkr-Regular.otf",
    "/usr/share/fonts/truetype/noto/NotoSansKR-Regular.ttf",
    "C:\\Windows\\Fonts\\malgun.ttf",
    "/System/Library/Fonts/Supplemental/AppleGothic.ttf",
    "/Library/Fonts/AppleGothic.ttf",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynonymMatch {
    /// Concept terms match anywhere inside the field name or label.
    #[default]
    Substring,
    /// English aliases must match whole `_`/space/punctuation-delimited tokens.
    Token,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FooterConfig {
    pub enabled: bool,
    pub x: f32,
    pub y: f32,
    pub font_size: f32,
}

impl Default for FooterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            x: 40.0,
            y: 20.0,
            font_size: 7.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    pub program: String,
    pub timeout_secs: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            program: "soffice".to_string(),
            timeout_secs: 30,
        }
    }
}

impl ConverterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Candidate font files, tried in order. The first one that parses wins.
    pub font_paths: Vec<PathBuf>,
    pub font_size: f32,
    pub max_display_len: usize,
    /// Added to every anchor's y before drawing the baseline.
    pub baseline_offset: f32,
    pub footer: FooterConfig,
    /// Template used when auto-fill finds nothing usable. `None` picks the
    /// first registered form.
    pub fallback_form_id: Option<String>,
    pub converter: ConverterConfig,
    /// Zero disables the discovery cache.
    pub discovery_cache_entries: usize,
    pub synonym_match: SynonymMatch,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            font_paths: DEFAULT_FONT_PATHS.iter().map(PathBuf::from).collect(),
            font_size: 10.0,
            max_display_len: 30,
            baseline_offset: 2.0,
            footer: FooterConfig::default(),
            fallback_form_id: None,
            converter: ConverterConfig::default(),
            discovery_cache_entries: 64,
            synonym_match: SynonymMatch::Substring,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(text)
            .map_err(|err| FormError::InvalidConfiguration(err.to_string()))?;
        config.validated()
    }

    pub fn from_env() -> Self {
        Self::from_env_with(|key| std::env::var(key).ok())
    }

    /// Applies `FORMSTAMP_*` overrides read through `lookup` on top of the
    /// defaults. Unparseable values are logged and ignored.
    pub fn from_env_with<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = EngineConfig::default();
        if let Some(paths) = lookup("FORMSTAMP_FONT_PATH") {
            let mut extra: Vec<PathBuf> = paths
                .split(':')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .collect();
            extra.append(&mut config.font_paths);
            config.font_paths = extra;
        }
        if let Some(raw) = lookup("FORMSTAMP_MAX_DISPLAY_LEN") {
            match raw.trim().parse::<usize>() {
                Ok(len) if len > 3 => config.max_display_len = len,
                _ => log::warn!("ignoring FORMSTAMP_MAX_DISPLAY_LEN={raw:?}: expected an integer above 3"),
            }
        }
        if let Some(form_id) = lookup("FORMSTAMP_FALLBACK_FORM") {
            let form_id = form_id.trim();
            if !form_id.is_empty() {
                config.fallback_form_id = Some(form_id.to_string());
            }
        }
        if let Some(program) = lookup("FORMSTAMP_CONVERTER") {
            let program = program.trim();
            if !program.is_empty() {
                config.converter.program = program.to_string();
            }
        }
        if let Some(raw) = lookup("FORMSTAMP_CONVERTER_TIMEOUT_SECS") {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.converter.timeout_secs = secs,
                _ => log::warn!("ignoring FORMSTAMP_CONVERTER_TIMEOUT_SECS={raw:?}: expected a positive integer"),
            }
        }
        config
    }

    /// Rejects values the renderer cannot honor.
    pub fn validated(self) -> Result<Self> {
        if self.max_display_len <= 3 {
            return Err(FormError::InvalidConfiguration(format!(
                "max_display_len must exceed the ellipsis width, got {}",
                self.max_display_len
            )));
        }
        if !(self.font_size.is_finite() && self.font_size > 0.0) {
            return Err(FormError::InvalidConfiguration(format!(
                "font_size must be positive, got {}",
                self.font_size
            )));
        }
        if !(self.footer.font_size.is_finite() && self.footer.font_size > 0.0) {
            return Err(FormError::InvalidConfiguration(format!(
                "footer.font_size must be positive, got {}",
                self.footer.font_size
            )));
        }
        if !self.baseline_offset.is_finite() {
            return Err(FormError::InvalidConfiguration(format!(
                "baseline_offset must be finite, got {}",
                self.baseline_offset
            )));
        }
        if self.converter.timeout_secs == 0 {
            return Err(FormError::InvalidConfiguration(
                "converter.timeout_secs must be positive".to_string(),
            ));
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_display_len, 30);
        assert_eq!(config.converter.timeout(), Duration::from_secs(30));
        assert_eq!(config.converter.program, "soffice");
        assert_eq!(config.footer.font_size, 7.0);
        assert_eq!(config.synonym_match, SynonymMatch::Substring);
        assert!(!config.font_paths.is_empty());
    }

    #[test]
    fn env_overrides_prepend_font_paths_and_ignore_garbage() {
        let config = EngineConfig::from_env_with(env(&[
            ("FORMSTAMP_FONT_PATH", "/opt/fonts/a.ttf:/opt/fonts/b.ttf"),
            ("FORMSTAMP_MAX_DISPLAY_LEN", "not-a-number"),
            ("FORMSTAMP_CONVERTER_TIMEOUT_SECS", "5"),
            ("FORMSTAMP_FALLBACK_FORM", "MSDS_관리대장"),
        ]));
        assert_eq!(config.font_paths[0], PathBuf::from("/opt/fonts/a.ttf"));
        assert_eq!(config.font_paths[1], PathBuf::from("/opt/fonts/b.ttf"));
        assert_eq!(config.font_paths.len(), DEFAULT_FONT_PATHS.len() + 2);
        assert_eq!(config.max_display_len, 30);
        assert_eq!(config.converter.timeout_secs, 5);
        assert_eq!(config.fallback_form_id.as_deref(), Some("MSDS_관리대장"));
    }

    #[test]
    fn json_config_fills_missing_fields_with_defaults() {
        let config = EngineConfig::from_json_str(
            r#"{"max_display_len": 12, "synonym_match": "token", "footer": {"enabled": false}}"#,
        )
        .unwrap();
        assert_eq!(config.max_display_len, 12);
        assert_eq!(config.synonym_match, SynonymMatch::Token);
        assert!(!config.footer.enabled);
        assert_eq!(config.footer.x, 40.0);
        assert_eq!(config.font_size, 10.0);
    }

    #[test]
    fn json_config_rejects_unusable_values() {
        let err = EngineConfig::from_json_str(r#"{"max_display_len": 2}"#).unwrap_err();
        assert!(matches!(err, FormError::InvalidConfiguration(_)));
        assert!(EngineConfig::from_json_str("{not json").is_err());
    }

    #[test]
    fn programmatic_configs_go_through_the_same_checks() {
        for config in [
            EngineConfig { font_size: f32::NAN, ..EngineConfig::default() },
            EngineConfig { font_size: 0.0, ..EngineConfig::default() },
            EngineConfig { font_size: -4.0, ..EngineConfig::default() },
            EngineConfig { max_display_len: 3, ..EngineConfig::default() },
        ] {
            assert!(matches!(config.validated(), Err(FormError::InvalidConfiguration(_))));
        }
        assert!(EngineConfig::default().validated().is_ok());
    }

    #[test]
    fn json_config_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("formstamp.json");
        std::fs::write(&path, r#"{"font_paths": ["/srv/fonts/NanumGothic.ttf"]}"#).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let config = EngineConfig::from_json_str(&text).unwrap();
        assert_eq!(config.font_paths, vec![PathBuf::from("/srv/fonts/NanumGothic.ttf")]);
    }
}

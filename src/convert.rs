//! External document conversion for non-PDF sources.
//!
//! Runs an office converter (LibreOffice `soffice` by default) in a scratch
//! directory with a hard timeout. Callers treat any error here as "use a
//! blank template instead".

use crate::config::ConverterConfig;
use crate::error::{FormError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

const SOURCE_STEM: &str = "source";

/// True when `bytes` already look like a PDF and need no conversion.
pub fn is_pdf(bytes: &[u8]) -> bool {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    bytes[start..].starts_with(b"%PDF-")
}

#[async_trait]
pub trait DocumentConverter: Send + Sync {
    fn name(&self) -> &str;

    /// Converts `source` to PDF bytes. `file_name` only contributes its
    /// extension, which converters use to pick an import filter.
    async fn convert_to_pdf(&self, source: &[u8], file_name: &str) -> Result<Vec<u8>>;
}

pub struct SofficeConverter {
    program: String,
    leading_args: Vec<String>,
    timeout: Duration,
    scratch_root: PathBuf,
}

impl SofficeConverter {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            leading_args: Vec::new(),
            timeout,
            scratch_root: std::env::temp_dir(),
        }
    }

    pub fn from_config(config: &ConverterConfig) -> Self {
        Self::new(config.program.clone(), config.timeout())
    }

    /// Arguments placed before the conversion flags, e.g. for wrappers like
    /// `flatpak run org.libreoffice.LibreOffice`.
    pub fn with_leading_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leading_args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn run(&self, workdir: &Path, source: &[u8], extension: &str) -> Result<Vec<u8>> {
        let input = workdir.join(format!("{SOURCE_STEM}.{extension}"));
        tokio::fs::write(&input, source).await?;

        let child = Command::new(&self.program)
            .args(&self.leading_args)
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(workdir)
            .arg(&input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| FormError::Conversion(format!("failed to start {}: {err}", self.program)))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(FormError::Conversion(format!(
                    "{} timed out after {}s",
                    self.program,
                    self.timeout.as_secs_f32()
                )));
            }
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FormError::Conversion(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        let produced = workdir.join(format!("{SOURCE_STEM}.pdf"));
        let pdf = tokio::fs::read(&produced).await.map_err(|err| {
            FormError::Conversion(format!("converter produced no PDF at {}: {err}", produced.display()))
        })?;
        if !is_pdf(&pdf) {
            return Err(FormError::Conversion("converter output is not a PDF".to_string()));
        }
        Ok(pdf)
    }
}

#[async_trait]
impl DocumentConverter for SofficeConverter {
    fn name(&self) -> &str {
        &self.program
    }

    async fn convert_to_pdf(&self, source: &[u8], file_name: &str) -> Result<Vec<u8>> {
        let workdir = self
            .scratch_root
            .join(format!("formstamp-convert-{}", uuid::Uuid::new_v4()));
        tokio::fs::create_dir_all(&workdir).await?;
        let result = self.run(&workdir, source, &source_extension(file_name)).await;
        if let Err(err) = tokio::fs::remove_dir_all(&workdir).await {
            log::debug!("could not remove {}: {err}", workdir.display());
        }
        result
    }
}

fn source_extension(file_name: &str) -> String {
    let ext: String = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(8)
        .collect::<String>()
        .to_ascii_lowercase();
    if ext.is_empty() { "bin".to_string() } else { ext }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdf_sniffing_skips_leading_whitespace() {
        assert!(is_pdf(b"%PDF-1.7\n"));
        assert!(is_pdf(b"\r\n %PDF-1.4"));
        assert!(!is_pdf(b"PK\x03\x04"));
        assert!(!is_pdf(b""));
    }

    #[test]
    fn extensions_are_sanitized() {
        assert_eq!(source_extension("report.DOCX"), "docx");
        assert_eq!(source_extension("../../etc/passwd"), "bin");
        assert_eq!(source_extension("a.h;wp"), "hwp");
        assert_eq!(source_extension("no_extension"), "bin");
    }

    #[tokio::test]
    async fn missing_program_is_a_conversion_error() {
        let scratch = tempfile::tempdir().unwrap();
        let converter = SofficeConverter::new("formstamp-no-such-converter", Duration::from_secs(5))
            .with_scratch_root(scratch.path());
        let err = converter.convert_to_pdf(b"hello", "a.docx").await.unwrap_err();
        assert!(matches!(err, FormError::Conversion(_)), "{err:?}");
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn fake_converter_output_is_returned() {
        let scratch = tempfile::tempdir().unwrap();
        let script = scratch.path().join("fake-soffice.sh");
        // Positional args: --headless --convert-to pdf --outdir <dir> <input>.
        std::fs::write(&script, "printf '%%PDF-1.4 fake' > \"$5/source.pdf\"\n").unwrap();
        let work = scratch.path().join("work");
        std::fs::create_dir_all(&work).unwrap();
        let converter = SofficeConverter::new("sh", Duration::from_secs(10))
            .with_leading_args([script.to_string_lossy().to_string()])
            .with_scratch_root(&work);
        let pdf = converter.convert_to_pdf(b"docx bytes", "form.docx").await.unwrap();
        assert_eq!(pdf, b"%PDF-1.4 fake");
        assert_eq!(std::fs::read_dir(&work).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn slow_converter_times_out() {
        let scratch = tempfile::tempdir().unwrap();
        let converter = SofficeConverter::new("sh", Duration::from_millis(200))
            .with_leading_args(["-c", "sleep 5", "sh"])
            .with_scratch_root(scratch.path());
        let err = converter.convert_to_pdf(b"x", "a.odt").await.unwrap_err();
        match err {
            FormError::Conversion(msg) => assert!(msg.contains("timed out"), "{msg}"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_converter_reports_stderr() {
        let scratch = tempfile::tempdir().unwrap();
        let converter = SofficeConverter::new("sh", Duration::from_secs(10))
            .with_leading_args(["-c", "echo boom >&2; exit 3", "sh"])
            .with_scratch_root(scratch.path());
        let err = converter.convert_to_pdf(b"x", "a.odt").await.unwrap_err();
        match err {
            FormError::Conversion(msg) => assert!(msg.contains("boom"), "{msg}"),
            other => panic!("unexpected error {other:?}"),
        }
    }
}

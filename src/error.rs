use thiserror::Error;

pub type Result<T> = std::result::Result<T, FormError>;

#[derive(Debug, Error)]
pub enum FormError {
    #[error("unknown form: {0}")]
    UnknownForm(String),
    #[error("unknown field {field} on form {form_id}")]
    UnknownField { form_id: String, field: String },
    #[error("pdf error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("font error: {0}")]
    Font(String),
    #[error("conversion failed: {0}")]
    Conversion(String),
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl FormError {
    /// True when the caller referenced something that does not exist.
    /// These are the only errors the public entry points surface.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            FormError::UnknownForm(_) | FormError::UnknownField { .. }
        )
    }
}

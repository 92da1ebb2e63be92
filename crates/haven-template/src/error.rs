//! Error types for template rendering

use thiserror::Error;

/// Result type for template operations
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Errors that can occur while compiling or rendering a template
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Invalid template syntax
    #[error("invalid template syntax: {message}")]
    Syntax { message: String },

    /// Undefined variable in template
    #[error("undefined variable: {name}")]
    Undefined { name: String },

    /// Failed to render template
    #[error("failed to render template: {message}")]
    Render { message: String },
}

impl From<minijinja::Error> for TemplateError {
    fn from(err: minijinja::Error) -> Self {
        match err.kind() {
            minijinja::ErrorKind::SyntaxError => TemplateError::Syntax {
                message: err.to_string(),
            },
            minijinja::ErrorKind::UndefinedError => TemplateError::Undefined {
                name: err.to_string(),
            },
            _ => TemplateError::Render {
                message: err.to_string(),
            },
        }
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("domain validation failed: {message}")]
    Validation { message: String },
    #[error("stored value `{value}` is not a valid {field}")]
    Corrupt { field: &'static str, value: String },
}

impl DomainError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn corrupt(field: &'static str, value: impl Into<String>) -> Self {
        Self::Corrupt {
            field,
            value: value.into(),
        }
    }
}

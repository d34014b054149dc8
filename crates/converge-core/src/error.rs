//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid document {index}: {message}")]
    InvalidDocument { index: usize, message: String },

    #[error("Invalid resource: {message}")]
    InvalidResource { message: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid label selector '{selector}': {message}")]
    InvalidSelector { selector: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

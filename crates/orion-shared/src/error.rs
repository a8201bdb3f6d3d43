use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum OrionError {
    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Malformed file reference: {0}")]
    MalformedFileRef(String),
}

//! Error taxonomy for step configuration and archive construction.
//!
//! Everything fallible returns [`BuildstampResult`]; the typed errors below
//! travel inside [`anyhow::Error`] so callers that care can downcast while
//! everything else just bubbles up with context. A work function's own error
//! is propagated verbatim and is deliberately not wrapped in any of these.

use std::path::PathBuf;

use thiserror::Error;

pub type BuildstampResult<T> = anyhow::Result<T>;

/// A build step was described in a way that can never run correctly, such as
/// declaring no outputs or pointing a depfile at itself. Never retried.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ConfigurationError(String);

impl ConfigurationError {
    pub fn new(message: impl Into<String>) -> ConfigurationError {
        ConfigurationError(message.into())
    }
}

/// A declared input path did not exist when its fingerprint was needed.
#[derive(Debug, Error)]
#[error("declared input `{path}` does not exist")]
pub struct MissingInputError {
    pub path: PathBuf,
}

/// An archive entry path that must not be written.
#[derive(Debug, Error)]
pub enum InvalidPathError {
    #[error("absolute archive path `{0}`")]
    Absolute(String),
    #[error("non-canonical archive path `{0}`")]
    NonCanonical(String),
    #[error("duplicate archive path `{0}`")]
    Duplicate(String),
    #[error("refusing to clobber existing path `{}`", .0.display())]
    Clobber(PathBuf),
}

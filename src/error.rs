//! Error taxonomy for grasp mining.

use std::path::PathBuf;

use thiserror::Error;

/// Invalid or missing setup input. Fatal: raised before any mining starts.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Wrong {what} path: \"{}\"", path.display())]
    MissingDirectory { what: &'static str, path: PathBuf },

    #[error("File does not exist: \"{}\"", path.display())]
    MissingFile { path: PathBuf },

    #[error("Output directory not specified")]
    MissingOutputDir,

    #[error("No models to mine")]
    NoModels,
}

/// Malformed predefined-grasps input. The whole seed file is rejected.
#[derive(Debug, Error, PartialEq)]
#[error("line {line}: {kind}")]
pub struct FormatError {
    /// 1-based line number in the source text
    pub line: usize,
    pub kind: FormatErrorKind,
}

#[derive(Debug, Error, PartialEq)]
pub enum FormatErrorKind {
    #[error("wrong {line_kind} type code: expected {expected}, found '{found}'")]
    WrongTypeCode {
        line_kind: &'static str,
        expected: i64,
        found: String,
    },

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("empty line")]
    EmptyLine,

    #[error("pose needs 7 values, found {0}")]
    PoseArity(usize),
}

impl FormatError {
    pub fn new(line: usize, kind: FormatErrorKind) -> Self {
        Self { line, kind }
    }
}

/// Failures of a simulator session.
///
/// `Launch` and `Lost` abort the owning job; `Evaluation` only discards the
/// candidate being evaluated.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SessionError {
    #[error("simulator launch failed: {0}")]
    Launch(String),

    #[error("simulator session lost: {0}")]
    Lost(String),

    #[error("evaluation failed: {0}")]
    Evaluation(String),

    #[error("simulator protocol error: {0}")]
    Protocol(String),
}

impl SessionError {
    /// Whether the session can no longer be used after this error
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SessionError::Evaluation(_))
    }
}

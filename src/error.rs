use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum PipelineError {
    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    InvalidConfig(String),

    #[error("input file not found: {0}")]
    MissingInput(String),

    #[error("{file}: missing required column `{field}` (tried: {candidates})")]
    #[diagnostic(help("check the header row of the source file"))]
    MissingColumn {
        file: String,
        field: String,
        candidates: String,
    },

    #[error("CSV error in {file}: {message}")]
    Csv { file: String, message: String },

    #[error("invalid relation value: {0:?} (expected 'good' or 'bad')")]
    InvalidRelation(String),

    #[error("{file} line {line}: {message}")]
    InvalidCompanionRow {
        file: String,
        line: u64,
        message: String,
    },

    #[error("GloBI request failed: {0}")]
    GlobiHttp(String),

    #[error("GloBI returned status {status}: {message}")]
    GlobiStatus { status: u16, message: String },

    #[error("ALA request failed: {0}")]
    AlaHttp(String),

    #[error("ALA returned status {status}: {message}")]
    AlaStatus { status: u16, message: String },

    #[error("Wikipedia request failed: {0}")]
    WikipediaHttp(String),

    #[error("Wikipedia returned status {status}: {message}")]
    WikipediaStatus { status: u16, message: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("pipeline worker stopped without a result: {0}")]
    WorkerStopped(String),
}

impl PipelineError {
    pub fn csv(file: impl Into<String>, err: impl ToString) -> Self {
        PipelineError::Csv {
            file: file.into(),
            message: err.to_string(),
        }
    }

    /// Failures of an external service, including unparseable replies.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            PipelineError::GlobiHttp(_)
                | PipelineError::GlobiStatus { .. }
                | PipelineError::AlaHttp(_)
                | PipelineError::AlaStatus { .. }
                | PipelineError::WikipediaHttp(_)
                | PipelineError::WikipediaStatus { .. }
                | PipelineError::MalformedResponse(_)
        )
    }
}

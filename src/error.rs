use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("invalid query identity: {0:?}")]
    InvalidQueryIdentity(String),

    #[error("invalid DOI: {0}")]
    InvalidDoi(String),

    #[error("invalid date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("no query identities given (use --authors, --authors-file or the config file)")]
    NoQueryIdentities,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("repository rejected the request with status {status}: {message}")]
    #[diagnostic(help("set FIGSHARE_TOKEN to a valid personal token"))]
    Authentication { status: u16, message: String },

    #[error("unusable response: {0}")]
    TransientRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cache file {path} is unreadable: {reason}")]
    CorruptedCache { path: PathBuf, reason: String },

    #[error("Figshare request failed: {0}")]
    FigshareHttp(String),

    #[error("Figshare returned status {status}: {message}")]
    FigshareStatus { status: u16, message: String },

    #[error("DOI request failed: {0}")]
    DoiHttp(String),

    #[error("DOI resolver returned status {status}: {message}")]
    DoiStatus { status: u16, message: String },

    #[error("shortDOI request failed: {0}")]
    ShortDoiHttp(String),

    #[error("Crossref request failed: {0}")]
    CrossrefHttp(String),

    #[error("Crossref returned status {status}: {message}")]
    CrossrefStatus { status: u16, message: String },

    #[error("malformed BibTeX: {0}")]
    BibtexParse(String),

    #[error("every query identity failed authentication")]
    AllAuthenticationFailed,

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("export failed: {0}")]
    Export(String),
}

impl HarvestError {
    /// Errors that say nothing about the resource itself and may succeed on a
    /// later run.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            HarvestError::TransientRequest(_)
                | HarvestError::FigshareHttp(_)
                | HarvestError::FigshareStatus { .. }
                | HarvestError::DoiHttp(_)
                | HarvestError::DoiStatus { .. }
                | HarvestError::ShortDoiHttp(_)
                | HarvestError::CrossrefHttp(_)
                | HarvestError::CrossrefStatus { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_definitive() {
        assert!(!HarvestError::NotFound("10.1/x".to_string()).is_transient());
        assert!(HarvestError::DoiStatus {
            status: 503,
            message: "busy".to_string()
        }
        .is_transient());
    }
}

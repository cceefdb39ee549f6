use crate::model::DocId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaybookError {
    #[error("Document not found: {0}")]
    NotFound(DocId),

    #[error("Invalid document: {0}")]
    Validation(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("{0} is read-only")]
    ReadOnly(&'static str),

    #[error("Source offline: {0}")]
    Offline(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("No next document")]
    NoNextDocument,

    #[error("No previous document")]
    NoPreviousDocument,
}

impl DaybookError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, DaybookError::NotFound(_))
    }

    /// Stored representation could not be decoded.
    pub fn is_parse(&self) -> bool {
        matches!(self, DaybookError::Parse(_) | DaybookError::Yaml(_))
    }

    /// Source unreachable or unwritable.
    pub fn is_io(&self) -> bool {
        matches!(
            self,
            DaybookError::Io(_)
                | DaybookError::Watch(_)
                | DaybookError::Offline(_)
                | DaybookError::Remote(_)
        )
    }

    /// Navigation ran past either end of the list. Not a failure.
    pub fn is_boundary(&self) -> bool {
        matches!(
            self,
            DaybookError::NoNextDocument | DaybookError::NoPreviousDocument
        )
    }
}

pub type Result<T> = std::result::Result<T, DaybookError>;

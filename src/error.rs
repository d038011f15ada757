use thiserror::Error;

use crate::dom::NodeId;

/// A structural pattern that could not be compiled
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("empty selector")]
    Empty,
    #[error("unexpected `{found}` at offset {offset} in `{selector}`")]
    Unexpected {
        selector: String,
        offset: usize,
        found: char,
    },
    #[error("unterminated `{open}` in `{selector}`")]
    Unterminated { selector: String, open: char },
    #[error("unsupported pseudo-class `:{name}` in `{selector}`")]
    UnsupportedPseudo { selector: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomError {
    #[error("node {0} is detached from the document")]
    Detached(NodeId),
    #[error("node {0} does not exist")]
    Missing(NodeId),
    #[error("node {0} is not an element")]
    NotElement(NodeId),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("preference store unavailable: {0}")]
    Unavailable(String),
    #[error("permission denied for key `{0}`")]
    PermissionDenied(String),
    #[error("preference store I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("preference store holds malformed data: {0}")]
    Malformed(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// The receiving context is gone or has not loaded the engine yet
    #[error("context {0} is not listening")]
    NoReceiver(u32),
    #[error("context {0} closed the response channel")]
    Closed(u32),
}

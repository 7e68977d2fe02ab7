/// Failure taxonomy surfaced by every engine operation. Callers (the HTTP
/// layer, the CLI) recover the variant with `downcast_ref` to map it onto a
/// transport status.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DepotError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage write failed: {0}")]
    StorageIo(String),
    #[error("content hash mismatch (declared {declared}, computed {computed})")]
    Integrity { declared: String, computed: String },
}

/// Wrap a filesystem failure as `StorageIo` unless it already carries a
/// `DepotError`, mirroring how disk faults must not masquerade as other
/// variants.
pub(crate) fn storage_io_error(err: anyhow::Error) -> anyhow::Error {
    if err.is::<DepotError>() {
        err
    } else {
        DepotError::StorageIo(err.to_string()).into()
    }
}

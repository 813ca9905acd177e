use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("instance not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

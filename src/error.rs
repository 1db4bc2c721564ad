use thiserror::Error;

/// Typed errors surfaced by the store and the resolvers.
///
/// Database connection/timeout failures pass through as `Database` — callers
/// decide whether to retry; the core never retries on its own. Malformed
/// schedule rows and catalog inconsistencies are log-and-skip conditions and
/// do not appear here as propagated errors.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{entity} '{id}' not found")]
    NotFound { entity: &'static str, id: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid schedule data: {0}")]
    ConfigInvalid(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            entity,
            id: id.into(),
        }
    }
}

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("popup factory returned no window handle")]
    Configuration,
    #[error("popup factory failed: {0}")]
    Factory(#[source] anyhow::Error),
    #[error("failed to recreate lost popup: {source}")]
    RecoveryFailed {
        #[source]
        source: Box<Error>,
    },
}

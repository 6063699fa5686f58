use thiserror::Error;

#[derive(Error, Debug)]
pub enum PageError {
    #[error("Node does not fit in a page")]
    NodeTooLarge,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupted page: {0}")]
    Corrupted(String),
}

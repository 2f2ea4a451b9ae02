use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("malformed header: fewer than 8 header lines in the first 256 bytes")]
    MalformedHeader,
}

pub type Result<T> = std::result::Result<T, Error>;

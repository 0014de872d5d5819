//! Error taxonomy shared by the library.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// How an error should be surfaced to the user.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input. Reported immediately, the operation is aborted, no retry.
    Validation,
    /// Network or backend failure. Reported as a notice, state reset for retry.
    Network,
    /// Local failure (filesystem, decoding, configuration).
    Local,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("unsupported media type '{mime}': expected {expected}/*")]
    UnsupportedMedia { mime: String, expected: &'static str },
    #[error("media is too large: {size} bytes (max {max})")]
    MediaTooLarge { size: usize, max: usize },
    #[error("invalid location: {0}")]
    InvalidLocation(String),
    #[error("invalid label: {0}")]
    InvalidLabel(String),
    #[error("request to {url} failed: {reason}")]
    Http { url: String, reason: String },
    #[error("backend returned status {status} for {url}")]
    Backend { url: String, status: u16 },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("detection channel error: {0}")]
    Channel(String),
    #[error("no route found to the selected point")]
    NoRoute,
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnsupportedMedia { .. }
            | Error::MediaTooLarge { .. }
            | Error::InvalidLocation(_)
            | Error::InvalidLabel(_) => ErrorKind::Validation,
            Error::Http { .. }
            | Error::Backend { .. }
            | Error::Decode(_)
            | Error::Channel(_)
            | Error::NoRoute => ErrorKind::Network,
            Error::Config(_) | Error::Image(_) | Error::Io(_) => ErrorKind::Local,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Decode(err.to_string())
    }
}

impl From<tungstenite::Error> for Error {
    fn from(err: tungstenite::Error) -> Self {
        Error::Channel(err.to_string())
    }
}

impl From<ureq::Error> for Error {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(status, response) => Error::Backend {
                url: response.get_url().to_string(),
                status,
            },
            ureq::Error::Transport(transport) => Error::Http {
                url: transport
                    .url()
                    .map(|url| url.to_string())
                    .unwrap_or_default(),
                reason: transport.to_string(),
            },
        }
    }
}

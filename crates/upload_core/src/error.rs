use thiserror::Error;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("no pending files to upload")]
    NothingToUpload,
    #[error("an upload is already in progress")]
    UploadInProgress,
    #[error("pending file {name} has no readable contents")]
    SourceUnavailable { name: String },
    #[error("failed to read pending file {name}: {source}")]
    Io {
        name: String,
        source: std::io::Error,
    },
    #[error("invalid upload server url: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("upload request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("upload rejected with status {status}: {message}")]
    Rejected { status: u16, message: String },
    #[error("failed to decode upload response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("upload response entry {index} has neither an identity nor a url")]
    UnidentifiedFile { index: usize },
}

impl UploadError {
    /// Errors raised before a request was attempted leave nothing to retry.
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::NothingToUpload | Self::UploadInProgress)
    }
}

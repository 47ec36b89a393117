use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum TrackerError {
    #[error("CSV error")]
    CsvError(#[from] csv::Error),

    #[error("IO error")]
    IoError(#[from] std::io::Error),

    #[error("HTTP error")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON error")]
    JsonError(#[from] serde_json::Error),

    #[error("Blocking task failed")]
    JoinError(#[from] tokio::task::JoinError),

    #[error("Browser error: {0}")]
    BrowserError(String),

    #[error("Invalid selector: {0}")]
    SelectorError(String),

    #[error("Could not decode {0} with any known encoding")]
    EncodingError(PathBuf),

    #[error("Environment variable {0} is not set")]
    MissingSecret(&'static str),

    #[error("Unknown site: {0}")]
    UnknownSite(String),

    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),
}

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum RunaError {
    #[error("invalid image locator: {0}")]
    InvalidLocator(String),

    #[error("invalid view id: {0}")]
    InvalidViewId(String),

    #[error("invalid coordinate: {0}")]
    InvalidCoordinate(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("asset request failed: {0}")]
    FetchHttp(String),

    #[error("asset server returned status {status}: {message}")]
    FetchStatus { status: u16, message: String },

    #[error("token request failed: {0}")]
    TokenHttp(String),

    #[error("token endpoint returned status {status}: {message}")]
    TokenStatus { status: u16, message: String },

    #[error("archive error: {0}")]
    Archive(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("a download is already in progress")]
    DownloadBusy,

    #[error("download cancelled")]
    Cancelled,

    #[error("map container {0} never appeared")]
    ContainerUnresolved(String),

    #[error("map runtime error: {0}")]
    MapRuntime(String),

    #[error("unparseable message line: {0}")]
    MalformedLine(String),

    #[error("malformed {port} payload: {reason}")]
    MalformedPayload { port: String, reason: String },

    #[error("i/o error: {0}")]
    Io(String),
}

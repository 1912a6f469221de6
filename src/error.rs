use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum EsgfError {
    #[error("missing config file esgf-dl.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("no table id configured for variable: {0}")]
    MissingTableId(String),

    #[error("ESGF_USERNAME and ESGF_PASSWORD environment variables must be set")]
    #[diagnostic(help("export ESGF_USERNAME and ESGF_PASSWORD for an account on any ESGF node"))]
    MissingCredentials,

    #[error("invalid identity provider host: {0:?}")]
    InvalidIdentityHost(String),

    #[error("ESGF search request failed: {0}")]
    SearchHttp(String),

    #[error("ESGF search returned status {status}: {message}")]
    SearchStatus { status: u16, message: String },

    #[error("malformed search response: {0}")]
    SearchResponse(String),

    #[error("file transfer failed: {0}")]
    TransferHttp(String),

    #[error("data node returned status {status} for {url}")]
    TransferStatus { status: u16, url: String },

    #[error("no download URL for file {0}")]
    MissingDownloadUrl(String),

    #[error("invalid dataset identifier: {0}")]
    InvalidDatasetId(String),

    #[error("catalog filename is not a plain file name: {0}")]
    InvalidFilename(String),

    #[error("could not parse a date range from filename {0}")]
    DateParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

use thiserror::Error;

/// Errors that can occur while driving a chunked multipart upload
#[derive(Error, Debug)]
pub enum UploadError {
    /// Bad or missing job field, rejected before any I/O
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Part size/count math does not fit the source file
    #[error(
        "Invalid range for part {part_index}/{total_parts}: offset {offset}, length {length}, file size {file_size}"
    )]
    InvalidRange {
        part_index: u32,
        total_parts: u32,
        offset: u64,
        length: i128,
        file_size: u64,
    },

    /// Source file not found on local filesystem
    #[error("File not found: {path}")]
    SourceNotFound { path: String },

    /// Read/write failure while materializing a part
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// Signing endpoint unreachable or returned a non-success status
    #[error("Presign request failed: {message}")]
    PresignRequest { message: String },

    /// Signing endpoint answered with a body that has no usable `presignedUrl`
    #[error("Presign response could not be parsed: {message}")]
    PresignParse { message: String },

    /// Reported by the transfer client for one part
    #[error("Transfer failed: {message}")]
    Transfer {
        response_code: Option<u16>,
        response_body: Option<String>,
        message: String,
    },

    /// A run that stopped on request; see [`JobOutcome::into_result`](super::JobOutcome::into_result)
    #[error("Upload cancelled")]
    Cancelled,
}

impl UploadError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an error from an IO error with context
    pub fn from_io_error(error: std::io::Error, path: &str) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound => Self::SourceNotFound {
                path: path.to_string(),
            },
            _ => Self::Io {
                path: path.to_string(),
                source: error,
            },
        }
    }

    /// Stable taxonomy name, independent of the message
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "ConfigurationError",
            Self::InvalidRange { .. } => "InvalidRangeError",
            Self::SourceNotFound { .. } => "SourceNotFoundError",
            Self::Io { .. } => "IOError",
            Self::PresignRequest { .. } => "PresignRequestError",
            Self::PresignParse { .. } => "PresignParseError",
            Self::Transfer { .. } => "TransferError",
            Self::Cancelled => "CancelledError",
        }
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            Self::SourceNotFound { path } => {
                format!(
                    "File not found: {}\n\nPossible solutions:\n  \
                     1. Check if the file path is correct\n  \
                     2. Verify the file exists: ls -la {}",
                    path, path
                )
            }
            Self::InvalidRange { file_size, .. } => {
                format!(
                    "{}\n\nPossible solutions:\n  \
                     1. Recompute totalPart as ceil({} / partSize)\n  \
                     2. Run `chunkup plan <file> --part-size <bytes>` to see the ranges",
                    self, file_size
                )
            }
            Self::PresignRequest { message } => {
                format!(
                    "Presign request failed: {}\n\nPossible solutions:\n  \
                     1. Check that getPresignUrl points at a reachable signing endpoint\n  \
                     2. Verify CHUNKUP_PRESIGN_TOKEN (or authToken) if the endpoint requires auth",
                    message
                )
            }
            Self::Configuration { message } => {
                format!(
                    "Invalid job configuration: {}\n\nRequired fields: path, fileName, \
                     getPresignUrl, s3UploadId, beginPart, totalPart, partSize",
                    message
                )
            }
            _ => self.to_string(),
        }
    }
}

/// Result type for upload operations
pub type Result<T> = std::result::Result<T, UploadError>;

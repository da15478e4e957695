//! Chunked multipart uploads of large files to presigned object store URLs.
//!
//! A job splits the source file into contiguous parts, asks a signing
//! endpoint for each part's upload URL and sends the parts one after the
//! other, reporting whole-file progress as it goes.

pub mod config;
pub mod upload;

pub use config::Settings;
pub use upload::{
    ChecksumAlgorithm, EventSink, FileInfo, HttpTransferClient, JobOutcome, PartOutcome, Registry,
    TransferClient, UploadError, UploadEvent, UploadJob, UploadSequencer,
};

pub mod error;
pub mod events;
pub mod info;
pub mod job;
pub mod part;
pub mod presign;
pub mod progress;
pub mod range;
pub mod registry;
pub mod sequencer;
pub mod transfer;

#[cfg(test)]
mod stub;

pub use error::{Result, UploadError};
pub use events::{EventSink, UploadEvent};
pub use info::{FileInfo, file_info};
pub use job::{NotificationConfig, RequestKind, UploadJob};
pub use part::{ChecksumAlgorithm, MaterializedPart, PartMaterializer};
pub use presign::PresignClient;
pub use range::{PartPlan, part_count, plan};
pub use registry::Registry;
pub use sequencer::{JobOutcome, UploadSequencer};
pub use transfer::{HttpTransferClient, PartOutcome, TransferClient, TransferRequest};

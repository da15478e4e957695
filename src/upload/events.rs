use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

/// Event emitted to the caller for one job
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum UploadEvent {
    #[serde(rename_all = "camelCase")]
    Progress {
        id: String,
        /// Whole-file percentage, 0-100
        progress: u8,
        current_part: u32,
        checksum: String,
    },
    #[serde(rename_all = "camelCase")]
    Completed {
        id: String,
        response_code: u16,
        response_body: String,
    },
    #[serde(rename_all = "camelCase")]
    Error {
        id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        response_code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        response_body: Option<String>,
        error: String,
    },
    Cancelled {
        id: String,
    },
}

impl UploadEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Progress { .. } => "progress",
            Self::Completed { .. } => "completed",
            Self::Error { .. } => "error",
            Self::Cancelled { .. } => "cancelled",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Progress { id, .. }
            | Self::Completed { id, .. }
            | Self::Error { id, .. }
            | Self::Cancelled { id } => id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// Receives the events of a job run
pub trait EventSink: Send + Sync {
    fn emit(&self, event: UploadEvent);
}

impl EventSink for UnboundedSender<UploadEvent> {
    fn emit(&self, event: UploadEvent) {
        if let Err(e) = self.send(event) {
            debug!("Event receiver dropped, discarding {} event", e.0.name());
        }
    }
}

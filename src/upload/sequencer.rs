use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::error::UploadError;
use super::events::{EventSink, UploadEvent};
use super::job::UploadJob;
use super::part::{MaterializedPart, PartMaterializer, normalize_path, part_file_path};
use super::presign::PresignClient;
use super::progress::{ProgressTracker, part_bytes_from_report, whole_file_percent};
use super::range::{PartPlan, plan};
use super::registry::Registry;
use super::transfer::{PartOutcome, TransferClient, TransferRequest};

/// How a job run ended
#[derive(Debug)]
pub enum JobOutcome {
    /// Every part went through; carries the final part's response
    Completed {
        response_code: u16,
        response_body: String,
    },
    Failed(UploadError),
    Cancelled,
}

impl JobOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Final response code and body, or why there is none.
    /// Cancellation comes back as [`UploadError::Cancelled`].
    pub fn into_result(self) -> Result<(u16, String), UploadError> {
        match self {
            Self::Completed {
                response_code,
                response_body,
            } => Ok((response_code, response_body)),
            Self::Failed(e) => Err(e),
            Self::Cancelled => Err(UploadError::Cancelled),
        }
    }
}

/// Where the run currently is. Terminal outcomes leave the loop.
enum Stage {
    Planning(u32),
    Materializing(PartPlan),
    Presigning(PartPlan, MaterializedPart),
    Transferring(PartPlan, MaterializedPart, String),
    Done(JobOutcome),
}

/// Working state of one run, owned by the run
struct SequenceState {
    file_size: u64,
    total_parts: u32,
    current_part: u32,
    /// Id stamped on emitted events
    event_id: String,
    progress: ProgressTracker,
    cancel: CancellationToken,
}

/// Drives the parts of a job one at a time, from `beginPart` to `totalPart`
pub struct UploadSequencer<T> {
    transfer: T,
    presign: PresignClient,
    materializer: PartMaterializer,
    temp_dir: PathBuf,
    registry: Registry,
}

impl<T: TransferClient> UploadSequencer<T> {
    pub fn new(transfer: T) -> Self {
        Self {
            transfer,
            presign: PresignClient::new(),
            materializer: PartMaterializer::default(),
            temp_dir: std::env::temp_dir().join("chunkup"),
            registry: Registry::global().clone(),
        }
    }

    pub fn with_presign_client(mut self, presign: PresignClient) -> Self {
        self.presign = presign;
        self
    }

    pub fn with_materializer(mut self, materializer: PartMaterializer) -> Self {
        self.materializer = materializer;
        self
    }

    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = temp_dir.into();
        self
    }

    pub fn with_registry(mut self, registry: Registry) -> Self {
        self.registry = registry;
        self
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Run `job` on a background task
    pub fn spawn(self: Arc<Self>, job: UploadJob, sink: Arc<dyn EventSink>) -> JoinHandle<JobOutcome>
    where
        T: 'static,
    {
        tokio::spawn(async move { self.run(job, sink.as_ref()).await })
    }

    /// Run `job` to a terminal outcome, emitting events into `sink`.
    ///
    /// Exactly one terminal event (`completed`, `error` or `cancelled`) is
    /// emitted per run.
    pub async fn run(&self, job: UploadJob, sink: &dyn EventSink) -> JobOutcome {
        let key = job.key().to_string();
        let Some(cancel) = self.registry.register(&key) else {
            let err = UploadError::config(format!("an upload with id '{}' is already running", key));
            error!("{}", err);
            emit_error(sink, &key, &err);
            return JobOutcome::Failed(err);
        };

        info!(
            "Starting multipart upload of {} ({} parts of {} bytes, from part {}, {} checksums)",
            job.file_name(),
            job.total_parts(),
            job.part_size(),
            job.begin_part(),
            self.materializer.algorithm()
        );

        let mut state = SequenceState {
            file_size: 0,
            total_parts: job.total_parts(),
            current_part: job.begin_part(),
            event_id: key.clone(),
            progress: ProgressTracker::new(),
            cancel,
        };

        let mut stage = match self.prepare(&job, &mut state).await {
            Ok(()) => Stage::Planning(job.begin_part()),
            Err(e) => Stage::Done(JobOutcome::Failed(e)),
        };

        let outcome = loop {
            // Cancellation is checked before every stage
            if !matches!(stage, Stage::Done(_)) && state.cancel.is_cancelled() {
                if let Stage::Presigning(_, part) | Stage::Transferring(_, part, _) = &stage {
                    part.remove().await;
                }
                stage = Stage::Done(JobOutcome::Cancelled);
            }

            stage = match stage {
                Stage::Done(outcome) => break outcome,
                Stage::Planning(index) => self.plan_part(&job, &mut state, index),
                Stage::Materializing(plan) => self.materialize_part(&job, plan).await,
                Stage::Presigning(plan, part) => self.presign_part(&job, plan, part).await,
                Stage::Transferring(plan, part, url) => {
                    self.transfer_part(&job, &mut state, sink, plan, part, url).await
                }
            };
        };

        self.registry.remove(&key);
        self.finish(&job, &state, sink, &outcome);
        outcome
    }

    /// Resolve the source size and reject part math that cannot fit before any part runs
    async fn prepare(&self, job: &UploadJob, state: &mut SequenceState) -> Result<(), UploadError> {
        let source = normalize_path(job.path());
        let metadata = tokio::fs::metadata(&source)
            .await
            .map_err(|e| UploadError::from_io_error(e, &source.display().to_string()))?;
        if !metadata.is_file() {
            return Err(UploadError::SourceNotFound {
                path: source.display().to_string(),
            });
        }
        state.file_size = metadata.len();

        plan(state.file_size, job.part_size(), job.total_parts(), job.total_parts())?;
        plan(state.file_size, job.part_size(), job.begin_part(), job.total_parts())?;
        Ok(())
    }

    fn plan_part(&self, job: &UploadJob, state: &mut SequenceState, index: u32) -> Stage {
        state.current_part = index;
        match plan(state.file_size, job.part_size(), index, state.total_parts) {
            Ok(p) => {
                debug!(
                    "Part {}/{}: offset {} length {}",
                    index, state.total_parts, p.offset, p.length
                );
                Stage::Materializing(p)
            }
            Err(e) => Stage::Done(JobOutcome::Failed(e)),
        }
    }

    async fn materialize_part(&self, job: &UploadJob, plan: PartPlan) -> Stage {
        let dest = part_file_path(&self.temp_dir, job.key(), job.file_name(), plan.index);
        match self
            .materializer
            .materialize(job.path(), &dest, plan.offset, plan.length)
            .await
        {
            Ok(part) => Stage::Presigning(plan, part),
            Err(e) => {
                warn!("Failed to prepare part {}: {}", plan.index, e);
                Stage::Done(JobOutcome::Failed(e))
            }
        }
    }

    async fn presign_part(&self, job: &UploadJob, plan: PartPlan, part: MaterializedPart) -> Stage {
        match self
            .presign
            .get_part_url(
                job.presign_endpoint(),
                job.file_name(),
                job.remote_upload_id(),
                plan.index,
                job.auth_token(),
            )
            .await
        {
            Ok(url) => Stage::Transferring(plan, part, url),
            Err(e) => {
                part.remove().await;
                Stage::Done(JobOutcome::Failed(e))
            }
        }
    }

    async fn transfer_part(
        &self,
        job: &UploadJob,
        state: &mut SequenceState,
        sink: &dyn EventSink,
        plan: PartPlan,
        part: MaterializedPart,
        url: String,
    ) -> Stage {
        let request = TransferRequest {
            id: job.custom_id().map(str::to_string),
            url,
            method: job.method().to_string(),
            file: part.path.clone(),
            kind: job.kind().clone(),
            headers: job.headers().clone(),
            parameters: job.parameters().clone(),
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        let part_cancel = state.cancel.child_token();
        let transfer_id = self.transfer.start(request, tx, part_cancel.clone());
        let aliased = transfer_id != job.key();
        if aliased {
            self.registry.alias(&transfer_id, &state.cancel);
        }
        if job.custom_id().is_none() {
            state.event_id = transfer_id.clone();
        }
        debug!("Part {} handed to transfer {}", plan.index, transfer_id);

        let next = loop {
            let outcome = tokio::select! {
                outcome = rx.recv() => outcome,
                _ = state.cancel.cancelled() => Some(PartOutcome::Cancelled),
            };

            // Once cancelled, whatever the client says counts as cancellation
            let outcome = match outcome {
                _ if state.cancel.is_cancelled() => PartOutcome::Cancelled,
                Some(outcome) => outcome,
                None => PartOutcome::Failed {
                    response_code: None,
                    response_body: None,
                    message: Some("transfer ended without reporting an outcome".to_string()),
                },
            };

            match outcome {
                PartOutcome::Progress {
                    percent,
                    uploaded_bytes,
                } => {
                    let bytes = part_bytes_from_report(percent, uploaded_bytes, plan.length);
                    match whole_file_percent(plan.offset, bytes, state.file_size) {
                        Ok(whole) => sink.emit(UploadEvent::Progress {
                            id: state.event_id.clone(),
                            progress: state.progress.advance(whole),
                            current_part: plan.index,
                            checksum: part.checksum.clone(),
                        }),
                        Err(e) => break Stage::Done(JobOutcome::Failed(e)),
                    }
                }
                PartOutcome::Completed {
                    response_code,
                    response_body,
                } => {
                    info!(
                        "Part {}/{} uploaded ({})",
                        plan.index, state.total_parts, response_code
                    );
                    if plan.index == state.total_parts {
                        break Stage::Done(JobOutcome::Completed {
                            response_code,
                            response_body,
                        });
                    }
                    break Stage::Planning(plan.index + 1);
                }
                PartOutcome::Failed {
                    response_code,
                    response_body,
                    message,
                } => {
                    break Stage::Done(JobOutcome::Failed(UploadError::Transfer {
                        response_code,
                        response_body,
                        message: message.unwrap_or_else(|| "Unknown exception".to_string()),
                    }));
                }
                PartOutcome::Cancelled => {
                    part_cancel.cancel();
                    break Stage::Done(JobOutcome::Cancelled);
                }
            }
        };

        if aliased {
            self.registry.remove(&transfer_id);
        }
        part.remove().await;
        next
    }

    fn finish(&self, job: &UploadJob, state: &SequenceState, sink: &dyn EventSink, outcome: &JobOutcome) {
        let id = state.event_id.clone();
        match outcome {
            JobOutcome::Completed {
                response_code,
                response_body,
            } => {
                info!(
                    "Successfully completed multipart upload of {} ({} parts)",
                    job.file_name(),
                    state.total_parts
                );
                sink.emit(UploadEvent::Completed {
                    id,
                    response_code: *response_code,
                    response_body: response_body.clone(),
                });
            }
            JobOutcome::Failed(e) => {
                error!(
                    "Multipart upload of {} failed at part {} ({}%): {}",
                    job.file_name(),
                    state.current_part,
                    state.progress.current(),
                    e
                );
                emit_error_at(sink, &id, state.current_part, e);
            }
            JobOutcome::Cancelled => {
                info!(
                    "Multipart upload of {} cancelled at part {} ({}%)",
                    job.file_name(),
                    state.current_part,
                    state.progress.current()
                );
                sink.emit(UploadEvent::Cancelled { id });
            }
        }
    }
}

fn emit_error(sink: &dyn EventSink, id: &str, err: &UploadError) {
    sink.emit(UploadEvent::Error {
        id: id.to_string(),
        response_code: None,
        response_body: None,
        error: err.to_string(),
    });
}

fn emit_error_at(sink: &dyn EventSink, id: &str, part: u32, err: &UploadError) {
    match err {
        UploadError::Transfer {
            response_code,
            response_body,
            message,
        } => sink.emit(UploadEvent::Error {
            id: id.to_string(),
            response_code: *response_code,
            response_body: response_body.clone(),
            error: message.clone(),
        }),
        UploadError::SourceNotFound { .. }
        | UploadError::Io { .. }
        | UploadError::PresignRequest { .. }
        | UploadError::PresignParse { .. } => sink.emit(UploadEvent::Error {
            id: id.to_string(),
            response_code: None,
            response_body: None,
            error: format!("part {}: {}", part, err),
        }),
        _ => emit_error(sink, id, err),
    }
}

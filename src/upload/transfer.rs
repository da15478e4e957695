use futures::StreamExt;
use reqwest::header::CONTENT_LENGTH;
use reqwest::{Method, multipart};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::job::RequestKind;

/// Body chunk size for streamed part uploads
const STREAM_CHUNK: usize = 64 * 1024;

/// What a transfer reports back for one part
#[derive(Debug, Clone, PartialEq)]
pub enum PartOutcome {
    /// Local progress of this part; `uploaded_bytes` when the client knows it
    Progress {
        percent: f64,
        uploaded_bytes: Option<u64>,
    },
    Completed {
        response_code: u16,
        response_body: String,
    },
    Failed {
        response_code: Option<u16>,
        response_body: Option<String>,
        message: Option<String>,
    },
    Cancelled,
}

impl PartOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// Everything a transfer client needs to send one part
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Caller-chosen upload id; the client generates one when absent
    pub id: Option<String>,
    pub url: String,
    pub method: String,
    pub file: PathBuf,
    pub kind: RequestKind,
    pub headers: BTreeMap<String, String>,
    pub parameters: BTreeMap<String, String>,
}

/// Performs the network transfer of one part file.
///
/// `start` returns immediately with the transfer's upload id. The transfer
/// runs on its own task and reports through `delegate`: any number of
/// `Progress` outcomes followed by exactly one terminal outcome. Cancelling
/// `cancel` aborts the transfer with `Cancelled`.
pub trait TransferClient: Send + Sync {
    fn start(
        &self,
        request: TransferRequest,
        delegate: UnboundedSender<PartOutcome>,
        cancel: CancellationToken,
    ) -> String;
}

fn next_transfer_id() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    format!("transfer-{}", COUNTER.fetch_add(1, Ordering::Relaxed))
}

enum Attempt {
    Response { code: u16, body: String },
    Retryable(String),
    Fatal(String),
}

/// HTTP transfer client backed by `reqwest`
#[derive(Clone)]
pub struct HttpTransferClient {
    client: reqwest::Client,
    max_retries: u32,
    retry_delay: Duration,
}

impl Default for HttpTransferClient {
    fn default() -> Self {
        Self {
            client: reqwest::Client::new(),
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl HttpTransferClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    async fn run(&self, request: &TransferRequest, delegate: &UnboundedSender<PartOutcome>) -> PartOutcome {
        let mut attempt = 0;
        loop {
            let reason = match self.send_once(request, delegate).await {
                Attempt::Response { code, body } if (200..300).contains(&code) => {
                    return PartOutcome::Completed {
                        response_code: code,
                        response_body: body,
                    };
                }
                Attempt::Response { code, body } if code < 500 || attempt >= self.max_retries => {
                    return PartOutcome::Failed {
                        response_code: Some(code),
                        response_body: Some(body),
                        message: Some(format!("server responded with status {}", code)),
                    };
                }
                Attempt::Response { code, .. } => format!("status {}", code),
                Attempt::Retryable(message) if attempt < self.max_retries => message,
                Attempt::Retryable(message) | Attempt::Fatal(message) => {
                    return PartOutcome::Failed {
                        response_code: None,
                        response_body: None,
                        message: Some(message),
                    };
                }
            };

            attempt += 1;
            warn!(
                "Upload of {} failed ({}), retry {}/{}",
                request.file.display(),
                reason,
                attempt,
                self.max_retries
            );
            tokio::time::sleep(self.retry_delay * attempt).await;
        }
    }

    async fn send_once(&self, request: &TransferRequest, delegate: &UnboundedSender<PartOutcome>) -> Attempt {
        let file = match tokio::fs::File::open(&request.file).await {
            Ok(f) => f,
            Err(e) => return Attempt::Fatal(format!("cannot open {}: {}", request.file.display(), e)),
        };
        let length = match file.metadata().await {
            Ok(m) => m.len(),
            Err(e) => return Attempt::Fatal(e.to_string()),
        };
        let method = match Method::from_bytes(request.method.as_bytes()) {
            Ok(m) => m,
            Err(e) => return Attempt::Fatal(e.to_string()),
        };

        let sent = Arc::new(AtomicU64::new(0));
        let progress = delegate.clone();
        let stream = ReaderStream::with_capacity(file, STREAM_CHUNK).map(move |chunk| {
            if let Ok(bytes) = &chunk {
                let done = sent.fetch_add(bytes.len() as u64, Ordering::Relaxed) + bytes.len() as u64;
                let percent = if length == 0 {
                    100.0
                } else {
                    done as f64 * 100.0 / length as f64
                };
                let _ = progress.send(PartOutcome::Progress {
                    percent,
                    uploaded_bytes: Some(done),
                });
            }
            chunk
        });
        let body = reqwest::Body::wrap_stream(stream);

        let mut builder = self.client.request(method, &request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        builder = match &request.kind {
            RequestKind::Raw => builder.header(CONTENT_LENGTH, length).body(body),
            RequestKind::Multipart { field } => {
                let file_name = request
                    .file
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "part".to_string());
                let part = match multipart::Part::stream_with_length(body, length)
                    .file_name(file_name)
                    .mime_str("application/octet-stream")
                {
                    Ok(p) => p,
                    Err(e) => return Attempt::Fatal(e.to_string()),
                };
                let mut form = multipart::Form::new();
                for (key, value) in &request.parameters {
                    form = form.text(key.clone(), value.clone());
                }
                builder.multipart(form.part(field.clone(), part))
            }
        };

        debug!("{} {} ({} bytes)", request.method, request.url, length);

        match builder.send().await {
            Ok(response) => {
                let code = response.status().as_u16();
                match response.text().await {
                    Ok(body) => Attempt::Response { code, body },
                    Err(e) => {
                        warn!("Failed to read response body ({}) from {}: {}", code, request.url, e);
                        Attempt::Retryable(format!("failed to read response body ({}): {}", code, e))
                    }
                }
            }
            Err(e) if e.is_connect() || e.is_timeout() || e.is_request() => Attempt::Retryable(e.to_string()),
            Err(e) => Attempt::Fatal(e.to_string()),
        }
    }
}

impl TransferClient for HttpTransferClient {
    fn start(
        &self,
        request: TransferRequest,
        delegate: UnboundedSender<PartOutcome>,
        cancel: CancellationToken,
    ) -> String {
        let id = request.id.clone().unwrap_or_else(next_transfer_id);
        let client = self.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => PartOutcome::Cancelled,
                outcome = client.run(&request, &delegate) => outcome,
            };
            let _ = delegate.send(outcome);
        });
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::stub;
    use tokio::sync::mpsc;

    fn request(url: String, file: PathBuf, kind: RequestKind) -> TransferRequest {
        TransferRequest {
            id: None,
            url,
            method: "PUT".into(),
            file,
            kind,
            headers: BTreeMap::from([("x-amz-meta-job".to_string(), "j1".to_string())]),
            parameters: BTreeMap::new(),
        }
    }

    async fn drain(mut rx: mpsc::UnboundedReceiver<PartOutcome>) -> Vec<PartOutcome> {
        let mut seen = Vec::new();
        while let Some(outcome) = rx.recv().await {
            let done = outcome.is_terminal();
            seen.push(outcome);
            if done {
                break;
            }
        }
        seen
    }

    fn client() -> HttpTransferClient {
        HttpTransferClient::new().with_retry_delay(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_raw_upload_completes() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("part_1");
        let data = vec![7u8; 200_000];
        std::fs::write(&file, &data).unwrap();
        let server = stub::serve(|_| (200, "etag-1".into())).await;

        let (tx, rx) = mpsc::unbounded_channel();
        let id = client().start(
            request(server.url("/bucket/key?partNumber=1"), file, RequestKind::Raw),
            tx,
            CancellationToken::new(),
        );
        assert!(id.starts_with("transfer-"));

        let outcomes = drain(rx).await;
        assert_eq!(
            outcomes.last(),
            Some(&PartOutcome::Completed {
                response_code: 200,
                response_body: "etag-1".into()
            })
        );
        let last_progress = outcomes.iter().rev().find_map(|o| match o {
            PartOutcome::Progress { uploaded_bytes, .. } => *uploaded_bytes,
            _ => None,
        });
        assert_eq!(last_progress, Some(200_000));

        let req = &server.requests()[0];
        assert_eq!(req.method, "PUT");
        assert_eq!(req.path, "/bucket/key?partNumber=1");
        assert_eq!(req.header("x-amz-meta-job").as_deref(), Some("j1"));
        assert_eq!(req.body, data);
    }

    #[tokio::test]
    async fn test_multipart_upload_carries_field_and_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("video-mp4_2");
        std::fs::write(&file, b"PART-TWO-BYTES").unwrap();
        let server = stub::serve(|_| (201, "created".into())).await;

        let mut req = request(
            server.url("/upload"),
            file,
            RequestKind::Multipart {
                field: "chunk".into(),
            },
        );
        req.parameters.insert("folder".into(), "inbox".into());
        req.id = Some("custom-7".into());

        let (tx, rx) = mpsc::unbounded_channel();
        let id = client().start(req, tx, CancellationToken::new());
        assert_eq!(id, "custom-7");
        assert!(matches!(
            drain(rx).await.last(),
            Some(PartOutcome::Completed { response_code: 201, .. })
        ));

        let seen = &server.requests()[0];
        assert!(seen.header("content-type").unwrap().starts_with("multipart/form-data"));
        let body = String::from_utf8_lossy(&seen.body);
        assert!(body.contains("name=\"chunk\""));
        assert!(body.contains("filename=\"video-mp4_2\""));
        assert!(body.contains("PART-TWO-BYTES"));
        assert!(body.contains("name=\"folder\""));
        assert!(body.contains("inbox"));
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("p");
        std::fs::write(&file, b"x").unwrap();
        let server = stub::serve(|_| (403, "SignatureDoesNotMatch".into())).await;

        let (tx, rx) = mpsc::unbounded_channel();
        client().start(request(server.url("/"), file, RequestKind::Raw), tx, CancellationToken::new());
        let outcomes = drain(rx).await;
        match outcomes.last() {
            Some(PartOutcome::Failed {
                response_code,
                response_body,
                message,
            }) => {
                assert_eq!(*response_code, Some(403));
                assert_eq!(response_body.as_deref(), Some("SignatureDoesNotMatch"));
                assert!(message.is_some());
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(server.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_server_error_retried_then_failed() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("p");
        std::fs::write(&file, b"x").unwrap();
        let server = stub::serve(|_| (503, "slow down".into())).await;

        let (tx, rx) = mpsc::unbounded_channel();
        client()
            .with_max_retries(2)
            .start(request(server.url("/"), file, RequestKind::Raw), tx, CancellationToken::new());
        assert!(matches!(
            drain(rx).await.last(),
            Some(PartOutcome::Failed { response_code: Some(503), .. })
        ));
        assert_eq!(server.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_broken_response_body_is_not_completed() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("p");
        std::fs::write(&file, b"x").unwrap();
        let server = stub::serve_broken_body(200).await;

        let (tx, rx) = mpsc::unbounded_channel();
        client()
            .with_max_retries(1)
            .start(request(server.url("/"), file, RequestKind::Raw), tx, CancellationToken::new());
        let outcomes = tokio::time::timeout(Duration::from_secs(5), drain(rx)).await.unwrap();
        assert!(matches!(outcomes.last(), Some(PartOutcome::Failed { .. })));
        assert!(!outcomes.iter().any(|o| matches!(o, PartOutcome::Completed { .. })));
    }

    #[tokio::test]
    async fn test_missing_file_fails_without_request() {
        let server = stub::serve(|_| (200, String::new())).await;
        let (tx, rx) = mpsc::unbounded_channel();
        client().start(
            request(server.url("/"), PathBuf::from("/definitely/not/here"), RequestKind::Raw),
            tx,
            CancellationToken::new(),
        );
        assert!(matches!(
            drain(rx).await.last(),
            Some(PartOutcome::Failed { response_code: None, message: Some(_), .. })
        ));
        assert!(server.requests().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_in_flight() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("p");
        std::fs::write(&file, b"slow part").unwrap();
        let server = stub::serve_slow(Duration::from_secs(10), |_| (200, String::new())).await;

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        client().start(request(server.url("/"), file, RequestKind::Raw), tx, cancel.clone());
        tokio::time::sleep(Duration::from_millis(100)).await;
        cancel.cancel();

        let outcomes = tokio::time::timeout(Duration::from_secs(5), drain(rx)).await.unwrap();
        assert_eq!(outcomes.last(), Some(&PartOutcome::Cancelled));
    }
}

use md5::Md5;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

use super::error::{Result, UploadError};

/// Default copy buffer (1 MiB)
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Digest applied to the bytes of each materialized part
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumAlgorithm {
    #[default]
    Md5,
    Sha256,
    Blake3,
}

impl ChecksumAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
            Self::Blake3 => "blake3",
        }
    }

    fn hasher(&self) -> PartHasher {
        match self {
            Self::Md5 => PartHasher::Md5(Md5::new()),
            Self::Sha256 => PartHasher::Sha256(Sha256::new()),
            Self::Blake3 => PartHasher::Blake3(Box::new(blake3::Hasher::new())),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = UploadError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "blake3" => Ok(Self::Blake3),
            other => Err(UploadError::config(format!(
                "unknown checksum algorithm '{}' (expected md5, sha256 or blake3)",
                other
            ))),
        }
    }
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

enum PartHasher {
    Md5(Md5),
    Sha256(Sha256),
    Blake3(Box<blake3::Hasher>),
}

impl PartHasher {
    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Md5(h) => h.update(data),
            Self::Sha256(h) => h.update(data),
            Self::Blake3(h) => {
                h.update(data);
            }
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Self::Md5(h) => hex::encode(h.finalize()),
            Self::Sha256(h) => hex::encode(h.finalize()),
            Self::Blake3(h) => h.finalize().to_hex().to_string(),
        }
    }
}

/// One part copied out of the source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedPart {
    pub path: PathBuf,
    pub length: u64,
    /// Lowercase hex digest of the bytes in `path`
    pub checksum: String,
}

impl MaterializedPart {
    /// Delete the part file; a missing file is not an error
    pub async fn remove(&self) {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => debug!("Removed part file {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove part file {}: {}", self.path.display(), e),
        }
    }
}

/// Strip a `file://` scheme so the path can be handed to the filesystem
pub fn normalize_path(path: &str) -> PathBuf {
    PathBuf::from(path.strip_prefix("file://").unwrap_or(path))
}

/// Temp file location for one part of `file_name` in the job keyed `job_key`
///
/// The key keeps concurrent jobs that upload files of the same name apart.
pub fn part_file_path(temp_dir: &Path, job_key: &str, file_name: &str, part_index: u32) -> PathBuf {
    let slug_or = |s: &str, fallback: &str| {
        let slug = slug::slugify(s);
        if slug.is_empty() { fallback.to_string() } else { slug }
    };
    temp_dir.join(format!(
        "{}_{}_{}",
        slug_or(job_key, "job"),
        slug_or(file_name, "part"),
        part_index
    ))
}

/// Copies byte ranges of a source file into standalone part files
#[derive(Debug, Clone, Copy)]
pub struct PartMaterializer {
    algorithm: ChecksumAlgorithm,
    buffer_size: usize,
}

impl Default for PartMaterializer {
    fn default() -> Self {
        Self::new(ChecksumAlgorithm::default())
    }
}

impl PartMaterializer {
    pub fn new(algorithm: ChecksumAlgorithm) -> Self {
        Self {
            algorithm,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Copy `length` bytes starting at `offset` from `source` into a fresh `dest`.
    ///
    /// Any existing file at `dest` is removed first. `length` is clamped to
    /// the end of the source file. On failure the partial `dest` is deleted.
    pub async fn materialize(
        &self,
        source: &str,
        dest: &Path,
        offset: u64,
        length: u64,
    ) -> Result<MaterializedPart> {
        let source_path = normalize_path(source);
        let dest_path = match dest.to_str() {
            Some(s) => normalize_path(s),
            None => dest.to_path_buf(),
        };
        let source_display = source_path.display().to_string();
        let dest_display = dest_path.display().to_string();
        // Only the source can be "not found"; dest failures are plain I/O
        let dest_error = |source: std::io::Error| UploadError::Io {
            path: dest_display.clone(),
            source,
        };

        debug!(
            "Start split file {} at offset {} ({} bytes) -> {}",
            source_display, offset, length, dest_display
        );

        let mut src = File::open(&source_path)
            .await
            .map_err(|e| UploadError::from_io_error(e, &source_display))?;
        let file_size = src
            .metadata()
            .await
            .map_err(|e| UploadError::from_io_error(e, &source_display))?
            .len();

        let length = if offset >= file_size {
            0
        } else {
            length.min(file_size - offset)
        };

        match tokio::fs::remove_file(&dest_path).await {
            Ok(()) => debug!("Removed stale part file {}", dest_display),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(dest_error(e)),
        }
        if let Some(parent) = dest_path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(dest_error)?;
        }

        let mut out = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&dest_path)
            .await
            .map_err(dest_error)?;

        let copied = self.copy_range(&mut src, &mut out, offset, length).await;
        drop(out);
        drop(src);

        match copied {
            Ok(checksum) => {
                debug!(
                    "Split file success => {} ({} bytes, {} {})",
                    dest_display, length, self.algorithm, checksum
                );
                Ok(MaterializedPart {
                    path: dest_path,
                    length,
                    checksum,
                })
            }
            Err(e) => {
                warn!("Split file error for {}: {}", dest_display, e);
                let _ = tokio::fs::remove_file(&dest_path).await;
                // A read failure is about the source, anything else about dest
                let path = if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    source_display
                } else {
                    dest_display
                };
                Err(UploadError::Io { path, source: e })
            }
        }
    }

    async fn copy_range(
        &self,
        src: &mut File,
        out: &mut File,
        offset: u64,
        length: u64,
    ) -> std::io::Result<String> {
        src.seek(SeekFrom::Start(offset)).await?;

        let mut hasher = self.algorithm.hasher();
        let mut buffer = vec![0u8; self.buffer_size.min(length.max(1) as usize)];
        let mut remaining = length;

        while remaining > 0 {
            let want = buffer.len().min(remaining as usize);
            let n = src.read(&mut buffer[..want]).await?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("source ended {} bytes short of the part", remaining),
                ));
            }
            out.write_all(&buffer[..n]).await?;
            hasher.update(&buffer[..n]);
            remaining -= n as u64;
        }

        out.flush().await?;
        out.sync_all().await?;
        Ok(hasher.finalize_hex())
    }
}

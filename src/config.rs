use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

use crate::upload::ChecksumAlgorithm;
use crate::upload::part::DEFAULT_BUFFER_SIZE;

const MIN_BUFFER_SIZE: usize = 4 * 1024;
const MAX_BUFFER_SIZE: usize = 64 * 1024 * 1024;

/// Process-level settings for running upload jobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Where part files are materialized
    pub temp_dir: PathBuf,
    /// Bearer token for the signing endpoint when the job has none
    pub presign_token: Option<String>,
    pub checksum: ChecksumAlgorithm,
    pub buffer_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            temp_dir: env::temp_dir().join("chunkup"),
            presign_token: None,
            checksum: ChecksumAlgorithm::default(),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl Settings {
    /// Load settings from environment variables and .env file
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but invalid
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if it exists
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut settings = Self::default();

        if let Some(dir) = lookup("CHUNKUP_TEMP_DIR") {
            Self::validate_temp_dir(&dir)?;
            settings.temp_dir = PathBuf::from(dir);
        }

        settings.presign_token = lookup("CHUNKUP_PRESIGN_TOKEN").filter(|t| !t.trim().is_empty());

        if let Some(name) = lookup("CHUNKUP_CHECKSUM") {
            settings.checksum = name
                .parse()
                .with_context(|| format!("CHUNKUP_CHECKSUM '{}' is not supported", name))?;
        }

        if let Some(size) = lookup("CHUNKUP_BUFFER_SIZE") {
            settings.buffer_size = Self::parse_buffer_size(&size)?;
        }

        Ok(settings)
    }

    fn validate_temp_dir(dir: &str) -> Result<()> {
        if dir.trim().is_empty() {
            anyhow::bail!("CHUNKUP_TEMP_DIR cannot be empty");
        }
        Ok(())
    }

    fn parse_buffer_size(value: &str) -> Result<usize> {
        let size: usize = value
            .trim()
            .parse()
            .with_context(|| format!("CHUNKUP_BUFFER_SIZE '{}' is not a number", value))?;

        if !(MIN_BUFFER_SIZE..=MAX_BUFFER_SIZE).contains(&size) {
            anyhow::bail!(
                "CHUNKUP_BUFFER_SIZE must be between {} and {} bytes (got {})",
                MIN_BUFFER_SIZE,
                MAX_BUFFER_SIZE,
                size
            );
        }
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Settings> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = load(&[]).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.checksum, ChecksumAlgorithm::Md5);
        assert!(settings.temp_dir.ends_with("chunkup"));
    }

    #[test]
    fn test_overrides() {
        let settings = load(&[
            ("CHUNKUP_TEMP_DIR", "/var/cache/chunkup"),
            ("CHUNKUP_PRESIGN_TOKEN", "abc"),
            ("CHUNKUP_CHECKSUM", "blake3"),
            ("CHUNKUP_BUFFER_SIZE", "65536"),
        ])
        .unwrap();
        assert_eq!(settings.temp_dir, PathBuf::from("/var/cache/chunkup"));
        assert_eq!(settings.presign_token.as_deref(), Some("abc"));
        assert_eq!(settings.checksum, ChecksumAlgorithm::Blake3);
        assert_eq!(settings.buffer_size, 65536);
    }

    #[test]
    fn test_blank_token_ignored() {
        let settings = load(&[("CHUNKUP_PRESIGN_TOKEN", "  ")]).unwrap();
        assert_eq!(settings.presign_token, None);
    }

    #[test]
    fn test_invalid_values() {
        assert!(load(&[("CHUNKUP_TEMP_DIR", "")]).is_err());
        assert!(load(&[("CHUNKUP_CHECKSUM", "crc32")]).is_err());
        assert!(load(&[("CHUNKUP_BUFFER_SIZE", "lots")]).is_err());
        assert!(load(&[("CHUNKUP_BUFFER_SIZE", "16")]).is_err()); // Too small
        assert!(load(&[("CHUNKUP_BUFFER_SIZE", "1073741824")]).is_err()); // Too large
    }
}

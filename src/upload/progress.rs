use super::error::{Result, UploadError};

/// Whole-file percentage for a part that has `part_uploaded_bytes` on the wire
///
/// Recomputed from absolute positions on every call, never accumulated.
pub fn whole_file_percent(part_offset: u64, part_uploaded_bytes: u64, total_file_size: u64) -> Result<u8> {
    if total_file_size == 0 {
        return Err(UploadError::config("total file size must be greater than zero"));
    }
    let done = (part_offset as u128 + part_uploaded_bytes as u128).min(total_file_size as u128);
    Ok((done * 100 / total_file_size as u128) as u8)
}

/// Bytes of a `part_length` part implied by a transfer-client progress report
///
/// Prefers the reported byte count; falls back to the local percentage,
/// clamped to `[0, 100]`, when the client only reports a percentage.
pub fn part_bytes_from_report(percent: f64, uploaded_bytes: Option<u64>, part_length: u64) -> u64 {
    match uploaded_bytes {
        Some(bytes) => bytes.min(part_length),
        None => {
            let p = if percent.is_nan() { 0.0 } else { percent.clamp(0.0, 100.0) };
            ((part_length as f64) * p / 100.0).floor() as u64
        }
    }
}

/// Keeps reported whole-file progress non-decreasing for one job run
#[derive(Debug, Default, Clone)]
pub struct ProgressTracker {
    last: u8,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a freshly computed percentage into the running value
    pub fn advance(&mut self, percent: u8) -> u8 {
        self.last = self.last.max(percent.min(100));
        self.last
    }

    pub fn current(&self) -> u8 {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_file_percent() {
        assert_eq!(whole_file_percent(0, 0, 250).unwrap(), 0);
        assert_eq!(whole_file_percent(0, 50, 250).unwrap(), 20);
        assert_eq!(whole_file_percent(100, 50, 250).unwrap(), 60);
        assert_eq!(whole_file_percent(200, 50, 250).unwrap(), 100);
        // floor, not round
        assert_eq!(whole_file_percent(0, 2, 3).unwrap(), 66);
    }

    #[test]
    fn test_whole_file_percent_never_exceeds_100() {
        assert_eq!(whole_file_percent(200, 500, 250).unwrap(), 100);
        assert_eq!(whole_file_percent(u64::MAX, u64::MAX, 10).unwrap(), 100);
    }

    #[test]
    fn test_whole_file_percent_rejects_empty_file() {
        let err = whole_file_percent(0, 0, 0).unwrap_err();
        assert_eq!(err.kind(), "ConfigurationError");
    }

    #[test]
    fn test_part_bytes_from_report() {
        assert_eq!(part_bytes_from_report(0.0, Some(40), 100), 40);
        assert_eq!(part_bytes_from_report(0.0, Some(400), 100), 100);
        assert_eq!(part_bytes_from_report(50.0, None, 100), 50);
        assert_eq!(part_bytes_from_report(150.0, None, 100), 100);
        assert_eq!(part_bytes_from_report(-5.0, None, 100), 0);
        assert_eq!(part_bytes_from_report(f64::NAN, None, 100), 0);
    }

    #[test]
    fn test_tracker_is_monotonic() {
        let mut tracker = ProgressTracker::new();
        let seen: Vec<u8> = [10, 5, 40, 39, 100, 0]
            .into_iter()
            .map(|p| tracker.advance(p))
            .collect();
        assert_eq!(seen, vec![10, 10, 40, 40, 100, 100]);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(tracker.current(), 100);
        assert_eq!(ProgressTracker::new().current(), 0);
    }
}

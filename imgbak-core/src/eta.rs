//! Completion-time estimate by linear extrapolation of the observed throughput.
use crate::error::{Error, Result};

/// Predicts the total duration of a copy, in seconds.
///
/// Assumes the remaining bytes will be copied at the same average rate as the
/// ones already copied: `elapsed * target / copied`.
///
/// # Errors
///
/// [`Error::Division`] when `bytes_copied` is zero.
pub fn predict_remaining(
    elapsed_secs: u64,
    total_target_bytes: u64,
    bytes_copied: u64,
) -> Result<f64> {
    if bytes_copied == 0 {
        return Err(Error::Division);
    }
    Ok(elapsed_secs as f64 * total_target_bytes as f64 / bytes_copied as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extrapolates_throughput() {
        let total = predict_remaining(12, 10_000_000_000, 1_073_741_824).unwrap();
        assert!((total - 111.8).abs() < 0.05, "{total}");
    }

    #[test]
    fn finished_copy_predicts_elapsed() {
        assert_eq!(predict_remaining(40, 4096, 4096).unwrap(), 40.0);
    }

    #[test]
    fn zero_copied_is_an_error() {
        assert!(matches!(predict_remaining(5, 100, 0), Err(Error::Division)));
        assert!(matches!(predict_remaining(0, 0, 0), Err(Error::Division)));
    }
}

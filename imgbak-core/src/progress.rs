//! Parsing of the status lines `dd status=progress` writes to stderr.
//!
//! A line looks like
//! `1073741824 bytes (1.1 GB, 1.0 GiB) copied, 12.0023 s, 89.5 MB/s`. Under a
//! locale with a decimal comma the elapsed time itself contains a comma
//! (`12,0023 s`), so the timing segment cannot simply be split on commas.
use crate::error::{Error, Result};

/// Byte count and elapsed time extracted from one progress line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProgressSample {
    pub bytes_copied: u64,
    /// Whole seconds as reported by the copy tool; fractions are truncated.
    pub elapsed_secs: u64,
}

/// Parses a single progress line.
///
/// # Errors
///
/// [`Error::Format`] if the byte count, the commas around the timing segment
/// or the time unit are missing or unreadable.
pub fn parse(line: &str) -> Result<ProgressSample> {
    let line = line.trim();

    let bytes_end = line
        .find(' ')
        .ok_or_else(|| Error::format(line, "no byte count"))?;
    let bytes_copied = line[..bytes_end]
        .parse()
        .map_err(|_| Error::format(line, "byte count is not a number"))?;

    // Lines for small counts omit the parenthesised human sizes.
    let bracket = line.find(')').unwrap_or(bytes_end);
    let start = find_from(line, ',', bracket)
        .ok_or_else(|| Error::format(line, "no timing segment"))?;
    let end = find_from(line, ',', start + 1)
        .ok_or_else(|| Error::format(line, "timing segment not terminated"))?;

    let segment = match line[..end].chars().last() {
        Some('s' | 'm' | 'h') => &line[start + 1..end],
        _ => {
            let next = find_from(line, ',', end + 1)
                .ok_or_else(|| Error::format(line, "decimal timing segment not terminated"))?;
            &line[start + 1..next]
        }
    };

    let elapsed_secs = parse_elapsed(segment.trim())
        .ok_or_else(|| Error::format(line, "unreadable elapsed time"))?;

    Ok(ProgressSample {
        bytes_copied,
        elapsed_secs,
    })
}

fn find_from(haystack: &str, needle: char, from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .find(needle)
        .map(|index| index + from)
}

/// `12 s`, `12,0023 s`, `12.0023 s`, `3 m`, `1,5 m`, `2,25 h`.
fn parse_elapsed(segment: &str) -> Option<u64> {
    let unit = segment.chars().last()?;
    let factor = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        _ => return None,
    };
    let value = segment[..segment.len() - 1].trim();

    let (whole, fraction) = match value.split_once([',', '.']) {
        Some((whole, fraction)) => (whole.trim(), Some(fraction.trim())),
        None => (value, None),
    };
    let whole: u64 = whole.parse().ok()?;

    match fraction {
        Some(fraction) if factor > 1 => {
            let fraction: f64 = format!("0.{fraction}").parse().ok()?;
            whole
                .checked_mul(factor)?
                .checked_add((fraction * factor as f64) as u64)
        }
        _ => whole.checked_mul(factor),
    }
}

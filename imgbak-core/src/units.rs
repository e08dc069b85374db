//! Conversions between raw byte counts and the human-readable strings used in
//! listings and progress rows.

const SUFFIXES: [&str; 9] = ["Bytes", "KB", "MB", "GB", "TB", "PB", "EB", "ZB", "YB"];

pub const MIB: u64 = 1024 * 1024;
pub const GIB: u64 = 1024 * MIB;
pub const TIB: u64 = 1024 * GIB;

/// Formats a byte count with the largest unit that keeps the value at or above one.
///
/// The quotient is rounded to two decimals and trailing zeros are dropped, so
/// `1536` bytes in base 1024 becomes `"1.5 KB"`. A zero count is always
/// `"0 Bytes"`, whatever the flags say.
///
/// # Arguments
///
/// * `bytes` - The value to format.
/// * `base1024` - Use 1024 bytes per kilobyte instead of 1000.
/// * `with_suffix` - Append the unit name.
/// * `with_space` - Put a space between the number and the unit.
pub fn to_human(bytes: u64, base1024: bool, with_suffix: bool, with_space: bool) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }

    let base = if base1024 { 1024.0 } else { 1000.0 };
    let mut value = bytes as f64;
    let mut index = 0;
    while value >= base && index < SUFFIXES.len() - 1 {
        value /= base;
        index += 1;
    }

    let number = trim_decimals(format!("{value:.2}"));
    match (with_suffix, with_space) {
        (false, _) => number,
        (true, true) => format!("{number} {}", SUFFIXES[index]),
        (true, false) => format!("{number}{}", SUFFIXES[index]),
    }
}

fn trim_decimals(mut number: String) -> String {
    if number.contains('.') {
        let kept = number.trim_end_matches('0').trim_end_matches('.').len();
        number.truncate(kept);
    }
    number
}

/// Parses a size token such as `512M`, `1,5G`, `931.32 GB` or `2048`.
///
/// Suffixed values are scaled by binary powers of 1024 and may use a comma as
/// the decimal separator. A bare number is taken as an exact byte count.
/// Returns `None` when the token is not a size.
pub fn unit_size_to_bytes(token: &str) -> Option<u64> {
    let token = token.trim();
    let split = token
        .find(|c: char| c.is_ascii_alphabetic())
        .unwrap_or(token.len());
    let (number, suffix) = token.split_at(split);
    let number = number.trim();

    let factor = match suffix.to_ascii_uppercase().as_str() {
        "" => return number.parse().ok(),
        "B" | "BYTES" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => MIB,
        "G" | "GB" | "GIB" => GIB,
        "T" | "TB" | "TIB" => TIB,
        _ => return None,
    };

    let value: f64 = number.replace(',', ".").parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    Some((value * factor as f64) as u64)
}

/// Formats a duration in whole seconds as `"N sec"`, `"MM:SS min"` or `"HH:MM:SS hr"`.
pub fn human_time(secs: u64) -> String {
    if secs < 60 {
        format!("{secs} sec")
    } else if secs < 3600 {
        format!("{:02}:{:02} min", secs / 60, secs % 60)
    } else {
        let rest = secs % 3600;
        format!("{:02}:{:02}:{:02} hr", secs / 3600, rest / 60, rest % 60)
    }
}

/// Trim whitespace + strip outer quotes if present.
pub fn clean_str(raw: &str) -> &str {
    let trimmed = raw.trim();
    if trimmed.len() >= 2 && trimmed.starts_with('"') && trimmed.ends_with('"') {
        trimmed[1..trimmed.len() - 1].trim()
    } else {
        trimmed
    }
}

/// Parse a cleaned cell as a whole number; `None` for blanks.
pub fn parse_integer(raw: &str) -> Option<Result<i64, std::num::ParseIntError>> {
    let s = clean_str(raw);
    if s.is_empty() {
        None
    } else {
        Some(s.parse::<i64>())
    }
}

/// True for text that `f64` parsing accepts as a finite number.
pub fn is_float(s: &str) -> bool {
    s.parse::<f64>().map(f64::is_finite).unwrap_or(false)
}

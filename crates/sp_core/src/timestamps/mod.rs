use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

use crate::error::AppError;

/// Canonical storage form: RFC3339 in UTC at whole-second precision, so stored values have a
/// fixed width and sort lexicographically.
pub fn format_utc(dt: OffsetDateTime) -> Result<String, AppError> {
    let failed = |e: &dyn std::fmt::Display| {
        AppError::new("TIME_FORMAT_FAILED", "Failed to format timestamp")
            .with_details(e.to_string())
    };
    dt.to_offset(UtcOffset::UTC)
        .replace_nanosecond(0)
        .map_err(|e| failed(&e))?
        .format(&Rfc3339)
        .map_err(|e| failed(&e))
}

pub fn now_utc() -> Result<String, AppError> {
    format_utc(OffsetDateTime::now_utc())
}

pub fn parse(field: &str, value: &str) -> Result<OffsetDateTime, AppError> {
    OffsetDateTime::parse(value, &Rfc3339).map_err(|e| {
        AppError::new("VALIDATION_TS_PARSE_FAILED", format!("Failed to parse {field}"))
            .with_details(format!("value={value}; err={e}"))
    })
}

/// Parse and re-emit in storage form.
pub fn canonical(field: &str, value: &str) -> Result<String, AppError> {
    format_utc(parse(field, value)?)
}

/// Canonicalize a provider-supplied timestamp. Unparseable input yields `None`; callers decide
/// the fallback explicitly.
pub fn canonicalize(raw: &str) -> Option<String> {
    let dt = OffsetDateTime::parse(raw.trim(), &Rfc3339).ok()?;
    format_utc(dt).ok()
}

//! Phone number normalisation for Ugandan mobile-money numbers.

use regex::Regex;
use std::sync::LazyLock;

static SEPARATORS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\s\-()]").expect("valid regex"));
static NORMALIZED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\+\d{9,15}$").expect("valid regex"));

pub const COUNTRY_CODE: &str = "256";

/// Canonical `+256...` form.
///
/// Separators are stripped; `+...` is kept, `256...` gains a `+`, a leading
/// `0` becomes `+256`, anything else is prefixed with `+256`.
pub fn normalize_phone(raw: &str) -> String {
    let cleaned = SEPARATORS.replace_all(raw.trim(), "");

    if cleaned.starts_with('+') {
        cleaned.into_owned()
    } else if cleaned.starts_with(COUNTRY_CODE) {
        format!("+{}", cleaned)
    } else if let Some(rest) = cleaned.strip_prefix('0') {
        format!("+{}{}", COUNTRY_CODE, rest)
    } else {
        format!("+{}{}", COUNTRY_CODE, cleaned)
    }
}

/// True for `+` followed by 9 to 15 digits.
pub fn is_valid_normalized(phone: &str) -> bool {
    NORMALIZED.is_match(phone)
}

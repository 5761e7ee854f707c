//! Custom Askama template filters.

#![allow(clippy::unnecessary_wraps)]

use std::fmt::Display;

/// Returns the current year.
///
/// Usage in templates: `{{ ""|current_year }}`
#[askama::filter_fn]
pub fn current_year(_value: impl Display, _env: &dyn askama::Values) -> askama::Result<i32> {
    use chrono::Datelike;
    Ok(chrono::Utc::now().year())
}

/// Prefix an amount with the currency sign.
///
/// Usage in templates: `{{ sku.price|yuan }}`
#[askama::filter_fn]
pub fn yuan(amount: impl Display, _env: &dyn askama::Values) -> askama::Result<String> {
    Ok(format!("¥{amount}"))
}

/// Shorten text to `max` characters, appending an ellipsis when cut.
///
/// Usage in templates: `{{ sku.summary|clip(40) }}`
#[askama::filter_fn]
pub fn clip(value: impl Display, _env: &dyn askama::Values, max: usize) -> askama::Result<String> {
    Ok(clip_chars(&value.to_string(), max))
}

fn clip_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((cut, _)) => format!("{}…", text.get(..cut).unwrap_or(text)),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clip_chars() {
        assert_eq!(clip_chars("fresh apples", 5), "fresh…");
        assert_eq!(clip_chars("草莓很甜", 2), "草莓…");
        assert_eq!(clip_chars("kiwi", 4), "kiwi");
    }
}

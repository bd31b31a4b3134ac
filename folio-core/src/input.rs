//! Normalisation of the free-text page-jump and zoom fields.
//!
//! Both fields read a leading integer the way a lenient form field would:
//! surrounding whitespace is ignored, an optional sign is accepted and parsing
//! stops at the first non-digit. Invalid input is never reported as an error.

use crate::viewport::{DEFAULT_ZOOM_PERCENT, MIN_ZOOM_PERCENT};

/// Leading integer of `text`, saturating on overflow.
pub fn leading_integer(text: &str) -> Option<i64> {
    let trimmed = text.trim_start();
    let (negative, digits) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let mut value: i64 = 0;
    let mut seen = false;
    for byte in digits.bytes().take_while(u8::is_ascii_digit) {
        seen = true;
        value = value
            .saturating_mul(10)
            .saturating_add(i64::from(byte - b'0'));
    }

    seen.then(|| if negative { -value } else { value })
}

/// Page the field should jump to, or `None` when the entry is ignored and
/// the field should revert to the current page.
pub fn parse_page_entry(text: &str, page_count: usize) -> Option<usize> {
    let page = leading_integer(text)?;
    if page >= 1 && page <= page_count as i64 {
        Some(page as usize)
    } else {
        None
    }
}

/// Zoom percent for the entry: non-numeric falls back to 100, small values
/// are floored and large values are kept.
pub fn parse_zoom_entry(text: &str) -> u32 {
    match leading_integer(text) {
        Some(percent) => percent.clamp(MIN_ZOOM_PERCENT as i64, u32::MAX as i64) as u32,
        None => DEFAULT_ZOOM_PERCENT,
    }
}

//! # Utilities Module
//!
//! This module contains helper functions and utilities used
//! across the backend service.

/// Format an amount as human-readable VND.
///
/// VND has no minor unit, so the amount is printed as-is with
/// thousands separators.
///
/// ## Examples
///
/// ```rust,ignore
/// assert_eq!(format_vnd(100_000), "100,000 VND");
/// assert_eq!(format_vnd(-2_500), "-2,500 VND");
/// ```
pub fn format_vnd(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();

    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    if amount < 0 {
        format!("-{} VND", grouped)
    } else {
        format!("{} VND", grouped)
    }
}

/// Truncate a string to at most `max_len` characters, keeping both ends.
///
/// Useful for logging hashes and free-text transfer descriptions.
/// Counts characters, not bytes, so Vietnamese text is never split
/// inside a code point.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    let len = s.chars().count();
    if len <= max_len || max_len < 5 {
        return s.to_string();
    }

    let half = (max_len - 3) / 2;
    let head: String = s.chars().take(half).collect();
    let tail: String = s.chars().skip(len - half).collect();
    format!("{}...{}", head, tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_vnd() {
        assert_eq!(format_vnd(0), "0 VND");
        assert_eq!(format_vnd(999), "999 VND");
        assert_eq!(format_vnd(100_000), "100,000 VND");
        assert_eq!(format_vnd(1_234_567), "1,234,567 VND");
        assert_eq!(format_vnd(-2_500), "-2,500 VND");
    }

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("abcdefghij", 10), "abcdefghij");
        assert_eq!(truncate_string("abcdefghijklmnop", 10), "abc...nop");
        assert_eq!(truncate_string(&"\u{e9}".repeat(12), 9), "\u{e9}\u{e9}\u{e9}...\u{e9}\u{e9}\u{e9}");
    }
}

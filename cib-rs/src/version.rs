//! Dotted version string comparison.

use std::cmp::Ordering;

/// Compares two dotted numeric version strings component by component.
///
/// Missing trailing components count as zero, so `3.0` equals `3.0.0`.
/// Each component is read as its leading digits; anything else counts as
/// zero.
pub fn compare_version(a: &str, b: &str) -> Ordering {
    let mut left = a.split('.').map(component);
    let mut right = b.split('.').map(component);
    loop {
        match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (l, r) => match l.unwrap_or(0).cmp(&r.unwrap_or(0)) {
                Ordering::Equal => continue,
                other => return other,
            },
        }
    }
}

fn component(part: &str) -> u64 {
    part.trim()
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0u64, |acc, b| acc.saturating_mul(10).saturating_add(u64::from(b - b'0')))
}

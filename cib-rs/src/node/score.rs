//! Score parsing and attribute increment expansion.
//!
//! Assigning `name="name++"` or `name="name+=N"` to an attribute that
//! already holds an integer increments it in place instead of storing the
//! literal text.

use super::Element;
use crate::constants::SCORE_INFINITY;

/// Parses a score, saturating at +/- infinity.
///
/// `INFINITY` and `+INFINITY` map to the positive limit, `-INFINITY` to the
/// negative one. Other values are read as a leading integer; text with no
/// leading integer scores zero.
pub fn char_to_score(score: &str) -> i64 {
    let score = score.trim();
    match score {
        "INFINITY" | "+INFINITY" => return SCORE_INFINITY,
        "-INFINITY" => return -SCORE_INFINITY,
        _ => {}
    }

    let bytes = score.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end = 1;
    }
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }

    match score[..end].parse::<i64>() {
        Ok(v) => v.clamp(-SCORE_INFINITY, SCORE_INFINITY),
        // Digits that overflow i64 are still beyond infinity
        Err(_) if end > 1 || (end == 1 && bytes[0].is_ascii_digit()) => {
            if bytes[0] == b'-' {
                -SCORE_INFINITY
            } else {
                SCORE_INFINITY
            }
        }
        Err(_) => 0,
    }
}

/// Assigns `value` to attribute `name` of `target`, expanding increments.
pub fn expand_increment(target: &mut Element, name: &str, value: &str) {
    expand(target, name, value, false);
}

/// Shared implementation. `in_place` is set when `value` is the attribute's
/// own current text, in which case there is no prior value to add to.
pub(super) fn expand(target: &mut Element, name: &str, value: &str, in_place: bool) {
    let Some(old_value) = target.attr(name) else {
        target.set_attr(name, value);
        return;
    };

    let Some(offset) = increment_offset(name, value) else {
        if !in_place {
            target.set_attr(name, value);
        }
        return;
    };

    let base = if in_place { 0 } else { char_to_score(old_value) };
    let result = (base + offset).min(SCORE_INFINITY);
    target.set_attr_int(name, result);
}

/// Returns the increment encoded in `value` for attribute `name`, if any.
fn increment_offset(name: &str, value: &str) -> Option<i64> {
    let rest = value.strip_prefix(name)?;
    if let Some(amount) = rest.strip_prefix("+=") {
        Some(char_to_score(amount))
    } else if rest.starts_with("++") {
        Some(1)
    } else {
        None
    }
}

//! Utility macros and helpers shared by the outgoing message implementation.

/// A macro for early returns with an error if a condition is not met.
///
/// This is similar to the `assert!` macro, but returns an error instead of panicking.
/// It's useful for validation checks where you want to return early with an error
/// if some condition is not satisfied.
///
/// # Example
///
/// ```ignore
/// ensure!(!self.headers_sent(), OutgoingError::headers_sent("set"));
/// ```
macro_rules! ensure {
    ($predicate:expr, $error:expr) => {
        if !$predicate {
            return Err($error);
        }
    };
}

pub(crate) use ensure;

/// Returns true if `token` appears in `value` as a whole word, compared ASCII case-insensitively.
///
/// A word boundary is the start or end of the value or any character outside `[A-Za-z0-9_]`,
/// so `"keep-alive, close"` contains `close` while `"closed"` does not.
pub(crate) fn contains_token(value: &str, token: &str) -> bool {
    let haystack = value.as_bytes();
    let needle = token.as_bytes();
    if needle.is_empty() || haystack.len() < needle.len() {
        return false;
    }

    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';

    (0..=haystack.len() - needle.len()).any(|start| {
        let end = start + needle.len();
        haystack[start..end].eq_ignore_ascii_case(needle)
            && (start == 0 || !is_word(haystack[start - 1]))
            && (end == haystack.len() || !is_word(haystack[end]))
    })
}

/// Returns true if `line` holds no control character other than horizontal tab.
///
/// A CR or LF here would end the line early and let the rest pass as header fields.
pub(crate) fn is_valid_first_line(line: &str) -> bool {
    !line.bytes().any(|b| b.is_ascii_control() && b != b'\t')
}

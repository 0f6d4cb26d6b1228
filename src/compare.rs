//! Whitespace-tolerant output comparison for the built-in checker.

use std::path::Path;

use crate::error::Result;

/// Token-wise equality: any run of whitespace separates tokens, trailing
/// blank space is irrelevant, a single differing token is a mismatch.
pub fn tokens_match(actual: &str, expected: &str) -> bool {
    let mut a = actual.split_whitespace();
    let mut b = expected.split_whitespace();
    loop {
        match (a.next(), b.next()) {
            (None, None) => return true,
            (Some(x), Some(y)) if x == y => continue,
            _ => return false,
        }
    }
}

/// Compare two files token-wise; contents are read as lossy UTF-8.
pub fn files_match(actual: &Path, expected: &Path) -> Result<bool> {
    let actual = std::fs::read(actual)?;
    let expected = std::fs::read(expected)?;
    Ok(tokens_match(
        &String::from_utf8_lossy(&actual),
        &String::from_utf8_lossy(&expected),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_output_matches() {
        assert!(tokens_match("3\n", "3\n"));
        assert!(tokens_match("hello world\n", "hello world\n"));
    }

    #[test]
    fn whitespace_differences_are_tolerated() {
        assert!(tokens_match("1 2  3\n", "1\n2\n3"));
        assert!(tokens_match("ok\n\n\n", "ok"));
        assert!(tokens_match("  a b ", "a b\n"));
    }

    #[test]
    fn a_single_differing_token_is_a_mismatch() {
        assert!(!tokens_match("1 2 3", "1 2 4"));
        assert!(!tokens_match("4", "3"));
    }

    #[test]
    fn missing_or_extra_tokens_are_a_mismatch() {
        assert!(!tokens_match("1 2", "1 2 3"));
        assert!(!tokens_match("1 2 3", "1 2"));
        assert!(!tokens_match("", "1"));
    }

    #[test]
    fn empty_outputs_match() {
        assert!(tokens_match("", ""));
        assert!(tokens_match("\n  \n", ""));
    }
}

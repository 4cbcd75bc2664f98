/// Truncate `output` to at most `max_chars` characters, appending a marker
/// when anything was cut. Never splits a UTF-8 code point.
pub fn truncate_output(output: &mut String, max_chars: usize) {
    if output.chars().count() <= max_chars {
        return;
    }
    let cut = output
        .char_indices()
        .nth(max_chars)
        .map(|(i, _)| i)
        .unwrap_or(output.len());
    output.truncate(cut);
    output.push_str("\n... [output truncated]");
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_output_untouched() {
        let mut s = "hello".to_string();
        truncate_output(&mut s, 10);
        assert_eq!(s, "hello");
    }

    #[test]
    fn long_output_truncated_with_marker() {
        let mut s = "x".repeat(100);
        truncate_output(&mut s, 10);
        assert!(s.starts_with("xxxxxxxxxx\n"));
        assert!(s.ends_with("[output truncated]"));
    }

    #[test]
    fn truncation_respects_multibyte_boundary() {
        let mut s = format!("{}л{}", "a".repeat(9), "z".repeat(20));
        truncate_output(&mut s, 10);
        assert!(s.contains('л'));
        assert!(!s.contains('z'));
    }
}

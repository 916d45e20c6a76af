const MAX_LOG_CHARS: usize = 1000;

/// Shorten a payload before it goes into a log line
pub fn truncate_for_log(text: &str) -> String {
    match text.char_indices().nth(MAX_LOG_CHARS) {
        Some((cut, _)) => format!("{}… [truncated]", &text[..cut]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_untouched() {
        assert_eq!(truncate_for_log("hello"), "hello");
    }

    #[test]
    fn test_long_text_truncated_on_char_boundary() {
        let text = "é".repeat(1500);
        let truncated = truncate_for_log(&text);
        assert!(truncated.ends_with("… [truncated]"));
        assert_eq!(truncated.chars().count(), 1000 + "… [truncated]".chars().count());
    }
}

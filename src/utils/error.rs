/// Collapses a provider error into one bounded line for logs and user messages.
///
/// Provider errors routinely embed the whole JSON response body (`text: "..."`) and, through
/// `anyhow`, a backtrace. Both are dropped; whitespace runs collapse to single spaces.
pub fn compact_error_message(message: &str, max_len: usize) -> String {
    let mut head = message;
    if let Some((prefix, _)) = head.split_once("Stack backtrace:") {
        head = prefix;
    }
    let elided_body = head.split_once(" text: ").map(|(prefix, _)| prefix);

    let mut compact = String::with_capacity(head.len().min(max_len.saturating_add(16)));
    for word in elided_body.unwrap_or(head).split_whitespace() {
        if !compact.is_empty() {
            compact.push(' ');
        }
        compact.push_str(word);
        if compact.len() > max_len {
            break;
        }
    }
    if elided_body.is_some() {
        compact.push_str(" text=<omitted>");
    }

    if compact.len() <= max_len {
        return compact;
    }
    let mut cut = max_len;
    while !compact.is_char_boundary(cut) {
        cut -= 1;
    }
    compact.truncate(cut);
    compact.push_str("...(truncated)");
    compact
}

#[cfg(test)]
mod tests {
    use super::compact_error_message;

    #[test]
    fn test_compact_error_message_drops_body_and_backtrace() {
        let raw = "error decoding response body text: \"{\\\"jsonrpc\\\":...}\"\nStack backtrace:\n 0: frame";
        let compact = compact_error_message(raw, 260);
        assert_eq!(compact, "error decoding response body text=<omitted>");
    }

    #[test]
    fn test_compact_error_message_truncates_on_char_boundary() {
        let raw = "é".repeat(40);
        let compact = compact_error_message(&raw, 11);
        assert!(compact.ends_with("...(truncated)"));
        assert!(compact.len() <= 11 + "...(truncated)".len());
    }

    #[test]
    fn test_compact_error_message_collapses_whitespace() {
        assert_eq!(
            compact_error_message("HTTP error 429\n\n  too   many requests", 260),
            "HTTP error 429 too many requests"
        );
    }
}

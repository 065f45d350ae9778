const MAX_LOG_CHARS: usize = 256;

/// Make a value that came from the address bar safe to put in a log line.
pub fn sanitize_log_value(input: &str) -> String {
    let mut out = String::with_capacity(input.len().min(MAX_LOG_CHARS));
    let mut count = 0usize;
    for c in input.chars().filter(|c| !is_hidden(*c)) {
        if count == MAX_LOG_CHARS {
            out.push_str("...[truncated]");
            break;
        }
        out.push(c);
        count += 1;
    }
    out
}

/// Like [`sanitize_log_value`] without the length cap, for error messages
/// that embed already bounded values.
pub fn strip_controls(input: &str) -> String {
    input.chars().filter(|c| !is_hidden(*c)).collect()
}

fn is_hidden(c: char) -> bool {
    c.is_control() || is_format_control(c)
}

fn is_format_control(c: char) -> bool {
    c == '\u{061C}'
        || c == '\u{200E}'
        || c == '\u{200F}'
        || ('\u{202A}'..='\u{202E}').contains(&c)
        || ('\u{2066}'..='\u{2069}').contains(&c)
}

#[cfg(test)]
mod tests {
    use super::{sanitize_log_value, strip_controls};

    #[test]
    fn strips_escape_and_bidi_controls() {
        assert_eq!(sanitize_log_value("143\u{1b}_1\n\u{202e}000"), "143_1000");
    }

    #[test]
    fn truncates_long_values() {
        let got = sanitize_log_value(&"x".repeat(400));
        assert!(got.ends_with("...[truncated]"));
        assert_eq!(got.chars().filter(|c| *c == 'x').count(), 256);
    }

    #[test]
    fn strip_controls_keeps_long_messages_whole() {
        let msg = format!("{}\u{2066}tail\r", "y".repeat(300));
        let got = strip_controls(&msg);
        assert_eq!(got.len(), 304);
        assert!(got.ends_with("tail"));
    }
}

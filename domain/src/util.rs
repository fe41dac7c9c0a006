//! Shared utility functions.

/// Frame previews in log lines are cut to this many bytes.
pub const PREVIEW_BYTES: usize = 120;

/// Shorten a frame for logging without splitting a UTF-8 character.
///
/// Results and expressions can be arbitrarily large (whole DOM dumps), so
/// log lines only carry a prefix plus the original length.
pub fn preview(frame: &str) -> String {
    if frame.len() <= PREVIEW_BYTES {
        return frame.to_string();
    }
    let mut end = PREVIEW_BYTES;
    while end > 0 && !frame.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… ({} bytes)", &frame[..end], frame.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_short_frame_unchanged() {
        assert_eq!(preview("a:42"), "a:42");
    }

    #[test]
    fn preview_long_frame_is_cut() {
        let frame = "x".repeat(500);
        let shown = preview(&frame);
        assert!(shown.starts_with(&"x".repeat(PREVIEW_BYTES)));
        assert!(shown.ends_with("(500 bytes)"));
    }

    #[test]
    fn preview_respects_char_boundary() {
        // 'あ' is 3 bytes; 41 of them straddle the cut at byte 120 -> 123
        let frame = "あ".repeat(41);
        let shown = preview(&frame);
        assert!(shown.starts_with(&"あ".repeat(40)));
        assert!(!shown.starts_with(&"あ".repeat(41)));
    }
}

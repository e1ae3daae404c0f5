//! Fixed-window text segmentation.
//!
//! Splits extracted text into overlapping windows of `segment_length`
//! characters. Each window starts `segment_length - segment_overlap`
//! characters after the previous one, so consecutive segments share
//! `segment_overlap` characters of context.
//!
//! Lengths are measured in `char`s, never bytes, so windows always fall on
//! UTF-8 boundaries.
//!
//! # Example
//!
//! ```rust
//! use context_index::chunk::segment_text;
//!
//! let segments = segment_text("abcdefgh", 4, 2);
//! assert_eq!(segments, vec!["abcd", "cdef", "efgh"]);
//! ```

/// Split `text` into overlapping windows.
///
/// # Guarantees
///
/// - Segments are returned in source order.
/// - Text no longer than `segment_length` yields exactly one segment.
/// - Whitespace-only text yields no segments.
/// - The final window always reaches the end of the text.
///
/// # Panics
///
/// Never; callers validate `segment_length > segment_overlap` at config
/// load, and a zero step is clamped to 1.
pub fn segment_text(text: &str, segment_length: usize, segment_overlap: usize) -> Vec<String> {
    if text.trim().is_empty() || segment_length == 0 {
        return Vec::new();
    }

    // Byte offset of every char, plus the end of the string.
    let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
    bounds.push(text.len());
    let char_count = bounds.len() - 1;

    if char_count <= segment_length {
        return vec![text.to_string()];
    }

    let step = segment_length.saturating_sub(segment_overlap).max(1);
    let mut segments = Vec::new();
    let mut start = 0usize;

    loop {
        let end = (start + segment_length).min(char_count);
        let piece = &text[bounds[start]..bounds[end]];
        if !piece.trim().is_empty() {
            segments.push(piece.to_string());
        }
        if end == char_count {
            break;
        }
        start += step;
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_single_segment() {
        assert_eq!(segment_text("hello world", 3000, 1500), vec!["hello world"]);
    }

    #[test]
    fn test_empty_and_blank_text() {
        assert!(segment_text("", 10, 2).is_empty());
        assert!(segment_text(" \n\t ", 10, 2).is_empty());
    }

    #[test]
    fn test_windows_overlap() {
        let segs = segment_text("0123456789", 4, 1);
        assert_eq!(segs, vec!["0123", "3456", "6789"]);
    }

    #[test]
    fn test_no_overlap_partitions_text() {
        let text = "abcdefghij";
        let segs = segment_text(text, 3, 0);
        assert_eq!(segs, vec!["abc", "def", "ghi", "j"]);
        assert_eq!(segs.concat(), text);
    }

    #[test]
    fn test_last_window_reaches_end() {
        let text: String = (0..1000).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let segs = segment_text(&text, 300, 150);
        assert!(text.ends_with(segs.last().unwrap().as_str()));
        for s in &segs {
            assert!(s.chars().count() <= 300);
        }
        assert_eq!(&segs[1][..150], &segs[0][150..]);
    }

    #[test]
    fn test_multibyte_boundaries() {
        let text = "┌──┐│héllo│└──┘";
        let segs = segment_text(text, 4, 2);
        assert!(!segs.is_empty());
        for s in &segs {
            assert!(s.chars().count() <= 4);
        }
        assert!(segs[0].starts_with('┌'));
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta gamma delta epsilon zeta eta theta";
        assert_eq!(segment_text(text, 10, 3), segment_text(text, 10, 3));
    }
}

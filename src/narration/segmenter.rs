//! Splits narration text into bounded, ordered segments.
//!
//! Text is cut after each sentence terminator (`。`, `！`, `？`, newline).
//! A sentence that reaches the length cap is cut again into fixed-size
//! chunks. Lengths count Unicode scalar values.

/// Characters that end a segment.
pub const SEPARATORS: [char; 4] = ['\u{3002}', '\u{FF01}', '\u{FF1F}', '\n'];

pub fn is_separator(c: char) -> bool {
    SEPARATORS.contains(&c)
}

/// Split `text` into non-empty, trimmed segments of at most `max_chars`
/// characters, preserving order.
///
/// A `max_chars` of zero is treated as one.
pub fn split_segments(text: &str, max_chars: usize) -> Vec<String> {
    let cap = max_chars.max(1);
    let mut segments = Vec::new();
    let mut buffer = String::new();
    let mut buffered = 0usize;

    for c in text.chars() {
        buffer.push(c);
        buffered += 1;
        if is_separator(c) {
            if buffered >= cap {
                hard_split(&buffer, cap, &mut segments);
            } else {
                push_trimmed(&buffer, &mut segments);
            }
            buffer.clear();
            buffered = 0;
        }
    }

    if buffered > 0 {
        hard_split(&buffer, cap, &mut segments);
    }
    segments
}

/// Cut into `cap`-sized chunks on character boundaries.
fn hard_split(buffer: &str, cap: usize, segments: &mut Vec<String>) {
    let mut start = 0;
    let mut count = 0;
    for (index, _) in buffer.char_indices() {
        if count == cap {
            push_trimmed(&buffer[start..index], segments);
            start = index;
            count = 0;
        }
        count += 1;
    }
    push_trimmed(&buffer[start..], segments);
}

fn push_trimmed(chunk: &str, segments: &mut Vec<String>) {
    let trimmed = chunk.trim();
    if !trimmed.is_empty() {
        segments.push(trimmed.to_string());
    }
}

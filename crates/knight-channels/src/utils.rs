//! Helpers shared by channel implementations.

/// Largest char boundary in `text` that is `<= index`.
fn char_boundary_at_or_before(text: &str, index: usize) -> usize {
    let mut i = index.min(text.len());
    while !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Split text into pieces of at most `max_len` bytes.
///
/// Cuts land on char boundaries, preferring the last newline inside the
/// window. A window that would end up empty (a single char wider than
/// `max_len`) is widened to that char.
pub fn split_message(text: &str, max_len: usize) -> Vec<&str> {
    if text.len() <= max_len {
        return vec![text];
    }

    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        if rest.len() <= max_len {
            chunks.push(rest);
            break;
        }

        let mut end = char_boundary_at_or_before(rest, max_len);
        if end == 0 {
            end = rest.chars().next().map(char::len_utf8).unwrap_or(rest.len());
        }
        let cut = match rest[..end].rfind('\n') {
            Some(nl) if nl > 0 => nl + 1,
            _ => end,
        };

        let (head, tail) = rest.split_at(cut);
        chunks.push(head);
        rest = tail;
    }

    chunks
}

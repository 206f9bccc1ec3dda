//! Snippet formatting and chunking for Telegram delivery.
//!
//! Telegram's message limit is 4096 characters. A snippet becomes one message
//! when header + body fit; otherwise the body is split at paragraph, sentence,
//! or whitespace boundaries (hard cut as last resort) and continuation
//! messages carry a "(continued i/n)" marker instead of the header.

use bookdrip_core::Book;

/// Hard per-message cap (Telegram's limit).
pub const MAX_MESSAGE_LEN: usize = 4096;

/// Bytes reserved beyond the header in the first chunk's budget.
const FIRST_CHUNK_MARGIN: usize = 10;

/// Bytes reserved for the continuation marker in follow-up chunks.
const CONTINUATION_RESERVE: usize = 32;

/// Size limits applied when chunking a snippet.
#[derive(Debug, Clone)]
pub struct ChunkLimits {
    pub max_len: usize,
    pub margin: usize,
}

impl Default for ChunkLimits {
    fn default() -> Self {
        Self {
            max_len: MAX_MESSAGE_LEN,
            margin: FIRST_CHUNK_MARGIN,
        }
    }
}

impl ChunkLimits {
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            max_len,
            margin: FIRST_CHUNK_MARGIN,
        }
    }
}

/// Format one snippet into ready-to-send messages, each within `max_len`.
///
/// `position` is the 0-indexed snippet position; the header shows it 1-indexed.
pub fn format_snippet(
    book: &Book,
    content: &str,
    position: u32,
    total: u32,
    limits: &ChunkLimits,
) -> Vec<String> {
    let header = build_header(book, position, total);
    let body = normalize_content(content);

    let full = format!("{header}\n\n{body}");
    if full.len() <= limits.max_len {
        return vec![full];
    }
    split_into_messages(&header, &body, limits)
}

/// Book title, optional author, and a progress line.
pub fn build_header(book: &Book, position: u32, total: u32) -> String {
    let mut parts = vec![format!("📚 *{}*", escape_markdown(&book.title))];
    if let Some(ref author) = book.author {
        parts.push(format!("✍️ {}", escape_markdown(author)));
    }
    parts.push(format!("📖 {}/{} snippets", position + 1, total));
    parts.join("\n")
}

/// Congratulation notice sent once when a book is finished.
pub fn completion_message(book: &Book, total: u32) -> String {
    format!(
        "🎉 *Congratulations!*\n\nYou've completed *{}*!\n\n📚 Total snippets read: {total}\n\nGreat job on finishing this book! 🏆",
        escape_markdown(&book.title),
    )
}

/// Collapse whitespace runs inside paragraphs to single spaces, dropping
/// empty paragraphs but preserving blank-line paragraph breaks.
pub fn normalize_content(content: &str) -> String {
    content
        .split("\n\n")
        .filter_map(|para| {
            let cleaned = para.split_whitespace().collect::<Vec<_>>().join(" ");
            if cleaned.is_empty() {
                None
            } else {
                Some(cleaned)
            }
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Escape special characters for Telegram Markdown.
pub fn escape_markdown(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    for ch in text.chars() {
        match ch {
            '_' | '*' | '[' | ']' | '(' | ')' | '~' | '`' | '>' | '#' | '+' | '-' | '='
            | '|' | '{' | '}' | '.' | '!' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

fn split_into_messages(header: &str, body: &str, limits: &ChunkLimits) -> Vec<String> {
    let first_budget = limits
        .max_len
        .saturating_sub(header.len() + limits.margin)
        .max(1);
    let cont_budget = limits.max_len.saturating_sub(CONTINUATION_RESERVE).max(1);

    let chunks = split_content(body, first_budget, cont_budget);
    let total = chunks.len();

    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            if i == 0 {
                format!("{header}\n\n{chunk}")
            } else {
                format!("📖 _(continued {}/{total})_\n\n{chunk}", i + 1)
            }
        })
        .collect()
}

/// Split `content` into chunks: the first within `first_budget` bytes, the
/// rest within `cont_budget`.
fn split_content(content: &str, first_budget: usize, cont_budget: usize) -> Vec<String> {
    if content.len() <= first_budget {
        return vec![content.to_string()];
    }

    let mut chunks = Vec::new();
    let mut remaining = content;
    let mut budget = first_budget;

    while !remaining.is_empty() {
        if remaining.len() <= budget {
            chunks.push(remaining.to_string());
            break;
        }
        let mut cut = find_split_point(remaining, budget);
        if cut == 0 {
            // A single multi-byte char wider than the budget — take it whole.
            cut = remaining
                .char_indices()
                .nth(1)
                .map(|(i, _)| i)
                .unwrap_or(remaining.len());
        }
        chunks.push(remaining[..cut].trim_end().to_string());
        remaining = remaining[cut..].trim_start();
        budget = cont_budget;
    }

    chunks
}

/// Best cut index within `max` bytes, in priority order: paragraph break past
/// half the budget, sentence end past half the budget, last whitespace, hard
/// cut at the largest char boundary.
fn find_split_point(text: &str, max: usize) -> usize {
    let limit = floor_char_boundary(text, max);
    let window = &text[..limit];

    if let Some(p) = window.rfind("\n\n") {
        if p > max / 2 {
            return p + 2;
        }
    }

    let sentence = [". ", "! ", "? "]
        .iter()
        .filter_map(|end| window.rfind(end))
        .max();
    if let Some(p) = sentence {
        if p > max / 2 {
            return p + 2;
        }
    }

    if let Some(p) = window.rfind(' ') {
        if p > 0 {
            return p + 1;
        }
    }

    limit
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    while !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book() -> Book {
        Book {
            id: 1,
            title: "Walden".to_string(),
            author: Some("Henry David Thoreau".to_string()),
            total_snippets: 100,
        }
    }

    fn collapse(s: &str) -> String {
        s.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn short_snippet_is_a_single_message_with_header() {
        let messages = format_snippet(&book(), "A short thought.", 4, 100, &ChunkLimits::default());
        assert_eq!(messages.len(), 1);
        assert!(messages[0].contains("Walden"));
        assert!(messages[0].contains("5/100 snippets"));
        assert!(messages[0].ends_with("A short thought."));
    }

    #[test]
    fn body_at_exact_budget_is_one_chunk_and_one_byte_more_splits() {
        let budget = 100;
        let body = "a".repeat(budget);
        assert_eq!(split_content(&body, budget, 80).len(), 1);
        let body = "a".repeat(budget + 1);
        assert!(split_content(&body, budget, 80).len() >= 2);
    }

    #[test]
    fn every_message_respects_max_len() {
        let limits = ChunkLimits::with_max_len(256);
        let body = "The quick brown fox jumps over the lazy dog. ".repeat(60);
        let messages = format_snippet(&book(), &body, 0, 100, &limits);
        assert!(messages.len() >= 2);
        for m in &messages {
            assert!(m.len() <= limits.max_len, "message too large: {}", m.len());
        }
    }

    #[test]
    fn continuation_markers_are_numbered_and_header_only_on_first() {
        let limits = ChunkLimits::with_max_len(256);
        let body = "word ".repeat(300);
        let messages = format_snippet(&book(), &body, 0, 100, &limits);
        assert!(messages.len() >= 3);
        assert!(messages[0].contains("Walden"));
        for (i, m) in messages.iter().enumerate().skip(1) {
            assert!(
                m.starts_with(&format!("📖 _(continued {}/{})_", i + 1, messages.len())),
                "bad marker on message {i}: {m:?}"
            );
            assert!(!m.contains("Walden"));
        }
    }

    #[test]
    fn chunks_concatenate_back_to_the_body() {
        let body = "First sentence here. Second sentence there. ".repeat(40);
        let normalized = normalize_content(&body);
        let chunks = split_content(&normalized, 200, 180);
        assert!(chunks.len() >= 2);
        assert_eq!(collapse(&chunks.join(" ")), collapse(&normalized));
    }

    #[test]
    fn splits_prefer_sentence_boundaries() {
        let body = format!("{}. {}", "a".repeat(150), "b".repeat(200));
        let chunks = split_content(&body, 200, 200);
        assert_eq!(chunks[0], format!("{}.", "a".repeat(150)));
    }

    #[test]
    fn paragraph_breaks_win_over_sentences() {
        let body = format!("{}. more\n\n{}", "a".repeat(120), "b".repeat(200));
        let chunks = split_content(&body, 200, 200);
        assert_eq!(chunks[0], format!("{}. more", "a".repeat(120)));
    }

    #[test]
    fn hard_cut_is_char_boundary_safe() {
        // 2-byte chars with no whitespace force the hard-cut fallback.
        let body = "é".repeat(500);
        let chunks = split_content(&body, 101, 101);
        for c in &chunks {
            assert!(c.len() <= 101);
            assert!(!c.is_empty());
        }
        assert_eq!(chunks.concat(), body);
    }

    #[test]
    fn normalize_collapses_spaces_but_keeps_paragraphs() {
        let raw = "one   two\nthree\n\n\n\nfour    five";
        assert_eq!(normalize_content(raw), "one two three\n\nfour five");
    }

    #[test]
    fn markdown_specials_are_escaped_in_headers() {
        let escaped = escape_markdown("C. Doctorow (ed.) [2020]");
        assert!(escaped.contains("\\."));
        assert!(escaped.contains("\\("));
        assert!(escaped.contains("\\["));
        assert_eq!(escape_markdown("plain words 123"), "plain words 123");
    }

    #[test]
    fn completion_message_names_the_book() {
        let msg = completion_message(&book(), 100);
        assert!(msg.contains("Walden"));
        assert!(msg.contains("100"));
    }
}

//! Text chunking module
//!
//! Splits oversized document bodies into analyzable chunks. Boundaries
//! follow text structure: paragraphs first, sentences inside any
//! paragraph too large on its own. Sizes are measured in characters,
//! not bytes, so multi-byte text chunks the same as ASCII.

use tracing::debug;

/// A text chunk with metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// Index of this chunk in the document
    pub index: i32,
    /// The chunk content
    pub content: String,
    /// Character count of the content
    pub char_count: usize,
}

/// Split text into chunks no larger than `max_chunk_size` characters.
///
/// Whole-input whitespace is trimmed first; whitespace-only input
/// yields no chunks, and input that fits yields exactly one. A single
/// sentence longer than the limit is emitted as an oversized chunk
/// rather than cut mid-sentence.
pub fn chunk_text(text: &str, max_chunk_size: usize) -> Vec<TextChunk> {
    // Normalize CRLF so blank lines in Windows-formatted text still
    // read as paragraph boundaries.
    let normalized;
    let text = if text.contains('\r') {
        normalized = text.replace("\r\n", "\n");
        normalized.as_str()
    } else {
        text
    };
    let text = text.trim();
    if text.is_empty() {
        return Vec::new();
    }

    let total_chars = text.chars().count();
    if total_chars <= max_chunk_size {
        return vec![TextChunk {
            index: 0,
            content: text.to_string(),
            char_count: total_chars,
        }];
    }

    let mut pieces: Vec<String> = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0usize;

    for paragraph in split_paragraphs(text) {
        let para_chars = paragraph.chars().count();

        if para_chars > max_chunk_size {
            // Flush, then fall back to sentence boundaries inside the
            // oversized paragraph.
            flush(&mut pieces, &mut current, &mut current_chars);
            for sentence in split_sentences(paragraph) {
                let sent_chars = sentence.chars().count();
                if sent_chars > max_chunk_size {
                    flush(&mut pieces, &mut current, &mut current_chars);
                    pieces.push(sentence.to_string());
                    continue;
                }
                // +1 for the joining space
                let joined = if current.is_empty() {
                    sent_chars
                } else {
                    current_chars + 1 + sent_chars
                };
                if joined > max_chunk_size {
                    flush(&mut pieces, &mut current, &mut current_chars);
                    current.push_str(sentence);
                    current_chars = sent_chars;
                } else {
                    if !current.is_empty() {
                        current.push(' ');
                    }
                    current.push_str(sentence);
                    current_chars = joined;
                }
            }
            continue;
        }

        // +2 for the joining blank line
        let joined = if current.is_empty() {
            para_chars
        } else {
            current_chars + 2 + para_chars
        };
        if joined > max_chunk_size {
            flush(&mut pieces, &mut current, &mut current_chars);
            current.push_str(paragraph);
            current_chars = para_chars;
        } else {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
            current_chars = joined;
        }
    }
    flush(&mut pieces, &mut current, &mut current_chars);

    debug!(
        input_chars = total_chars,
        chunk_count = pieces.len(),
        max_chunk_size,
        "Text chunked"
    );

    pieces
        .into_iter()
        .enumerate()
        .map(|(index, content)| {
            let char_count = content.chars().count();
            TextChunk {
                index: index as i32,
                content,
                char_count,
            }
        })
        .collect()
}

fn flush(pieces: &mut Vec<String>, current: &mut String, current_chars: &mut usize) {
    if !current.is_empty() {
        pieces.push(std::mem::take(current));
        *current_chars = 0;
    }
}

/// Paragraphs are separated by one or more blank lines.
fn split_paragraphs(text: &str) -> Vec<&str> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Sentences end at `.`, `!` or `?` followed by whitespace. Text with
/// no such boundary comes back as one sentence.
fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut chars = paragraph.char_indices().peekable();

    while let Some((_, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?') {
            if let Some(&(next_i, next_c)) = chars.peek() {
                if next_c.is_whitespace() {
                    let sentence = paragraph[start..next_i].trim();
                    if !sentence.is_empty() {
                        sentences.push(sentence);
                    }
                    start = next_i;
                }
            }
        }
    }

    let tail = paragraph[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_whitespace_input() {
        assert!(chunk_text("", 100).is_empty());
        assert!(chunk_text("   \n\n  \t ", 100).is_empty());
    }

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunks = chunk_text("A short memo.", 100);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].content, "A short memo.");
        assert_eq!(chunks[0].char_count, 13);
    }

    #[test]
    fn test_paragraphs_pack_greedily() {
        // Three 10-char paragraphs; two fit per 25-char chunk with the
        // 2-char separator.
        let text = "aaaaaaaaaa\n\nbbbbbbbbbb\n\ncccccccccc";
        let chunks = chunk_text(text, 25);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "aaaaaaaaaa\n\nbbbbbbbbbb");
        assert_eq!(chunks[1].content, "cccccccccc");
    }

    #[test]
    fn test_no_adjacent_paragraphs_fit_together() {
        // 10k, 25k and 8k paragraphs under a 30k limit: no two adjacent
        // paragraphs combine, so each lands in its own chunk.
        let text = format!(
            "{}\n\n{}\n\n{}",
            "a".repeat(10_000),
            "b".repeat(25_000),
            "c".repeat(8_000)
        );
        let chunks = chunk_text(&text, 30_000);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.char_count).collect();
        assert_eq!(sizes, vec![10_000, 25_000, 8_000]);
    }

    #[test]
    fn test_crlf_blank_lines_split_paragraphs() {
        let text = "aaaaaaaaaa\r\n\r\nbbbbbbbbbb\r\n\r\ncccccccccc";
        let chunks = chunk_text(text, 25);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].content, "aaaaaaaaaa\n\nbbbbbbbbbb");
        assert_eq!(chunks[1].content, "cccccccccc");
    }

    #[test]
    fn test_oversized_paragraph_splits_on_sentences() {
        let text = "First sentence here. Second sentence here. Third sentence here.";
        let chunks = chunk_text(text, 45);
        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.char_count <= 45);
            assert!(chunk.content.ends_with('.'));
        }
    }

    #[test]
    fn test_oversized_sentence_emitted_whole() {
        let long_sentence = format!("{}.", "x".repeat(50));
        let text = format!("Short one. {} Short two.", long_sentence);
        let chunks = chunk_text(&text, 20);
        assert!(chunks.iter().any(|c| c.char_count == 51));
        // The oversized chunk is intact, never cut
        assert!(chunks.iter().any(|c| c.content == long_sentence));
    }

    #[test]
    fn test_char_counted_not_byte_counted() {
        // 10 three-byte chars fit a 10-char limit
        let text = "\u{4e00}".repeat(10);
        let chunks = chunk_text(&text, 10);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].char_count, 10);
    }

    #[test]
    fn test_bound_holds_for_structured_text() {
        let paragraph = "This is a sentence of reasonable length for testing. ".repeat(8);
        let text = [paragraph.as_str(); 6].join("\n\n");
        let chunks = chunk_text(&text, 300);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.char_count <= 300, "chunk of {} chars", chunk.char_count);
        }
        // Indexes are contiguous from zero
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i as i32);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha beta gamma. Delta epsilon zeta.\n\nEta theta iota kappa lambda.";
        let a = chunk_text(text, 30);
        let b = chunk_text(text, 30);
        assert_eq!(a, b);
    }

    #[test]
    fn test_all_content_preserved() {
        let text = "One two three. Four five six.\n\nSeven eight nine. Ten eleven twelve.";
        let chunks = chunk_text(text, 25);
        let rejoined: String = chunks
            .iter()
            .map(|c| c.content.replace("\n\n", " "))
            .collect::<Vec<_>>()
            .join(" ");
        for word in ["One", "six.", "Seven", "twelve."] {
            assert!(rejoined.contains(word), "missing {}", word);
        }
    }
}

use voxpersona_llm::TokenCounter;

/// Split a corpus into chunks of roughly `chunk_tokens` tokens with
/// `overlap` tokens shared between adjacent chunks.
///
/// Heading lines (leading `#`) start a fresh section so report boundaries
/// survive chunking; sections larger than the budget are windowed by words
/// using the tokenizer for the size measure.
pub fn chunk_text(
    text: &str,
    chunk_tokens: usize,
    overlap: usize,
    counter: &TokenCounter,
) -> Vec<String> {
    let mut chunks = Vec::new();
    for section in split_sections(text) {
        window_section(&section, chunk_tokens, overlap, counter, &mut chunks);
    }
    chunks.retain(|c| !c.trim().is_empty());
    chunks
}

fn split_sections(text: &str) -> Vec<String> {
    let mut sections = Vec::new();
    let mut current = String::new();
    for line in text.lines() {
        if line.trim_start().starts_with('#') && !current.trim().is_empty() {
            sections.push(std::mem::take(&mut current));
        }
        current.push_str(line);
        current.push('\n');
    }
    if !current.trim().is_empty() {
        sections.push(current);
    }
    sections
}

fn window_section(
    section: &str,
    chunk_tokens: usize,
    overlap: usize,
    counter: &TokenCounter,
    out: &mut Vec<String>,
) {
    if counter.count(section) <= chunk_tokens {
        out.push(section.trim_end().to_string());
        return;
    }

    let words: Vec<&str> = section.split_whitespace().collect();
    let mut start = 0;
    while start < words.len() {
        let mut end = start;
        let mut tokens = 0usize;
        while end < words.len() && tokens < chunk_tokens {
            tokens += counter.count(words[end]).max(1);
            end += 1;
        }
        out.push(words[start..end].join(" "));
        if end >= words.len() {
            break;
        }
        // Walk back from the window edge until the overlap budget is met.
        let mut back = end;
        let mut overlap_tokens = 0usize;
        while back > start + 1 && overlap_tokens < overlap {
            back -= 1;
            overlap_tokens += counter.count(words[back]).max(1);
        }
        start = back;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counter() -> TokenCounter {
        TokenCounter::for_model("test-model")
    }

    #[test]
    fn small_text_is_one_chunk() {
        let chunks = chunk_text("a short report", 1000, 100, &counter());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], "a short report");
    }

    #[test]
    fn headings_start_new_chunks() {
        let text = "# Report one\nbody one\n# Report two\nbody two\n";
        let chunks = chunk_text(text, 1000, 100, &counter());
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].contains("body one"));
        assert!(chunks[1].contains("body two"));
    }

    #[test]
    fn long_sections_are_windowed_with_overlap() {
        let text = (0..500)
            .map(|i| format!("word{i}"))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_text(&text, 100, 10, &counter());
        assert!(chunks.len() > 1);
        // Adjacent windows share their boundary words.
        let first_tail: Vec<&str> = chunks[0].split_whitespace().rev().take(2).collect();
        for word in first_tail {
            assert!(chunks[1].contains(word));
        }
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        assert!(chunk_text("", 1000, 100, &counter()).is_empty());
        assert!(chunk_text("   \n  ", 1000, 100, &counter()).is_empty());
    }
}

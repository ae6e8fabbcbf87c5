//! Paragraph-aware chunking with character overlap.

/// Chunk sizing, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    pub max_chars: usize,
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chars: 1000,
            overlap: 150,
        }
    }
}

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Paragraphs are packed greedily. A paragraph longer than the limit is
/// broken on word boundaries. Each chunk after the first starts with up to
/// `overlap` characters from the end of the previous one, when that still
/// fits.
pub fn chunk_text(text: &str, config: ChunkConfig) -> Vec<String> {
    let max = config.max_chars.max(1);
    let units: Vec<String> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .flat_map(|p| split_long(p, max))
        .collect();

    let mut chunks = Vec::new();
    let mut current = String::new();
    for unit in units {
        if current.is_empty() {
            current = unit;
            continue;
        }
        if char_len(&current) + 2 + char_len(&unit) <= max {
            current.push_str("\n\n");
            current.push_str(&unit);
            continue;
        }
        let tail = overlap_tail(&current, config.overlap);
        chunks.push(std::mem::take(&mut current));
        current = if !tail.is_empty() && char_len(&tail) + 1 + char_len(&unit) <= max {
            format!("{} {}", tail, unit)
        } else {
            unit
        };
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Break a paragraph into word-bounded pieces no longer than `max` characters.
fn split_long(paragraph: &str, max: usize) -> Vec<String> {
    if char_len(paragraph) <= max {
        return vec![paragraph.to_string()];
    }
    let mut pieces = Vec::new();
    let mut current = String::new();
    for word in paragraph.split_whitespace() {
        let word_len = char_len(word);
        if word_len > max {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            let chars: Vec<char> = word.chars().collect();
            pieces.extend(chars.chunks(max).map(|c| c.iter().collect::<String>()));
            continue;
        }
        let needed = if current.is_empty() { word_len } else { char_len(&current) + 1 + word_len };
        if needed > max {
            pieces.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Last `overlap` characters of `chunk`, advanced to the next word start.
fn overlap_tail(chunk: &str, overlap: usize) -> String {
    if overlap == 0 {
        return String::new();
    }
    let total = char_len(chunk);
    if total <= overlap {
        return chunk.split_whitespace().collect::<Vec<_>>().join(" ");
    }
    let start = chunk
        .char_indices()
        .nth(total - overlap)
        .map(|(i, _)| i)
        .unwrap_or(0);
    let tail = &chunk[start..];
    // Drop the partial word the cut landed in.
    let tail = match chunk[..start].chars().last() {
        Some(prev) if !prev.is_whitespace() => tail
            .find(char::is_whitespace)
            .map(|i| &tail[i..])
            .unwrap_or(""),
        _ => tail,
    };
    tail.split_whitespace().collect::<Vec<_>>().join(" ")
}

//! Lightweight lexical helpers shared by the hashing embedder and the
//! concern grounding checks.

/// Minimum shared prefix for two words to count as the same stem.
const STEM_PREFIX: usize = 5;

const STOPWORDS: &[&str] = &[
    "a", "about", "after", "all", "also", "an", "and", "any", "are", "as", "at", "be", "been",
    "before", "being", "both", "but", "by", "can", "could", "did", "do", "does", "during", "each",
    "for", "from", "had", "has", "have", "he", "her", "his", "how", "i", "if", "in", "into", "is",
    "it", "its", "learner", "more", "most", "my", "not", "of", "on", "or", "our", "she", "should",
    "so", "some", "student", "than", "that", "the", "their", "them", "then", "there", "these",
    "they", "this", "those", "to", "too", "very", "was", "we", "were", "what", "when", "which",
    "while", "who", "will", "with", "would", "you", "your",
];

/// Lowercase, replace punctuation with spaces, collapse whitespace.
pub fn normalize(text: &str) -> String {
    let mapped: String = text
        .chars()
        .map(|c| {
            if c.is_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                ' '
            }
        })
        .collect();
    mapped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Normalized words with stopwords removed.
pub fn content_words(text: &str) -> Vec<String> {
    normalize(text)
        .split(' ')
        .filter(|w| w.len() > 1 && !STOPWORDS.contains(w))
        .map(str::to_string)
        .collect()
}

/// Prefix key used for hashing, so inflections land in the same bucket.
pub fn stem_key(word: &str) -> &str {
    match word.char_indices().nth(STEM_PREFIX + 1) {
        Some((idx, _)) => &word[..idx],
        None => word,
    }
}

/// Whether two normalized words share a stem.
pub fn stems_match(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    let shared = a
        .chars()
        .zip(b.chars())
        .take_while(|(x, y)| x == y)
        .count();
    shared >= STEM_PREFIX
}

/// Fraction of `needles` with a stem match somewhere in `haystack`.
pub fn coverage(needles: &[String], haystack: &[String]) -> f32 {
    if needles.is_empty() {
        return 0.0;
    }
    let hits = needles
        .iter()
        .filter(|n| haystack.iter().any(|h| stems_match(n, h)))
        .count();
    hits as f32 / needles.len() as f32
}

/// Jaccard similarity over stem-matched word sets.
pub fn jaccard(a: &[String], b: &[String]) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let shared = a
        .iter()
        .filter(|x| b.iter().any(|y| stems_match(x, y)))
        .count();
    let union = a.len() + b.len() - shared;
    if union == 0 {
        0.0
    } else {
        shared as f32 / union as f32
    }
}

/// FNV-1a, stable across runs and platforms.
pub fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

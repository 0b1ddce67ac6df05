use serde_json::Value;

use super::chunking::Chunk;

pub const DEFAULT_CHUNK_SIZE: usize = 500;
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;
pub const DEFAULT_SEPARATORS: [&str; 6] = ["\n\n", "\n", ".", "!", "?", " "];

/// Splits long text on the coarsest separator present, merging the pieces
/// back up to `chunk_size` characters with a trailing overlap.
#[derive(Debug, Clone)]
pub struct RecursiveTextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl Default for RecursiveTextSplitter {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

impl RecursiveTextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1)),
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        self.separators = separators.into_iter().filter(|s| !s.is_empty()).collect();
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut final_chunks = Vec::new();

        let found = separators.iter().position(|sep| text.contains(sep.as_str()));
        let (splits, remaining) = match found {
            Some(i) => (split_keeping_separator(text, &separators[i]), &separators[i + 1..]),
            None => (self.hard_split(text), &separators[..0]),
        };

        let mut good: Vec<String> = Vec::new();
        for piece in splits {
            if char_len(&piece) < self.chunk_size {
                good.push(piece);
                continue;
            }
            if !good.is_empty() {
                final_chunks.extend(self.merge_splits(&good));
                good.clear();
            }
            if found.is_none() {
                // Hard cuts are exactly chunk_size long.
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    final_chunks.push(trimmed.to_string());
                }
            } else {
                final_chunks.extend(self.split_recursive(&piece, remaining));
            }
        }
        if !good.is_empty() {
            final_chunks.extend(self.merge_splits(&good));
        }
        final_chunks
    }

    fn hard_split(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        chars
            .chunks(self.chunk_size)
            .map(|c| c.iter().collect())
            .collect()
    }

    fn merge_splits(&self, splits: &[String]) -> Vec<String> {
        let mut docs = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut total = 0usize;

        for piece in splits {
            let len = char_len(piece);
            if total + len > self.chunk_size && !current.is_empty() {
                push_joined(&mut docs, &current);
                while
                    total > self.chunk_overlap ||
                    (total + len > self.chunk_size && total > 0)
                {
                    let Some(first) = current.first() else {
                        break;
                    };
                    total -= char_len(first);
                    current.remove(0);
                }
            }
            current.push(piece);
            total += len;
        }
        push_joined(&mut docs, &current);
        docs
    }
}

fn push_joined(docs: &mut Vec<String>, pieces: &[&str]) {
    let joined = pieces.concat();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        docs.push(trimmed.to_string());
    }
}

// The separator stays attached to the start of the piece that follows it.
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut last = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > last {
            pieces.push(text[last..idx].to_string());
        }
        last = idx;
    }
    if last < text.len() {
        pieces.push(text[last..].to_string());
    }
    pieces
}

/// Splits every chunk longer than the splitter's size, tagging the pieces
/// with `chunk_part`. Shorter chunks pass through untouched.
pub fn apply_recursive_chunking(chunks: Vec<Chunk>, splitter: &RecursiveTextSplitter) -> Vec<Chunk> {
    let mut out = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        if char_len(&chunk.text) <= splitter.chunk_size() {
            out.push(chunk);
            continue;
        }
        for (i, part) in splitter.split_text(&chunk.text).into_iter().enumerate() {
            let mut metadata = chunk.metadata.clone();
            metadata.insert("chunk_part".to_string(), Value::from(i));
            out.push(Chunk { text: part, metadata });
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn long_text() -> String {
        let mut text = String::new();
        for p in 0..6 {
            for s in 0..8 {
                text.push_str(&format!("Paragraph {} sentence {} explains searing and resting meat. ", p, s));
            }
            text.push_str("\n\n");
        }
        text
    }

    fn non_ws(s: &str) -> String {
        s.chars().filter(|c| !c.is_whitespace()).collect()
    }

    #[test]
    fn pieces_respect_size_and_are_non_empty() {
        let splitter = RecursiveTextSplitter::default();
        let text = long_text();
        let pieces = splitter.split_text(&text);
        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(!piece.trim().is_empty());
            assert!(char_len(piece) <= 500, "piece of {} chars", char_len(piece));
        }
    }

    #[test]
    fn every_word_survives_splitting() {
        let splitter = RecursiveTextSplitter::new(120, 20);
        let text = long_text();
        let pieces = splitter.split_text(&text);
        let joined = pieces.join(" ");
        for word in text.split_whitespace() {
            let word = word.trim_matches(|c: char| c.is_ascii_punctuation());
            assert!(joined.contains(word), "lost '{}'", word);
        }
        // Overlap only ever adds text.
        assert!(non_ws(&pieces.concat()).len() >= non_ws(&text).len());
    }

    #[test]
    fn text_without_separators_is_cut_hard() {
        let splitter = RecursiveTextSplitter::new(10, 0);
        let pieces = splitter.split_text(&"x".repeat(25));
        assert_eq!(pieces, ["x".repeat(10), "x".repeat(10), "x".repeat(5)]);
    }

    #[test]
    fn separator_starts_following_piece() {
        assert_eq!(split_keeping_separator("a.b.c", "."), ["a", ".b", ".c"]);
        assert_eq!(split_keeping_separator(".a", "."), [".a"]);
    }

    #[test]
    fn only_long_chunks_get_parts() {
        let mut metadata = Map::new();
        metadata.insert("type".into(), Value::from("section"));
        let short = Chunk { text: "Short text.".into(), metadata: metadata.clone() };
        let long = Chunk { text: long_text(), metadata };

        let out = apply_recursive_chunking(vec![short.clone(), long], &RecursiveTextSplitter::default());
        assert_eq!(out[0], short);
        assert!(out.len() > 2);
        for (i, chunk) in out[1..].iter().enumerate() {
            assert_eq!(chunk.metadata["chunk_part"], i);
            assert_eq!(chunk.metadata["type"], "section");
        }
    }
}

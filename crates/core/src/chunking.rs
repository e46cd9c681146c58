use crate::models::IngestionOptions;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
    pub min_chars: usize,
}

impl From<&IngestionOptions> for ChunkingConfig {
    fn from(value: &IngestionOptions) -> Self {
        Self {
            max_chars: value.chunk_max_chars,
            overlap_chars: value.chunk_overlap_chars,
            min_chars: value.min_chunk_chars,
        }
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// Splits text into bounded chunks, preferring paragraph boundaries, then
/// sentence boundaries, then a character window with overlap as the last
/// resort. Order is preserved; no text is dropped.
pub fn chunk_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    let paragraphs = text
        .split("\n\n")
        .map(|paragraph| paragraph.trim().replace('\t', " "))
        .filter(|paragraph| !paragraph.is_empty())
        .collect::<Vec<_>>();

    let mut units = Vec::new();
    for paragraph in paragraphs {
        if paragraph.len() <= config.max_chars {
            units.push(paragraph);
            continue;
        }

        for piece in pack_sentences(&paragraph, config) {
            units.push(piece);
        }
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    for unit in units {
        if current.is_empty() {
            current = unit;
            continue;
        }

        if current.len() + unit.len() + 2 <= config.max_chars {
            current.push_str("\n\n");
            current.push_str(&unit);
        } else {
            chunks.push(std::mem::replace(&mut current, unit));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }

    // Fragments below the minimum ride along with their predecessor; the
    // boundary preference wins over the strict size bound there.
    let mut merged: Vec<String> = Vec::new();
    for chunk in chunks {
        match merged.last_mut() {
            Some(previous) if chunk.len() < config.min_chars => {
                previous.push_str("\n\n");
                previous.push_str(&chunk);
            }
            _ => merged.push(chunk),
        }
    }

    if merged.is_empty() && !text.trim().is_empty() {
        merged.push(text.trim().to_string());
    }

    merged
}

fn pack_sentences(paragraph: &str, config: ChunkingConfig) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();

    for sentence in split_sentences(paragraph) {
        if sentence.len() > config.max_chars {
            if !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
            }
            pieces.extend(split_window(&sentence, config));
            continue;
        }

        if current.is_empty() {
            current = sentence;
        } else if current.len() + sentence.len() + 1 <= config.max_chars {
            current.push(' ');
            current.push_str(&sentence);
        } else {
            pieces.push(std::mem::replace(&mut current, sentence));
        }
    }
    if !current.is_empty() {
        pieces.push(current);
    }

    pieces
}

fn split_sentences(paragraph: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut last_end = 0usize;
    let mut prev_terminal = false;

    for (index, ch) in paragraph.char_indices() {
        if prev_terminal && ch.is_whitespace() {
            let piece = paragraph[last_end..index].trim();
            if !piece.is_empty() {
                sentences.push(piece.to_string());
            }
            last_end = index;
            prev_terminal = false;
        } else {
            prev_terminal = matches!(ch, '.' | '!' | '?');
        }
    }

    let tail = paragraph[last_end..].trim();
    if !tail.is_empty() {
        sentences.push(tail.to_string());
    }

    sentences
}

fn split_window(text: &str, config: ChunkingConfig) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let step = config
        .max_chars
        .saturating_sub(config.overlap_chars)
        .max(1);

    let mut pieces = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + config.max_chars).min(chars.len());
        pieces.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }

    pieces
}

pub fn make_chunk_id(document_id: &str, position: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(position.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

use crate::error::EngineError;
use regex::Regex;

/// Pluggable concept-mention extraction. Implementations emit one raw
/// string per occurrence; duplicates carry mention-count information and
/// must not be collapsed here.
pub trait ConceptExtractor: Send + Sync {
    fn extract(&self, text: &str) -> Vec<String>;
}

const STOPWORDS: [&str; 30] = [
    "the", "a", "an", "of", "in", "on", "and", "or", "for", "to", "with", "this", "that", "is",
    "are", "was", "were", "it", "its", "as", "at", "by", "from", "into", "not", "no", "but", "if",
    "then", "so",
];

fn is_stopword(word: &str) -> bool {
    let lowered = word.to_lowercase();
    STOPWORDS.contains(&lowered.as_str())
}

/// Regex-driven extractor: terms with at least two capital letters
/// (acronyms, product-style names) and runs of capitalized words.
pub struct KeywordConceptExtractor {
    acronym: Regex,
    phrase: Regex,
}

impl KeywordConceptExtractor {
    pub fn new() -> Result<Self, EngineError> {
        Ok(Self {
            acronym: Regex::new(r"\b[A-Za-z0-9]*[A-Z][A-Za-z0-9]*[A-Z][A-Za-z0-9]*\b")?,
            phrase: Regex::new(r"\b[A-Z][a-z]+(?:[ \t][A-Z][a-z]+)+\b")?,
        })
    }
}

impl ConceptExtractor for KeywordConceptExtractor {
    fn extract(&self, text: &str) -> Vec<String> {
        let mut found = Vec::new();

        for matched in self.acronym.find_iter(text) {
            let term = matched.as_str();
            if term.len() < 2 || is_stopword(term) {
                continue;
            }
            found.push(term.to_string());
        }

        for matched in self.phrase.find_iter(text) {
            if let Some(phrase) = trim_stopwords(matched.as_str()) {
                found.push(phrase);
            }
        }

        found
    }
}

/// Strips leading and trailing stopwords from a capitalized phrase.
/// Phrases that shrink below two words are discarded as noise.
fn trim_stopwords(phrase: &str) -> Option<String> {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    let start = words.iter().position(|word| !is_stopword(word))?;
    let end = words.iter().rposition(|word| !is_stopword(word))?;
    if end + 1 - start < 2 {
        return None;
    }
    Some(words[start..=end].join(" "))
}

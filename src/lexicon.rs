//! Lexicon Service
//!
//! Accepted answers scoped by letter and category. Entries are stored
//! normalized (see [`crate::core::text::normalize`]) so lookups compare like
//! for like with submitted answers.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::text::normalize;
use crate::game::state::{Category, CategoryId};

/// Lexicon errors.
#[derive(Debug, thiserror::Error)]
pub enum LexiconError {
    /// Failed to read the lexicon source.
    #[error("failed to read lexicon: {0}")]
    Io(#[from] std::io::Error),

    /// Lexicon source is malformed.
    #[error("malformed lexicon: {0}")]
    Parse(#[from] serde_json::Error),

    /// An entry references a category that was not declared.
    #[error("entry references unknown category {0}")]
    UnknownCategory(CategoryId),

    /// Backend failure of a remote lexicon.
    #[error("lexicon unavailable: {0}")]
    Unavailable(String),
}

/// Dictionary queries used by the round builder and the scoring engine.
#[async_trait]
pub trait Lexicon: Send + Sync {
    /// Accepted normalized answers per category for a letter.
    ///
    /// Categories without entries map to an empty set.
    async fn lookup(
        &self,
        letter: char,
        categories: &[CategoryId],
    ) -> Result<BTreeMap<CategoryId, BTreeSet<String>>, LexiconError>;

    /// For every letter, the categories that have at least one entry.
    async fn coverage(&self) -> Result<BTreeMap<char, Vec<Category>>, LexiconError>;
}

/// JSON layout accepted by [`MemoryLexicon::from_json`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexiconFile {
    /// Declared categories.
    pub categories: Vec<Category>,
    /// Word lists.
    pub entries: Vec<LexiconEntry>,
}

/// Words accepted for one (category, letter) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexiconEntry {
    /// Category id.
    pub category: CategoryId,
    /// Starting letter.
    pub letter: char,
    /// Accepted words, any casing or accents.
    pub words: Vec<String>,
}

/// Fold a letter to the uppercase, accent-free form rounds are keyed by.
pub fn letter_key(letter: char) -> Option<char> {
    normalize(&letter.to_string())
        .chars()
        .next()
        .and_then(|c| c.to_uppercase().next())
}

/// Lexicon held in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryLexicon {
    categories: BTreeMap<CategoryId, Category>,
    words: BTreeMap<(char, CategoryId), BTreeSet<String>>,
}

impl MemoryLexicon {
    /// Create an empty lexicon.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a category.
    pub fn add_category(&mut self, id: u32, name: impl Into<String>) -> CategoryId {
        let id = CategoryId(id);
        self.categories.insert(
            id,
            Category {
                id,
                name: name.into(),
            },
        );
        id
    }

    /// Add an accepted word. The letter is taken from the word itself.
    pub fn add_word(&mut self, category: CategoryId, word: &str) {
        let normalized = normalize(word);
        let Some(letter) = normalized.chars().next().and_then(letter_key) else {
            return;
        };
        self.words
            .entry((letter, category))
            .or_default()
            .insert(normalized);
    }

    /// Build from the JSON layout.
    pub fn from_json(json: &str) -> Result<Self, LexiconError> {
        let file: LexiconFile = serde_json::from_str(json)?;
        let mut lexicon = Self::new();

        for category in file.categories {
            lexicon.categories.insert(category.id, category);
        }
        for entry in file.entries {
            if !lexicon.categories.contains_key(&entry.category) {
                return Err(LexiconError::UnknownCategory(entry.category));
            }
            let Some(letter) = letter_key(entry.letter) else {
                continue;
            };
            let bucket = lexicon.words.entry((letter, entry.category)).or_default();
            for word in &entry.words {
                let normalized = normalize(word);
                if !normalized.is_empty() {
                    bucket.insert(normalized);
                }
            }
        }

        Ok(lexicon)
    }

    /// Load from a JSON file on disk.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, LexiconError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Number of (letter, category) pairs with entries.
    pub fn pair_count(&self) -> usize {
        self.words.values().filter(|w| !w.is_empty()).count()
    }
}

#[async_trait]
impl Lexicon for MemoryLexicon {
    async fn lookup(
        &self,
        letter: char,
        categories: &[CategoryId],
    ) -> Result<BTreeMap<CategoryId, BTreeSet<String>>, LexiconError> {
        let key = letter_key(letter);
        Ok(categories
            .iter()
            .map(|id| {
                let words = key
                    .and_then(|l| self.words.get(&(l, *id)))
                    .cloned()
                    .unwrap_or_default();
                (*id, words)
            })
            .collect())
    }

    async fn coverage(&self) -> Result<BTreeMap<char, Vec<Category>>, LexiconError> {
        let mut coverage: BTreeMap<char, Vec<Category>> = BTreeMap::new();
        for ((letter, category_id), words) in &self.words {
            if words.is_empty() {
                continue;
            }
            if let Some(category) = self.categories.get(category_id) {
                coverage.entry(*letter).or_default().push(category.clone());
            }
        }
        Ok(coverage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "categories": [
            { "id": 1, "name": "Animal" },
            { "id": 2, "name": "Fruta" }
        ],
        "entries": [
            { "category": 1, "letter": "B", "words": ["Baleia", "Borboleta", "Boi"] },
            { "category": 2, "letter": "b", "words": ["Banana"] },
            { "category": 2, "letter": "A", "words": ["Açaí", "  "] }
        ]
    }"#;

    #[tokio::test]
    async fn test_lookup_normalized() {
        let lexicon = MemoryLexicon::from_json(SAMPLE).unwrap();
        let result = lexicon.lookup('b', &[CategoryId(1), CategoryId(2)]).await.unwrap();

        assert!(result[&CategoryId(1)].contains("baleia"));
        assert!(result[&CategoryId(2)].contains("banana"));
    }

    #[tokio::test]
    async fn test_lookup_missing_pair_is_empty() {
        let lexicon = MemoryLexicon::from_json(SAMPLE).unwrap();
        let result = lexicon.lookup('Z', &[CategoryId(1)]).await.unwrap();
        assert!(result[&CategoryId(1)].is_empty());
    }

    #[tokio::test]
    async fn test_coverage() {
        let lexicon = MemoryLexicon::from_json(SAMPLE).unwrap();
        let coverage = lexicon.coverage().await.unwrap();

        assert_eq!(coverage[&'B'].len(), 2);
        assert_eq!(coverage[&'A'].len(), 1);
        assert_eq!(coverage[&'A'][0].name, "Fruta");
    }

    #[test]
    fn test_unknown_category_rejected() {
        let json = r#"{ "categories": [], "entries": [ { "category": 9, "letter": "B", "words": ["Boi"] } ] }"#;
        assert!(matches!(
            MemoryLexicon::from_json(json),
            Err(LexiconError::UnknownCategory(CategoryId(9)))
        ));
    }

    #[test]
    fn test_add_word_keys_by_first_letter() {
        let mut lexicon = MemoryLexicon::new();
        let animal = lexicon.add_category(1, "Animal");
        lexicon.add_word(animal, "Élan");
        lexicon.add_word(animal, "");
        assert_eq!(lexicon.pair_count(), 1);
        assert!(lexicon.words.contains_key(&('E', animal)));
    }

    #[test]
    fn test_letter_key() {
        assert_eq!(letter_key('á'), Some('A'));
        assert_eq!(letter_key('B'), Some('B'));
        assert_eq!(letter_key(' '), None);
    }
}

//! Keyword dictionary snapshots.
//!
//! The dictionary is read-mostly: the classifier and the reply-vocabulary
//! checks read it on every inbound message, while reloads happen rarely.
//! Readers take an `Arc` snapshot, so a reload swaps the whole table at once
//! and a classification never observes a half-updated dictionary.

use log::{error, info};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::classifier::Team;
use crate::text::{adaptive_similarity_check, normalize};

/// One team's (or reply kind's) trigger vocabulary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Vocabulary {
    #[serde(default)]
    pub words: Vec<String>,
    #[serde(default)]
    pub phrases: Vec<String>,
}

impl Vocabulary {
    /// Exact token match: any configured word present in the normalized
    /// token set of `text`.
    pub fn has_word_token(&self, text: &str) -> bool {
        let norm = normalize(text);
        let tokens: HashSet<&str> = norm.split_whitespace().collect();
        self.words
            .iter()
            .any(|w| tokens.contains(normalize(w).as_str()))
    }

    /// Phrase containment on the normalized text.
    pub fn has_phrase(&self, text: &str) -> bool {
        let norm = normalize(text);
        self.phrases.iter().any(|p| norm.contains(&normalize(p)))
    }

    /// Fuzzy match of the whole message against single-word triggers,
    /// used for short replies like "cancelar" with typos.
    pub fn fuzzy_matches(&self, text: &str) -> bool {
        self.words
            .iter()
            .any(|w| adaptive_similarity_check(text, &normalize(w)))
    }
}

/// Immutable keyword dictionary: per-team identifiers plus the reply
/// vocabularies (confirmation, cancellation, feedback request).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeywordSet {
    #[serde(default)]
    pub identifiers: HashMap<Team, Vocabulary>,
    #[serde(default)]
    pub confirmation: Vocabulary,
    #[serde(default)]
    pub cancellation: Vocabulary,
    /// Feedback-request ("retro") triggers.
    #[serde(default)]
    pub retro: Vocabulary,
}

/// Holds the current dictionary snapshot and reloads it wholesale from disk.
pub struct KeywordStore {
    path: PathBuf,
    current: RwLock<Arc<KeywordSet>>,
}

impl KeywordStore {
    /// Load the dictionary from `path`. A missing or malformed file logs an
    /// error and falls back to an empty dictionary, as the original system
    /// stays up with classification degraded to explicit references only.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let set = Self::read_file(&path);
        Self {
            path,
            current: RwLock::new(Arc::new(set)),
        }
    }

    fn read_file(path: &Path) -> KeywordSet {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<KeywordSet>(&raw) {
                Ok(set) => {
                    info!(
                        "keywords loaded from {}: {} team(s)",
                        path.display(),
                        set.identifiers.len()
                    );
                    set
                }
                Err(e) => {
                    error!("keywords file {} is malformed: {e}", path.display());
                    KeywordSet::default()
                }
            },
            Err(e) => {
                error!("could not read keywords file {}: {e}", path.display());
                KeywordSet::default()
            }
        }
    }

    /// Current snapshot; cheap to clone, never partially updated.
    pub fn snapshot(&self) -> Arc<KeywordSet> {
        self.current.read().expect("keywords lock poisoned").clone()
    }

    /// Re-read the file and swap the snapshot atomically.
    pub fn reload(&self) {
        let set = Arc::new(Self::read_file(&self.path));
        *self.current.write().expect("keywords lock poisoned") = set;
        info!("keywords reloaded from {}", self.path.display());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn vocabulary_word_and_phrase_checks() {
        let v = Vocabulary {
            words: vec!["listo".into(), "hecho".into()],
            phrases: vec!["ya quedó".into()],
        };
        assert!(v.has_word_token("Listo, gracias"));
        assert!(!v.has_word_token("listos")); // tokens are exact
        assert!(v.has_phrase("el equipo dice que ya quedo todo"));
        assert!(v.fuzzy_matches("hechoo"));
    }

    #[test]
    fn load_parses_keywords_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "identifiers": {{
                    "it": {{ "words": ["internet"], "phrases": ["sin señal"] }}
                }},
                "confirmation": {{ "words": ["listo"] }},
                "cancellation": {{ "words": ["cancelar"] }}
            }}"#
        )
        .unwrap();

        let store = KeywordStore::load(file.path());
        let set = store.snapshot();
        assert_eq!(set.identifiers[&Team::It].words, vec!["internet"]);
        assert!(set.confirmation.has_word_token("listo"));
        assert!(set.retro.words.is_empty());
    }

    #[test]
    fn reload_swaps_whole_snapshot() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "confirmation": {{ "words": ["ok"] }} }}"#).unwrap();

        let store = KeywordStore::load(file.path());
        let before = store.snapshot();
        assert!(before.confirmation.has_word_token("ok"));

        std::fs::write(
            file.path(),
            r#"{ "confirmation": { "words": ["done"] } }"#,
        )
        .unwrap();
        store.reload();

        let after = store.snapshot();
        assert!(after.confirmation.has_word_token("done"));
        // Old snapshot is untouched; readers holding it see consistent data.
        assert!(before.confirmation.has_word_token("ok"));
    }

    #[test]
    fn missing_file_degrades_to_empty_dictionary() {
        let store = KeywordStore::load("/nonexistent/keywords.json");
        assert!(store.snapshot().identifiers.is_empty());
    }
}

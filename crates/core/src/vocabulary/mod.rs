use serde::{Deserialize, Serialize};

use crate::backend::RecordStore;

/// The two record collections that hold pronunciations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VocabularyKind {
    Words,
    Phrases,
}

impl VocabularyKind {
    /// Name of the backing table.
    pub fn table(self) -> &'static str {
        match self {
            VocabularyKind::Words => "words",
            VocabularyKind::Phrases => "phrases",
        }
    }
}

/// A row from the `words` or `phrases` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabularyEntry {
    pub id: i64,
    /// Target-language text, used as the lookup key.
    pub darija: String,
    #[serde(default)]
    pub audio_file: Option<String>,
}

impl VocabularyEntry {
    pub fn new(id: i64, darija: impl Into<String>, audio_file: impl Into<String>) -> Self {
        Self {
            id,
            darija: darija.into(),
            audio_file: Some(audio_file.into()),
        }
    }

    /// The stored file name, ignoring blank values.
    pub fn audio_file(&self) -> Option<&str> {
        self.audio_file
            .as_deref()
            .filter(|name| !name.trim().is_empty())
    }
}

/// In-memory copy of both collections for the running session.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    words: Vec<VocabularyEntry>,
    phrases: Vec<VocabularyEntry>,
}

impl Vocabulary {
    pub fn new(words: Vec<VocabularyEntry>, phrases: Vec<VocabularyEntry>) -> Self {
        Self { words, phrases }
    }

    /// Fetches words then phrases. Any failure is logged and yields an empty
    /// vocabulary so that audio lookups degrade instead of aborting the lesson.
    pub async fn fetch(store: &dyn RecordStore) -> Self {
        let words = match store.fetch_vocabulary(VocabularyKind::Words).await {
            Ok(words) => words,
            Err(err) => {
                tracing::warn!(error = %err, "error fetching words");
                return Self::default();
            }
        };
        let phrases = match store.fetch_vocabulary(VocabularyKind::Phrases).await {
            Ok(phrases) => phrases,
            Err(err) => {
                tracing::warn!(error = %err, "error fetching phrases");
                return Self::default();
            }
        };

        tracing::debug!(
            words = words.len(),
            phrases = phrases.len(),
            "fetched vocabulary"
        );
        Self { words, phrases }
    }

    pub fn entries(&self, kind: VocabularyKind) -> &[VocabularyEntry] {
        match kind {
            VocabularyKind::Words => &self.words,
            VocabularyKind::Phrases => &self.phrases,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty() && self.phrases.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{Result, SafiError};

    struct Records {
        fail_on: Option<VocabularyKind>,
    }

    #[async_trait]
    impl RecordStore for Records {
        async fn fetch_vocabulary(&self, kind: VocabularyKind) -> Result<Vec<VocabularyEntry>> {
            if self.fail_on == Some(kind) {
                return Err(SafiError::DataFetch(kind.table().to_string()));
            }
            Ok(vec![VocabularyEntry::new(1, kind.table(), "a.mp3")])
        }
    }

    #[test]
    fn deserializes_rows_with_missing_audio() {
        let entry: VocabularyEntry =
            serde_json::from_str(r#"{ "id": 4, "darija": "Labas", "audio_file": null }"#).unwrap();
        assert_eq!(entry.audio_file(), None);

        let blank = VocabularyEntry::new(5, "Juj", "  ");
        assert_eq!(blank.audio_file(), None);
    }

    #[test]
    fn audio_file_is_kept_verbatim() {
        let padded = VocabularyEntry::new(6, "Tlata", " tlata.mp3");
        assert_eq!(padded.audio_file(), Some(" tlata.mp3"));
    }

    #[tokio::test]
    async fn fetch_loads_both_collections() {
        let vocabulary = Vocabulary::fetch(&Records { fail_on: None }).await;

        assert_eq!(vocabulary.entries(VocabularyKind::Words)[0].darija, "words");
        assert_eq!(vocabulary.entries(VocabularyKind::Phrases)[0].darija, "phrases");
    }

    #[tokio::test]
    async fn phrase_failure_leaves_everything_empty() {
        let vocabulary = Vocabulary::fetch(&Records {
            fail_on: Some(VocabularyKind::Phrases),
        })
        .await;

        assert!(vocabulary.is_empty());
    }
}

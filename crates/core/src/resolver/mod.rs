//! Maps lesson text to a remote pronunciation file.
//!
//! Stimulus lookups pick the collection by question position: the opening
//! questions drill single words, the rest drill phrases. Within a collection
//! the first matching rule wins, in this order:
//!
//! 1. exact, case-sensitive text
//! 2. exact, case-insensitive text
//! 3. phrases only: either text contains the other, case-insensitively
//!
//! Answer options and flashcards are looked up case-insensitively in words
//! first, then phrases, without the substring rule.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    backend::AssetProbe, config::BackendConfig, Result, SafiError, Vocabulary, VocabularyEntry,
    VocabularyKind,
};

/// Questions before this index resolve against single words.
pub const PHRASE_QUESTIONS_START: usize = 3;

/// Fully qualified URL of a public audio object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioLocator(String);

impl AudioLocator {
    pub fn new(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AudioLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Public URL scheme of the object storage:
/// `<root>/<bucket>/chapter_<lesson>/<file>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: String,
    bucket: String,
}

impl StorageLayout {
    pub fn new(root: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            root: root.into().trim_end_matches('/').to_string(),
            bucket: bucket.into().trim_matches('/').to_string(),
        }
    }

    /// Layout of a Supabase project's public storage endpoint.
    pub fn from_backend(config: &BackendConfig) -> Self {
        Self::new(
            format!(
                "{}/storage/v1/object/public",
                config.url.trim_end_matches('/')
            ),
            config.bucket.clone(),
        )
    }

    /// File names are joined verbatim, without percent-encoding.
    pub fn locate(&self, lesson_id: u32, file_name: &str) -> AudioLocator {
        AudioLocator(format!(
            "{}/{}/chapter_{}/{}",
            self.root, self.bucket, lesson_id, file_name
        ))
    }
}

/// Which lookup rules apply to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// The prompt of the question at this index.
    Stimulus { question_index: usize },
    /// An answer option or flashcard text.
    Answer,
}

/// Text to resolve plus the context that picks the lookup rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionRequest {
    pub text: String,
    pub lesson_id: u32,
    pub lookup: Lookup,
}

impl ResolutionRequest {
    pub fn stimulus(text: impl Into<String>, lesson_id: u32, question_index: usize) -> Self {
        Self {
            text: text.into(),
            lesson_id,
            lookup: Lookup::Stimulus { question_index },
        }
    }

    pub fn answer(text: impl Into<String>, lesson_id: u32) -> Self {
        Self {
            text: text.into(),
            lesson_id,
            lookup: Lookup::Answer,
        }
    }
}

/// Which rule found the entry. Earlier variants take precedence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Exact,
    CaseInsensitive,
    /// Phrases only: either text contains the other, ignoring case.
    Substring,
}

/// A matched vocabulary entry and the URL of its audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub entry: VocabularyEntry,
    pub kind: VocabularyKind,
    pub matched_by: MatchKind,
    pub locator: AudioLocator,
}

/// Maps lesson text to audio URLs under a fixed storage layout.
#[derive(Debug, Clone)]
pub struct AudioResolver {
    layout: StorageLayout,
}

impl AudioResolver {
    pub fn new(layout: StorageLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Pure lookup against the given vocabulary.
    pub fn resolve(
        &self,
        vocabulary: &Vocabulary,
        request: &ResolutionRequest,
    ) -> Result<Resolution> {
        let found = match request.lookup {
            Lookup::Stimulus { question_index } => {
                let kind = if question_index < PHRASE_QUESTIONS_START {
                    VocabularyKind::Words
                } else {
                    VocabularyKind::Phrases
                };
                find_stimulus(vocabulary.entries(kind), &request.text, kind)
                    .map(|(entry, matched_by)| (entry, kind, matched_by))
            }
            Lookup::Answer => [VocabularyKind::Words, VocabularyKind::Phrases]
                .into_iter()
                .find_map(|kind| {
                    find_case_insensitive(vocabulary.entries(kind), &request.text)
                        .map(|entry| (entry, kind, MatchKind::CaseInsensitive))
                }),
        };

        let (entry, kind, matched_by) =
            found.ok_or_else(|| SafiError::AudioNotFound(request.text.clone()))?;
        let file_name = entry
            .audio_file()
            .ok_or_else(|| SafiError::AudioNotFound(request.text.clone()))?;
        let locator = self.layout.locate(request.lesson_id, file_name);

        tracing::debug!(
            text = %request.text,
            ?kind,
            ?matched_by,
            url = %locator,
            "resolved audio"
        );

        Ok(Resolution {
            entry: entry.clone(),
            kind,
            matched_by,
            locator,
        })
    }

    /// Resolves and then confirms the object exists. A failed or negative
    /// probe is reported as [`SafiError::AudioNotFound`].
    pub async fn resolve_verified(
        &self,
        vocabulary: &Vocabulary,
        request: &ResolutionRequest,
        probe: &dyn AssetProbe,
    ) -> Result<Resolution> {
        let resolution = self.resolve(vocabulary, request)?;
        match probe.exists(&resolution.locator).await {
            Ok(true) => Ok(resolution),
            Ok(false) => {
                tracing::warn!(url = %resolution.locator, "audio file not found in storage");
                Err(SafiError::AudioNotFound(request.text.clone()))
            }
            Err(err) => {
                tracing::warn!(url = %resolution.locator, error = %err, "audio probe failed");
                Err(SafiError::AudioNotFound(request.text.clone()))
            }
        }
    }
}

fn find_stimulus<'a>(
    entries: &'a [VocabularyEntry],
    text: &str,
    kind: VocabularyKind,
) -> Option<(&'a VocabularyEntry, MatchKind)> {
    if let Some(entry) = entries.iter().find(|entry| entry.darija == text) {
        return Some((entry, MatchKind::Exact));
    }
    if let Some(entry) = find_case_insensitive(entries, text) {
        return Some((entry, MatchKind::CaseInsensitive));
    }
    if kind == VocabularyKind::Phrases {
        let query = text.to_lowercase();
        return entries
            .iter()
            .find(|entry| {
                let candidate = entry.darija.to_lowercase();
                candidate.contains(&query) || query.contains(&candidate)
            })
            .map(|entry| (entry, MatchKind::Substring));
    }
    None
}

fn find_case_insensitive<'a>(
    entries: &'a [VocabularyEntry],
    text: &str,
) -> Option<&'a VocabularyEntry> {
    let query = text.to_lowercase();
    entries
        .iter()
        .find(|entry| entry.darija.to_lowercase() == query)
}

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{Result, SafiError};

/// Number of answer options every question carries (rendered as two rows).
pub const OPTION_COUNT: usize = 4;

const BUILTIN_CATALOG: &str = include_str!("../../data/lessons.json");

/// A single multiple-choice question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub stimulus: String,
    pub options: Vec<String>,
    pub correct: usize,
    pub explanation: String,
}

impl Question {
    pub fn is_correct(&self, option: usize) -> bool {
        option == self.correct
    }

    pub fn option(&self, index: usize) -> Option<&str> {
        self.options.get(index).map(String::as_str)
    }

    fn validate(&self, lesson_id: u32, question: usize) -> Result<()> {
        let invalid = |reason: String| SafiError::InvalidLesson {
            lesson_id,
            question,
            reason,
        };

        if self.options.len() != OPTION_COUNT {
            return Err(invalid(format!(
                "expected {OPTION_COUNT} options, found {}",
                self.options.len()
            )));
        }
        if self.correct >= self.options.len() {
            return Err(invalid(format!(
                "correct index {} is out of range",
                self.correct
            )));
        }
        Ok(())
    }
}

/// Review card shown after the questions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flashcard {
    pub darija: String,
    pub translation: String,
}

/// An authored lesson. Never mutated after loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: u32,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub questions: Vec<Question>,
    #[serde(default)]
    pub flashcards: Vec<Flashcard>,
}

impl Lesson {
    pub fn question(&self, index: usize) -> Option<&Question> {
        self.questions.get(index)
    }

    pub fn question_count(&self) -> usize {
        self.questions.len()
    }

    /// Storage folder holding this lesson's audio.
    pub fn chapter_folder(&self) -> String {
        format!("chapter_{}", self.id)
    }

    fn validate(&self) -> Result<()> {
        if self.id == 0 {
            return Err(SafiError::msg("lesson identifiers must be positive"));
        }
        for (index, question) in self.questions.iter().enumerate() {
            question.validate(self.id, index)?;
        }
        Ok(())
    }
}

/// Read-only registry of lessons keyed by identifier.
#[derive(Debug, Default, Clone)]
pub struct ContentStore {
    lessons: BTreeMap<u32, Lesson>,
}

impl ContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads the catalog compiled into the crate.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_CATALOG)
    }

    /// Parses a JSON array of lessons and validates every question.
    pub fn from_json(raw: &str) -> Result<Self> {
        let lessons: Vec<Lesson> = serde_json::from_str(raw)?;
        let mut store = Self::new();
        for lesson in lessons {
            store.register(lesson)?;
        }
        Ok(store)
    }

    pub fn register(&mut self, lesson: Lesson) -> Result<()> {
        lesson.validate()?;
        if self.lessons.contains_key(&lesson.id) {
            return Err(SafiError::msg(format!(
                "lesson {} registered twice",
                lesson.id
            )));
        }
        self.lessons.insert(lesson.id, lesson);
        Ok(())
    }

    /// Looks a lesson up; an unknown id is `None`, never a panic.
    pub fn get_lesson(&self, id: u32) -> Option<&Lesson> {
        self.lessons.get(&id)
    }

    /// Same as [`get_lesson`](Self::get_lesson) but reports
    /// [`SafiError::ContentNotFound`].
    pub fn lesson(&self, id: u32) -> Result<&Lesson> {
        self.get_lesson(id).ok_or(SafiError::ContentNotFound(id))
    }

    pub fn lessons(&self) -> impl Iterator<Item = &Lesson> {
        self.lessons.values()
    }

    pub fn len(&self) -> usize {
        self.lessons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lessons.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(options: &[&str], correct: usize) -> Question {
        Question {
            stimulus: "Salam".to_string(),
            options: options.iter().map(|o| o.to_string()).collect(),
            correct,
            explanation: String::new(),
        }
    }

    fn lesson(id: u32, questions: Vec<Question>) -> Lesson {
        Lesson {
            id,
            title: format!("Lesson {id}"),
            description: String::new(),
            questions,
            flashcards: Vec::new(),
        }
    }

    #[test]
    fn builtin_catalog_contains_both_chapters() {
        let store = ContentStore::builtin().unwrap();

        let basics = store.get_lesson(1).unwrap();
        assert_eq!(basics.title, "Basics of Darija");
        assert_eq!(basics.question_count(), 6);
        assert_eq!(basics.flashcards.len(), 3);
        assert_eq!(basics.chapter_folder(), "chapter_1");

        let numbers = store.get_lesson(2).unwrap();
        assert_eq!(numbers.question(3).unwrap().stimulus, "Red");
    }

    #[test]
    fn unknown_lesson_is_not_found() {
        let store = ContentStore::builtin().unwrap();

        assert!(store.get_lesson(99).is_none());
        let err = store.lesson(99).unwrap_err();
        assert!(matches!(err, SafiError::ContentNotFound(99)));
    }

    #[test]
    fn rejects_questions_without_four_options() {
        let mut store = ContentStore::new();
        let err = store
            .register(lesson(3, vec![question(&["a", "b", "c"], 0)]))
            .unwrap_err();

        assert!(err.to_string().contains("expected 4 options"));
        assert!(store.is_empty());
    }

    #[test]
    fn rejects_out_of_range_correct_index() {
        let mut store = ContentStore::new();
        let err = store
            .register(lesson(3, vec![question(&["a", "b", "c", "d"], 4)]))
            .unwrap_err();

        assert!(matches!(err, SafiError::InvalidLesson { question: 0, .. }));
    }

    #[test]
    fn rejects_duplicate_identifiers() {
        let mut store = ContentStore::new();
        store
            .register(lesson(5, vec![question(&["a", "b", "c", "d"], 1)]))
            .unwrap();

        assert!(store
            .register(lesson(5, vec![question(&["a", "b", "c", "d"], 1)]))
            .is_err());
    }
}

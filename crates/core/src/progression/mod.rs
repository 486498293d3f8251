//! Lesson flow as a single tagged state.
//!
//! ```text
//! Question(0) .. Question(2) -> FirstMotivation -+-> Question(3) .. Question(N-1)
//!                                   |            |          |
//!                                   +-> SignupPrompt        v
//!                                                    SecondMotivation -> Flashcards(0..M) -> Completion
//! ```
//!
//! Without flashcards the last question leads straight to `Completion`.
//! Every action is a no-op (returns `None` / `false`) when it is not enabled
//! in the current state.

use std::{collections::HashSet, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{config::FlowConfig, FeedbackCue, Lesson, Question};

/// Index of the question after which the first break is shown.
pub const FIRST_BREAK_AFTER: usize = 2;
/// Question the learner returns to after the first break.
pub const RESUME_QUESTION: usize = FIRST_BREAK_AFTER + 1;
pub const XP_PER_CORRECT_ANSWER: usize = 10;

/// Full-screen break inserted between questions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InterstitialKind {
    FirstMotivation,
    SecondMotivation,
    SignupPrompt,
}

/// What the learner is looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowState {
    Question(usize),
    Interstitial(InterstitialKind),
    Flashcards(usize),
    Completion,
}

/// A state change made by one of the [`LessonProgress`] actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: FlowState,
    pub to: FlowState,
    /// True the first time an interstitial is entered in this session.
    pub first_visit: bool,
}

/// Grade of a checked answer and the cue to play for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckOutcome {
    pub correct: bool,
    pub cue: FeedbackCue,
}

/// Position, selection and per-question results for one pass through a lesson.
#[derive(Debug, Clone)]
pub struct LessonProgress {
    lesson: Arc<Lesson>,
    flow: FlowConfig,
    state: FlowState,
    /// Graded result per question. Answering a question again overwrites it.
    results: Vec<Option<bool>>,
    selected_answer: Option<usize>,
    answer_checked: bool,
    shown: HashSet<InterstitialKind>,
}

impl LessonProgress {
    pub fn new(lesson: Arc<Lesson>, flow: FlowConfig) -> Self {
        let state = if lesson.questions.is_empty() {
            FlowState::Completion
        } else {
            FlowState::Question(0)
        };

        Self {
            results: vec![None; lesson.question_count()],
            lesson,
            flow,
            state,
            selected_answer: None,
            answer_checked: false,
            shown: HashSet::new(),
        }
    }

    pub fn lesson(&self) -> &Lesson {
        &self.lesson
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Questions whose latest answer was correct.
    pub fn score(&self) -> usize {
        self.results
            .iter()
            .filter(|result| **result == Some(true))
            .count()
    }

    pub fn xp(&self) -> usize {
        self.score() * XP_PER_CORRECT_ANSWER
    }

    /// Number of distinct questions checked so far.
    pub fn answered(&self) -> usize {
        self.results.iter().filter(|result| result.is_some()).count()
    }

    pub fn selected_answer(&self) -> Option<usize> {
        self.selected_answer
    }

    pub fn answer_checked(&self) -> bool {
        self.answer_checked
    }

    pub fn is_complete(&self) -> bool {
        self.state == FlowState::Completion
    }

    pub fn has_shown(&self, kind: InterstitialKind) -> bool {
        self.shown.contains(&kind)
    }

    pub fn current_question(&self) -> Option<&Question> {
        match self.state {
            FlowState::Question(index) => self.lesson.question(index),
            _ => None,
        }
    }

    /// Explanation revealed once the current answer has been checked.
    pub fn feedback(&self) -> Option<&str> {
        if !self.answer_checked {
            return None;
        }
        self.current_question()
            .map(|question| question.explanation.as_str())
    }

    pub fn can_check(&self) -> bool {
        self.current_question().is_some() && self.selected_answer.is_some() && !self.answer_checked
    }

    pub fn can_advance(&self) -> bool {
        self.current_question().is_some() && self.answer_checked
    }

    /// Highlights an option. Locked once the answer has been checked.
    pub fn select_option(&mut self, option: usize) -> bool {
        let Some(question) = self.current_question() else {
            return false;
        };
        if self.answer_checked || option >= question.options.len() {
            return false;
        }

        self.selected_answer = Some(option);
        true
    }

    pub fn check(&mut self) -> Option<CheckOutcome> {
        if !self.can_check() {
            return None;
        }
        let FlowState::Question(index) = self.state else {
            return None;
        };
        let question = self.current_question()?;
        let selected = self.selected_answer?;
        let correct = question.is_correct(selected);

        self.answer_checked = true;
        if let Some(result) = self.results.get_mut(index) {
            *result = Some(correct);
        }

        Some(CheckOutcome {
            correct,
            cue: if correct {
                FeedbackCue::Correct
            } else {
                FeedbackCue::Wrong
            },
        })
    }

    pub fn next(&mut self) -> Option<Transition> {
        if !self.can_advance() {
            return None;
        }
        let FlowState::Question(index) = self.state else {
            return None;
        };

        let is_last = index + 1 >= self.lesson.question_count();
        let to = if is_last {
            if self.flow.with_flashcards {
                FlowState::Interstitial(InterstitialKind::SecondMotivation)
            } else {
                FlowState::Completion
            }
        } else if index == FIRST_BREAK_AFTER {
            FlowState::Interstitial(InterstitialKind::FirstMotivation)
        } else {
            FlowState::Question(index + 1)
        };

        Some(self.go(to))
    }

    /// Skips account creation and resumes the questions.
    pub fn continue_without_account(&mut self) -> Option<Transition> {
        match self.state {
            FlowState::Interstitial(InterstitialKind::FirstMotivation) => {
                Some(self.go(FlowState::Question(RESUME_QUESTION)))
            }
            _ => None,
        }
    }

    pub fn create_account(&mut self) -> Option<Transition> {
        match self.state {
            FlowState::Interstitial(InterstitialKind::FirstMotivation) if self.flow.with_auth_gate => {
                Some(self.go(FlowState::Interstitial(InterstitialKind::SignupPrompt)))
            }
            _ => None,
        }
    }

    /// Closes the signup prompt without signing in.
    pub fn dismiss_signup(&mut self) -> Option<Transition> {
        match self.state {
            FlowState::Interstitial(InterstitialKind::SignupPrompt) => {
                Some(self.go(FlowState::Interstitial(InterstitialKind::FirstMotivation)))
            }
            _ => None,
        }
    }

    pub fn continue_to_flashcards(&mut self) -> Option<Transition> {
        match self.state {
            FlowState::Interstitial(InterstitialKind::SecondMotivation) => {
                let to = if self.lesson.flashcards.is_empty() {
                    FlowState::Completion
                } else {
                    FlowState::Flashcards(0)
                };
                Some(self.go(to))
            }
            _ => None,
        }
    }

    pub fn next_flashcard(&mut self) -> Option<Transition> {
        let FlowState::Flashcards(index) = self.state else {
            return None;
        };
        let to = if index + 1 < self.lesson.flashcards.len() {
            FlowState::Flashcards(index + 1)
        } else {
            FlowState::Completion
        };
        Some(self.go(to))
    }

    /// Clamped at the first card.
    pub fn previous_flashcard(&mut self) -> Option<Transition> {
        match self.state {
            FlowState::Flashcards(index) if index > 0 => {
                Some(self.go(FlowState::Flashcards(index - 1)))
            }
            _ => None,
        }
    }

    /// Applied when a signed-in session shows up. Rewinds to the question after
    /// the first break from any non-terminal state, including states the
    /// learner already moved past. Questions answered again replace their
    /// earlier result.
    pub fn authentication_observed(&mut self) -> Option<Transition> {
        if self.is_complete() || RESUME_QUESTION >= self.lesson.question_count() {
            return None;
        }
        if matches!(self.state, FlowState::Question(index) if index > RESUME_QUESTION)
            || matches!(self.state, FlowState::Flashcards(_))
            || self.state == FlowState::Interstitial(InterstitialKind::SecondMotivation)
        {
            tracing::warn!(from = ?self.state, "sign-in rewinds lesson position");
        }
        Some(self.go(FlowState::Question(RESUME_QUESTION)))
    }

    /// Leaves the flow from anywhere.
    pub fn finish(&mut self) -> Option<Transition> {
        if self.is_complete() {
            return None;
        }
        Some(self.go(FlowState::Completion))
    }

    fn go(&mut self, to: FlowState) -> Transition {
        let from = self.state;
        let first_visit = match to {
            FlowState::Interstitial(kind) => self.shown.insert(kind),
            _ => false,
        };
        if let FlowState::Question(_) = to {
            self.selected_answer = None;
            self.answer_checked = false;
        }

        self.state = to;
        tracing::debug!(?from, ?to, first_visit, "lesson transition");
        Transition {
            from,
            to,
            first_visit,
        }
    }
}

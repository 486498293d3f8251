//! Questionnaire shown before the first lesson.

use serde::{Deserialize, Serialize};

use crate::backend::{NotificationPermission, PermissionStatus};

/// Lesson opened when onboarding finishes.
pub const FIRST_LESSON_ID: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OnboardingStep {
    Intro,
    QuestionsIntro,
    DiscoverSource,
    Motivation,
    DarijaLevel,
    LearningGoal,
    MotivationGoal,
    NotificationsPermission,
    Encouragement,
    IntroFirstLesson,
}

impl OnboardingStep {
    pub const ALL: [OnboardingStep; 10] = [
        OnboardingStep::Intro,
        OnboardingStep::QuestionsIntro,
        OnboardingStep::DiscoverSource,
        OnboardingStep::Motivation,
        OnboardingStep::DarijaLevel,
        OnboardingStep::LearningGoal,
        OnboardingStep::MotivationGoal,
        OnboardingStep::NotificationsPermission,
        OnboardingStep::Encouragement,
        OnboardingStep::IntroFirstLesson,
    ];

    fn position(self) -> usize {
        Self::ALL
            .iter()
            .position(|step| *step == self)
            .unwrap_or_default()
    }

    pub fn following(self) -> Option<Self> {
        Self::ALL.get(self.position() + 1).copied()
    }

    pub fn preceding(self) -> Option<Self> {
        self.position()
            .checked_sub(1)
            .and_then(|index| Self::ALL.get(index).copied())
    }

    /// Progress bar fill, in percent.
    pub fn progress_percent(self) -> u8 {
        match self {
            OnboardingStep::Intro | OnboardingStep::QuestionsIntro => 0,
            OnboardingStep::DiscoverSource => 14,
            OnboardingStep::Motivation => 28,
            OnboardingStep::DarijaLevel => 42,
            OnboardingStep::LearningGoal => 56,
            OnboardingStep::MotivationGoal => 70,
            OnboardingStep::NotificationsPermission => 84,
            OnboardingStep::Encouragement => 98,
            OnboardingStep::IntroFirstLesson => 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LearningGoal {
    Relaxed,
    Standard,
    Serious,
    Intense,
}

impl LearningGoal {
    pub fn minutes_per_day(self) -> u32 {
        match self {
            LearningGoal::Relaxed => 5,
            LearningGoal::Standard => 10,
            LearningGoal::Serious => 15,
            LearningGoal::Intense => 20,
        }
    }

    pub fn words_per_week(self) -> u32 {
        self.minutes_per_day() * 5
    }
}

/// What the caller should do after [`Onboarding::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnboardingAdvance {
    Step(OnboardingStep),
    /// The requirement of the current step is not met yet.
    Blocked,
    /// Leave onboarding and open the given lesson.
    StartLesson(u32),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardingAnswers {
    pub source: Option<String>,
    pub motivations: Vec<String>,
    /// 0 (new to Darija) through 4 (discusses most topics).
    pub level: Option<u8>,
    pub learning_goal: Option<LearningGoal>,
    pub notifications: Option<PermissionStatus>,
}

#[derive(Debug, Clone)]
pub struct Onboarding {
    step: OnboardingStep,
    answers: OnboardingAnswers,
}

impl Default for Onboarding {
    fn default() -> Self {
        Self::new()
    }
}

impl Onboarding {
    pub fn new() -> Self {
        Self {
            step: OnboardingStep::Intro,
            answers: OnboardingAnswers::default(),
        }
    }

    pub fn step(&self) -> OnboardingStep {
        self.step
    }

    pub fn answers(&self) -> &OnboardingAnswers {
        &self.answers
    }

    pub fn can_proceed(&self) -> bool {
        match self.step {
            OnboardingStep::DiscoverSource => self.answers.source.is_some(),
            OnboardingStep::Motivation => !self.answers.motivations.is_empty(),
            OnboardingStep::DarijaLevel => self.answers.level.is_some(),
            OnboardingStep::LearningGoal => self.answers.learning_goal.is_some(),
            OnboardingStep::NotificationsPermission => self.answers.notifications.is_some(),
            _ => true,
        }
    }

    pub fn next(&mut self) -> OnboardingAdvance {
        if !self.can_proceed() {
            return OnboardingAdvance::Blocked;
        }
        match self.step.following() {
            Some(step) => {
                self.step = step;
                OnboardingAdvance::Step(step)
            }
            None => OnboardingAdvance::StartLesson(FIRST_LESSON_ID),
        }
    }

    /// Steps back once; stays put on the first step.
    pub fn back(&mut self) -> OnboardingStep {
        self.step = self.step.preceding().unwrap_or(OnboardingStep::Intro);
        self.step
    }

    pub fn choose_source(&mut self, source: impl Into<String>) {
        let source = source.into();
        self.answers.source = (!source.trim().is_empty()).then_some(source);
    }

    /// Adds the motivation, or removes it if already chosen.
    pub fn toggle_motivation(&mut self, motivation: impl Into<String>) {
        let motivation = motivation.into();
        if let Some(index) = self
            .answers
            .motivations
            .iter()
            .position(|chosen| *chosen == motivation)
        {
            self.answers.motivations.remove(index);
        } else {
            self.answers.motivations.push(motivation);
        }
    }

    pub fn choose_level(&mut self, level: u8) {
        self.answers.level = Some(level.min(4));
    }

    pub fn choose_learning_goal(&mut self, goal: LearningGoal) {
        self.answers.learning_goal = Some(goal);
    }

    /// Encouragement line for the chosen goal. Defaults to the standard goal.
    pub fn goal_message(&self) -> String {
        let goal = self.answers.learning_goal.unwrap_or(LearningGoal::Standard);
        format!("Awesome, that's {} words per week!", goal.words_per_week())
    }

    /// "Not now": records a refusal without showing the system prompt.
    pub fn decline_notifications(&mut self) {
        self.answers.notifications = Some(PermissionStatus::Denied);
    }

    /// Asks for notification permission. An error counts as a refusal.
    pub async fn request_notifications(
        &mut self,
        provider: &dyn NotificationPermission,
    ) -> PermissionStatus {
        let status = provider
            .request_permission()
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "notification permission request failed");
                PermissionStatus::Denied
            });
        self.answers.notifications = Some(status);
        status
    }
}

//! Runtime controller for one pass through a lesson.
//!
//! Owns the progression state, both audio channels and the vocabulary copy.
//! Audio and auth failures never surface as errors here: they are logged and
//! the affected channel simply returns to idle.

use std::sync::Arc;

use tokio::sync::watch;

use crate::{
    backend::{AssetProbe, AuthProvider, RecordStore, Session},
    config::AppConfig,
    progression::{CheckOutcome, FlowState, InterstitialKind, LessonProgress, Transition},
    resolver::{AudioResolver, ResolutionRequest, StorageLayout},
    AudioBackend, AudioChannel, AudioSource, ChannelKind, FeedbackCue, Lesson, PlaybackOutcome,
    SafiError, Vocabulary,
};

/// External services a session talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub records: Arc<dyn RecordStore>,
    pub probe: Arc<dyn AssetProbe>,
    pub auth: Arc<dyn AuthProvider>,
    pub audio: Arc<dyn AudioBackend>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub lesson_id: u32,
    pub score: usize,
    pub answered: usize,
    pub total_questions: usize,
    pub completed: bool,
}

pub struct LessonSession {
    progress: LessonProgress,
    vocabulary: Vocabulary,
    resolver: AudioResolver,
    stimulus: AudioChannel,
    feedback: AudioChannel,
    probe: Arc<dyn AssetProbe>,
    auth: Arc<dyn AuthProvider>,
    /// Set once the Winning cue has actually started.
    winning_played: bool,
}

impl LessonSession {
    /// Starts at the first question and loads the vocabulary once.
    pub async fn start(
        lesson: Arc<Lesson>,
        collaborators: Collaborators,
        layout: StorageLayout,
        config: &AppConfig,
    ) -> Self {
        tracing::info!(lesson_id = lesson.id, title = %lesson.title, "starting lesson");
        let vocabulary = Vocabulary::fetch(collaborators.records.as_ref()).await;
        Self::with_vocabulary(lesson, vocabulary, collaborators, layout, config)
    }

    /// Starts with an already loaded vocabulary.
    pub fn with_vocabulary(
        lesson: Arc<Lesson>,
        vocabulary: Vocabulary,
        collaborators: Collaborators,
        layout: StorageLayout,
        config: &AppConfig,
    ) -> Self {
        let fallback = config.audio.fallback_duration();
        Self {
            progress: LessonProgress::new(lesson, config.flow),
            vocabulary,
            resolver: AudioResolver::new(layout),
            stimulus: AudioChannel::new(
                ChannelKind::Stimulus,
                collaborators.audio.clone(),
                fallback,
            ),
            feedback: AudioChannel::new(ChannelKind::Feedback, collaborators.audio, fallback),
            probe: collaborators.probe,
            auth: collaborators.auth,
            winning_played: false,
        }
    }

    pub fn lesson(&self) -> &Lesson {
        self.progress.lesson()
    }

    pub fn progress(&self) -> &LessonProgress {
        &self.progress
    }

    pub fn state(&self) -> FlowState {
        self.progress.state()
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn stimulus_channel(&self) -> &AudioChannel {
        &self.stimulus
    }

    pub fn feedback_channel(&self) -> &AudioChannel {
        &self.feedback
    }

    /// Speaker button on a question.
    pub async fn play_stimulus(&self) -> PlaybackOutcome {
        let FlowState::Question(index) = self.progress.state() else {
            return PlaybackOutcome::Failed(SafiError::msg("no question on screen"));
        };
        let Some(question) = self.progress.current_question() else {
            return PlaybackOutcome::Failed(SafiError::ContentNotFound(self.lesson().id));
        };

        let request = ResolutionRequest::stimulus(&question.stimulus, self.lesson().id, index);
        self.play_resolved(request).await
    }

    /// Highlights an option and pronounces it when it is Darija. Returns
    /// `None` when the selection was not accepted.
    pub async fn select_option(&mut self, option: usize) -> Option<PlaybackOutcome> {
        if !self.progress.select_option(option) {
            return None;
        }
        let text = self.progress.current_question()?.option(option)?.to_string();

        let request = ResolutionRequest::answer(text, self.lesson().id);
        Some(self.play_resolved(request).await)
    }

    /// Grades the selection and plays the matching cue.
    pub async fn check(&mut self) -> Option<CheckOutcome> {
        let outcome = self.progress.check()?;
        tracing::debug!(
            correct = outcome.correct,
            score = self.progress.score(),
            "answer checked"
        );
        self.play_cue(outcome.cue).await;
        Some(outcome)
    }

    pub async fn next(&mut self) -> Option<Transition> {
        let transition = self.progress.next()?;
        self.after_transition(transition).await;
        Some(transition)
    }

    pub fn continue_without_account(&mut self) -> Option<Transition> {
        self.progress.continue_without_account()
    }

    pub fn create_account(&mut self) -> Option<Transition> {
        self.progress.create_account()
    }

    /// Closes the signup prompt. Retries the Winning cue if it never started.
    pub async fn dismiss_signup(&mut self) -> Option<Transition> {
        let transition = self.progress.dismiss_signup()?;
        self.after_transition(transition).await;
        Some(transition)
    }

    pub fn continue_to_flashcards(&mut self) -> Option<Transition> {
        self.progress.continue_to_flashcards()
    }

    pub fn next_flashcard(&mut self) -> Option<Transition> {
        self.progress.next_flashcard()
    }

    pub fn previous_flashcard(&mut self) -> Option<Transition> {
        self.progress.previous_flashcard()
    }

    /// Pronounces the flashcard on screen.
    pub async fn play_flashcard(&self) -> PlaybackOutcome {
        let FlowState::Flashcards(index) = self.progress.state() else {
            return PlaybackOutcome::Failed(SafiError::msg("no flashcard on screen"));
        };
        let Some(card) = self.lesson().flashcards.get(index) else {
            return PlaybackOutcome::Failed(SafiError::msg("flashcard out of range"));
        };

        let request = ResolutionRequest::answer(&card.darija, self.lesson().id);
        self.play_resolved(request).await
    }

    /// Called when the host app returns to the foreground. While the signup
    /// prompt is open, a freshly signed-in session resumes the questions.
    pub async fn on_foreground(&mut self) -> Option<Transition> {
        if self.progress.state() != FlowState::Interstitial(InterstitialKind::SignupPrompt) {
            return None;
        }

        tracing::debug!("app became active, checking auth session");
        match self.auth.get_session().await {
            Ok(Some(_)) => {
                tracing::info!("found session after returning to app");
                self.authentication_observed()
            }
            Ok(None) => None,
            Err(err) => {
                tracing::warn!(error = %err, "session check failed");
                None
            }
        }
    }

    /// Applies the sign-in resume unconditionally. Hosts that poll the auth
    /// provider themselves call this when their poll finds a session, even if
    /// the learner has moved on in the meantime.
    pub fn authentication_observed(&mut self) -> Option<Transition> {
        self.progress.authentication_observed()
    }

    /// Auth state stream for hosts that want to drive
    /// [`authentication_observed`](Self::authentication_observed) themselves.
    pub fn auth_changes(&self) -> watch::Receiver<Option<Session>> {
        self.auth.subscribe()
    }

    /// Ends the session, cancelling any pending playback.
    pub fn exit(self) -> SessionSummary {
        self.stimulus.cancel();
        self.feedback.cancel();

        let summary = SessionSummary {
            lesson_id: self.lesson().id,
            score: self.progress.score(),
            answered: self.progress.answered(),
            total_questions: self.lesson().question_count(),
            completed: self.progress.is_complete(),
        };
        tracing::info!(?summary, "lesson session ended");
        summary
    }

    async fn after_transition(&mut self, transition: Transition) {
        if transition.to == FlowState::Interstitial(InterstitialKind::FirstMotivation)
            && !self.winning_played
        {
            self.winning_played = self.play_cue(FeedbackCue::Winning).await.is_started();
        }
    }

    async fn play_cue(&self, cue: FeedbackCue) -> PlaybackOutcome {
        let outcome = self.feedback.play(AudioSource::Cue(cue)).await;
        if let PlaybackOutcome::Failed(err) = &outcome {
            tracing::warn!(?cue, error = %err, "error playing sound");
        }
        outcome
    }

    async fn play_resolved(&self, request: ResolutionRequest) -> PlaybackOutcome {
        if self.stimulus.is_busy() {
            return PlaybackOutcome::Busy;
        }

        match self
            .resolver
            .resolve_verified(&self.vocabulary, &request, self.probe.as_ref())
            .await
        {
            Ok(resolution) => {
                self.stimulus
                    .play(AudioSource::Remote(resolution.locator))
                    .await
            }
            Err(err) => {
                tracing::debug!(text = %request.text, error = %err, "no playable audio");
                PlaybackOutcome::Failed(err)
            }
        }
    }
}

impl std::fmt::Debug for LessonSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LessonSession")
            .field("lesson_id", &self.lesson().id)
            .field("state", &self.progress.state())
            .field("score", &self.progress.score())
            .field("stimulus", &self.stimulus)
            .field("feedback", &self.feedback)
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::{
        audio::testing::FakeBackend,
        backend::{AuthUser, Credentials, OAuthProvider},
        resolver::AudioLocator,
        Result, VocabularyEntry, VocabularyKind,
    };

    pub struct FakeRecords {
        pub words: Vec<VocabularyEntry>,
        pub phrases: Vec<VocabularyEntry>,
        pub fail: bool,
    }

    #[async_trait]
    impl RecordStore for FakeRecords {
        async fn fetch_vocabulary(&self, kind: VocabularyKind) -> Result<Vec<VocabularyEntry>> {
            if self.fail {
                return Err(SafiError::DataFetch(kind.table().to_string()));
            }
            Ok(match kind {
                VocabularyKind::Words => self.words.clone(),
                VocabularyKind::Phrases => self.phrases.clone(),
            })
        }
    }

    pub struct AlwaysFound;

    #[async_trait]
    impl AssetProbe for AlwaysFound {
        async fn exists(&self, _locator: &AudioLocator) -> Result<bool> {
            Ok(true)
        }
    }

    pub struct FakeAuth {
        session: watch::Sender<Option<Session>>,
        pub checks: Mutex<usize>,
    }

    impl FakeAuth {
        pub fn signed_out() -> Self {
            let (session, _) = watch::channel(None);
            Self {
                session,
                checks: Mutex::new(0),
            }
        }

        pub fn sign_in_elsewhere(&self) {
            self.session.send_replace(Some(Session {
                access_token: "token".to_string(),
                refresh_token: None,
                expires_at: None,
                user: AuthUser {
                    id: "user-1".to_string(),
                    email: Some("learner@example.com".to_string()),
                    provider: "google".to_string(),
                },
            }));
        }
    }

    #[async_trait]
    impl AuthProvider for FakeAuth {
        async fn get_session(&self) -> Result<Option<Session>> {
            *self.checks.lock().unwrap() += 1;
            Ok(self.session.borrow().clone())
        }

        async fn sign_in_with_password(&self, _credentials: &Credentials) -> Result<Session> {
            Err(SafiError::Auth("Invalid login credentials".to_string()))
        }

        async fn sign_up(&self, _credentials: &Credentials) -> Result<Option<Session>> {
            Ok(None)
        }

        async fn sign_in_with_oauth(
            &self,
            provider: OAuthProvider,
            _redirect_to: Option<&str>,
        ) -> Result<String> {
            Ok(format!("https://auth/authorize?provider={}", provider.as_str()))
        }

        async fn sign_out(&self) -> Result<()> {
            self.session.send_replace(None);
            Ok(())
        }

        fn subscribe(&self) -> watch::Receiver<Option<Session>> {
            self.session.subscribe()
        }
    }

    pub struct Harness {
        pub audio: Arc<FakeBackend>,
        pub auth: Arc<FakeAuth>,
        pub collaborators: Collaborators,
    }

    pub fn harness(records: FakeRecords) -> Harness {
        let audio = Arc::new(FakeBackend::default());
        let auth = Arc::new(FakeAuth::signed_out());
        let collaborators = Collaborators {
            records: Arc::new(records),
            probe: Arc::new(AlwaysFound),
            auth: auth.clone(),
            audio: audio.clone(),
        };
        Harness {
            audio,
            auth,
            collaborators,
        }
    }

    pub fn layout() -> StorageLayout {
        StorageLayout::new("https://demo/storage/v1/object/public", "safispeak_audio")
    }

    pub fn chapter_one_vocabulary() -> FakeRecords {
        FakeRecords {
            words: vec![
                VocabularyEntry::new(1, "Assalamou Alaikoum", "salam.mp3"),
                VocabularyEntry::new(2, "Chokran", "chokran.mp3"),
                VocabularyEntry::new(3, "Beslama", "beslama.mp3"),
            ],
            phrases: vec![VocabularyEntry::new(
                10,
                "Assalamou Alaikoum, kif dayr?",
                "kif_dayr.mp3",
            )],
            fail: false,
        }
    }
}

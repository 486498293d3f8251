//! Core library for the SafiSpeak Darija course.
//!
//! The crate is a headless lesson engine: it holds the lesson catalog, maps
//! lesson text to pronunciation files in remote storage, plays sounds on two
//! independent channels, and walks a learner through the question /
//! interstitial / flashcard flow. User interfaces drive it by calling
//! [`LessonSession`] methods in response to taps. Backend services are
//! injected through the traits in [`backend`].

pub mod audio;
pub mod backend;
pub mod config;
pub mod content;
pub mod error;
pub mod onboarding;
pub mod progression;
pub mod resolver;
pub mod session;
pub mod vocabulary;

pub use audio::{
    AudioBackend, AudioChannel, AudioSource, ChannelKind, ChannelState, FeedbackCue,
    PlaybackOutcome, SoundHandle,
};
pub use backend::{
    AssetProbe, AuthProvider, Credentials, NotificationPermission, PermissionStatus,
    RecordStore, Session, SupabaseClient,
};
pub use config::{AppConfig, AudioConfig, BackendConfig, FlowConfig};
pub use content::{ContentStore, Flashcard, Lesson, Question};
pub use error::{Result, SafiError};
pub use onboarding::{Onboarding, OnboardingAdvance, OnboardingStep};
pub use progression::{FlowState, InterstitialKind, LessonProgress, Transition};
pub use resolver::{AudioLocator, AudioResolver, ResolutionRequest, StorageLayout};
pub use session::{Collaborators, LessonSession, SessionSummary};
pub use vocabulary::{Vocabulary, VocabularyEntry, VocabularyKind};

/// Result alias that carries the custom [`SafiError`] type.
pub type Result<T> = std::result::Result<T, SafiError>;

/// Common error type for the core crate.
///
/// Most variants never escape a [`LessonSession`](crate::LessonSession): the
/// session logs them and falls back to a local reset. They are still typed so
/// that adapters and the command line can report what went wrong.
#[derive(Debug, thiserror::Error)]
pub enum SafiError {
    /// Free-form message for conditions without a dedicated variant.
    #[error("{0}")]
    Message(String),
    /// No lesson is registered under the requested identifier.
    #[error("lesson {0} not found")]
    ContentNotFound(u32),
    /// A lesson failed validation while the catalog was loaded.
    #[error("lesson {lesson_id} question {question}: {reason}")]
    InvalidLesson {
        lesson_id: u32,
        question: usize,
        reason: String,
    },
    /// The record store could not deliver vocabulary.
    #[error("failed to fetch {0}")]
    DataFetch(String),
    /// Resolution found no entry, the entry had no file, or the probe failed.
    #[error("no audio for `{0}`")]
    AudioNotFound(String),
    #[error("failed to load audio: {0}")]
    AudioLoad(String),
    #[error("failed to play audio: {0}")]
    AudioPlayback(String),
    /// Rejected credentials, cancelled OAuth, or an auth endpoint failure.
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    #[error("{0}")]
    Http(#[from] reqwest::Error),
}

impl SafiError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for SafiError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for SafiError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

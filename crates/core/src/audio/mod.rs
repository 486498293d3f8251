use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{resolver::AudioLocator, Result, SafiError};

/// Bundled sounds played on the feedback channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedbackCue {
    Correct,
    Wrong,
    /// Celebration played when the learner reaches the first break.
    Winning,
}

impl FeedbackCue {
    pub fn file_name(self) -> &'static str {
        match self {
            FeedbackCue::Correct => "correct.mp3",
            FeedbackCue::Wrong => "wrong.mp3",
            FeedbackCue::Winning => "winning.mp3",
        }
    }
}

/// Something an [`AudioBackend`] knows how to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    Remote(AudioLocator),
    Cue(FeedbackCue),
}

impl fmt::Display for AudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioSource::Remote(locator) => write!(f, "{locator}"),
            AudioSource::Cue(cue) => f.write_str(cue.file_name()),
        }
    }
}

/// A loaded sound. Dropping it without [`unload`](Self::unload) may leak
/// platform resources, so channels always unload explicitly.
#[async_trait]
pub trait SoundHandle: Send + Sync {
    /// Reported length, if the decoder knows it.
    fn duration(&self) -> Option<Duration>;
    async fn play(&self) -> Result<()>;
    async fn unload(&self) -> Result<()>;
}

/// Platform audio implementation.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    async fn load(&self, source: &AudioSource) -> Result<Box<dyn SoundHandle>>;
}

/// Logical playback slot. Each kind owns its own [`AudioChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Stimulus, answer option and flashcard pronunciations. Requests made
    /// while a sound is playing are dropped.
    Stimulus,
    /// Correct / wrong / winning cues. A new cue cuts off the current one.
    Feedback,
}

/// Lifecycle of a channel: `Idle -> Loading -> Playing -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Idle,
    Loading,
    Playing,
}

/// Result of asking a channel to play. Failures are values, not errors: the
/// channel is already back to idle when one is returned.
#[derive(Debug)]
pub enum PlaybackOutcome {
    Started { duration: Duration },
    /// Another sound owns the channel; the request was dropped.
    Busy,
    Failed(SafiError),
}

impl PlaybackOutcome {
    pub fn is_started(&self) -> bool {
        matches!(self, PlaybackOutcome::Started { .. })
    }
}

/// Shared channel state. `generation` identifies the lease that currently
/// owns the slot.
#[derive(Debug)]
struct Slot {
    state: ChannelState,
    cancel: Option<CancellationToken>,
    generation: u64,
}

/// Plays at most one sound at a time and unloads it once it finishes.
///
/// A stimulus channel ignores requests while busy; a feedback channel
/// interrupts the sound in flight.
pub struct AudioChannel {
    kind: ChannelKind,
    backend: Arc<dyn AudioBackend>,
    fallback_duration: Duration,
    slot: Arc<Mutex<Slot>>,
}

impl AudioChannel {
    pub fn new(
        kind: ChannelKind,
        backend: Arc<dyn AudioBackend>,
        fallback_duration: Duration,
    ) -> Self {
        Self {
            kind,
            backend,
            fallback_duration,
            slot: Arc::new(Mutex::new(Slot {
                state: ChannelState::Idle,
                cancel: None,
                generation: 0,
            })),
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn state(&self) -> Result<ChannelState> {
        Ok(self.lock_slot()?.state)
    }

    pub fn is_busy(&self) -> bool {
        self.state()
            .map(|state| state != ChannelState::Idle)
            .unwrap_or(true)
    }

    /// Loads and starts `source`. Returns once playback has begun; a spawned
    /// task unloads the sound after its duration or on [`cancel`](Self::cancel).
    ///
    /// Must be called from within a tokio runtime.
    pub async fn play(&self, source: AudioSource) -> PlaybackOutcome {
        let lease = match self.acquire() {
            Ok(Some(lease)) => lease,
            Ok(None) => {
                tracing::debug!(channel = ?self.kind, %source, "channel busy, ignoring request");
                return PlaybackOutcome::Busy;
            }
            Err(err) => return PlaybackOutcome::Failed(err),
        };

        let sound = match self.backend.load(&source).await {
            Ok(sound) => sound,
            Err(err) => {
                tracing::warn!(channel = ?self.kind, %source, error = %err, "failed to load audio");
                return PlaybackOutcome::Failed(err);
            }
        };

        let duration = sound.duration().unwrap_or(self.fallback_duration);
        if let Err(err) = sound.play().await {
            tracing::warn!(channel = ?self.kind, %source, error = %err, "failed to play audio");
            if let Err(unload_err) = sound.unload().await {
                tracing::debug!(error = %unload_err, "error unloading sound");
            }
            return PlaybackOutcome::Failed(err);
        }

        lease.mark_playing();
        tracing::debug!(channel = ?self.kind, %source, ?duration, "playing audio");

        let kind = self.kind;
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = lease.cancel.cancelled() => {
                    tracing::debug!(channel = ?kind, "playback cancelled");
                }
            }
            if let Err(err) = sound.unload().await {
                tracing::debug!(channel = ?kind, error = %err, "error unloading sound");
            }
            drop(lease);
        });

        PlaybackOutcome::Started { duration }
    }

    /// Stops waiting on the current sound and unloads it early. Idempotent.
    pub fn cancel(&self) {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(token) = &slot.cancel {
            token.cancel();
        }
    }

    fn acquire(&self) -> Result<Option<Lease>> {
        let mut slot = self.lock_slot()?;
        if slot.state != ChannelState::Idle {
            match self.kind {
                ChannelKind::Stimulus => return Ok(None),
                ChannelKind::Feedback => {
                    tracing::debug!(channel = ?self.kind, "interrupting current sound");
                    if let Some(previous) = slot.cancel.take() {
                        previous.cancel();
                    }
                }
            }
        }

        let cancel = CancellationToken::new();
        slot.generation += 1;
        slot.state = ChannelState::Loading;
        slot.cancel = Some(cancel.clone());

        Ok(Some(Lease {
            slot: self.slot.clone(),
            cancel,
            generation: slot.generation,
        }))
    }

    fn lock_slot(&self) -> Result<MutexGuard<'_, Slot>> {
        self.slot
            .lock()
            .map_err(|_| SafiError::msg("audio channel state has been poisoned"))
    }
}

impl fmt::Debug for AudioChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioChannel")
            .field("kind", &self.kind)
            .field("fallback_duration", &self.fallback_duration)
            .field("state", &self.state().ok())
            .finish()
    }
}

/// Claim on a channel. Dropping it returns the channel to idle, so every exit
/// path from [`AudioChannel::play`] releases it. A lease that was superseded
/// by a newer one leaves the slot alone.
struct Lease {
    slot: Arc<Mutex<Slot>>,
    cancel: CancellationToken,
    generation: u64,
}

impl Lease {
    fn mark_playing(&self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.generation == self.generation {
            slot.state = ChannelState::Playing;
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.generation == self.generation {
            slot.state = ChannelState::Idle;
            slot.cancel = None;
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    /// Backend that records calls and can be told to fail.
    #[derive(Default)]
    pub struct FakeBackend {
        pub loads: Mutex<Vec<AudioSource>>,
        pub unloads: Arc<AtomicUsize>,
        pub duration: Option<Duration>,
        pub fail_load: AtomicBool,
        pub fail_play: bool,
        pub fail_unload: bool,
    }

    impl FakeBackend {
        pub fn with_duration(duration: Duration) -> Self {
            Self {
                duration: Some(duration),
                ..Self::default()
            }
        }

        pub fn loaded(&self) -> Vec<AudioSource> {
            self.loads.lock().unwrap().clone()
        }

        pub fn unload_count(&self) -> usize {
            self.unloads.load(Ordering::SeqCst)
        }

        pub fn set_fail_load(&self, fail: bool) {
            self.fail_load.store(fail, Ordering::SeqCst);
        }
    }

    struct FakeSound {
        duration: Option<Duration>,
        fail_play: bool,
        fail_unload: bool,
        unloads: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SoundHandle for FakeSound {
        fn duration(&self) -> Option<Duration> {
            self.duration
        }

        async fn play(&self) -> Result<()> {
            if self.fail_play {
                return Err(SafiError::AudioPlayback("decoder error".to_string()));
            }
            Ok(())
        }

        async fn unload(&self) -> Result<()> {
            self.unloads.fetch_add(1, Ordering::SeqCst);
            if self.fail_unload {
                return Err(SafiError::AudioPlayback("sound already released".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl AudioBackend for FakeBackend {
        async fn load(&self, source: &AudioSource) -> Result<Box<dyn SoundHandle>> {
            self.loads.lock().unwrap().push(source.clone());
            if self.fail_load.load(Ordering::SeqCst) {
                return Err(SafiError::AudioLoad(format!("{source}: 404")));
            }
            Ok(Box::new(FakeSound {
                duration: self.duration,
                fail_play: self.fail_play,
                fail_unload: self.fail_unload,
                unloads: self.unloads.clone(),
            }))
        }
    }

    /// Lets spawned unload tasks run to completion.
    pub async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{settle, FakeBackend};
    use super::*;

    fn channel(backend: Arc<FakeBackend>) -> AudioChannel {
        AudioChannel::new(ChannelKind::Stimulus, backend, Duration::from_secs(3))
    }

    fn remote(file: &str) -> AudioSource {
        AudioSource::Remote(AudioLocator::new(format!("https://cdn/{file}")))
    }

    #[tokio::test(start_paused = true)]
    async fn plays_then_returns_to_idle_after_duration() {
        let backend = Arc::new(FakeBackend::with_duration(Duration::from_millis(1500)));
        let channel = channel(backend.clone());

        let outcome = channel.play(remote("a.mp3")).await;
        assert!(matches!(
            outcome,
            PlaybackOutcome::Started { duration } if duration == Duration::from_millis(1500)
        ));
        assert_eq!(channel.state().unwrap(), ChannelState::Playing);

        tokio::time::sleep(Duration::from_millis(1600)).await;
        settle().await;

        assert_eq!(channel.state().unwrap(), ChannelState::Idle);
        assert_eq!(backend.unload_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rejects_second_request_while_playing() {
        let backend = Arc::new(FakeBackend::with_duration(Duration::from_secs(2)));
        let channel = channel(backend.clone());

        assert!(channel.play(remote("a.mp3")).await.is_started());
        assert!(matches!(
            channel.play(remote("b.mp3")).await,
            PlaybackOutcome::Busy
        ));
        assert_eq!(backend.loaded(), vec![remote("a.mp3")]);
    }

    #[tokio::test(start_paused = true)]
    async fn falls_back_to_default_duration() {
        let backend = Arc::new(FakeBackend::default());
        let channel = channel(backend.clone());

        let outcome = channel.play(AudioSource::Cue(FeedbackCue::Correct)).await;
        assert!(matches!(
            outcome,
            PlaybackOutcome::Started { duration } if duration == Duration::from_secs(3)
        ));

        tokio::time::sleep(Duration::from_millis(2900)).await;
        settle().await;
        assert!(channel.is_busy());

        tokio::time::sleep(Duration::from_millis(200)).await;
        settle().await;
        assert!(!channel.is_busy());
    }

    #[tokio::test]
    async fn load_failure_resets_to_idle() {
        let backend = Arc::new(FakeBackend {
            fail_load: true.into(),
            ..FakeBackend::default()
        });
        let channel = channel(backend);

        let outcome = channel.play(remote("missing.mp3")).await;
        assert!(matches!(
            outcome,
            PlaybackOutcome::Failed(SafiError::AudioLoad(_))
        ));
        assert_eq!(channel.state().unwrap(), ChannelState::Idle);
    }

    #[tokio::test]
    async fn play_failure_unloads_and_resets() {
        let backend = Arc::new(FakeBackend {
            fail_play: true,
            ..FakeBackend::default()
        });
        let channel = channel(backend.clone());

        let outcome = channel.play(remote("broken.mp3")).await;
        assert!(matches!(
            outcome,
            PlaybackOutcome::Failed(SafiError::AudioPlayback(_))
        ));
        assert_eq!(backend.unload_count(), 1);
        assert!(!channel.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_unloads_early() {
        let backend = Arc::new(FakeBackend::with_duration(Duration::from_secs(60)));
        let channel = channel(backend.clone());

        assert!(channel.play(remote("long.mp3")).await.is_started());
        channel.cancel();
        settle().await;

        assert_eq!(backend.unload_count(), 1);
        assert_eq!(channel.state().unwrap(), ChannelState::Idle);

        // Cancelling an idle channel does nothing.
        channel.cancel();
        assert!(channel.play(remote("next.mp3")).await.is_started());
    }

    #[tokio::test(start_paused = true)]
    async fn feedback_cue_interrupts_the_previous_one() {
        let backend = Arc::new(FakeBackend::with_duration(Duration::from_secs(2)));
        let feedback = AudioChannel::new(ChannelKind::Feedback, backend.clone(), Duration::ZERO);

        assert!(feedback.play(AudioSource::Cue(FeedbackCue::Correct)).await.is_started());
        assert!(feedback.play(AudioSource::Cue(FeedbackCue::Wrong)).await.is_started());
        settle().await;

        assert_eq!(
            backend.loaded(),
            vec![
                AudioSource::Cue(FeedbackCue::Correct),
                AudioSource::Cue(FeedbackCue::Wrong)
            ]
        );
        // The interrupted cue is unloaded without freeing the slot.
        assert_eq!(backend.unload_count(), 1);
        assert_eq!(feedback.state().unwrap(), ChannelState::Playing);

        tokio::time::sleep(Duration::from_millis(2100)).await;
        settle().await;
        assert_eq!(backend.unload_count(), 2);
        assert_eq!(feedback.state().unwrap(), ChannelState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn unload_errors_are_swallowed_after_playback() {
        let backend = Arc::new(FakeBackend {
            duration: Some(Duration::from_millis(500)),
            fail_unload: true,
            ..FakeBackend::default()
        });
        let channel = channel(backend.clone());

        assert!(channel.play(remote("a.mp3")).await.is_started());
        tokio::time::sleep(Duration::from_millis(600)).await;
        settle().await;

        assert_eq!(backend.unload_count(), 1);
        assert_eq!(channel.state().unwrap(), ChannelState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn unload_errors_are_swallowed_on_cancel() {
        let backend = Arc::new(FakeBackend {
            duration: Some(Duration::from_secs(60)),
            fail_unload: true,
            ..FakeBackend::default()
        });
        let channel = channel(backend.clone());

        assert!(channel.play(remote("long.mp3")).await.is_started());
        channel.cancel();
        settle().await;

        assert_eq!(backend.unload_count(), 1);
        assert_eq!(channel.state().unwrap(), ChannelState::Idle);
    }

    #[tokio::test]
    async fn unload_error_does_not_mask_play_failure() {
        let backend = Arc::new(FakeBackend {
            fail_play: true,
            fail_unload: true,
            ..FakeBackend::default()
        });
        let channel = channel(backend.clone());

        let outcome = channel.play(remote("broken.mp3")).await;
        assert!(matches!(
            outcome,
            PlaybackOutcome::Failed(SafiError::AudioPlayback(ref reason)) if reason == "decoder error"
        ));
        assert_eq!(backend.unload_count(), 1);
        assert_eq!(channel.state().unwrap(), ChannelState::Idle);
    }
}

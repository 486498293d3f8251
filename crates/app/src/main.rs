use std::{path::PathBuf, sync::Arc, time::Duration};

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use safi_core::{
    backend::{MemorySessionCache, OAuthProvider},
    AppConfig, AssetProbe, AudioBackend, AudioLocator, AudioResolver, AudioSource, AuthProvider,
    BackendConfig, Collaborators, ContentStore, Credentials, FlowState, InterstitialKind,
    LessonSession, RecordStore, ResolutionRequest, Result, SafiError, Session, SoundHandle,
    StorageLayout, SupabaseClient, Vocabulary, VocabularyEntry, VocabularyKind,
};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Lessons { catalog } => run_lessons(catalog.as_ref()),
        Commands::Resolve {
            lesson,
            question,
            option,
        } => run_resolve(config, lesson, question, option).await,
        Commands::Probe { lesson, file } => run_probe(config, lesson, &file).await,
        Commands::Walkthrough { lesson, answers } => run_walkthrough(config, lesson, answers).await,
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => {
            tracing::info!(?path, "loading configuration");
            AppConfig::from_json_file(path)?
        }
        None => AppConfig::default(),
    };

    if !config.backend.is_complete() {
        match BackendConfig::from_env() {
            Ok(backend) => config.backend = backend,
            Err(err) => tracing::debug!(error = %err, "backend not configured from environment"),
        }
    }
    Ok(config)
}

fn connect(config: &AppConfig) -> Result<SupabaseClient> {
    SupabaseClient::new(
        config.backend.clone(),
        Arc::new(MemorySessionCache::new()),
    )
}

fn run_lessons(catalog: Option<&PathBuf>) -> Result<()> {
    let store = match catalog {
        Some(path) => ContentStore::from_json(&std::fs::read_to_string(path)?)?,
        None => ContentStore::builtin()?,
    };

    for lesson in store.lessons() {
        println!(
            "{:>3}  {:<24} {} questions, {} flashcards",
            lesson.id,
            lesson.title,
            lesson.question_count(),
            lesson.flashcards.len()
        );
    }
    Ok(())
}

async fn run_resolve(
    config: AppConfig,
    lesson_id: u32,
    question_index: usize,
    option: Option<usize>,
) -> Result<()> {
    let store = ContentStore::builtin()?;
    let lesson = store.lesson(lesson_id)?;
    let question = lesson.question(question_index).ok_or_else(|| {
        SafiError::msg(format!(
            "lesson {lesson_id} has no question {question_index}"
        ))
    })?;

    let request = match option {
        Some(index) => {
            let text = question
                .option(index)
                .ok_or_else(|| SafiError::msg(format!("question has no option {index}")))?;
            ResolutionRequest::answer(text, lesson_id)
        }
        None => ResolutionRequest::stimulus(&question.stimulus, lesson_id, question_index),
    };

    let client = connect(&config)?;
    let vocabulary = Vocabulary::fetch(&client).await;
    let resolver = AudioResolver::new(client.storage_layout());

    match resolver.resolve(&vocabulary, &request) {
        Ok(resolution) => println!(
            "{} -> {} ({:?}, {:?})",
            request.text, resolution.locator, resolution.kind, resolution.matched_by
        ),
        Err(err) => println!("{}: not found ({err})", request.text),
    }
    Ok(())
}

async fn run_probe(config: AppConfig, lesson_id: u32, file: &str) -> Result<()> {
    let client = connect(&config)?;
    let locator = client.storage_layout().locate(lesson_id, file);

    let exists = client.exists(&locator).await?;
    println!("{locator}: {}", if exists { "found" } else { "missing" });
    Ok(())
}

async fn run_walkthrough(config: AppConfig, lesson_id: u32, answers: Vec<usize>) -> Result<()> {
    let store = ContentStore::builtin()?;
    let lesson = Arc::new(store.lesson(lesson_id)?.clone());

    let (collaborators, layout) = match connect(&config) {
        Ok(client) => {
            let layout = client.storage_layout();
            let client = Arc::new(client);
            let collaborators = Collaborators {
                records: client.clone(),
                probe: client.clone(),
                auth: client,
                audio: Arc::new(LoggingAudio),
            };
            (collaborators, layout)
        }
        Err(err) => {
            tracing::warn!(error = %err, "backend unavailable, walking through offline");
            let offline = Arc::new(Offline::default());
            let collaborators = Collaborators {
                records: offline.clone(),
                probe: offline.clone(),
                auth: offline,
                audio: Arc::new(LoggingAudio),
            };
            (collaborators, StorageLayout::new("offline", &config.backend.bucket))
        }
    };

    let mut session = LessonSession::start(lesson, collaborators, layout, &config).await;

    loop {
        let transition = match session.state() {
            FlowState::Question(index) => {
                let outcome = session.play_stimulus().await;
                tracing::debug!(?outcome, "stimulus");

                let choice = answers.get(index).copied().unwrap_or_else(|| {
                    session
                        .progress()
                        .current_question()
                        .map(|question| question.correct)
                        .unwrap_or_default()
                });
                session.select_option(choice).await;
                if let Some(outcome) = session.check().await {
                    println!(
                        "question {index}: option {choice} is {}",
                        if outcome.correct { "correct" } else { "wrong" }
                    );
                }
                session.next().await
            }
            FlowState::Interstitial(InterstitialKind::FirstMotivation) => {
                session.continue_without_account()
            }
            FlowState::Interstitial(InterstitialKind::SignupPrompt) => {
                session.dismiss_signup().await
            }
            FlowState::Interstitial(InterstitialKind::SecondMotivation) => {
                session.continue_to_flashcards()
            }
            FlowState::Flashcards(_) => {
                session.play_flashcard().await;
                session.next_flashcard()
            }
            FlowState::Completion => break,
        };

        match transition {
            Some(transition) => println!("{:?} -> {:?}", transition.from, transition.to),
            None => return Err(SafiError::msg(format!("stuck at {:?}", session.state()))),
        }
    }

    let xp = session.progress().xp();
    let summary = session.exit();
    println!(
        "score {}/{} ({xp} xp)",
        summary.score, summary.total_questions
    );
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

/// Audio sink that only logs what would be played.
struct LoggingAudio;

struct LoggedSound(AudioSource);

#[async_trait]
impl AudioBackend for LoggingAudio {
    async fn load(&self, source: &AudioSource) -> Result<Box<dyn SoundHandle>> {
        Ok(Box::new(LoggedSound(source.clone())))
    }
}

#[async_trait]
impl SoundHandle for LoggedSound {
    fn duration(&self) -> Option<Duration> {
        Some(Duration::ZERO)
    }

    async fn play(&self) -> Result<()> {
        tracing::info!(source = %self.0, "play");
        Ok(())
    }

    async fn unload(&self) -> Result<()> {
        Ok(())
    }
}

/// Stand-in backend when no project is configured: no vocabulary, no
/// storage objects, never signed in.
struct Offline {
    session: watch::Sender<Option<Session>>,
}

impl Default for Offline {
    fn default() -> Self {
        Self {
            session: watch::channel(None).0,
        }
    }
}

#[async_trait]
impl RecordStore for Offline {
    async fn fetch_vocabulary(&self, _kind: VocabularyKind) -> Result<Vec<VocabularyEntry>> {
        Ok(Vec::new())
    }
}

#[async_trait]
impl AssetProbe for Offline {
    async fn exists(&self, _locator: &AudioLocator) -> Result<bool> {
        Ok(false)
    }
}

#[async_trait]
impl AuthProvider for Offline {
    async fn get_session(&self) -> Result<Option<Session>> {
        Ok(None)
    }

    async fn sign_in_with_password(&self, _credentials: &Credentials) -> Result<Session> {
        Err(SafiError::Auth("offline".to_string()))
    }

    async fn sign_up(&self, _credentials: &Credentials) -> Result<Option<Session>> {
        Err(SafiError::Auth("offline".to_string()))
    }

    async fn sign_in_with_oauth(
        &self,
        _provider: OAuthProvider,
        _redirect_to: Option<&str>,
    ) -> Result<String> {
        Err(SafiError::Auth("offline".to_string()))
    }

    async fn sign_out(&self) -> Result<()> {
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<Option<Session>> {
        self.session.subscribe()
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "SafiSpeak Darija lesson engine", long_about = None)]
struct Cli {
    /// JSON configuration file. Backend settings fall back to SUPABASE_* variables.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the lessons in a catalog.
    Lessons {
        /// Catalog JSON file. Defaults to the bundled lessons.
        #[arg(long)]
        catalog: Option<PathBuf>,
    },
    /// Resolve the audio file for a question stimulus or one of its options.
    Resolve {
        #[arg(long)]
        lesson: u32,
        /// Zero-based question index.
        #[arg(long)]
        question: usize,
        /// Zero-based option index. Resolves the stimulus when omitted.
        #[arg(long)]
        option: Option<usize>,
    },
    /// Check that an audio object exists in storage.
    Probe {
        #[arg(long)]
        lesson: u32,
        /// File name inside the lesson's chapter folder.
        file: String,
    },
    /// Play through a lesson without a UI, printing every transition.
    Walkthrough {
        #[arg(long)]
        lesson: u32,
        /// Options to pick per question. Missing entries pick the right answer.
        #[arg(long, value_delimiter = ',')]
        answers: Vec<usize>,
    },
}

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use crate::adapter::StorageAdapter;
use crate::cloud::auth::{Session, load_session};
use crate::cloud::rest::RestClient;
use crate::cloud::{BookSubscription, CloudRepository};
use crate::config::Config;
use crate::error::StoreError;
use crate::ids::now_millis;
use crate::local::LocalStore;
use crate::model::{
    Book, BookUpdate, MasteryLevel, NewBook, NewQuestion, Question, QuestionUpdate, Settings,
};
use crate::practice::{self, MasteryStats, PracticeMode, PracticeSession};

#[derive(Clone)]
pub enum Backend {
    Local(LocalStore),
    Cloud(CloudRepository),
}

/// Single entry point for book, question and settings operations.
///
/// A signed-in session routes everything to the cloud repository, otherwise
/// to the local store. Cloud failures are returned as-is; nothing falls back
/// to local data.
#[derive(Clone)]
pub struct Library {
    backend: Backend,
    session: Option<Session>,
}

impl Library {
    pub fn local(store: LocalStore) -> Self {
        Self {
            backend: Backend::Local(store),
            session: None,
        }
    }

    pub fn cloud(repo: CloudRepository, session: Session) -> Self {
        Self {
            backend: Backend::Cloud(repo),
            session: Some(session),
        }
    }

    /// Picks the backend from the session persisted in `adapter`.
    pub async fn open(config: &Config, adapter: Arc<dyn StorageAdapter>) -> anyhow::Result<Self> {
        let Some(session) = load_session(&adapter).await.context("load session")? else {
            tracing::debug!("no session; using local store");
            return Ok(Self::local(LocalStore::new(adapter)));
        };

        let Some(supabase) = &config.supabase else {
            anyhow::bail!(
                "signed in as {} but READRECALL_SUPABASE_URL / READRECALL_SUPABASE_ANON_KEY are not set",
                session.user.id
            );
        };
        if session.is_expired(chrono::Utc::now().timestamp()) {
            return Err(anyhow::Error::new(StoreError::NotAuthenticated)
                .context("session expired; sign in again or log out"));
        }

        let rest = RestClient::new(&supabase.url, supabase.anon_key.clone())
            .with_access_token(session.access_token.clone());
        let repo = CloudRepository::with_user(rest, session.user.id.clone());
        tracing::debug!(user_id = %session.user.id, "using cloud repository");
        Ok(Self::cloud(repo, session))
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn backend_name(&self) -> &'static str {
        match self.backend {
            Backend::Local(_) => "local",
            Backend::Cloud(_) => "cloud",
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub async fn get_books(&self) -> anyhow::Result<Vec<Book>> {
        match &self.backend {
            Backend::Local(store) => Ok(store.get_books().await),
            Backend::Cloud(repo) => repo.get_all_books().await,
        }
    }

    pub async fn get_book(&self, id: &str) -> anyhow::Result<Option<Book>> {
        match &self.backend {
            Backend::Local(store) => Ok(store.get_book(id).await),
            Backend::Cloud(repo) => repo.get_book(id).await,
        }
    }

    pub async fn add_book(&self, book: NewBook) -> anyhow::Result<Book> {
        match &self.backend {
            Backend::Local(store) => store.add_book(book).await,
            Backend::Cloud(repo) => repo.create_book(book).await,
        }
    }

    pub async fn update_book(&self, id: &str, update: &BookUpdate) -> anyhow::Result<Option<Book>> {
        match &self.backend {
            Backend::Local(store) => store.update_book(id, update).await,
            Backend::Cloud(repo) => repo.update_book(id, update).await,
        }
    }

    pub async fn delete_book(&self, id: &str) -> anyhow::Result<bool> {
        match &self.backend {
            Backend::Local(store) => store.delete_book(id).await,
            Backend::Cloud(repo) => repo.delete_book(id).await,
        }
    }

    pub async fn get_questions_by_book(&self, book_id: &str) -> anyhow::Result<Vec<Question>> {
        match &self.backend {
            Backend::Local(store) => Ok(store.get_questions_by_book(book_id).await),
            Backend::Cloud(repo) => repo.get_questions_by_book(book_id).await,
        }
    }

    pub async fn get_question(&self, id: &str) -> anyhow::Result<Option<Question>> {
        match &self.backend {
            Backend::Local(store) => Ok(store.get_question(id).await),
            Backend::Cloud(repo) => repo.get_question(id).await,
        }
    }

    pub async fn add_question(&self, question: NewQuestion) -> anyhow::Result<Question> {
        match &self.backend {
            Backend::Local(store) => store.add_question(question).await,
            Backend::Cloud(repo) => repo.create_question(question).await,
        }
    }

    pub async fn update_question(
        &self,
        id: &str,
        update: &QuestionUpdate,
    ) -> anyhow::Result<Option<Question>> {
        match &self.backend {
            Backend::Local(store) => store.update_question(id, update).await,
            Backend::Cloud(repo) => repo.update_question(id, update).await,
        }
    }

    pub async fn delete_question(&self, id: &str) -> anyhow::Result<bool> {
        match &self.backend {
            Backend::Local(store) => store.delete_question(id).await,
            Backend::Cloud(repo) => repo.delete_question(id).await,
        }
    }

    pub async fn get_settings(&self) -> anyhow::Result<Settings> {
        match &self.backend {
            Backend::Local(store) => Ok(store.get_settings().await),
            Backend::Cloud(repo) => repo.get_user_settings().await,
        }
    }

    pub async fn save_settings(&self, settings: &Settings) -> anyhow::Result<Settings> {
        match &self.backend {
            Backend::Local(store) => {
                store.save_settings(settings).await?;
                Ok(settings.clone())
            }
            Backend::Cloud(repo) => repo.save_user_settings(settings).await,
        }
    }

    /// Records one practice attempt. Returns `None` when the question does
    /// not exist.
    pub async fn grade_question(
        &self,
        id: &str,
        level: MasteryLevel,
    ) -> anyhow::Result<Option<Question>> {
        let Some(question) = self.get_question(id).await? else {
            return Ok(None);
        };
        let update = practice::grade(&question, level, now_millis());
        self.update_question(id, &update).await
    }

    pub async fn plan_practice(
        &self,
        book_id: &str,
        mode: PracticeMode,
        limit: Option<usize>,
    ) -> anyhow::Result<PracticeSession> {
        let questions = self.get_questions_by_book(book_id).await?;
        Ok(PracticeSession::new(
            book_id,
            mode,
            &questions,
            limit,
            now_millis(),
            &mut rand::thread_rng(),
        ))
    }

    pub async fn mastery_stats(&self, book_id: &str) -> anyhow::Result<MasteryStats> {
        let questions = self.get_questions_by_book(book_id).await?;
        Ok(MasteryStats::from_questions(&questions))
    }

    /// Live book list. Only the cloud backend can be watched.
    pub async fn watch_books(&self, poll_interval: Duration) -> anyhow::Result<BookSubscription> {
        match &self.backend {
            Backend::Local(_) => Err(anyhow::Error::new(StoreError::NotAuthenticated)
                .context("watching books requires a signed-in session")),
            Backend::Cloud(repo) => repo.subscribe_books(poll_interval).await,
        }
    }
}

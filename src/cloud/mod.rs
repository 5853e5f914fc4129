pub mod auth;
pub mod rest;
pub mod rows;

use std::time::Duration;

use anyhow::Context as _;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::error::StoreError;
use crate::model::{
    Book, BookUpdate, MasteryLevel, NewBook, NewQuestion, Question, QuestionUpdate, Settings,
};
use rest::{RestClient, eq, order_desc};
use rows::{
    BookInsert, BookPatch, BookRow, CounterPatch, MasteryRow, QuestionInsert, QuestionPatch,
    QuestionRow, SettingsRow,
};

const BOOKS: &str = "books";
const QUESTIONS: &str = "questions";
const USER_SETTINGS: &str = "user_settings";

/// Books, questions and settings stored in the user-scoped Supabase tables.
///
/// Every call requires a user ID and filters on `user_id`. Question
/// mutations recount the owning book here, so callers never push counters
/// themselves.
#[derive(Debug, Clone)]
pub struct CloudRepository {
    rest: RestClient,
    user_id: Option<String>,
    book_changes: broadcast::Sender<()>,
}

impl CloudRepository {
    pub fn new(rest: RestClient) -> Self {
        let (book_changes, _) = broadcast::channel(16);
        Self {
            rest,
            user_id: None,
            book_changes,
        }
    }

    pub fn with_user(rest: RestClient, user_id: impl Into<String>) -> Self {
        let mut repo = Self::new(rest);
        repo.set_user_id(Some(user_id.into()));
        repo
    }

    pub fn set_user_id(&mut self, user_id: Option<String>) {
        self.user_id = user_id.filter(|id| !id.trim().is_empty());
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    fn require_user(&self) -> Result<&str, StoreError> {
        self.user_id.as_deref().ok_or(StoreError::NotAuthenticated)
    }

    fn notify_books_changed(&self) {
        // No receivers simply means nobody is subscribed.
        let _ = self.book_changes.send(());
    }

    /// All of the user's books, newest first.
    pub async fn get_all_books(&self) -> anyhow::Result<Vec<Book>> {
        let user_id = self.require_user()?;
        let rows: Vec<BookRow> = self
            .rest
            .select(
                BOOKS,
                "*",
                &[eq("user_id", user_id), order_desc("created_at")],
            )
            .await
            .context("fetch books")?;
        Ok(rows.into_iter().map(Book::from).collect())
    }

    pub async fn get_book(&self, id: &str) -> anyhow::Result<Option<Book>> {
        let user_id = self.require_user()?;
        let rows: Vec<BookRow> = self
            .rest
            .select(BOOKS, "*", &[eq("id", id), eq("user_id", user_id)])
            .await
            .context("fetch book")?;
        Ok(rows.into_iter().next().map(Book::from))
    }

    pub async fn create_book(&self, book: NewBook) -> anyhow::Result<Book> {
        let user_id = self.require_user()?;
        book.validate()?;
        let rows: Vec<BookRow> = self
            .rest
            .insert(BOOKS, &BookInsert::new(user_id, &book))
            .await
            .context("create book")?;
        let book = first_row(rows, "create book")?;
        self.notify_books_changed();
        Ok(book.into())
    }

    /// Returns `None` when the user has no book with `id`.
    pub async fn update_book(&self, id: &str, update: &BookUpdate) -> anyhow::Result<Option<Book>> {
        let user_id = self.require_user()?;
        update.validate()?;
        if update.is_empty() {
            return self.get_book(id).await;
        }
        let rows: Vec<BookRow> = self
            .rest
            .update(
                BOOKS,
                &[eq("id", id), eq("user_id", user_id)],
                &BookPatch::from(update),
            )
            .await
            .context("update book")?;
        let book = rows.into_iter().next().map(Book::from);
        if book.is_some() {
            self.notify_books_changed();
        }
        Ok(book)
    }

    /// Deletes the book's questions, then the book.
    pub async fn delete_book(&self, id: &str) -> anyhow::Result<bool> {
        let user_id = self.require_user()?;
        let removed: Vec<QuestionRow> = self
            .rest
            .delete(QUESTIONS, &[eq("book_id", id), eq("user_id", user_id)])
            .await
            .context("delete book questions")?;
        let rows: Vec<BookRow> = self
            .rest
            .delete(BOOKS, &[eq("id", id), eq("user_id", user_id)])
            .await
            .context("delete book")?;
        tracing::debug!(
            book_id = id,
            removed_questions = removed.len(),
            "deleted cloud book"
        );
        let deleted = !rows.is_empty();
        if deleted {
            self.notify_books_changed();
        }
        Ok(deleted)
    }

    /// The book's questions, newest first.
    pub async fn get_questions_by_book(&self, book_id: &str) -> anyhow::Result<Vec<Question>> {
        let user_id = self.require_user()?;
        let rows: Vec<QuestionRow> = self
            .rest
            .select(
                QUESTIONS,
                "*",
                &[
                    eq("book_id", book_id),
                    eq("user_id", user_id),
                    order_desc("created_at"),
                ],
            )
            .await
            .context("fetch questions")?;
        Ok(rows.into_iter().map(Question::from).collect())
    }

    pub async fn get_question(&self, id: &str) -> anyhow::Result<Option<Question>> {
        let user_id = self.require_user()?;
        let rows: Vec<QuestionRow> = self
            .rest
            .select(QUESTIONS, "*", &[eq("id", id), eq("user_id", user_id)])
            .await
            .context("fetch question")?;
        Ok(rows.into_iter().next().map(Question::from))
    }

    pub async fn create_question(&self, question: NewQuestion) -> anyhow::Result<Question> {
        let user_id = self.require_user()?;
        question.validate()?;
        if self.get_book(&question.book_id).await?.is_none() {
            return Err(StoreError::invalid(format!("unknown book: {}", question.book_id)).into());
        }

        let rows: Vec<QuestionRow> = self
            .rest
            .insert(QUESTIONS, &QuestionInsert::new(user_id, &question))
            .await
            .context("create question")?;
        let question: Question = first_row(rows, "create question")?.into();
        self.recount_book(&question.book_id).await?;
        Ok(question)
    }

    /// Returns `None` when the user has no question with `id`.
    pub async fn update_question(
        &self,
        id: &str,
        update: &QuestionUpdate,
    ) -> anyhow::Result<Option<Question>> {
        let user_id = self.require_user()?;
        let Some(current) = self.get_question(id).await? else {
            return Ok(None);
        };
        update.merged(&current)?;
        if update.is_empty() {
            return Ok(Some(current));
        }

        let rows: Vec<QuestionRow> = self
            .rest
            .update(
                QUESTIONS,
                &[eq("id", id), eq("user_id", user_id)],
                &QuestionPatch::from(update),
            )
            .await
            .context("update question")?;
        let Some(question) = rows.into_iter().next().map(Question::from) else {
            return Ok(None);
        };
        self.recount_book(&question.book_id).await?;
        Ok(Some(question))
    }

    pub async fn delete_question(&self, id: &str) -> anyhow::Result<bool> {
        let user_id = self.require_user()?;
        let rows: Vec<MasteryRow> = self
            .rest
            .delete(QUESTIONS, &[eq("id", id), eq("user_id", user_id)])
            .await
            .context("delete question")?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(false);
        };
        self.recount_book(&row.book_id).await?;
        Ok(true)
    }

    /// Recomputes and stores the book's counters from its question rows.
    /// Returns `None` when the book does not exist.
    pub async fn recount_book(&self, book_id: &str) -> anyhow::Result<Option<Book>> {
        let user_id = self.require_user()?;
        let levels: Vec<MasteryRow> = self
            .rest
            .select(
                QUESTIONS,
                "book_id,mastery_level",
                &[eq("book_id", book_id), eq("user_id", user_id)],
            )
            .await
            .context("fetch question levels")?;
        let patch = CounterPatch {
            question_count: u32::try_from(levels.len()).unwrap_or(u32::MAX),
            mastered_count: u32::try_from(
                levels
                    .iter()
                    .filter(|row| row.mastery_level == MasteryLevel::Mastered)
                    .count(),
            )
            .unwrap_or(u32::MAX),
        };
        let rows: Vec<BookRow> = self
            .rest
            .update(BOOKS, &[eq("id", book_id), eq("user_id", user_id)], &patch)
            .await
            .context("update book counters")?;
        let book = rows.into_iter().next().map(Book::from);
        if book.is_some() {
            self.notify_books_changed();
        }
        Ok(book)
    }

    /// The user's settings row; a default row is created on first access.
    pub async fn get_user_settings(&self) -> anyhow::Result<Settings> {
        let user_id = self.require_user()?;
        let rows: Vec<SettingsRow> = self
            .rest
            .select(USER_SETTINGS, "*", &[eq("user_id", user_id)])
            .await
            .context("fetch settings")?;
        if let Some(row) = rows.into_iter().next() {
            return Ok(row.into());
        }

        let defaults = Settings::default();
        let rows: Vec<SettingsRow> = self
            .rest
            .insert(USER_SETTINGS, &SettingsRow::new(user_id, &defaults))
            .await
            .context("create default settings")?;
        Ok(rows.into_iter().next().map(Settings::from).unwrap_or(defaults))
    }

    pub async fn save_user_settings(&self, settings: &Settings) -> anyhow::Result<Settings> {
        let user_id = self.require_user()?;
        let row = SettingsRow::new(user_id, settings);
        let rows: Vec<SettingsRow> = self
            .rest
            .update(USER_SETTINGS, &[eq("user_id", user_id)], &row)
            .await
            .context("update settings")?;
        if let Some(row) = rows.into_iter().next() {
            return Ok(row.into());
        }
        let rows: Vec<SettingsRow> = self
            .rest
            .insert(USER_SETTINGS, &row)
            .await
            .context("create settings")?;
        Ok(first_row(rows, "create settings")?.into())
    }

    /// Live view of the user's book list.
    ///
    /// The list is refetched whenever this repository (or a clone of it)
    /// changes a book or its counters, and every `poll_interval` to pick up
    /// changes made on other devices.
    pub async fn subscribe_books(
        &self,
        poll_interval: Duration,
    ) -> anyhow::Result<BookSubscription> {
        self.require_user()?;
        let initial = self.get_all_books().await?;
        let (tx, rx) = watch::channel(initial);
        let mut changes = self.book_changes.subscribe();
        let repo = self.clone();
        let poll_interval = poll_interval.max(Duration::from_millis(10));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    recv = changes.recv() => {
                        if let Err(broadcast::error::RecvError::Closed) = recv {
                            break;
                        }
                    }
                    _ = ticker.tick() => {}
                    _ = tx.closed() => break,
                }

                match repo.get_all_books().await {
                    Ok(books) => {
                        let changed = tx.send_if_modified(|current| {
                            if *current == books {
                                return false;
                            }
                            *current = books;
                            true
                        });
                        if changed {
                            tracing::debug!("book list changed");
                        }
                    }
                    Err(err) => {
                        tracing::warn!(?err, "failed to refresh subscribed books");
                    }
                }
            }
        });

        Ok(BookSubscription { books: rx, task })
    }
}

fn first_row<T>(rows: Vec<T>, op: &str) -> anyhow::Result<T> {
    rows.into_iter()
        .next()
        .ok_or_else(|| StoreError::remote(format!("{op}: server returned no row")).into())
}

/// Handle returned by [`CloudRepository::subscribe_books`]. Dropping it stops
/// the background refresh.
#[derive(Debug)]
pub struct BookSubscription {
    books: watch::Receiver<Vec<Book>>,
    task: JoinHandle<()>,
}

impl BookSubscription {
    pub fn current(&self) -> Vec<Book> {
        self.books.borrow().clone()
    }

    /// Waits for the next change and returns the new list.
    pub async fn changed(&mut self) -> anyhow::Result<Vec<Book>> {
        self.books
            .changed()
            .await
            .context("book subscription closed")?;
        Ok(self.books.borrow_and_update().clone())
    }

    /// Stops the background refresh task. Dropping the subscription does
    /// the same.
    pub fn unsubscribe(self) {
        self.task.abort();
    }
}

impl Drop for BookSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}

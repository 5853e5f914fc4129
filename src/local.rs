use std::sync::Arc;

use anyhow::Context as _;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Mutex;

use crate::adapter::StorageAdapter;
use crate::error::StoreError;
use crate::ids::{generate_id, now_millis};
use crate::model::{
    Book, BookUpdate, NewBook, NewQuestion, Question, QuestionUpdate, Settings, SyncData,
    count_questions,
};

pub const BOOKS_KEY: &str = "readrecall_books";
pub const QUESTIONS_KEY: &str = "readrecall_questions";
pub const SETTINGS_KEY: &str = "readrecall_settings";

/// Books, questions and settings kept as three JSON values in a
/// [`StorageAdapter`].
///
/// Reads never fail: a missing or unreadable value degrades to an empty
/// collection (or default settings) and is logged. Every question mutation
/// recomputes the owning book's counters before returning.
#[derive(Clone)]
pub struct LocalStore {
    adapter: Arc<dyn StorageAdapter>,
    write_lock: Arc<Mutex<()>>,
}

impl LocalStore {
    pub fn new(adapter: Arc<dyn StorageAdapter>) -> Self {
        Self {
            adapter,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn adapter(&self) -> &Arc<dyn StorageAdapter> {
        &self.adapter
    }

    pub async fn get_books(&self) -> Vec<Book> {
        self.read_records(BOOKS_KEY).await
    }

    pub async fn save_books(&self, books: &[Book]) -> anyhow::Result<()> {
        self.write(BOOKS_KEY, &books).await
    }

    pub async fn get_book(&self, id: &str) -> Option<Book> {
        self.get_books().await.into_iter().find(|b| b.id == id)
    }

    pub async fn add_book(&self, book: NewBook) -> anyhow::Result<Book> {
        book.validate()?;
        let _guard = self.write_lock.lock().await;

        let mut books = self.get_books().await;
        let book = book.into_book(generate_id(), now_millis());
        books.push(book.clone());
        self.save_books(&books).await.context("save books")?;

        tracing::debug!(book_id = %book.id, "added book");
        Ok(book)
    }

    /// Returns `None` when no book has `id`.
    pub async fn update_book(
        &self,
        id: &str,
        update: &BookUpdate,
    ) -> anyhow::Result<Option<Book>> {
        update.validate()?;
        let _guard = self.write_lock.lock().await;

        let mut books = self.get_books().await;
        let Some(book) = books.iter_mut().find(|b| b.id == id) else {
            return Ok(None);
        };
        update.apply_to(book);
        book.updated_at = Some(now_millis());
        let updated = book.clone();
        self.save_books(&books).await.context("save books")?;
        Ok(Some(updated))
    }

    /// Removes the book and every question that references it.
    pub async fn delete_book(&self, id: &str) -> anyhow::Result<bool> {
        let _guard = self.write_lock.lock().await;

        let books = self.get_books().await;
        let remaining = books
            .iter()
            .filter(|b| b.id != id)
            .cloned()
            .collect::<Vec<_>>();
        if remaining.len() == books.len() {
            return Ok(false);
        }
        self.save_books(&remaining).await.context("save books")?;

        let questions = self.get_questions().await;
        let before = questions.len();
        let questions = questions
            .into_iter()
            .filter(|q| q.book_id != id)
            .collect::<Vec<_>>();
        self.save_questions(&questions)
            .await
            .context("save questions")?;

        tracing::debug!(
            book_id = id,
            removed_questions = before - questions.len(),
            "deleted book"
        );
        Ok(true)
    }

    pub async fn get_questions(&self) -> Vec<Question> {
        self.read_records(QUESTIONS_KEY).await
    }

    pub async fn save_questions(&self, questions: &[Question]) -> anyhow::Result<()> {
        self.write(QUESTIONS_KEY, &questions).await
    }

    pub async fn get_questions_by_book(&self, book_id: &str) -> Vec<Question> {
        self.get_questions()
            .await
            .into_iter()
            .filter(|q| q.book_id == book_id)
            .collect()
    }

    pub async fn get_question(&self, id: &str) -> Option<Question> {
        self.get_questions().await.into_iter().find(|q| q.id == id)
    }

    pub async fn add_question(&self, question: NewQuestion) -> anyhow::Result<Question> {
        question.validate()?;
        let _guard = self.write_lock.lock().await;

        if !self.get_books().await.iter().any(|b| b.id == question.book_id) {
            let reason = format!("unknown book: {}", question.book_id);
            return Err(StoreError::invalid(reason).into());
        }

        let mut questions = self.get_questions().await;
        let question = question.into_question(generate_id(), now_millis());
        questions.push(question.clone());
        self.save_questions(&questions)
            .await
            .context("save questions")?;
        self.recount_unlocked(&question.book_id, &questions).await?;

        tracing::debug!(
            question_id = %question.id,
            book_id = %question.book_id,
            "added question"
        );
        Ok(question)
    }

    /// Returns `None` when no question has `id`.
    pub async fn update_question(
        &self,
        id: &str,
        update: &QuestionUpdate,
    ) -> anyhow::Result<Option<Question>> {
        let _guard = self.write_lock.lock().await;

        let mut questions = self.get_questions().await;
        let Some(slot) = questions.iter_mut().find(|q| q.id == id) else {
            return Ok(None);
        };
        let mut merged = update.merged(slot)?;
        merged.updated_at = Some(now_millis());
        *slot = merged.clone();

        self.save_questions(&questions)
            .await
            .context("save questions")?;
        self.recount_unlocked(&merged.book_id, &questions).await?;
        Ok(Some(merged))
    }

    pub async fn delete_question(&self, id: &str) -> anyhow::Result<bool> {
        let _guard = self.write_lock.lock().await;

        let questions = self.get_questions().await;
        let Some(book_id) = questions
            .iter()
            .find(|q| q.id == id)
            .map(|q| q.book_id.clone())
        else {
            return Ok(false);
        };
        let remaining = questions
            .into_iter()
            .filter(|q| q.id != id)
            .collect::<Vec<_>>();
        self.save_questions(&remaining)
            .await
            .context("save questions")?;
        self.recount_unlocked(&book_id, &remaining).await?;
        Ok(true)
    }

    /// Recomputes `question_count` / `mastered_count` for one book from the
    /// stored questions. Returns `None` when the book does not exist.
    pub async fn update_book_question_count(
        &self,
        book_id: &str,
    ) -> anyhow::Result<Option<Book>> {
        let _guard = self.write_lock.lock().await;
        let questions = self.get_questions().await;
        self.recount_unlocked(book_id, &questions).await
    }

    /// Recomputes the counters of every book.
    pub async fn recount_all(&self) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        let questions = self.get_questions().await;
        let mut books = self.get_books().await;
        for book in &mut books {
            let (total, mastered) = count_questions(&book.id, &questions);
            book.question_count = total;
            book.mastered_count = mastered;
        }
        self.save_books(&books).await.context("save books")
    }

    pub async fn get_settings(&self) -> Settings {
        self.read_or_default(SETTINGS_KEY).await
    }

    pub async fn save_settings(&self, settings: &Settings) -> anyhow::Result<()> {
        self.write(SETTINGS_KEY, settings).await
    }

    /// Full copy of the local data stamped with `timestamp`.
    pub async fn snapshot(&self, timestamp: i64) -> SyncData {
        SyncData {
            books: self.get_books().await,
            questions: self.get_questions().await,
            settings: self.get_settings().await,
            timestamp,
        }
    }

    /// Overwrites all three collections with `data`, then recomputes every
    /// book's counters.
    pub async fn replace_all(&self, data: &SyncData) -> anyhow::Result<()> {
        {
            let _guard = self.write_lock.lock().await;
            self.save_books(&data.books).await.context("save books")?;
            self.save_questions(&data.questions)
                .await
                .context("save questions")?;
            self.save_settings(&data.settings)
                .await
                .context("save settings")?;
        }
        self.recount_all().await.context("recount books")
    }

    pub async fn clear_all(&self) -> anyhow::Result<()> {
        let _guard = self.write_lock.lock().await;
        for key in [BOOKS_KEY, QUESTIONS_KEY, SETTINGS_KEY] {
            self.adapter
                .remove(key)
                .await
                .with_context(|| format!("remove {key}"))?;
        }
        Ok(())
    }

    async fn recount_unlocked(
        &self,
        book_id: &str,
        questions: &[Question],
    ) -> anyhow::Result<Option<Book>> {
        let mut books = self.get_books().await;
        let Some(book) = books.iter_mut().find(|b| b.id == book_id) else {
            return Ok(None);
        };
        let (total, mastered) = count_questions(book_id, questions);
        book.question_count = total;
        book.mastered_count = mastered;
        let book = book.clone();
        self.save_books(&books).await.context("save books")?;
        Ok(Some(book))
    }

    async fn read_raw(&self, key: &str) -> Option<String> {
        match self.adapter.get(key).await {
            Ok(raw) => raw,
            Err(err) => {
                tracing::warn!(key, ?err, "failed to read local data; using defaults");
                None
            }
        }
    }

    /// Decodes a stored array record by record so one malformed entry does
    /// not hide the rest of the collection.
    async fn read_records<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        let Some(raw) = self.read_raw(key).await else {
            return Vec::new();
        };
        let records = match serde_json::from_str::<Vec<serde_json::Value>>(&raw) {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(key, %err, "local data is not a json array; using defaults");
                return Vec::new();
            }
        };
        records
            .into_iter()
            .enumerate()
            .filter_map(|(index, record)| match serde_json::from_value(record) {
                Ok(value) => Some(value),
                Err(err) => {
                    tracing::warn!(key, index, %err, "skipping unreadable local record");
                    None
                }
            })
            .collect()
    }

    async fn read_or_default<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        let Some(raw) = self.read_raw(key).await else {
            return T::default();
        };
        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(key, %err, "local data is not valid json; using defaults");
                T::default()
            }
        }
    }

    async fn write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        let json = serde_json::to_string(value).with_context(|| format!("serialize {key}"))?;
        self.adapter
            .set(key, &json)
            .await
            .with_context(|| format!("write {key}"))
    }
}

//! Row shapes of the `books`, `questions` and `user_settings` tables.
//!
//! Columns are snake_case and timestamps are RFC 3339; the model uses
//! camelCase JSON and epoch milliseconds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{
    Book, BookUpdate, Difficulty, MasteryLevel, NewBook, NewQuestion, Question, QuestionCategory,
    QuestionType, QuestionUpdate, Settings,
};

#[derive(Debug, Clone, Deserialize)]
pub struct BookRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub cover_url: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub contents: Option<String>,
    #[serde(default)]
    pub key_points: Option<Vec<String>>,
    #[serde(default)]
    pub question_count: i64,
    #[serde(default)]
    pub mastered_count: i64,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<BookRow> for Book {
    fn from(row: BookRow) -> Self {
        Book {
            id: row.id,
            title: row.title,
            author: row.author.unwrap_or_default(),
            cover_url: row.cover_url,
            summary: row.summary,
            contents: row.contents,
            key_points: row.key_points,
            question_count: clamp_count(row.question_count),
            mastered_count: clamp_count(row.mastered_count),
            created_at: row.created_at.timestamp_millis(),
            updated_at: row.updated_at.map(|t| t.timestamp_millis()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BookInsert<'a> {
    pub user_id: &'a str,
    pub title: &'a str,
    pub author: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_points: Option<&'a [String]>,
    pub question_count: u32,
    pub mastered_count: u32,
}

impl<'a> BookInsert<'a> {
    pub fn new(user_id: &'a str, book: &'a NewBook) -> Self {
        Self {
            user_id,
            title: &book.title,
            author: &book.author,
            cover_url: book.cover_url.as_deref(),
            summary: book.summary.as_deref(),
            contents: book.contents.as_deref(),
            key_points: book.key_points.as_deref(),
            question_count: 0,
            mastered_count: 0,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BookPatch<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contents: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_points: Option<&'a [String]>,
}

impl<'a> From<&'a BookUpdate> for BookPatch<'a> {
    fn from(update: &'a BookUpdate) -> Self {
        Self {
            title: update.title.as_deref(),
            author: update.author.as_deref(),
            cover_url: update.cover_url.as_deref(),
            summary: update.summary.as_deref(),
            contents: update.contents.as_deref(),
            key_points: update.key_points.as_deref(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CounterPatch {
    pub question_count: u32,
    pub mastered_count: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuestionRow {
    pub id: String,
    pub user_id: String,
    pub book_id: String,
    pub question: String,
    #[serde(default)]
    pub answer: Option<String>,
    pub question_type: QuestionType,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub mastery_level: MasteryLevel,
    #[serde(default)]
    pub category: Option<QuestionCategory>,
    #[serde(default)]
    pub options: Option<Vec<String>>,
    #[serde(default)]
    pub correct_index: Option<i64>,
    #[serde(default)]
    pub knowledge_point: Option<String>,
    #[serde(default)]
    pub practice_count: i64,
    #[serde(default)]
    pub last_practiced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<QuestionRow> for Question {
    fn from(row: QuestionRow) -> Self {
        Question {
            id: row.id,
            book_id: row.book_id,
            question: row.question,
            answer: row.answer.unwrap_or_default(),
            question_type: row.question_type,
            difficulty: row.difficulty,
            mastery_level: row.mastery_level,
            category: row.category.unwrap_or_default(),
            options: row.options,
            correct_index: row.correct_index.and_then(|idx| u32::try_from(idx).ok()),
            knowledge_point: row.knowledge_point,
            practice_count: clamp_count(row.practice_count),
            created_at: row.created_at.timestamp_millis(),
            last_practiced_at: row.last_practiced_at.map(|t| t.timestamp_millis()),
            updated_at: row.updated_at.map(|t| t.timestamp_millis()),
        }
    }
}

/// Only `book_id` and `mastery_level`; enough to recount a book.
#[derive(Debug, Clone, Deserialize)]
pub struct MasteryRow {
    pub book_id: String,
    #[serde(default)]
    pub mastery_level: MasteryLevel,
}

#[derive(Debug, Serialize)]
pub struct QuestionInsert<'a> {
    pub user_id: &'a str,
    pub book_id: &'a str,
    pub question: &'a str,
    pub answer: &'a str,
    pub question_type: QuestionType,
    pub difficulty: Difficulty,
    pub mastery_level: MasteryLevel,
    pub category: QuestionCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knowledge_point: Option<&'a str>,
    pub practice_count: u32,
}

impl<'a> QuestionInsert<'a> {
    pub fn new(user_id: &'a str, question: &'a NewQuestion) -> Self {
        Self {
            user_id,
            book_id: &question.book_id,
            question: &question.question,
            answer: &question.answer,
            question_type: question.question_type,
            difficulty: question.difficulty,
            mastery_level: MasteryLevel::Unmastered,
            category: question.category,
            options: question.options.as_deref(),
            correct_index: question.correct_index,
            knowledge_point: question.knowledge_point.as_deref(),
            practice_count: 0,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QuestionPatch<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_type: Option<QuestionType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<QuestionCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub knowledge_point: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mastery_level: Option<MasteryLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub practice_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_practiced_at: Option<DateTime<Utc>>,
}

impl<'a> From<&'a QuestionUpdate> for QuestionPatch<'a> {
    fn from(update: &'a QuestionUpdate) -> Self {
        Self {
            question: update.question.as_deref(),
            answer: update.answer.as_deref(),
            question_type: update.question_type,
            difficulty: update.difficulty,
            category: update.category,
            options: update.options.as_deref(),
            correct_index: update.correct_index,
            knowledge_point: update.knowledge_point.as_deref(),
            mastery_level: update.mastery_level,
            practice_count: update.practice_count,
            last_practiced_at: update
                .last_practiced_at
                .and_then(DateTime::<Utc>::from_timestamp_millis),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsRow {
    pub user_id: String,
    #[serde(default)]
    pub dark_mode: bool,
    #[serde(default)]
    pub zhipu_api_key: Option<String>,
    #[serde(default)]
    pub zhipu_model: Option<String>,
    #[serde(default)]
    pub dify_api_key: Option<String>,
    #[serde(default)]
    pub question_workflow_url: Option<String>,
    #[serde(default)]
    pub correction_workflow_url: Option<String>,
}

impl SettingsRow {
    pub fn new(user_id: &str, settings: &Settings) -> Self {
        Self {
            user_id: user_id.to_owned(),
            dark_mode: settings.dark_mode,
            zhipu_api_key: settings.zhipu_api_key.clone(),
            zhipu_model: settings.zhipu_model.clone(),
            dify_api_key: settings.dify_api_key.clone(),
            question_workflow_url: settings.question_workflow_url.clone(),
            correction_workflow_url: settings.correction_workflow_url.clone(),
        }
    }
}

impl From<SettingsRow> for Settings {
    fn from(row: SettingsRow) -> Self {
        Settings {
            zhipu_api_key: row.zhipu_api_key,
            zhipu_model: row.zhipu_model,
            dify_api_key: row.dify_api_key,
            question_workflow_url: row.question_workflow_url,
            correction_workflow_url: row.correction_workflow_url,
            dark_mode: row.dark_mode,
        }
    }
}

fn clamp_count(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}

use serde::{Deserialize, Serialize};

use crate::error::StoreError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionType {
    #[serde(alias = "选择题")]
    Choice,
    #[serde(alias = "简答题")]
    ShortAnswer,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Difficulty {
    #[serde(alias = "基础")]
    Basic,
    #[serde(alias = "中等")]
    Medium,
    #[serde(alias = "进阶")]
    Advanced,
    #[serde(alias = "挑战")]
    Challenge,
}

#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum MasteryLevel {
    #[default]
    #[serde(alias = "未掌握")]
    Unmastered,
    #[serde(alias = "学习中")]
    Learning,
    #[serde(alias = "已掌握")]
    Mastered,
}

#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum QuestionCategory {
    #[default]
    Standard,
    Concept,
}

impl QuestionType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Choice => "choice",
            Self::ShortAnswer => "short-answer",
        }
    }
}

impl Difficulty {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Basic => "basic",
            Self::Medium => "medium",
            Self::Advanced => "advanced",
            Self::Challenge => "challenge",
        }
    }
}

impl MasteryLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unmastered => "unmastered",
            Self::Learning => "learning",
            Self::Mastered => "mastered",
        }
    }
}

impl QuestionCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Concept => "concept",
        }
    }
}

/// A book on the shelf. `question_count` and `mastered_count` are a display
/// cache recomputed from the book's questions; never treat them as the
/// source of truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_points: Option<Vec<String>>,
    #[serde(default)]
    pub question_count: u32,
    #[serde(default)]
    pub mastered_count: u32,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub id: String,
    pub book_id: String,
    pub question: String,
    pub answer: String,
    pub question_type: QuestionType,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub mastery_level: MasteryLevel,
    #[serde(default)]
    pub category: QuestionCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_point: Option<String>,
    #[serde(default)]
    pub practice_count: u32,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_practiced_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

impl Question {
    /// Checks the choice-question shape: a choice question needs at least two
    /// options and a `correct_index` pointing into them.
    pub fn check_shape(&self) -> Result<(), StoreError> {
        if self.question_type != QuestionType::Choice {
            return Ok(());
        }
        let options = self.options.as_deref().unwrap_or_default();
        if options.len() < 2 {
            return Err(StoreError::invalid(
                "choice question needs at least two options",
            ));
        }
        match self.correct_index {
            Some(idx) if (idx as usize) < options.len() => Ok(()),
            Some(idx) => Err(StoreError::invalid(format!(
                "correct index {idx} is out of range for {} options",
                options.len()
            ))),
            None => Err(StoreError::invalid("choice question needs a correct index")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zhipu_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zhipu_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dify_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_workflow_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction_workflow_url: Option<String>,
    #[serde(default)]
    pub dark_mode: bool,
}

impl Settings {
    pub const DEFAULT_ZHIPU_MODEL: &'static str = "glm-4-flash";

    /// Fills every unset key in `self` from `fallback`.
    pub fn or(self, fallback: &Settings) -> Settings {
        Settings {
            zhipu_api_key: self.zhipu_api_key.or_else(|| fallback.zhipu_api_key.clone()),
            zhipu_model: self.zhipu_model.or_else(|| fallback.zhipu_model.clone()),
            dify_api_key: self.dify_api_key.or_else(|| fallback.dify_api_key.clone()),
            question_workflow_url: self
                .question_workflow_url
                .or_else(|| fallback.question_workflow_url.clone()),
            correction_workflow_url: self
                .correction_workflow_url
                .or_else(|| fallback.correction_workflow_url.clone()),
            dark_mode: self.dark_mode,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            zhipu_api_key: None,
            zhipu_model: Some(Self::DEFAULT_ZHIPU_MODEL.to_owned()),
            dify_api_key: None,
            question_workflow_url: None,
            correction_workflow_url: None,
            dark_mode: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewBook {
    pub title: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_points: Option<Vec<String>>,
}

impl NewBook {
    pub fn new(title: impl Into<String>, author: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: author.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        require_text("title", &self.title)
    }

    pub(crate) fn into_book(self, id: String, created_at: i64) -> Book {
        Book {
            id,
            title: self.title,
            author: self.author,
            cover_url: self.cover_url,
            summary: self.summary,
            contents: self.contents,
            key_points: self.key_points,
            question_count: 0,
            mastered_count: 0,
            created_at,
            updated_at: None,
        }
    }
}

/// Fields a caller may change on a book. The counters are absent on purpose:
/// only the recount path writes them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contents: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_points: Option<Vec<String>>,
}

impl BookUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if let Some(title) = &self.title {
            require_text("title", title)?;
        }
        Ok(())
    }

    pub fn apply_to(&self, book: &mut Book) {
        if let Some(title) = &self.title {
            book.title = title.clone();
        }
        if let Some(author) = &self.author {
            book.author = author.clone();
        }
        if let Some(cover_url) = &self.cover_url {
            book.cover_url = Some(cover_url.clone());
        }
        if let Some(summary) = &self.summary {
            book.summary = Some(summary.clone());
        }
        if let Some(contents) = &self.contents {
            book.contents = Some(contents.clone());
        }
        if let Some(key_points) = &self.key_points {
            book.key_points = Some(key_points.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewQuestion {
    pub book_id: String,
    pub question: String,
    pub answer: String,
    pub question_type: QuestionType,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub category: QuestionCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_point: Option<String>,
}

impl NewQuestion {
    pub fn short_answer(
        book_id: impl Into<String>,
        question: impl Into<String>,
        answer: impl Into<String>,
    ) -> Self {
        Self {
            book_id: book_id.into(),
            question: question.into(),
            answer: answer.into(),
            question_type: QuestionType::ShortAnswer,
            difficulty: Difficulty::Basic,
            category: QuestionCategory::Standard,
            options: None,
            correct_index: None,
            knowledge_point: None,
        }
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        require_text("book id", &self.book_id)?;
        require_text("question", &self.question)?;
        self.clone().into_question(String::new(), 0).check_shape()
    }

    /// A new question always starts unmastered and unpracticed.
    pub(crate) fn into_question(self, id: String, created_at: i64) -> Question {
        Question {
            id,
            book_id: self.book_id,
            question: self.question,
            answer: self.answer,
            question_type: self.question_type,
            difficulty: self.difficulty,
            mastery_level: MasteryLevel::Unmastered,
            category: self.category,
            options: self.options,
            correct_index: self.correct_index,
            knowledge_point: self.knowledge_point,
            practice_count: 0,
            created_at,
            last_practiced_at: None,
            updated_at: None,
        }
    }
}

/// Fields a caller may change on a question. A question never moves to
/// another book.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_type: Option<QuestionType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<QuestionCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_index: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub knowledge_point: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mastery_level: Option<MasteryLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub practice_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_practiced_at: Option<i64>,
}

impl QuestionUpdate {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn validate(&self) -> Result<(), StoreError> {
        if let Some(question) = &self.question {
            require_text("question", question)?;
        }
        if let Some(at) = self.last_practiced_at
            && at < 0
        {
            return Err(StoreError::invalid("last practiced time must not be negative"));
        }
        Ok(())
    }

    pub fn apply_to(&self, question: &mut Question) {
        if let Some(text) = &self.question {
            question.question = text.clone();
        }
        if let Some(answer) = &self.answer {
            question.answer = answer.clone();
        }
        if let Some(question_type) = self.question_type {
            question.question_type = question_type;
        }
        if let Some(difficulty) = self.difficulty {
            question.difficulty = difficulty;
        }
        if let Some(category) = self.category {
            question.category = category;
        }
        if let Some(options) = &self.options {
            question.options = Some(options.clone());
        }
        if let Some(correct_index) = self.correct_index {
            question.correct_index = Some(correct_index);
        }
        if let Some(knowledge_point) = &self.knowledge_point {
            question.knowledge_point = Some(knowledge_point.clone());
        }
        if let Some(level) = self.mastery_level {
            question.mastery_level = level;
        }
        if let Some(count) = self.practice_count {
            question.practice_count = count;
        }
        if let Some(at) = self.last_practiced_at {
            question.last_practiced_at = Some(at);
        }
    }

    /// Applies the update to a copy of `question` and checks the result.
    pub fn merged(&self, question: &Question) -> Result<Question, StoreError> {
        self.validate()?;
        let mut merged = question.clone();
        self.apply_to(&mut merged);
        merged.check_shape()?;
        Ok(merged)
    }
}

/// A full point-in-time copy of the local data, as stored by the legacy
/// snapshot remote.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncData {
    #[serde(default)]
    pub books: Vec<Book>,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub settings: Settings,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncConflict {
    Books { local: Book, remote: Book },
    Questions { local: Question, remote: Question },
}

impl SyncConflict {
    pub fn id(&self) -> &str {
        match self {
            Self::Books { local, .. } => &local.id,
            Self::Questions { local, .. } => &local.id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncOutcome {
    pub uploaded: bool,
    pub downloaded: bool,
    pub conflicts: Vec<SyncConflict>,
}

/// Recomputes `(question_count, mastered_count)` for `book_id`.
pub fn count_questions<'a>(
    book_id: &str,
    questions: impl IntoIterator<Item = &'a Question>,
) -> (u32, u32) {
    questions
        .into_iter()
        .filter(|q| q.book_id == book_id)
        .fold((0, 0), |(total, mastered), q| {
            let mastered = mastered + u32::from(q.mastery_level == MasteryLevel::Mastered);
            (total + 1, mastered)
        })
}

fn require_text(field: &str, value: &str) -> Result<(), StoreError> {
    if value.trim().is_empty() {
        return Err(StoreError::invalid(format!("{field} must not be empty")));
    }
    Ok(())
}

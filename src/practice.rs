use rand::Rng;
use rand::seq::SliceRandom;
use serde::Serialize;

use crate::model::{MasteryLevel, Question, QuestionCategory, QuestionUpdate};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum PracticeMode {
    /// Regular questions.
    #[default]
    Standard,
    /// Concept-explanation questions.
    Concept,
    /// Questions not yet mastered, any category.
    Wrong,
}

impl PracticeMode {
    pub fn includes(self, question: &Question) -> bool {
        match self {
            Self::Standard => question.category == QuestionCategory::Standard,
            Self::Concept => question.category == QuestionCategory::Concept,
            Self::Wrong => question.mastery_level == MasteryLevel::Unmastered,
        }
    }
}

/// An ordered run through a book's questions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PracticeSession {
    pub book_id: String,
    pub mode: PracticeMode,
    pub question_ids: Vec<String>,
    pub current_index: usize,
    pub started_at: i64,
}

impl PracticeSession {
    /// Picks the questions of `book_id` that match `mode`, in random order,
    /// keeping at most `limit` of them.
    pub fn new<'a, R: Rng + ?Sized>(
        book_id: &str,
        mode: PracticeMode,
        questions: impl IntoIterator<Item = &'a Question>,
        limit: Option<usize>,
        started_at: i64,
        rng: &mut R,
    ) -> Self {
        let mut question_ids = questions
            .into_iter()
            .filter(|q| q.book_id == book_id && mode.includes(q))
            .map(|q| q.id.clone())
            .collect::<Vec<_>>();
        question_ids.shuffle(rng);
        if let Some(limit) = limit {
            question_ids.truncate(limit);
        }
        Self {
            book_id: book_id.to_owned(),
            mode,
            question_ids,
            current_index: 0,
            started_at,
        }
    }

    pub fn current(&self) -> Option<&str> {
        self.question_ids.get(self.current_index).map(String::as_str)
    }

    /// Moves to the next question and returns it.
    pub fn advance(&mut self) -> Option<&str> {
        if self.current_index < self.question_ids.len() {
            self.current_index += 1;
        }
        self.current()
    }

    pub fn is_completed(&self) -> bool {
        self.current_index >= self.question_ids.len()
    }
}

/// Update recording one graded attempt.
pub fn grade(question: &Question, level: MasteryLevel, now: i64) -> QuestionUpdate {
    QuestionUpdate {
        mastery_level: Some(level),
        practice_count: Some(question.practice_count.saturating_add(1)),
        last_practiced_at: Some(now),
        ..QuestionUpdate::default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MasteryStats {
    pub total: u32,
    pub mastered: u32,
    pub learning: u32,
    pub unmastered: u32,
}

impl MasteryStats {
    pub fn from_questions<'a>(questions: impl IntoIterator<Item = &'a Question>) -> Self {
        questions
            .into_iter()
            .fold(Self::default(), |mut stats, q| {
                stats.total += 1;
                match q.mastery_level {
                    MasteryLevel::Mastered => stats.mastered += 1,
                    MasteryLevel::Learning => stats.learning += 1,
                    MasteryLevel::Unmastered => stats.unmastered += 1,
                }
                stats
            })
    }

    /// Whole-number mastered percentage.
    pub fn progress_percent(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        (self.mastered * 100 + self.total / 2) / self.total
    }
}

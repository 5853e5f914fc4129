use std::fmt;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::model::{Difficulty, MasteryLevel, QuestionCategory, QuestionType};
use crate::practice::PracticeMode;
use crate::sync::Resolution;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    /// Directory holding local data and the session (overrides READRECALL_DATA_DIR).
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Sign in to the cloud backend.
    Login(CredentialsArgs),
    /// Create a cloud account.
    Signup(CredentialsArgs),
    /// Sign out and return to local storage.
    Logout,
    /// Show which backend is active.
    Status,
    Book {
        #[command(subcommand)]
        command: BookCommand,
    },
    Question {
        #[command(subcommand)]
        command: QuestionCommand,
    },
    Practice {
        #[command(subcommand)]
        command: PracticeCommand,
    },
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
    /// Snapshot sync through a GitHub gist.
    Sync {
        #[command(subcommand)]
        command: SyncCommand,
    },
    /// Delete all local books, questions and settings.
    Reset(ResetArgs),
}

#[derive(Args)]
pub struct CredentialsArgs {
    #[arg(long)]
    pub email: String,

    /// Falls back to the first line of stdin when neither the flag nor
    /// READRECALL_PASSWORD is set.
    #[arg(long, env = "READRECALL_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

impl fmt::Debug for CredentialsArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsArgs")
            .field("email", &self.email)
            .field("password", &redacted(&self.password))
            .finish()
    }
}

fn redacted(secret: &Option<String>) -> Option<&'static str> {
    secret.as_ref().map(|_| "***")
}

#[derive(Debug, Subcommand)]
pub enum BookCommand {
    Add(BookAddArgs),
    List,
    Show(IdArg),
    Update(BookUpdateArgs),
    Delete(IdArg),
    /// Print the book list whenever it changes (cloud only).
    Watch(WatchArgs),
}

#[derive(Debug, Args)]
pub struct IdArg {
    pub id: String,
}

#[derive(Debug, Args)]
pub struct BookAddArgs {
    #[arg(long)]
    pub title: String,

    #[arg(long, default_value = "")]
    pub author: String,

    #[arg(long)]
    pub cover_url: Option<String>,

    #[arg(long)]
    pub summary: Option<String>,

    #[arg(long)]
    pub contents: Option<String>,

    /// Repeat for each key point.
    #[arg(long = "key-point")]
    pub key_points: Vec<String>,
}

#[derive(Debug, Args)]
pub struct BookUpdateArgs {
    pub id: String,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub author: Option<String>,

    #[arg(long)]
    pub cover_url: Option<String>,

    #[arg(long)]
    pub summary: Option<String>,

    #[arg(long)]
    pub contents: Option<String>,

    /// Replaces all key points. Repeat for each key point.
    #[arg(long = "key-point")]
    pub key_points: Vec<String>,
}

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Poll interval (overrides READRECALL_WATCH_INTERVAL_SECS).
    #[arg(long)]
    pub interval_secs: Option<u64>,

    /// Stop after this many updates.
    #[arg(long)]
    pub max_updates: Option<usize>,
}

#[derive(Debug, Subcommand)]
pub enum QuestionCommand {
    Add(QuestionAddArgs),
    List(BookIdArg),
    Show(IdArg),
    Update(QuestionUpdateArgs),
    Delete(IdArg),
}

#[derive(Debug, Args)]
pub struct BookIdArg {
    #[arg(long = "book")]
    pub book_id: String,
}

#[derive(Debug, Args)]
pub struct QuestionAddArgs {
    #[arg(long = "book")]
    pub book_id: String,

    #[arg(long)]
    pub question: String,

    #[arg(long, default_value = "")]
    pub answer: String,

    #[arg(long = "type", value_enum, default_value_t = QuestionType::ShortAnswer)]
    pub question_type: QuestionType,

    #[arg(long, value_enum, default_value_t = Difficulty::Basic)]
    pub difficulty: Difficulty,

    #[arg(long, value_enum, default_value_t = QuestionCategory::Standard)]
    pub category: QuestionCategory,

    /// Choice option. Repeat for each option.
    #[arg(long = "option")]
    pub options: Vec<String>,

    /// Zero-based index of the correct option.
    #[arg(long)]
    pub correct_index: Option<u32>,

    #[arg(long)]
    pub knowledge_point: Option<String>,
}

#[derive(Debug, Args)]
pub struct QuestionUpdateArgs {
    pub id: String,

    #[arg(long)]
    pub question: Option<String>,

    #[arg(long)]
    pub answer: Option<String>,

    #[arg(long = "type", value_enum)]
    pub question_type: Option<QuestionType>,

    #[arg(long, value_enum)]
    pub difficulty: Option<Difficulty>,

    #[arg(long, value_enum)]
    pub category: Option<QuestionCategory>,

    /// Replaces all options. Repeat for each option.
    #[arg(long = "option")]
    pub options: Vec<String>,

    #[arg(long)]
    pub correct_index: Option<u32>,

    #[arg(long)]
    pub knowledge_point: Option<String>,

    #[arg(long, value_enum)]
    pub mastery: Option<MasteryLevel>,
}

#[derive(Debug, Subcommand)]
pub enum PracticeCommand {
    /// Print the question order for a practice session.
    Plan(PlanArgs),
    /// Record the result of one attempt.
    Grade(GradeArgs),
    /// Mastery counts for a book.
    Stats(BookIdArg),
}

#[derive(Debug, Args)]
pub struct PlanArgs {
    #[arg(long = "book")]
    pub book_id: String,

    #[arg(long, value_enum, default_value_t = PracticeMode::Standard)]
    pub mode: PracticeMode,

    #[arg(long)]
    pub limit: Option<usize>,
}

#[derive(Debug, Args)]
pub struct GradeArgs {
    pub id: String,

    #[arg(long, value_enum)]
    pub level: MasteryLevel,
}

#[derive(Debug, Subcommand)]
pub enum SettingsCommand {
    Show,
    Set(SettingsSetArgs),
}

#[derive(Args)]
pub struct SettingsSetArgs {
    #[arg(long)]
    pub zhipu_api_key: Option<String>,

    #[arg(long)]
    pub zhipu_model: Option<String>,

    #[arg(long)]
    pub dify_api_key: Option<String>,

    #[arg(long)]
    pub question_workflow_url: Option<String>,

    #[arg(long)]
    pub correction_workflow_url: Option<String>,

    #[arg(long)]
    pub dark_mode: Option<bool>,
}

impl fmt::Debug for SettingsSetArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsSetArgs")
            .field("zhipu_api_key", &redacted(&self.zhipu_api_key))
            .field("zhipu_model", &self.zhipu_model)
            .field("dify_api_key", &redacted(&self.dify_api_key))
            .field("question_workflow_url", &self.question_workflow_url)
            .field("correction_workflow_url", &self.correction_workflow_url)
            .field("dark_mode", &self.dark_mode)
            .finish()
    }
}

#[derive(Debug, Subcommand)]
pub enum SyncCommand {
    /// Compare with the remote snapshot and upload or download.
    Run,
    /// Overwrite the remote snapshot with local data.
    Upload,
    /// Overwrite local data with the remote snapshot.
    Download,
    /// Settle conflicts reported by `sync run`.
    Resolve(ResolveArgs),
}

#[derive(Debug, Args)]
pub struct ResolveArgs {
    #[arg(long = "use", value_enum)]
    pub resolution: Resolution,
}

#[derive(Debug, Args)]
pub struct ResetArgs {
    /// Required; the data cannot be recovered.
    #[arg(long)]
    pub yes: bool,
}

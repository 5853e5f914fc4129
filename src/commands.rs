use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use crate::adapter::{FsAdapter, StorageAdapter};
use crate::blob::GistRemote;
use crate::cli::{
    BookAddArgs, BookCommand, BookUpdateArgs, Cli, Command, CredentialsArgs, PracticeCommand,
    QuestionAddArgs, QuestionCommand, QuestionUpdateArgs, SettingsCommand, SettingsSetArgs,
    SyncCommand, WatchArgs,
};
use crate::cloud::auth::{self, SignUp, SupabaseAuth};
use crate::config::{Config, SupabaseConfig};
use crate::library::Library;
use crate::local::LocalStore;
use crate::model::{Book, BookUpdate, NewBook, NewQuestion, Question, QuestionUpdate};
use crate::sync::SyncService;

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::from_env().context("load config")?;
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    let adapter: Arc<dyn StorageAdapter> = Arc::new(FsAdapter::new(config.data_dir.clone()));
    tracing::debug!(data_dir = %config.data_dir.display(), "opened data dir");

    match cli.command {
        Command::Login(args) => login(&config, &adapter, args).await,
        Command::Signup(args) => signup(&config, &adapter, args).await,
        Command::Logout => logout(&config, &adapter).await,
        Command::Status => status(&config, adapter).await,
        Command::Book { command } => {
            let library = Library::open(&config, adapter).await?;
            book(&config, &library, command).await
        }
        Command::Question { command } => {
            let library = Library::open(&config, adapter).await?;
            question(&library, command).await
        }
        Command::Practice { command } => {
            let library = Library::open(&config, adapter).await?;
            practice(&library, command).await
        }
        Command::Settings { command } => {
            let library = Library::open(&config, adapter).await?;
            settings(&library, command).await
        }
        Command::Sync { command } => sync(&config, adapter, command).await,
        Command::Reset(args) => {
            if !args.yes {
                anyhow::bail!("refusing to delete local data without --yes");
            }
            LocalStore::new(adapter)
                .clear_all()
                .await
                .context("clear local data")?;
            println!("local data cleared");
            Ok(())
        }
    }
}

fn supabase(config: &Config) -> anyhow::Result<&SupabaseConfig> {
    config.supabase.as_ref().context(
        "cloud sign-in needs READRECALL_SUPABASE_URL and READRECALL_SUPABASE_ANON_KEY",
    )
}

/// The password from `--password` / READRECALL_PASSWORD, else one line of
/// stdin.
fn password(args: &CredentialsArgs) -> anyhow::Result<String> {
    if let Some(password) = &args.password {
        return Ok(password.clone());
    }
    let mut line = String::new();
    std::io::stdin()
        .read_line(&mut line)
        .context("read password from stdin")?;
    let password = line.trim_end_matches(['\r', '\n']);
    if password.is_empty() {
        anyhow::bail!("password required: use --password, READRECALL_PASSWORD or stdin");
    }
    Ok(password.to_owned())
}

async fn login(
    config: &Config,
    adapter: &Arc<dyn StorageAdapter>,
    args: CredentialsArgs,
) -> anyhow::Result<()> {
    let supabase = supabase(config)?;
    let client = SupabaseAuth::new(&supabase.url, supabase.anon_key.clone());
    let password = password(&args)?;
    let session = client.sign_in(&args.email, &password).await?;
    auth::save_session(adapter, &session).await?;
    let who = session.user.email.as_deref().unwrap_or(&session.user.id);
    println!("signed in as {who}");
    Ok(())
}

async fn signup(
    config: &Config,
    adapter: &Arc<dyn StorageAdapter>,
    args: CredentialsArgs,
) -> anyhow::Result<()> {
    let supabase = supabase(config)?;
    let client = SupabaseAuth::new(&supabase.url, supabase.anon_key.clone());
    let password = password(&args)?;
    match client.sign_up(&args.email, &password).await? {
        SignUp::SignedIn(session) => {
            auth::save_session(adapter, &session).await?;
            println!("signed up and signed in as {}", args.email);
        }
        SignUp::ConfirmationRequired(user) => {
            println!("account {} created; confirm the e-mail, then run `login`", user.id);
        }
    }
    Ok(())
}

async fn logout(config: &Config, adapter: &Arc<dyn StorageAdapter>) -> anyhow::Result<()> {
    let Some(session) = auth::load_session(adapter).await? else {
        println!("not signed in");
        return Ok(());
    };
    if let Some(supabase) = &config.supabase {
        let client = SupabaseAuth::new(&supabase.url, supabase.anon_key.clone());
        if let Err(err) = client.sign_out(&session).await {
            tracing::warn!(?err, "remote sign-out failed; clearing local session anyway");
        }
    }
    auth::clear_session(adapter).await?;
    println!("signed out");
    Ok(())
}

async fn status(config: &Config, adapter: Arc<dyn StorageAdapter>) -> anyhow::Result<()> {
    let session = auth::load_session(&adapter).await?;
    let gist = GistRemote::new(&config.github_api_url, config.github_token.clone(), adapter)?;
    let backend = if session.is_some() { "cloud" } else { "local" };
    let value = serde_json::json!({
        "backend": backend,
        "userId": session.as_ref().map(|s| s.user.id.as_str()),
        "email": session.as_ref().and_then(|s| s.user.email.as_deref()),
        "dataDir": config.data_dir.display().to_string(),
        "cloudConfigured": config.supabase.is_some(),
        "gistId": gist.gist_id().await?,
        "lastSync": gist.last_sync_time().await?,
    });
    print_json(&value)
}

async fn book(config: &Config, library: &Library, command: BookCommand) -> anyhow::Result<()> {
    match command {
        BookCommand::Add(args) => {
            let book = library.add_book(new_book(args)).await?;
            println!("{}", book.id);
        }
        BookCommand::List => {
            for book in library.get_books().await? {
                print_book_line(&book);
            }
        }
        BookCommand::Show(args) => {
            let Some(book) = library.get_book(&args.id).await? else {
                anyhow::bail!("book not found: {}", args.id);
            };
            print_json(&book)?;
        }
        BookCommand::Update(args) => {
            let id = args.id.clone();
            let Some(book) = library.update_book(&id, &book_update(args)).await? else {
                anyhow::bail!("book not found: {id}");
            };
            print_json(&book)?;
        }
        BookCommand::Delete(args) => {
            if !library.delete_book(&args.id).await? {
                anyhow::bail!("book not found: {}", args.id);
            }
            println!("deleted {}", args.id);
        }
        BookCommand::Watch(args) => watch(config, library, args).await?,
    }
    Ok(())
}

async fn watch(config: &Config, library: &Library, args: WatchArgs) -> anyhow::Result<()> {
    let interval = args
        .interval_secs
        .map(Duration::from_secs)
        .unwrap_or(config.watch_interval);
    let mut subscription = library.watch_books(interval).await?;
    print_book_list(&subscription.current());

    let mut updates = 0usize;
    while args.max_updates.is_none_or(|max| updates < max) {
        tokio::select! {
            books = subscription.changed() => {
                print_book_list(&books?);
                updates += 1;
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    subscription.unsubscribe();
    Ok(())
}

async fn question(library: &Library, command: QuestionCommand) -> anyhow::Result<()> {
    match command {
        QuestionCommand::Add(args) => {
            let question = library.add_question(new_question(args)).await?;
            println!("{}", question.id);
        }
        QuestionCommand::List(args) => {
            for question in library.get_questions_by_book(&args.book_id).await? {
                print_question_line(&question);
            }
        }
        QuestionCommand::Show(args) => {
            let Some(question) = library.get_question(&args.id).await? else {
                anyhow::bail!("question not found: {}", args.id);
            };
            print_json(&question)?;
        }
        QuestionCommand::Update(args) => {
            let id = args.id.clone();
            let Some(question) = library.update_question(&id, &question_update(args)).await? else {
                anyhow::bail!("question not found: {id}");
            };
            print_json(&question)?;
        }
        QuestionCommand::Delete(args) => {
            if !library.delete_question(&args.id).await? {
                anyhow::bail!("question not found: {}", args.id);
            }
            println!("deleted {}", args.id);
        }
    }
    Ok(())
}

async fn practice(library: &Library, command: PracticeCommand) -> anyhow::Result<()> {
    match command {
        PracticeCommand::Plan(args) => {
            let session = library
                .plan_practice(&args.book_id, args.mode, args.limit)
                .await?;
            for id in &session.question_ids {
                println!("{id}");
            }
        }
        PracticeCommand::Grade(args) => {
            let Some(question) = library.grade_question(&args.id, args.level).await? else {
                anyhow::bail!("question not found: {}", args.id);
            };
            print_question_line(&question);
        }
        PracticeCommand::Stats(args) => {
            let stats = library.mastery_stats(&args.book_id).await?;
            let mut value = serde_json::to_value(stats).context("serialize stats")?;
            value["progressPercent"] = stats.progress_percent().into();
            print_json(&value)?;
        }
    }
    Ok(())
}

async fn settings(library: &Library, command: SettingsCommand) -> anyhow::Result<()> {
    match command {
        SettingsCommand::Show => print_json(&library.get_settings().await?),
        SettingsCommand::Set(args) => {
            let mut settings = library.get_settings().await?;
            apply_settings(&mut settings, args);
            let saved = library.save_settings(&settings).await?;
            print_json(&saved)
        }
    }
}

async fn sync(
    config: &Config,
    adapter: Arc<dyn StorageAdapter>,
    command: SyncCommand,
) -> anyhow::Result<()> {
    let remote = GistRemote::new(
        &config.github_api_url,
        config.github_token.clone(),
        Arc::clone(&adapter),
    )?;
    let service = SyncService::new(LocalStore::new(adapter), Arc::new(remote));

    match command {
        SyncCommand::Run => {
            let outcome = service.sync().await?;
            print_json(&outcome)?;
        }
        SyncCommand::Upload => {
            service.upload().await?;
            println!("uploaded");
        }
        SyncCommand::Download => {
            service.download().await?;
            println!("downloaded");
        }
        SyncCommand::Resolve(args) => {
            let changed = service.resolve_conflicts(args.resolution).await?;
            println!("{}", if changed { "local data replaced" } else { "local data kept" });
        }
    }
    Ok(())
}

fn new_book(args: BookAddArgs) -> NewBook {
    NewBook {
        title: args.title,
        author: args.author,
        cover_url: args.cover_url,
        summary: args.summary,
        contents: args.contents,
        key_points: non_empty(args.key_points),
    }
}

fn book_update(args: BookUpdateArgs) -> BookUpdate {
    BookUpdate {
        title: args.title,
        author: args.author,
        cover_url: args.cover_url,
        summary: args.summary,
        contents: args.contents,
        key_points: non_empty(args.key_points),
    }
}

fn new_question(args: QuestionAddArgs) -> NewQuestion {
    NewQuestion {
        book_id: args.book_id,
        question: args.question,
        answer: args.answer,
        question_type: args.question_type,
        difficulty: args.difficulty,
        category: args.category,
        options: non_empty(args.options),
        correct_index: args.correct_index,
        knowledge_point: args.knowledge_point,
    }
}

fn question_update(args: QuestionUpdateArgs) -> QuestionUpdate {
    QuestionUpdate {
        question: args.question,
        answer: args.answer,
        question_type: args.question_type,
        difficulty: args.difficulty,
        category: args.category,
        options: non_empty(args.options),
        correct_index: args.correct_index,
        knowledge_point: args.knowledge_point,
        mastery_level: args.mastery,
        ..QuestionUpdate::default()
    }
}

fn apply_settings(settings: &mut crate::model::Settings, args: SettingsSetArgs) {
    if let Some(v) = args.zhipu_api_key {
        settings.zhipu_api_key = Some(v);
    }
    if let Some(v) = args.zhipu_model {
        settings.zhipu_model = Some(v);
    }
    if let Some(v) = args.dify_api_key {
        settings.dify_api_key = Some(v);
    }
    if let Some(v) = args.question_workflow_url {
        settings.question_workflow_url = Some(v);
    }
    if let Some(v) = args.correction_workflow_url {
        settings.correction_workflow_url = Some(v);
    }
    if let Some(v) = args.dark_mode {
        settings.dark_mode = v;
    }
}

fn non_empty(values: Vec<String>) -> Option<Vec<String>> {
    (!values.is_empty()).then_some(values)
}

fn print_book_line(book: &Book) {
    println!(
        "{}\t{}\t{}\t{}/{}",
        book.id, book.title, book.author, book.mastered_count, book.question_count
    );
}

fn print_book_list(books: &[Book]) {
    println!("-- {} books", books.len());
    for book in books {
        print_book_line(book);
    }
}

fn print_question_line(question: &Question) {
    println!(
        "{}\t{}\t{}\t{}\t{}",
        question.id,
        question.question_type.as_str(),
        question.difficulty.as_str(),
        question.mastery_level.as_str(),
        question.question
    );
}

fn print_json<T: serde::Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("serialize output")?;
    println!("{json}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Settings;

    #[test]
    fn settings_set_only_touches_given_keys() {
        let mut settings = Settings {
            dify_api_key: Some("keep".into()),
            ..Settings::default()
        };
        apply_settings(
            &mut settings,
            SettingsSetArgs {
                zhipu_api_key: Some("zk".into()),
                zhipu_model: None,
                dify_api_key: None,
                question_workflow_url: None,
                correction_workflow_url: None,
                dark_mode: Some(true),
            },
        );
        assert_eq!(settings.zhipu_api_key.as_deref(), Some("zk"));
        assert_eq!(settings.zhipu_model.as_deref(), Some("glm-4-flash"));
        assert_eq!(settings.dify_api_key.as_deref(), Some("keep"));
        assert!(settings.dark_mode);
    }

    #[test]
    fn empty_repeatable_flags_mean_unset() {
        assert_eq!(non_empty(Vec::new()), None);
        assert_eq!(non_empty(vec!["a".into()]), Some(vec!["a".to_owned()]));
    }
}

mod supabase_stub;

use std::time::Duration;

use readrecall::StoreError;
use readrecall::cloud::CloudRepository;
use readrecall::cloud::auth::{SignUp, SupabaseAuth};
use readrecall::cloud::rest::RestClient;
use readrecall::error::store_error;
use readrecall::model::{
    BookUpdate, MasteryLevel, NewBook, NewQuestion, QuestionType, QuestionUpdate, Settings,
};
use supabase_stub::{ACCESS_TOKEN, ANON_KEY, EMAIL, PASSWORD, SupabaseStub, USER_ID};

fn repo(stub: &SupabaseStub) -> CloudRepository {
    let rest = RestClient::new(&stub.base_url, ANON_KEY).with_access_token(ACCESS_TOKEN);
    CloudRepository::with_user(rest, USER_ID)
}

fn mastered() -> QuestionUpdate {
    QuestionUpdate {
        mastery_level: Some(MasteryLevel::Mastered),
        ..QuestionUpdate::default()
    }
}

#[tokio::test]
async fn sign_in_returns_session_and_bad_password_is_remote_error() -> anyhow::Result<()> {
    let stub = SupabaseStub::spawn();
    let auth = SupabaseAuth::new(&stub.base_url, ANON_KEY);

    let session = auth.sign_in(EMAIL, PASSWORD).await?;
    assert_eq!(session.access_token, ACCESS_TOKEN);
    assert_eq!(session.user.id, USER_ID);
    assert!(session.expires_at.is_some());
    auth.sign_out(&session).await?;

    let err = auth.sign_in(EMAIL, "wrong").await.unwrap_err();
    assert!(matches!(store_error(&err), Some(StoreError::Remote(_))));
    assert!(format!("{err:#}").contains("Invalid login credentials"));

    match auth.sign_up("new@example.com", "pw").await? {
        SignUp::ConfirmationRequired(user) => assert_eq!(user.id, "user-2"),
        SignUp::SignedIn(_) => panic!("stub requires confirmation"),
    }
    Ok(())
}

#[tokio::test]
async fn created_rows_come_back_as_persisted() -> anyhow::Result<()> {
    let stub = SupabaseStub::spawn();
    let repo = repo(&stub);

    let book = repo
        .create_book(NewBook {
            key_points: Some(vec!["loss aversion".into()]),
            ..NewBook::new("Thinking, Fast and Slow", "Kahneman")
        })
        .await?;
    assert!(book.id.starts_with("book-"));
    assert_eq!(book.created_at, 1_700_000_000_001);
    assert_eq!(book.key_points.as_deref(), Some(&["loss aversion".to_owned()][..]));

    let rows = stub.rows("books");
    assert_eq!(rows[0]["user_id"], USER_ID);
    assert!(rows[0].get("cover_url").is_none());

    let updated = repo
        .update_book(
            &book.id,
            &BookUpdate {
                summary: Some("Two systems".into()),
                ..BookUpdate::default()
            },
        )
        .await?
        .expect("book exists");
    assert_eq!(updated.summary.as_deref(), Some("Two systems"));
    assert_eq!(updated.title, book.title);
    assert!(updated.updated_at.is_some());

    assert_eq!(repo.get_all_books().await?, vec![updated]);
    Ok(())
}

#[tokio::test]
async fn question_mutations_recount_the_book() -> anyhow::Result<()> {
    let stub = SupabaseStub::spawn();
    let repo = repo(&stub);
    let book = repo.create_book(NewBook::new("Dune", "Herbert")).await?;

    let q1 = repo
        .create_question(NewQuestion::short_answer(&book.id, "Who?", "Paul"))
        .await?;
    let q2 = repo
        .create_question(NewQuestion {
            question_type: QuestionType::Choice,
            options: Some(vec!["Arrakis".into(), "Caladan".into()]),
            correct_index: Some(0),
            ..NewQuestion::short_answer(&book.id, "Where?", "Arrakis")
        })
        .await?;
    let stored = repo.get_book(&book.id).await?.expect("book exists");
    assert_eq!((stored.question_count, stored.mastered_count), (2, 0));

    let updated = repo
        .update_question(&q1.id, &mastered())
        .await?
        .expect("question exists");
    assert_eq!(updated.mastery_level, MasteryLevel::Mastered);
    let stored = repo.get_book(&book.id).await?.expect("book exists");
    assert_eq!((stored.question_count, stored.mastered_count), (2, 1));

    assert!(repo.delete_question(&q1.id).await?);
    let stored = repo.get_book(&book.id).await?.expect("book exists");
    assert_eq!((stored.question_count, stored.mastered_count), (1, 0));

    let remaining = repo.get_questions_by_book(&book.id).await?;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id, q2.id);
    assert_eq!(remaining[0].correct_index, Some(0));
    Ok(())
}

#[tokio::test]
async fn missing_ids_and_invalid_input() -> anyhow::Result<()> {
    let stub = SupabaseStub::spawn();
    let repo = repo(&stub);

    assert_eq!(repo.update_question("nope", &mastered()).await?, None);
    assert!(!repo.delete_question("nope").await?);
    assert!(!repo.delete_book("nope").await?);
    let update = BookUpdate {
        title: Some("T".into()),
        ..BookUpdate::default()
    };
    assert_eq!(repo.update_book("nope", &update).await?, None);

    let err = repo
        .create_question(NewQuestion::short_answer("nope", "Q", "A"))
        .await
        .unwrap_err();
    assert!(matches!(store_error(&err), Some(StoreError::Invalid(_))));
    assert!(stub.rows("questions").is_empty());
    Ok(())
}

#[tokio::test]
async fn delete_book_removes_its_questions() -> anyhow::Result<()> {
    let stub = SupabaseStub::spawn();
    let repo = repo(&stub);
    let book = repo.create_book(NewBook::new("A", "x")).await?;
    let other = repo.create_book(NewBook::new("B", "y")).await?;
    for text in ["Q1", "Q2"] {
        repo.create_question(NewQuestion::short_answer(&book.id, text, "A"))
            .await?;
    }
    repo.create_question(NewQuestion::short_answer(&other.id, "Q3", "A"))
        .await?;

    assert!(repo.delete_book(&book.id).await?);
    assert!(repo.get_questions_by_book(&book.id).await?.is_empty());
    assert_eq!(stub.rows("questions").len(), 1);
    assert_eq!(repo.get_all_books().await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn settings_row_is_created_on_first_read() -> anyhow::Result<()> {
    let stub = SupabaseStub::spawn();
    let repo = repo(&stub);

    assert_eq!(repo.get_user_settings().await?, Settings::default());
    assert_eq!(stub.rows("user_settings").len(), 1);

    let saved = repo
        .save_user_settings(&Settings {
            dark_mode: true,
            zhipu_api_key: Some("zk".into()),
            ..Settings::default()
        })
        .await?;
    assert!(saved.dark_mode);
    assert_eq!(repo.get_user_settings().await?, saved);
    assert_eq!(stub.rows("user_settings").len(), 1);
    Ok(())
}

#[tokio::test]
async fn expired_token_surfaces_as_remote_error() -> anyhow::Result<()> {
    let stub = SupabaseStub::spawn();
    let rest = RestClient::new(&stub.base_url, ANON_KEY).with_access_token("stale");
    let repo = CloudRepository::with_user(rest, USER_ID);
    let err = repo.get_all_books().await.unwrap_err();
    assert!(matches!(store_error(&err), Some(StoreError::Remote(_))));
    assert!(format!("{err:#}").contains("JWT expired"));
    Ok(())
}

#[tokio::test]
async fn subscription_sees_local_and_remote_changes() -> anyhow::Result<()> {
    let stub = SupabaseStub::spawn();
    let repo = repo(&stub);
    let mut subscription = repo.subscribe_books(Duration::from_millis(50)).await?;
    assert!(subscription.current().is_empty());

    let book = repo.create_book(NewBook::new("Local", "me")).await?;
    let books = tokio::time::timeout(Duration::from_secs(5), subscription.changed()).await??;
    assert_eq!(books.len(), 1);
    assert_eq!(books[0].id, book.id);

    stub.insert_row(
        "books",
        serde_json::json!({
            "user_id": USER_ID,
            "title": "From another device",
            "author": "",
            "question_count": 0,
            "mastered_count": 0
        }),
    );
    let books = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let books = subscription.changed().await?;
            if books.len() == 2 {
                return anyhow::Ok(books);
            }
        }
    })
    .await??;
    assert_eq!(books[0].title, "From another device");

    subscription.unsubscribe();
    Ok(())
}

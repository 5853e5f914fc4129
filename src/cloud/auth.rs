use std::sync::Arc;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::adapter::StorageAdapter;
use crate::error::StoreError;

pub const SESSION_KEY: &str = "readrecall_session";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub user: AuthUser,
    /// Epoch seconds.
    #[serde(default)]
    pub expires_at: Option<i64>,
}

impl Session {
    pub fn is_expired(&self, now_secs: i64) -> bool {
        self.expires_at.is_some_and(|at| at <= now_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignUp {
    SignedIn(Session),
    /// The project requires e-mail confirmation before the first sign-in.
    ConfirmationRequired(AuthUser),
}

/// Supabase GoTrue endpoints used by the app: password sign-in, sign-up and
/// sign-out.
#[derive(Debug, Clone)]
pub struct SupabaseAuth {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl From<TokenResponse> for Session {
    fn from(resp: TokenResponse) -> Self {
        let expires_at = resp.expires_at.or_else(|| {
            resp.expires_in
                .map(|secs| chrono::Utc::now().timestamp() + secs)
        });
        Session {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
            user: resp.user,
            expires_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

impl SupabaseAuth {
    pub fn new(supabase_url: &str, anon_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: supabase_url.trim_end_matches('/').to_owned(),
            anon_key: anon_key.into(),
        }
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> anyhow::Result<Session> {
        let url = format!("{}/auth/v1/token?grant_type=password", self.base_url);
        let value = self
            .post_json(&url, &Credentials { email, password }, None)
            .await
            .context("sign in")?;
        let token: TokenResponse =
            serde_json::from_value(value).context("parse sign-in response")?;
        tracing::info!(user_id = %token.user.id, "signed in");
        Ok(token.into())
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> anyhow::Result<SignUp> {
        let url = format!("{}/auth/v1/signup", self.base_url);
        let value = self
            .post_json(&url, &Credentials { email, password }, None)
            .await
            .context("sign up")?;

        if value.get("access_token").is_some() {
            let token: TokenResponse =
                serde_json::from_value(value).context("parse sign-up session")?;
            return Ok(SignUp::SignedIn(token.into()));
        }
        let user_value = value.get("user").cloned().unwrap_or(value);
        let user: AuthUser = serde_json::from_value(user_value).context("parse sign-up user")?;
        Ok(SignUp::ConfirmationRequired(user))
    }

    pub async fn sign_out(&self, session: &Session) -> anyhow::Result<()> {
        let url = format!("{}/auth/v1/logout", self.base_url);
        self.post_json(&url, &serde_json::json!({}), Some(&session.access_token))
            .await
            .context("sign out")?;
        tracing::info!(user_id = %session.user.id, "signed out");
        Ok(())
    }

    async fn post_json<B: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &B,
        bearer: Option<&str>,
    ) -> anyhow::Result<serde_json::Value> {
        let resp = self
            .http
            .post(url)
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer.unwrap_or(&self.anon_key))
            .json(body)
            .send()
            .await
            .map_err(|err| StoreError::remote(format!("POST {url}: {err}")))?;

        let status = resp.status();
        let raw = resp
            .text()
            .await
            .map_err(|err| StoreError::remote(format!("POST {url}: read body: {err}")))?;
        if !status.is_success() {
            let message = parse_auth_error(&raw).unwrap_or(raw);
            return Err(StoreError::remote(format!("auth error ({status}): {message}")).into());
        }
        if raw.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&raw).context("parse auth response")
    }
}

fn parse_auth_error(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    ["error_description", "msg", "message", "error"]
        .iter()
        .find_map(|key| value.get(*key)?.as_str().map(str::to_owned))
}

/// Reads the persisted session. An unreadable session counts as signed out.
pub async fn load_session(adapter: &Arc<dyn StorageAdapter>) -> anyhow::Result<Option<Session>> {
    let Some(raw) = adapter.get(SESSION_KEY).await.context("read session")? else {
        return Ok(None);
    };
    match serde_json::from_str(&raw) {
        Ok(session) => Ok(Some(session)),
        Err(err) => {
            tracing::warn!(%err, "stored session is not valid json; treating as signed out");
            Ok(None)
        }
    }
}

pub async fn save_session(
    adapter: &Arc<dyn StorageAdapter>,
    session: &Session,
) -> anyhow::Result<()> {
    let json = serde_json::to_string(session).context("serialize session")?;
    adapter.set(SESSION_KEY, &json).await.context("write session")
}

pub async fn clear_session(adapter: &Arc<dyn StorageAdapter>) -> anyhow::Result<()> {
    adapter.remove(SESSION_KEY).await.context("remove session")
}

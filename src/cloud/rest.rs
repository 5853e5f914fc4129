use anyhow::Context as _;
use reqwest::{Method, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;

/// Minimal PostgREST client for the Supabase REST endpoint.
///
/// Every call returns the affected rows (`Prefer: return=representation`), so
/// inserts and updates hand back exactly what the server persisted.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
    access_token: Option<String>,
}

impl RestClient {
    pub fn new(supabase_url: &str, anon_key: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: supabase_url.trim_end_matches('/').to_owned(),
            anon_key: anon_key.into(),
            access_token: None,
        }
    }

    pub fn with_access_token(mut self, access_token: impl Into<String>) -> Self {
        self.access_token = Some(access_token.into());
        self
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base_url)
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        self.http
            .request(method, self.table_url(table))
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
            .header("Prefer", "return=representation")
    }

    pub async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        columns: &str,
        filters: &[(&str, String)],
    ) -> anyhow::Result<Vec<T>> {
        let req = self
            .request(Method::GET, table)
            .query(&[("select", columns)])
            .query(filters);
        self.execute("select", table, req).await
    }

    pub async fn insert<B, T>(&self, table: &str, body: &B) -> anyhow::Result<Vec<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let req = self.request(Method::POST, table).json(body);
        self.execute("insert", table, req).await
    }

    pub async fn update<B, T>(
        &self,
        table: &str,
        filters: &[(&str, String)],
        body: &B,
    ) -> anyhow::Result<Vec<T>>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let req = self.request(Method::PATCH, table).query(filters).json(body);
        self.execute("update", table, req).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        table: &str,
        filters: &[(&str, String)],
    ) -> anyhow::Result<Vec<T>> {
        let req = self.request(Method::DELETE, table).query(filters);
        self.execute("delete", table, req).await
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        op: &str,
        table: &str,
        req: RequestBuilder,
    ) -> anyhow::Result<Vec<T>> {
        tracing::debug!(op, table, "postgrest request");
        let resp = req
            .send()
            .await
            .map_err(|err| StoreError::remote(format!("{op} {table}: {err}")))?;

        let status = resp.status();
        let raw = resp
            .text()
            .await
            .map_err(|err| StoreError::remote(format!("{op} {table}: read body: {err}")))?;
        if !status.is_success() {
            let message = parse_error_message(&raw).unwrap_or(raw);
            return Err(
                StoreError::remote(format!("{op} {table} failed ({status}): {message}")).into(),
            );
        }

        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw).with_context(|| format!("parse {table} rows"))
    }
}

/// `column=eq.value` filter.
pub fn eq<'a>(column: &'a str, value: &str) -> (&'a str, String) {
    (column, format!("eq.{value}"))
}

pub fn order_desc(column: &str) -> (&'static str, String) {
    ("order", format!("{column}.desc"))
}

fn parse_error_message(raw_json: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(raw_json).ok()?;
    ["message", "msg", "error_description", "error"]
        .iter()
        .find_map(|key| value.get(*key)?.as_str().map(str::to_owned))
}

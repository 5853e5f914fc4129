//! In-memory stand-in for the Supabase auth and PostgREST endpoints.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Read as _;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::{Map, Value};

pub const EMAIL: &str = "reader@example.com";
pub const PASSWORD: &str = "secret";
pub const USER_ID: &str = "user-1";
pub const ACCESS_TOKEN: &str = "access-1";
pub const ANON_KEY: &str = "anon-key";

#[derive(Default)]
struct State {
    tables: BTreeMap<String, Vec<Map<String, Value>>>,
    next_id: u64,
    /// Base clock for generated `created_at` values; advances per insert so
    /// ordering by creation time is deterministic.
    clock_ms: i64,
}

impl State {
    fn tick(&mut self) -> String {
        self.clock_ms += 1;
        let at = chrono::DateTime::<chrono::Utc>::from_timestamp_millis(
            1_700_000_000_000 + self.clock_ms,
        )
        .expect("valid stub timestamp");
        at.to_rfc3339()
    }
}

pub struct SupabaseStub {
    pub base_url: String,
    state: Arc<Mutex<State>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SupabaseStub {
    pub fn spawn() -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start supabase stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");
        let state = Arc::new(Mutex::new(State::default()));

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let thread_state = Arc::clone(&state);
        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(20)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let mut body = String::new();
                if request.as_reader().read_to_string(&mut body).is_err() {
                    let bad_body = serde_json::json!({"message": "bad body"});
                    let _ = request.respond(json_response(400, &bad_body));
                    continue;
                }

                let method = request.method().clone();
                let url = url::Url::parse(&format!("http://stub{}", request.url()))
                    .expect("parse request url");
                let bearer = header(&request, "Authorization")
                    .and_then(|v| v.strip_prefix("Bearer ").map(str::to_owned));
                let apikey = header(&request, "apikey");

                let (status, value) = if apikey.as_deref() != Some(ANON_KEY) {
                    (401, serde_json::json!({"message": "No API key found in request"}))
                } else if let Some(path) = url.path().strip_prefix("/auth/v1/") {
                    handle_auth(&method, path, &body)
                } else if let Some(table) = url.path().strip_prefix("/rest/v1/") {
                    if bearer.as_deref() != Some(ACCESS_TOKEN) {
                        (401, serde_json::json!({"message": "JWT expired"}))
                    } else {
                        let mut state = thread_state.lock().expect("stub state");
                        handle_rest(&mut state, &method, table, &url, &body)
                    }
                } else {
                    (404, serde_json::json!({"message": "not found"}))
                };

                let _ = request.respond(json_response(status, &value));
            }
        });

        Self {
            base_url,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Inserts a row as another client would, bypassing the repository.
    pub fn insert_row(&self, table: &str, row: Value) -> Value {
        let mut state = self.state.lock().expect("stub state");
        let Value::Object(row) = row else {
            panic!("row must be an object");
        };
        insert(&mut state, table, row)
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        let state = self.state.lock().expect("stub state");
        state
            .tables
            .get(table)
            .map(|rows| rows.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    /// Overwrites one column of every row matching `id`.
    pub fn set_column(&self, table: &str, id: &str, column: &str, value: Value) {
        let mut state = self.state.lock().expect("stub state");
        for row in state.tables.entry(table.to_owned()).or_default() {
            if row.get("id").and_then(Value::as_str) == Some(id) {
                row.insert(column.to_owned(), value.clone());
            }
        }
    }
}

impl Drop for SupabaseStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn header(request: &tiny_http::Request, name: &str) -> Option<String> {
    request
        .headers()
        .iter()
        .find(|h| h.field.as_str().as_str().eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str().to_owned())
}

fn json_response(status: u16, value: &Value) -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
        .expect("build header");
    tiny_http::Response::from_string(value.to_string())
        .with_status_code(status)
        .with_header(header)
}

fn handle_auth(method: &tiny_http::Method, path: &str, body: &str) -> (u16, Value) {
    if method != &tiny_http::Method::Post {
        return (405, serde_json::json!({"message": "method not allowed"}));
    }
    let creds: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let email = creds.get("email").and_then(Value::as_str).unwrap_or_default();
    let password = creds.get("password").and_then(Value::as_str).unwrap_or_default();

    match path {
        "token" if email == EMAIL && password == PASSWORD => (
            200,
            serde_json::json!({
                "access_token": ACCESS_TOKEN,
                "token_type": "bearer",
                "expires_in": 3600,
                "refresh_token": "refresh-1",
                "user": { "id": USER_ID, "email": EMAIL, "role": "authenticated" }
            }),
        ),
        "token" => (
            400,
            serde_json::json!({
                "error": "invalid_grant",
                "error_description": "Invalid login credentials"
            }),
        ),
        "signup" => (
            200,
            serde_json::json!({ "id": "user-2", "email": email, "confirmation_sent_at": "now" }),
        ),
        "logout" => (200, serde_json::json!({})),
        _ => (404, serde_json::json!({"message": "not found"})),
    }
}

fn handle_rest(
    state: &mut State,
    method: &tiny_http::Method,
    table: &str,
    url: &url::Url,
    body: &str,
) -> (u16, Value) {
    let mut filters = Vec::new();
    let mut order = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "select" => {}
            "order" => order = value.strip_suffix(".desc").map(str::to_owned),
            column => match value.strip_prefix("eq.") {
                Some(expected) => filters.push((column.to_owned(), expected.to_owned())),
                None => {
                    return (400, serde_json::json!({"message": format!("bad filter {column}")}));
                }
            },
        }
    }
    let matches = |row: &Map<String, Value>| {
        filters.iter().all(|(column, expected)| {
            row.get(column).map(value_text).as_deref() == Some(expected.as_str())
        })
    };

    match *method {
        tiny_http::Method::Get => {
            let mut rows = state
                .tables
                .get(table)
                .map(|rows| rows.iter().filter(|r| matches(*r)).cloned().collect::<Vec<_>>())
                .unwrap_or_default();
            if let Some(column) = order {
                rows.sort_by(|a, b| value_text(&b[&column]).cmp(&value_text(&a[&column])));
            }
            (200, Value::Array(rows.into_iter().map(Value::Object).collect()))
        }
        tiny_http::Method::Post => {
            let Ok(Value::Object(row)) = serde_json::from_str::<Value>(body) else {
                return (400, serde_json::json!({"message": "expected object"}));
            };
            let row = insert(state, table, row);
            (201, Value::Array(vec![row]))
        }
        tiny_http::Method::Patch => {
            let Ok(Value::Object(patch)) = serde_json::from_str::<Value>(body) else {
                return (400, serde_json::json!({"message": "expected object"}));
            };
            let now = state.tick();
            let mut updated = Vec::new();
            for row in state.tables.entry(table.to_owned()).or_default() {
                if !matches(&*row) {
                    continue;
                }
                for (k, v) in &patch {
                    row.insert(k.clone(), v.clone());
                }
                if table != "user_settings" {
                    row.insert("updated_at".into(), Value::String(now.clone()));
                }
                updated.push(Value::Object(row.clone()));
            }
            (200, Value::Array(updated))
        }
        tiny_http::Method::Delete => {
            let rows = state.tables.entry(table.to_owned()).or_default();
            let (removed, kept): (Vec<_>, Vec<_>) = rows.drain(..).partition(|r| matches(r));
            *rows = kept;
            (200, Value::Array(removed.into_iter().map(Value::Object).collect()))
        }
        _ => (405, serde_json::json!({"message": "method not allowed"})),
    }
}

fn insert(state: &mut State, table: &str, mut row: Map<String, Value>) -> Value {
    state.next_id += 1;
    let id = format!("{}-{}", table.trim_end_matches('s'), state.next_id);
    let created_at = state.tick();
    if table != "user_settings" {
        row.entry("id").or_insert(Value::String(id));
        row.entry("created_at").or_insert(Value::String(created_at));
    }
    state
        .tables
        .entry(table.to_owned())
        .or_default()
        .push(row.clone());
    Value::Object(row)
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

//! Minimal GitHub gist API: create, update and fetch by ID.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Read as _;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::Value;

pub const TOKEN: &str = "ghp_stub";

#[derive(Default)]
struct State {
    /// gist id -> (file name -> content)
    gists: BTreeMap<String, BTreeMap<String, String>>,
    /// Report files as truncated so clients must follow `raw_url`.
    truncate: bool,
    next_id: u64,
}

pub struct GistStub {
    pub base_url: String,
    state: Arc<Mutex<State>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl GistStub {
    pub fn spawn() -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start gist stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");
        let state = Arc::new(Mutex::new(State::default()));

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let thread_state = Arc::clone(&state);
        let thread_base = base_url.clone();
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
                let _ = request.as_reader().read_to_string(&mut body);
                let authorized = request.headers().iter().any(|h| {
                    h.field.equiv("Authorization") && h.value.as_str() == format!("token {TOKEN}")
                });
                let method = request.method().clone();
                let path = request.url().to_string();

                let mut state = thread_state.lock().expect("stub state");
                let response = if !authorized {
                    json(401, &serde_json::json!({"message": "Bad credentials"}))
                } else {
                    route(&mut state, &thread_base, &method, &path, &body)
                };
                drop(state);
                let _ = request.respond(response);
            }
        });

        Self {
            base_url,
            state,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    pub fn set_truncated(&self, truncate: bool) {
        self.state.lock().expect("stub state").truncate = truncate;
    }

    /// Content of `file` in gist `id`, if present.
    pub fn file(&self, id: &str, file: &str) -> Option<String> {
        let state = self.state.lock().expect("stub state");
        state.gists.get(id)?.get(file).cloned()
    }

    /// Replaces `file` in gist `id` as another device would.
    pub fn put_file(&self, id: &str, file: &str, content: &str) {
        let mut state = self.state.lock().expect("stub state");
        state
            .gists
            .entry(id.to_owned())
            .or_default()
            .insert(file.to_owned(), content.to_owned());
    }

    pub fn gist_count(&self) -> usize {
        self.state.lock().expect("stub state").gists.len()
    }
}

impl Drop for GistStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn json(status: u16, value: &Value) -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
        .expect("build header");
    tiny_http::Response::from_string(value.to_string())
        .with_status_code(status)
        .with_header(header)
}

fn gist_json(state: &State, base: &str, id: &str) -> Value {
    let files = state
        .gists
        .get(id)
        .map(|files| {
            files
                .iter()
                .map(|(name, content)| {
                    let shown = if state.truncate {
                        &content[..content.len().min(8)]
                    } else {
                        content.as_str()
                    };
                    let file = serde_json::json!({
                        "filename": name,
                        "content": shown,
                        "truncated": state.truncate,
                        "raw_url": format!("{base}/raw/{id}/{name}"),
                    });
                    (name.clone(), file)
                })
                .collect::<serde_json::Map<_, _>>()
        })
        .unwrap_or_default();
    serde_json::json!({ "id": id, "public": false, "files": files })
}

fn files_from_body(body: &str) -> Option<BTreeMap<String, String>> {
    let value: Value = serde_json::from_str(body).ok()?;
    let files = value.get("files")?.as_object()?;
    Some(
        files
            .iter()
            .filter_map(|(name, file)| {
                Some((name.clone(), file.get("content")?.as_str()?.to_owned()))
            })
            .collect(),
    )
}

fn route(
    state: &mut State,
    base: &str,
    method: &tiny_http::Method,
    path: &str,
    body: &str,
) -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    let segments = path.trim_start_matches('/').split('/').collect::<Vec<_>>();
    match (method, segments.as_slice()) {
        (tiny_http::Method::Post, ["gists"]) => {
            let Some(files) = files_from_body(body) else {
                return json(422, &serde_json::json!({"message": "files required"}));
            };
            state.next_id += 1;
            let id = format!("gist{}", state.next_id);
            state.gists.insert(id.clone(), files);
            json(201, &gist_json(state, base, &id))
        }
        (tiny_http::Method::Patch, ["gists", id]) => {
            let Some(files) = files_from_body(body) else {
                return json(422, &serde_json::json!({"message": "files required"}));
            };
            let Some(existing) = state.gists.get_mut(*id) else {
                return json(404, &serde_json::json!({"message": "Not Found"}));
            };
            existing.extend(files);
            json(200, &gist_json(state, base, id))
        }
        (tiny_http::Method::Get, ["gists", id]) => {
            if !state.gists.contains_key(*id) {
                return json(404, &serde_json::json!({"message": "Not Found"}));
            }
            json(200, &gist_json(state, base, id))
        }
        (tiny_http::Method::Get, ["raw", id, name]) => {
            match state.gists.get(*id).and_then(|files| files.get(*name)) {
                Some(content) => tiny_http::Response::from_string(content.clone()),
                None => json(404, &serde_json::json!({"message": "Not Found"})),
            }
        }
        _ => json(404, &serde_json::json!({"message": "Not Found"})),
    }
}

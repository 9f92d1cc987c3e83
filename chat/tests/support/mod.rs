//! In-process stand-in for the Ollama chat endpoint.
#![allow(dead_code)]

use argus_chat::config::ChatConfig;
use async_stream::stream;
use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Clone)]
pub enum Script {
    Reply(Vec<&'static str>),
    /// Replies after a pause, for in-flight tests.
    Slow(Vec<&'static str>, Duration),
    ModelError(&'static str),
    Status(StatusCode),
    /// One fragment, then silence.
    Stall,
}

#[derive(Clone)]
pub struct MockOllama {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl MockOllama {
    pub async fn start(script: Script) -> Self {
        let requests = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/api/chat", post(chat))
            .with_state((script, requests.clone()));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve mock");
        });
        Self { addr, requests }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().expect("lock").clone()
    }
}

async fn chat(
    State((script, requests)): State<(Script, Arc<Mutex<Vec<Value>>>)>,
    Json(body): Json<Value>,
) -> Response {
    let streaming = body["stream"].as_bool().unwrap_or(false);
    requests.lock().expect("lock").push(body);

    let (fragments, delay) = match script {
        Script::Reply(f) => (f, Duration::ZERO),
        Script::Slow(f, d) => (f, d),
        Script::ModelError(msg) => {
            return Json(json!({ "error": msg })).into_response();
        }
        Script::Status(code) => return (code, "model not found").into_response(),
        Script::Stall => {
            let body = stream! {
                yield Ok::<_, Infallible>(chunk("Hel", false));
                tokio::time::sleep(Duration::from_secs(30)).await;
                yield Ok(chunk("", true));
            };
            return Body::from_stream(body).into_response();
        }
    };

    tokio::time::sleep(delay).await;
    if !streaming {
        return Json(json!({
            "model": "llama3:latest",
            "message": { "role": "assistant", "content": fragments.concat() },
            "done": true
        }))
        .into_response();
    }

    let body = stream! {
        for f in fragments {
            yield Ok::<_, Infallible>(chunk(f, false));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        yield Ok(chunk("", true));
    };
    Body::from_stream(body).into_response()
}

fn chunk(content: &str, done: bool) -> String {
    let line = json!({
        "model": "llama3:latest",
        "message": { "role": "assistant", "content": content },
        "done": done
    });
    format!("{line}\n")
}

pub fn config(ollama_url: &str, log_path: &Path) -> ChatConfig {
    let vars: HashMap<&str, String> = HashMap::from([
        ("OLLAMA_HOST", ollama_url.to_string()),
        ("ARGUS_LOG_PATH", log_path.display().to_string()),
        ("ARGUS_CONNECT_TIMEOUT_SECS", "2".to_string()),
        ("ARGUS_REQUEST_TIMEOUT_SECS", "10".to_string()),
        ("ARGUS_STREAM_IDLE_SECS", "1".to_string()),
    ]);
    ChatConfig::from_lookup(|k| vars.get(k).cloned()).expect("config")
}

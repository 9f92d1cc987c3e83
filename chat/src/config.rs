use anyhow::Result;
use recorder::config::{env_bool, env_path, env_u64, env_usize, DEFAULT_LOG_PATH};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::session::{DEFAULT_MAX_SESSIONS, DEFAULT_SESSION_IDLE};

const DEFAULT_BIND: &str = "127.0.0.1:8501";
const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3:latest";
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;
const DEFAULT_STREAM_IDLE_SECS: u64 = 60;

#[derive(Clone, Debug)]
pub struct ChatConfig {
    pub log_path: PathBuf,
    pub bind_addr: String,
    pub ollama_host: String,
    pub model: String,
    /// Send prior turns along with the grounded prompt.
    pub with_history: bool,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub stream_idle: Duration,
    pub session_idle: Duration,
    pub max_sessions: usize,
}

impl ChatConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let home = dirs::home_dir();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            log_path: env_path(
                &lookup,
                "ARGUS_LOG_PATH",
                PathBuf::from(DEFAULT_LOG_PATH),
                home.as_deref(),
            ),
            bind_addr: non_empty("ARGUS_CHAT_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string()),
            ollama_host: normalize_host(
                &non_empty("OLLAMA_HOST").unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string()),
            ),
            model: non_empty("ARGUS_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            with_history: env_bool(&lookup, "ARGUS_CHAT_HISTORY", true),
            connect_timeout: secs(env_u64(
                &lookup,
                "ARGUS_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT_SECS,
            )),
            request_timeout: secs(env_u64(
                &lookup,
                "ARGUS_REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )),
            stream_idle: secs(env_u64(
                &lookup,
                "ARGUS_STREAM_IDLE_SECS",
                DEFAULT_STREAM_IDLE_SECS,
            )),
            session_idle: secs(env_u64(
                &lookup,
                "ARGUS_SESSION_IDLE_SECS",
                DEFAULT_SESSION_IDLE.as_secs(),
            )),
            max_sessions: env_usize(&lookup, "ARGUS_MAX_SESSIONS", DEFAULT_MAX_SESSIONS).max(1),
        })
    }
}

// A zero timeout would fail every request.
fn secs(v: u64) -> Duration {
    Duration::from_secs(v.max(1))
}

/// Accepts `host:port` the way the Ollama CLI does.
fn normalize_host(raw: &str) -> String {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> ChatConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ChatConfig::from_lookup(|k| vars.get(k).cloned()).expect("config")
    }

    #[test]
    fn defaults() {
        let config = config_from(&[]);
        assert_eq!(config.log_path, PathBuf::from("/log/log.txt"));
        assert_eq!(config.ollama_host, "http://localhost:11434");
        assert_eq!(config.model, "llama3:latest");
        assert!(config.with_history);
        assert_eq!(config.request_timeout, Duration::from_secs(120));
        assert_eq!(config.session_idle, Duration::from_secs(3600));
        assert_eq!(config.max_sessions, 256);
    }

    #[test]
    fn host_without_scheme_gets_http() {
        let config = config_from(&[("OLLAMA_HOST", "10.0.0.5:11434/")]);
        assert_eq!(config.ollama_host, "http://10.0.0.5:11434");
    }

    #[test]
    fn overrides_and_timeout_floor() {
        let config = config_from(&[
            ("ARGUS_MODEL", "mistral"),
            ("ARGUS_CHAT_HISTORY", "false"),
            ("ARGUS_STREAM_IDLE_SECS", "0"),
            ("ARGUS_CHAT_BIND", "0.0.0.0:9000"),
            ("ARGUS_MAX_SESSIONS", "0"),
        ]);
        assert_eq!(config.model, "mistral");
        assert!(!config.with_history);
        assert_eq!(config.stream_idle, Duration::from_secs(1));
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.max_sessions, 1);
    }
}

//! Process configuration, loaded once at startup and passed to the clients explicitly.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use tracing::debug;

pub const OPENFDA_EVENTS_URL: &str = "https://api.fda.gov/drug/event.json";
pub const OLLAMA_LOCAL_HOST: &str = "http://localhost:11434";
pub const OLLAMA_CLOUD_BASE: &str = "https://ollama.com";
pub const OLLAMA_LOCAL_MODEL: &str = "gemma3:latest";
pub const OLLAMA_CLOUD_MODEL: &str = "gpt-oss:20b-cloud";

const OLLAMA_LOCAL_TIMEOUT_SECS: u64 = 300;
const OLLAMA_CLOUD_TIMEOUT_SECS: u64 = 120;
const ENV_FILE_NAMES: &[&str] = &["FDA.env", "../FDA.env"];

/// Where trend summaries are sent.
#[derive(Clone, PartialEq, Eq)]
pub enum SummarizerSettings {
    /// Local Ollama daemon, `/api/generate`.
    Local {
        host: String,
        model: String,
        timeout: Duration,
    },
    /// Ollama Cloud, `/api/chat` with a bearer token.
    Cloud {
        base: String,
        token: String,
        model: String,
        timeout: Duration,
    },
}

#[derive(Clone)]
pub struct Config {
    pub fda_api_key: Option<String>,
    pub events_url: String,
    pub summarizer: SummarizerSettings,
}

const REDACTED: &str = "<redacted>";

impl fmt::Debug for SummarizerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local {
                host,
                model,
                timeout,
            } => f
                .debug_struct("Local")
                .field("host", host)
                .field("model", model)
                .field("timeout", timeout)
                .finish(),
            Self::Cloud {
                base,
                model,
                timeout,
                ..
            } => f
                .debug_struct("Cloud")
                .field("base", base)
                .field("token", &REDACTED)
                .field("model", model)
                .field("timeout", timeout)
                .finish(),
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("fda_api_key", &self.fda_api_key.as_ref().map(|_| REDACTED))
            .field("events_url", &self.events_url)
            .field("summarizer", &self.summarizer)
            .finish()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// A missing env file is normal; anything else is worth a log line.
fn reportable(err: dotenvy::Error) -> Option<dotenvy::Error> {
    (!err.not_found()).then_some(err)
}

fn env_file_candidates() -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = ENV_FILE_NAMES.iter().map(PathBuf::from).collect();
    if let Some(dir) = dirs::config_dir() {
        out.push(dir.join("fda-events").join("FDA.env"));
    }
    out
}

impl Config {
    /// Reads the first `FDA.env` found (current dir, parent dir, user config dir),
    /// then `.env`, then the process environment. Values already present in the
    /// environment win over file values.
    pub fn load() -> Self {
        match env_file_candidates().into_iter().find(|p| p.is_file()) {
            Some(path) => match dotenvy::from_path(&path) {
                Ok(()) => debug!(path = %path.display(), "loaded env file"),
                Err(err) => debug!(path = %path.display(), error = %err, "env file ignored"),
            },
            None => debug!("no FDA.env found; using process environment"),
        }
        match dotenvy::dotenv().map_err(reportable) {
            Ok(path) => debug!(path = %path.display(), "loaded .env"),
            Err(Some(err)) => debug!(error = %err, ".env ignored"),
            Err(None) => {}
        }

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| non_empty(lookup(key));

        let summarizer = match get("OLLAMA_API_KEY") {
            Some(token) => SummarizerSettings::Cloud {
                base: get("OLLAMA_CLOUD_BASE").unwrap_or_else(|| OLLAMA_CLOUD_BASE.to_string()),
                token,
                model: OLLAMA_CLOUD_MODEL.to_string(),
                timeout: Duration::from_secs(OLLAMA_CLOUD_TIMEOUT_SECS),
            },
            None => SummarizerSettings::Local {
                host: get("OLLAMA_HOST").unwrap_or_else(|| OLLAMA_LOCAL_HOST.to_string()),
                model: get("OLLAMA_MODEL").unwrap_or_else(|| OLLAMA_LOCAL_MODEL.to_string()),
                timeout: Duration::from_secs(
                    get("OLLAMA_TIMEOUT")
                        .and_then(|v| v.parse::<u64>().ok())
                        .filter(|v| *v > 0)
                        .unwrap_or(OLLAMA_LOCAL_TIMEOUT_SECS),
                ),
            },
        };

        Self {
            fda_api_key: get("FDA_API_KEY"),
            events_url: get("FDA_EVENTS_BASE").unwrap_or_else(|| OPENFDA_EVENTS_URL.to_string()),
            summarizer,
        }
    }
}

#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum FdaError {
    #[error("HTTP client initialization failed: {0}")]
    HttpClientInit(reqwest::Error),

    #[error("transport error from {api}: {source}")]
    Transport {
        api: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("HTTP {status} from {api}: {excerpt}")]
    Http {
        api: String,
        status: u16,
        excerpt: String,
    },

    #[error("parse error from {api}: {message}")]
    Parse { api: String, message: String },

    #[error("Summarizer unavailable ({endpoint}): {reason}")]
    Summarizer { endpoint: String, reason: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FdaError {
    pub(crate) fn transport(
        api: &str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Transport {
            api: api.to_string(),
            source: source.into(),
        }
    }

    pub(crate) fn parse(api: &str, message: impl Into<String>) -> Self {
        Self::Parse {
            api: api.to_string(),
            message: message.into(),
        }
    }
}

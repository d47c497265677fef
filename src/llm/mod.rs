pub mod gemini;

use async_trait::async_trait;

/// How the key-rotation executor reacts to a failed oracle call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// The credential itself was rejected; try the next key right away.
    RotateNow,
    /// Transient overload; wait before trying the next key.
    RotateAfterBackoff,
    /// Not a credential problem; give up immediately.
    Fatal,
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("invalid API key: {0}")]
    InvalidKey(String),
    #[error("model not found: {0}")]
    NotFound(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("all {pool} API keys exhausted after {attempts} attempts")]
    Exhausted {
        pool: usize,
        attempts: usize,
        #[source]
        last: Box<OracleError>,
    },
}

impl OracleError {
    pub fn retry_class(&self) -> RetryClass {
        match self {
            OracleError::InvalidKey(_) | OracleError::NotFound(_) => RetryClass::RotateNow,
            OracleError::RateLimited(_) | OracleError::Unavailable(_) => {
                RetryClass::RotateAfterBackoff
            }
            _ => RetryClass::Fatal,
        }
    }

    /// True when this failure (or, for an exhausted pool, its final attempt)
    /// was the oracle rate-limiting us.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            OracleError::RateLimited(_) => true,
            OracleError::Exhausted { last, .. } => last.is_rate_limit(),
            _ => false,
        }
    }
}

/// A generative-language service: one capability per method, nothing modeled
/// beyond the call contract.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Embed a text into the oracle's fixed-dimension vector space.
    async fn embed(&self, api_key: &str, text: &str) -> Result<Vec<f32>, OracleError>;

    /// Complete a prompt into reply text.
    async fn generate(&self, api_key: &str, prompt: &str) -> Result<String, OracleError>;
}

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{Oracle, OracleError};

pub const GENERATION_MODEL: &str = "gemini-2.0-flash";
pub const EMBEDDING_MODEL: &str = "text-embedding-004";

/// Client for the Generative Language REST API. The key is passed per call so
/// one client serves the whole rotation pool.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: Client,
    base_url: String,
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
}

#[derive(Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Content,
}

#[derive(Serialize)]
struct EmbedRequest {
    content: Content,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: EmbeddingValues,
}

#[derive(Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

/// Structured envelope the API wraps non-2xx responses in.
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    details: Vec<ErrorDetail>,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
}

impl GeminiClient {
    pub fn new(base_url: String) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(Duration::from_secs(120)).build()?;
        Ok(Self { http, base_url })
    }

    async fn into_api_error(resp: reqwest::Response) -> OracleError {
        let status = resp.status().as_u16();
        let payload = resp.text().await.unwrap_or_default();
        classify_api_error(status, &payload)
    }
}

#[async_trait]
impl Oracle for GeminiClient {
    async fn embed(&self, api_key: &str, text: &str) -> Result<Vec<f32>, OracleError> {
        let url = format!(
            "{}/v1beta/models/{}:embedContent",
            self.base_url, EMBEDDING_MODEL
        );
        let body = EmbedRequest {
            content: Content {
                parts: vec![Part {
                    text: text.to_string(),
                }],
            },
        };

        let resp = self
            .http
            .post(&url)
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::into_api_error(resp).await);
        }

        let data: EmbedResponse = resp.json().await?;
        Ok(data.embedding.values)
    }

    async fn generate(&self, api_key: &str, prompt: &str) -> Result<String, OracleError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, GENERATION_MODEL
        );
        let body = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        };

        let resp = self
            .http
            .post(&url)
            .query(&[("key", api_key)])
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::into_api_error(resp).await);
        }

        let data: GenerateResponse = resp.json().await?;
        data.candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or_else(|| OracleError::Parse("no candidates in response".into()))
    }
}

/// Map a non-2xx response onto the typed taxonomy. Classification uses the
/// envelope's `status`/`details[].reason` fields and the HTTP status code,
/// never the prose message.
fn classify_api_error(status: u16, payload: &str) -> OracleError {
    let (code, reason, message) = match serde_json::from_str::<ErrorEnvelope>(payload) {
        Ok(ErrorEnvelope { error }) => {
            let reason = error
                .details
                .into_iter()
                .map(|d| d.reason)
                .find(|r| !r.is_empty())
                .unwrap_or_default();
            (error.status, reason, error.message)
        }
        Err(_) => (String::new(), String::new(), payload.trim().to_string()),
    };

    if reason == "API_KEY_INVALID"
        || code == "UNAUTHENTICATED"
        || code == "PERMISSION_DENIED"
        || status == 401
        || status == 403
    {
        OracleError::InvalidKey(message)
    } else if code == "RESOURCE_EXHAUSTED" || status == 429 {
        OracleError::RateLimited(message)
    } else if code == "NOT_FOUND" || status == 404 {
        OracleError::NotFound(message)
    } else if code == "UNAVAILABLE" || status == 503 {
        OracleError::Unavailable(message)
    } else {
        OracleError::Api { status, message }
    }
}

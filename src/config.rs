/// Credential slots read from the environment. Enumerated, not dynamic.
const MAX_API_KEYS: usize = 5;

#[derive(Debug, Clone)]
pub struct Config {
    /// Port the server listens on
    pub port: u16,
    /// Path to the SQLite database file
    pub database_path: String,
    /// Generative-language API endpoint
    pub gemini_base_url: String,
    /// API key pool; rotated on rate limits and rejected credentials
    pub gemini_api_keys: Vec<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let gemini_api_keys: Vec<String> = (1..=MAX_API_KEYS)
            .filter_map(|i| std::env::var(format!("GEMINI_API_KEY_{i}")).ok())
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .collect();

        Ok(Self {
            port: env_parse("PORT", 3001)?,
            database_path: env_str("DATABASE_PATH", "./data/campuschat.db"),
            gemini_base_url: env_str(
                "GEMINI_BASE_URL",
                "https://generativelanguage.googleapis.com",
            ),
            gemini_api_keys,
        })
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Failed to parse env var {key}={val}: {e}")),
        Err(_) => Ok(default),
    }
}

use anyhow::{Context, Result};

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite connection string, e.g. "sqlite:./gatelink.db"
    pub database_url: String,

    /// Host to bind the HTTP server to, e.g. "0.0.0.0"
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Public base URL of this deployment, e.g. "https://go.example.com".
    /// Must NOT have a trailing slash.
    pub base_url: String,

    /// URL to redirect visitors to when they hit the root path ("/").
    pub root_redirect_url: String,

    /// Optional endpoint of the bot-likelihood annotation service. Absent
    /// means recorded clicks keep their local heuristic verdict.
    pub annotation_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from environment variables (populated by dotenvy before this is called).
    pub fn from_env() -> Result<Self> {
        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse::<u16>()
            .context("PORT must be a valid port number (1–65535)")?;

        let base_url = std::env::var("BASE_URL")
            .unwrap_or_else(|_| format!("http://localhost:{port}"))
            .trim_end_matches('/')
            .to_owned();

        let root_redirect_url = std::env::var("ROOT_REDIRECT_URL")
            .unwrap_or_else(|_| base_url.clone())
            .trim_end_matches('/')
            .to_owned();

        let annotation_url = std::env::var("ANNOTATION_URL")
            .ok()
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty());

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./gatelink.db".into()),
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port,
            base_url,
            root_redirect_url,
            annotation_url,
        })
    }
}

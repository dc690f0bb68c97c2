use std::env;
use std::path::PathBuf;

const DB_FILE: &str = "simsync.db";
const CURRENT_DIR: &str = "./";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_TOKEN_TTL: u64 = 3600;
const DEFAULT_ORIGIN: &str = "http://localhost:5173";

/// Server settings, read once at start-up.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub data_dir: PathBuf,
    pub data_file: String,
    /// Base of the public download URLs handed to clients
    pub public_url: String,
    /// Hosted checkout page; payments are disabled when unset
    pub checkout_url: Option<String>,
    /// Id token lifetime in seconds
    pub token_ttl: u64,
    /// Front end origin allowed by CORS
    pub origin: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            data_dir: PathBuf::from(CURRENT_DIR),
            data_file: DB_FILE.to_owned(),
            public_url: format!("http://localhost:{DEFAULT_PORT}"),
            checkout_url: None,
            token_ttl: DEFAULT_TOKEN_TTL,
            origin: DEFAULT_ORIGIN.to_owned(),
        }
    }
}

impl Config {
    /// Reads `SIMSYNC_*` environment variables, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let port = lookup("SIMSYNC_PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or(defaults.port);
        Self {
            port,
            data_dir: lookup("SIMSYNC_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            data_file: lookup("SIMSYNC_DATA_FILE").unwrap_or(defaults.data_file),
            public_url: lookup("SIMSYNC_PUBLIC_URL")
                .unwrap_or_else(|| format!("http://localhost:{port}")),
            checkout_url: lookup("SIMSYNC_CHECKOUT_URL").filter(|u| !u.is_empty()),
            token_ttl: lookup("SIMSYNC_TOKEN_TTL")
                .and_then(|t| t.parse().ok())
                .unwrap_or(defaults.token_ttl),
            origin: lookup("SIMSYNC_ORIGIN").unwrap_or(defaults.origin),
        }
    }

    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(&self.data_file)
    }

    /// Public URL a stored file can be fetched from without a token.
    #[must_use]
    pub fn content_url(&self, file_id: &str) -> String {
        format!(
            "{}/api/files/content/{file_id}",
            self.public_url.trim_end_matches('/')
        )
    }
}

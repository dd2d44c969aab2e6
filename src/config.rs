/// Process configuration, read once at startup from the environment
/// (`.env` friendly via dotenv).
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    pub database_url: String,
    /// Maximum inbound message body length in bytes.
    pub max_body_len: usize,
    /// Upper bound on a client-requested history backfill page.
    pub history_page_cap: u32,
}

impl Config {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: dotenv::var("BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: dotenv::var("DATABASE_URL").unwrap_or(defaults.database_url),
            max_body_len: dotenv::var("MAX_BODY_LEN")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_body_len),
            history_page_cap: dotenv::var("HISTORY_PAGE_CAP")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.history_page_cap),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_owned(),
            database_url: "sqlite::memory:".to_owned(),
            max_body_len: 4096,
            history_page_cap: 50,
        }
    }
}

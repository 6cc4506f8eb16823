use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub server_host: String,
    pub server_port: u16,
    pub database_path: String,
    pub storage_path: String,
    pub allowed_origins: Vec<String>,
    pub environment: String,
    pub jwt_secret: String,
    pub jwt_expiry_secs: i64,
    pub password_hash_iterations: u32,
    pub max_upload_bytes: usize,
    pub document_flush_debounce_ms: u64,
    pub document_flush_max_delay_ms: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, String> {
        // Load .env file if it exists (development)
        dotenvy::dotenv().ok();

        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let server_port = parse_var("SERVER_PORT", "8080")?;

        let database_path =
            env::var("DATABASE_PATH").unwrap_or_else(|_| "./data/collabdrive.db".to_string());
        let storage_path =
            env::var("STORAGE_PATH").unwrap_or_else(|_| "./data/blobs".to_string());

        let allowed_origins = env::var("ALLOWED_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let jwt_secret =
            env::var("JWT_SECRET").map_err(|_| "JWT_SECRET must be set for token signing")?;
        if jwt_secret.len() < 16 {
            return Err("JWT_SECRET must be at least 16 characters".to_string());
        }

        let jwt_expiry_secs = parse_var("JWT_EXPIRY_SECS", "86400")?;
        let password_hash_iterations = parse_var("PASSWORD_HASH_ITERATIONS", "600000")?;
        let max_upload_bytes = parse_var("MAX_UPLOAD_BYTES", "52428800")?;
        let document_flush_debounce_ms = parse_var("DOCUMENT_FLUSH_DEBOUNCE_MS", "2000")?;
        let document_flush_max_delay_ms = parse_var("DOCUMENT_FLUSH_MAX_DELAY_MS", "10000")?;

        Ok(Config {
            server_host,
            server_port,
            database_path,
            storage_path,
            allowed_origins,
            environment,
            jwt_secret,
            jwt_expiry_secs,
            password_hash_iterations,
            max_upload_bytes,
            document_flush_debounce_ms,
            document_flush_max_delay_ms,
        })
    }

    /// Get server address as string
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }

    /// Quiet period after the last document edit before pending deltas are persisted
    pub fn flush_debounce(&self) -> Duration {
        Duration::from_millis(self.document_flush_debounce_ms)
    }

    /// Upper bound on how long a delta may stay pending under continuous editing
    pub fn flush_max_delay(&self) -> Duration {
        Duration::from_millis(self.document_flush_max_delay_ms.max(self.document_flush_debounce_ms))
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> Result<T, String> {
    env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| format!("Invalid {name}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Config {
        Config {
            server_host: "127.0.0.1".to_string(),
            server_port: 9000,
            database_path: String::new(),
            storage_path: String::new(),
            allowed_origins: vec![],
            environment: "test".to_string(),
            jwt_secret: "x".repeat(32),
            jwt_expiry_secs: 60,
            password_hash_iterations: 1_000,
            max_upload_bytes: 1024,
            document_flush_debounce_ms: 2000,
            document_flush_max_delay_ms: 500,
        }
    }

    #[test]
    fn test_server_address() {
        assert_eq!(sample().server_address(), "127.0.0.1:9000");
    }

    #[test]
    fn test_max_delay_never_below_debounce() {
        let config = sample();
        assert_eq!(config.flush_debounce(), Duration::from_millis(2000));
        assert_eq!(config.flush_max_delay(), Duration::from_millis(2000));
    }
}

//! Typed startup configuration, loaded from the environment once at boot
//! and logged so a deployment's effective settings are visible in the
//! first lines of output.

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub redis: RedisConfig,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: Option<String>,
    pub database: u8,
}

impl RedisConfig {
    /// Build the `redis://[:password@]host:port/database` connection URL.
    pub fn connection_url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{password}@{}:{}/{}",
                self.host, self.port, self.database
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.database),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            password: None,
            database: 0,
        }
    }
}

impl Config {
    /// Load configuration from the environment, falling back to the
    /// documented defaults for anything unset.
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(3000);

        let redis = RedisConfig {
            host: std::env::var("REDIS_HOST").unwrap_or_else(|_| RedisConfig::default().host),
            port: std::env::var("REDIS_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or_else(|| RedisConfig::default().port),
            password: std::env::var("REDIS_PASSWORD").ok(),
            database: std::env::var("REDIS_DATABASE")
                .ok()
                .and_then(|d| d.parse().ok())
                .unwrap_or_else(|| RedisConfig::default().database),
        };

        Self { host, port, redis }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_url_without_password() {
        let cfg = RedisConfig {
            host: "db".to_string(),
            port: 1234,
            password: None,
            database: 2,
        };
        assert_eq!(cfg.connection_url(), "redis://db:1234/2");
    }

    #[test]
    fn connection_url_with_password() {
        let cfg = RedisConfig {
            host: "db".to_string(),
            port: 1234,
            password: Some("secret".to_string()),
            database: 2,
        };
        assert_eq!(cfg.connection_url(), "redis://:secret@db:1234/2");
    }
}

use std::env;
use std::time::Duration;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub redis_enabled: bool,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_expiration_secs: u64,
    pub api_base_uri: String,
    pub server_host: String,
    pub server_port: u16,
    pub rate_limit_enabled: bool,
    pub rate_limit_window_secs: u64,
    pub rate_limit_requests: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenv::dotenv().ok();

        let jwt_expiration = env::var("JWT_EXPIRATION")?
            .trim_end_matches('h')
            .parse::<u64>()
            .unwrap_or(72);
        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL")?,
            redis_enabled: env::var("REDIS_ENABLED")
                .map(|v| v == "true")
                .unwrap_or(true),
            jwt_secret: env::var("JWT_SECRET")?,
            jwt_issuer: env::var("JWT_ISSUER").unwrap_or_else(|_| "social-backend".into()),
            jwt_expiration_secs: jwt_expiration * 3600,
            api_base_uri: env::var("API_BASE_URI").unwrap_or_else(|_| "/v1".into()),
            server_host: env::var("SERVER_HOST")?,
            server_port: env::var("SERVER_PORT")?.parse().unwrap_or(3000),
            rate_limit_enabled: env::var("RATE_LIMIT_ENABLED")
                .map(|v| v == "true")
                .unwrap_or(true),
            rate_limit_window_secs: env::var("RATE_LIMIT_WINDOW")?.parse().unwrap_or(60),
            rate_limit_requests: env::var("RATE_LIMIT_REQUESTS")?.parse().unwrap_or(100),
        })
    }

    pub fn jwt_expiration(&self) -> Duration {
        Duration::from_secs(self.jwt_expiration_secs)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

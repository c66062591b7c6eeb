use std::env;

use serde::Deserialize;

/// Minimum signing-secret length accepted when `APP_ENV=production`.
pub const MIN_PRODUCTION_SECRET_LEN: usize = 32;
/// One minute up to one week.
pub const JWT_EXPIRATION_MINUTES_RANGE: std::ops::RangeInclusive<i64> = 1..=10080;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub broker: BrokerConfig,
    pub jwt: JwtConfig,
    pub auth: AuthConfig,
    pub admin: AdminBootstrapConfig,
    pub rate_limit: RateLimitConfig,
    pub socket: SocketConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Environment {
    Development,
    Production,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: Environment,
    /// Frontend origin allowed by CORS. Read from env var `CORS_ORIGIN`.
    pub cors_origin: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrokerConfig {
    /// Redis connection string used for cross-process room fan-out.
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub bcrypt_cost: u32,
}

/// Optional administrator account created at startup when it does not exist yet.
#[derive(Debug, Clone, Deserialize)]
pub struct AdminBootstrapConfig {
    pub name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Allowed requests per second (per IP) for auth endpoints (e.g. /api/auth/login)
    pub auth_per_second: u32,
    /// Burst size for auth endpoints
    pub auth_burst: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SocketConfig {
    /// Interval between server pings on each WebSocket connection.
    pub heartbeat_seconds: u64,
    /// Connections silent for longer than this are closed.
    pub client_timeout_seconds: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment = match lookup("APP_ENV").map(|v| v.to_lowercase()) {
            None => Environment::Development,
            Some(v) if v == "development" || v == "dev" => Environment::Development,
            Some(v) if v == "production" || v == "prod" => Environment::Production,
            Some(_) => return Err(ConfigError::InvalidValue("APP_ENV".to_string())),
        };

        let secret = lookup("JWT_SECRET")
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnv("JWT_SECRET".to_string()))?;
        if environment == Environment::Production && secret.len() < MIN_PRODUCTION_SECRET_LEN {
            return Err(ConfigError::WeakSecret(MIN_PRODUCTION_SECRET_LEN));
        }

        let expiration_minutes: i64 = parse_or(&lookup, "JWT_EXPIRATION_MINUTES", 60)?;
        if !JWT_EXPIRATION_MINUTES_RANGE.contains(&expiration_minutes) {
            return Err(ConfigError::InvalidValue("JWT_EXPIRATION_MINUTES".to_string()));
        }

        let bcrypt_cost: u32 = parse_or(&lookup, "BCRYPT_COST", bcrypt::DEFAULT_COST)?;
        if !(4..=31).contains(&bcrypt_cost) {
            return Err(ConfigError::InvalidValue("BCRYPT_COST".to_string()));
        }

        Ok(Config {
            server: ServerConfig {
                host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_or(&lookup, "PORT", 5000)?,
                environment,
                cors_origin: lookup("CORS_ORIGIN")
                    .unwrap_or_else(|| "http://localhost:5173".to_string()),
            },
            database: DatabaseConfig {
                url: lookup("DATABASE_URL")
                    .unwrap_or_else(|| "sqlite://data/ethiosafeguard.db".to_string()),
                max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 5)?,
            },
            broker: BrokerConfig {
                url: lookup("REDIS_URL")
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| ConfigError::MissingEnv("REDIS_URL".to_string()))?,
            },
            jwt: JwtConfig {
                secret,
                expiration_minutes,
            },
            auth: AuthConfig { bcrypt_cost },
            admin: AdminBootstrapConfig {
                name: lookup("ADMIN_NAME"),
                email: lookup("ADMIN_EMAIL"),
                password: lookup("ADMIN_PASSWORD"),
            },
            rate_limit: RateLimitConfig {
                auth_per_second: parse_or(&lookup, "RATE_LIMIT_AUTH_PER_SECOND", 3)?,
                auth_burst: parse_or(&lookup, "RATE_LIMIT_AUTH_BURST", 10)?,
            },
            socket: SocketConfig {
                heartbeat_seconds: parse_or(&lookup, "SOCKET_HEARTBEAT_SECONDS", 25)?,
                client_timeout_seconds: parse_or(&lookup, "SOCKET_CLIENT_TIMEOUT_SECONDS", 60)?,
            },
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(key.to_string())),
        None => Ok(default),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),

    #[error("JWT_SECRET must be at least {0} bytes in production")]
    WeakSecret(usize),
}

#[cfg(test)]
impl Config {
    /// Configuration for in-process tests: cheap bcrypt cost, no real broker.
    pub fn for_tests() -> Self {
        Config {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                environment: Environment::Development,
                cors_origin: "http://localhost:5173".to_string(),
            },
            database: DatabaseConfig {
                url: "sqlite::memory:".to_string(),
                max_connections: 1,
            },
            broker: BrokerConfig {
                url: "redis://127.0.0.1:6379".to_string(),
            },
            jwt: JwtConfig {
                secret: "test-secret-test-secret-test-secret".to_string(),
                expiration_minutes: 60,
            },
            auth: AuthConfig {
                bcrypt_cost: crate::test_support::TEST_BCRYPT_COST,
            },
            admin: AdminBootstrapConfig {
                name: None,
                email: None,
                password: None,
            },
            rate_limit: RateLimitConfig {
                auth_per_second: 3,
                auth_burst: 10,
            },
            socket: SocketConfig {
                heartbeat_seconds: 25,
                client_timeout_seconds: 60,
            },
        }
    }
}

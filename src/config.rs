//! Application configuration module
//! Handles environment variable loading, configuration validation, and application settings

use std::env;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub rates: RatesConfig,
    pub gateway: GatewayConfig,
    pub token: TokenConfig,
    pub chain: ChainConfig,
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connection_timeout: u64,   // seconds
    pub idle_timeout: Option<u64>, // seconds
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log format options
#[derive(Debug, Clone)]
pub enum LogFormat {
    Json,
    Plain,
}

/// Rate service configuration
#[derive(Debug, Clone)]
pub struct RatesConfig {
    /// Market-data endpoint used for the chain currency quote
    pub market_url: String,
    pub market_timeout_secs: u64,
    /// Result cache for live market fetches
    pub market_cache_secs: u64,
    /// Lifetime of a persisted rate row; also the default rate-lock window
    pub rate_ttl_minutes: i64,
    /// Last-resort rate when no live or durable rate exists
    pub emergency_chain_rate: String,
}

/// Card/bank gateway configuration (Init / GetState / Cancel API)
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub terminal_key: Option<String>,
    pub password: Option<String>,
    pub base_url: String,
    pub success_url: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

/// In-chat token currency configuration (bot API)
#[derive(Debug, Clone)]
pub struct TokenConfig {
    pub bot_token: Option<String>,
    /// Shared secret echoed back in the bot platform's webhook header
    pub webhook_secret: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

/// Blockchain currency configuration
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub wallet_address: Option<String>,
    pub confirmation_threshold: i32,
    /// Accepted deviation between expected and received amount, in percent
    pub amount_tolerance_pct: u32,
    pub rate_lock_minutes: i64,
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenv::dotenv().ok();

        Ok(AppConfig {
            server: ServerConfig::from_env()?,
            database: DatabaseConfig::from_env()?,
            logging: LoggingConfig::from_env()?,
            rates: RatesConfig::from_env()?,
            gateway: GatewayConfig::from_env()?,
            token: TokenConfig::from_env()?,
            chain: ChainConfig::from_env()?,
        })
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.database.validate()?;
        self.logging.validate()?;
        self.rates.validate()?;
        self.chain.validate()?;

        Ok(())
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ServerConfig {
            host: env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("SERVER_PORT".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidValue(
                "SERVER_PORT cannot be 0".to_string(),
            ));
        }

        if self.host.is_empty() {
            return Err(ConfigError::InvalidValue(
                "SERVER_HOST cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(DatabaseConfig {
            url: env::var("DATABASE_URL")
                .map_err(|_| ConfigError::MissingVariable("DATABASE_URL".to_string()))?,
            max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()))?,
            min_connections: env::var("DB_MIN_CONNECTIONS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_MIN_CONNECTIONS".to_string()))?,
            connection_timeout: env::var("DB_CONNECTION_TIMEOUT")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("DB_CONNECTION_TIMEOUT".to_string()))?,
            idle_timeout: env::var("DB_IDLE_TIMEOUT")
                .ok()
                .and_then(|val| val.parse().ok()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::InvalidValue("DATABASE_URL".to_string()));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("DB_MAX_CONNECTIONS".to_string()));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidValue(
                "DB_MIN_CONNECTIONS must be <= DB_MAX_CONNECTIONS".to_string(),
            ));
        }

        Ok(())
    }
}

impl LoggingConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string()),
            format: match env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "plain".to_string())
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Plain,
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["TRACE", "DEBUG", "INFO", "WARN", "ERROR"];
        if !valid_levels.contains(&self.level.to_uppercase().as_str()) {
            return Err(ConfigError::InvalidValue("LOG_LEVEL".to_string()));
        }

        Ok(())
    }
}

impl RatesConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(RatesConfig {
            market_url: env::var("MARKET_DATA_URL")
                .unwrap_or_else(|_| "https://api.market-data.example/v1/price".to_string()),
            market_timeout_secs: env::var("MARKET_DATA_TIMEOUT_SECS")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("MARKET_DATA_TIMEOUT_SECS".to_string()))?,
            market_cache_secs: env::var("MARKET_DATA_CACHE_SECS")
                .unwrap_or_else(|_| "300".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("MARKET_DATA_CACHE_SECS".to_string()))?,
            rate_ttl_minutes: env::var("RATE_TTL_MINUTES")
                .unwrap_or_else(|_| "15".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("RATE_TTL_MINUTES".to_string()))?,
            emergency_chain_rate: env::var("EMERGENCY_CHAIN_RATE")
                .unwrap_or_else(|_| "250.0".to_string()),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.market_url.is_empty() {
            return Err(ConfigError::InvalidValue("MARKET_DATA_URL".to_string()));
        }

        if !self.market_url.starts_with("http://") && !self.market_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "MARKET_DATA_URL must be a valid URL".to_string(),
            ));
        }

        if self.rate_ttl_minutes <= 0 {
            return Err(ConfigError::InvalidValue("RATE_TTL_MINUTES".to_string()));
        }

        Ok(())
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(GatewayConfig {
            terminal_key: env::var("GATEWAY_TERMINAL_KEY").ok(),
            password: env::var("GATEWAY_PASSWORD").ok(),
            base_url: env::var("GATEWAY_BASE_URL")
                .unwrap_or_else(|_| "https://securepay.gateway.example/v2".to_string()),
            success_url: env::var("GATEWAY_SUCCESS_URL").ok(),
            timeout_secs: env::var("GATEWAY_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("GATEWAY_TIMEOUT_SECS".to_string()))?,
            max_retries: env::var("GATEWAY_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("GATEWAY_MAX_RETRIES".to_string()))?,
        })
    }
}

impl TokenConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(TokenConfig {
            bot_token: env::var("BOT_TOKEN").ok(),
            webhook_secret: env::var("BOT_WEBHOOK_SECRET").ok(),
            base_url: env::var("BOT_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.botplatform.example".to_string()),
            timeout_secs: env::var("BOT_API_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("BOT_API_TIMEOUT_SECS".to_string()))?,
            max_retries: env::var("BOT_API_MAX_RETRIES")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("BOT_API_MAX_RETRIES".to_string()))?,
        })
    }
}

impl ChainConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(ChainConfig {
            wallet_address: env::var("CHAIN_WALLET_ADDRESS").ok(),
            confirmation_threshold: env::var("CHAIN_CONFIRMATION_THRESHOLD")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .map_err(|_| {
                    ConfigError::InvalidValue("CHAIN_CONFIRMATION_THRESHOLD".to_string())
                })?,
            amount_tolerance_pct: env::var("CHAIN_AMOUNT_TOLERANCE_PCT")
                .unwrap_or_else(|_| "1".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("CHAIN_AMOUNT_TOLERANCE_PCT".to_string()))?,
            rate_lock_minutes: env::var("CHAIN_RATE_LOCK_MINUTES")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("CHAIN_RATE_LOCK_MINUTES".to_string()))?,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.confirmation_threshold <= 0 {
            return Err(ConfigError::InvalidValue(
                "CHAIN_CONFIRMATION_THRESHOLD must be positive".to_string(),
            ));
        }

        if self.rate_lock_minutes <= 0 {
            return Err(ConfigError::InvalidValue(
                "CHAIN_RATE_LOCK_MINUTES must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        };

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_port_validation() {
        let config = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0, // Invalid port
        };

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_chain_config_validation() {
        let config = ChainConfig {
            wallet_address: Some("UQDd3wallet".to_string()),
            confirmation_threshold: 10,
            amount_tolerance_pct: 1,
            rate_lock_minutes: 30,
        };
        assert!(config.validate().is_ok());

        let config = ChainConfig {
            confirmation_threshold: 0,
            ..config
        };
        assert!(config.validate().is_err());
    }
}

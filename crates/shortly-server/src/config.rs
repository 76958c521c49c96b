use std::env;
use url::Url;

use ecpay::constants::{STAGE_HASH_IV, STAGE_HASH_KEY, STAGE_HOST, STAGE_MERCHANT_ID};
use ecpay::MerchantConfig;

const DEFAULT_PORT: u16 = 4021;
const DEFAULT_DB_PATH: &str = "./shortly.db";
const DEFAULT_BACKEND_URL: &str = "http://localhost:4021";
const DEFAULT_FRONTEND_URL: &str = "http://localhost:5173";
const DEFAULT_RATE_LIMIT_RPM: u32 = 60;

#[derive(Clone)]
pub struct ServerConfig {
    /// Gateway merchant id
    pub merchant_id: String,
    /// Shared HashKey for CheckMacValue signing
    pub hash_key: String,
    /// Shared HashIV for CheckMacValue signing
    pub hash_iv: String,
    /// Gateway base URL (stage or production)
    pub gateway_host: String,
    /// Public base URL of this service; gateway callbacks are addressed here
    pub backend_url: String,
    /// Base URL the buyer's browser returns to after checkout
    pub frontend_url: String,
    /// SQLite database path
    pub db_path: String,
    /// Server port
    pub port: u16,
    /// CORS allowed origins
    pub allowed_origins: Vec<String>,
    /// Rate limit requests per minute
    pub rate_limit_rpm: u32,
    /// Enables the simulated-payment endpoint. Never set in production.
    pub dev_mode: bool,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("merchant_id", &self.merchant_id)
            .field("hash_key", &"[REDACTED]")
            .field("hash_iv", &"[REDACTED]")
            .field("gateway_host", &self.gateway_host)
            .field("backend_url", &self.backend_url)
            .field("frontend_url", &self.frontend_url)
            .field("db_path", &self.db_path)
            .field("port", &self.port)
            .field("allowed_origins", &self.allowed_origins)
            .field("rate_limit_rpm", &self.rate_limit_rpm)
            .field("dev_mode", &self.dev_mode)
            .finish()
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let merchant_id =
            env::var("ECPAY_MERCHANT_ID").unwrap_or_else(|_| STAGE_MERCHANT_ID.to_string());
        let hash_key = env::var("ECPAY_HASH_KEY").unwrap_or_else(|_| STAGE_HASH_KEY.to_string());
        let hash_iv = env::var("ECPAY_HASH_IV").unwrap_or_else(|_| STAGE_HASH_IV.to_string());

        let gateway_host =
            env::var("ECPAY_SERVICE_URL").unwrap_or_else(|_| STAGE_HOST.to_string());
        Url::parse(&gateway_host).map_err(|_| ConfigError::InvalidUrl(gateway_host.clone()))?;

        let backend_url =
            env::var("BACKEND_URL").unwrap_or_else(|_| DEFAULT_BACKEND_URL.to_string());
        Url::parse(&backend_url).map_err(|_| ConfigError::InvalidUrl(backend_url.clone()))?;

        let frontend_url =
            env::var("FRONTEND_URL").unwrap_or_else(|_| DEFAULT_FRONTEND_URL.to_string());
        Url::parse(&frontend_url).map_err(|_| ConfigError::InvalidUrl(frontend_url.clone()))?;

        let db_path = env::var("DB_PATH").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let allowed_origins: Vec<String> = env::var("ALLOWED_ORIGINS")
            .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
            .unwrap_or_else(|_| {
                vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:5173".to_string(),
                ]
            });

        let rate_limit_rpm = env::var("RATE_LIMIT_RPM")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RATE_LIMIT_RPM);

        let dev_mode = env::var("DEV_MODE")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        if hash_key == STAGE_HASH_KEY && !dev_mode {
            tracing::warn!(
                "using gateway sandbox credentials — set ECPAY_MERCHANT_ID, ECPAY_HASH_KEY \
                 and ECPAY_HASH_IV for production"
            );
        }
        if dev_mode {
            tracing::warn!(
                "⚠️  DEV_MODE=true — the simulated-payment endpoint is enabled. \
                 DO NOT use this in production!"
            );
        }

        Ok(Self {
            merchant_id,
            hash_key,
            hash_iv,
            gateway_host,
            backend_url,
            frontend_url,
            db_path,
            port,
            allowed_origins,
            rate_limit_rpm,
            dev_mode,
        })
    }

    /// Immutable merchant credentials handed to the protocol crate.
    pub fn merchant_config(&self) -> MerchantConfig {
        MerchantConfig {
            merchant_id: self.merchant_id.clone(),
            hash_key: self.hash_key.clone(),
            hash_iv: self.hash_iv.clone(),
            host: self.gateway_host.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

use crate::config::ServerConfig;
use crate::db::Database;
use ecpay::MerchantConfig;
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub merchant: Arc<MerchantConfig>,
    pub db: Arc<Database>,
}

impl AppState {
    pub fn new(config: ServerConfig, db: Database) -> Self {
        let merchant = Arc::new(config.merchant_config());
        Self {
            config: Arc::new(config),
            merchant,
            db: Arc::new(db),
        }
    }
}

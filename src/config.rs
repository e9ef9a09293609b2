use anyhow::Context;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;

use crate::provider::ProviderCredentials;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub provider_base_url: String,
    /// Merchant default credentials, used when a payer organization has no
    /// pair of its own. Optional: a deployment may rely entirely on
    /// per-organization credentials.
    pub provider_api_key: Option<String>,
    pub provider_app_id: Option<String>,
    pub provider_timeout_secs: u64,
    pub reconcile_interval_secs: u64,
    pub reconcile_batch_size: i64,
    pub reconcile_pacing_ms: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        let config = Config {
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            database_url: env::var("DATABASE_URL")?,
            provider_base_url: env::var("PROVIDER_BASE_URL")?,
            provider_api_key: env::var("PROVIDER_API_KEY").ok(),
            provider_app_id: env::var("PROVIDER_APP_ID").ok(),
            provider_timeout_secs: env::var("PROVIDER_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()?,
            reconcile_interval_secs: env::var("RECONCILE_INTERVAL_SECS")
                .unwrap_or_else(|_| "7200".to_string())
                .parse()?,
            reconcile_batch_size: env::var("RECONCILE_BATCH_SIZE")
                .unwrap_or_else(|_| "100".to_string())
                .parse()?,
            reconcile_pacing_ms: env::var("RECONCILE_PACING_MS")
                .unwrap_or_else(|_| "500".to_string())
                .parse()?,
        };

        url::Url::parse(&config.provider_base_url)
            .context("PROVIDER_BASE_URL is not a valid URL")?;

        Ok(config)
    }

    /// The merchant's default credential pair, when both halves are set.
    pub fn merchant_credentials(&self) -> Option<ProviderCredentials> {
        match (&self.provider_api_key, &self.provider_app_id) {
            (Some(api_key), Some(app_id)) => Some(ProviderCredentials {
                api_key: api_key.clone(),
                app_id: app_id.clone(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
            server_port: 3000,
            database_url: "postgres://localhost:5432/achsync".to_string(),
            provider_base_url: "https://api.provider.example".to_string(),
            provider_api_key: Some("key".to_string()),
            provider_app_id: Some("app".to_string()),
            provider_timeout_secs: 30,
            reconcile_interval_secs: 7200,
            reconcile_batch_size: 100,
            reconcile_pacing_ms: 500,
        }
    }

    #[test]
    fn test_merchant_credentials_requires_both_halves() {
        assert!(base_config().merchant_credentials().is_some());

        let mut config = base_config();
        config.provider_app_id = None;
        assert!(config.merchant_credentials().is_none());

        let mut config = base_config();
        config.provider_api_key = None;
        assert!(config.merchant_credentials().is_none());
    }
}

pub mod client;
pub mod status;

pub use client::{ProviderClient, ProviderError, ProviderGateway};

/// Credential pair sent with every provider call. Resolved per record: the
/// payer organization's own pair when one is on file, otherwise the
/// merchant's default from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCredentials {
    pub api_key: String,
    pub app_id: String,
}

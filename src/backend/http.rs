//! reqwest implementation of the ledger client

use super::{ConfirmedTransferRecord, Contact, LedgerClient, UnlockedWallet};
use crate::config::BackendConfig;
use crate::error::{WalletError, WalletResult};

use async_trait::async_trait;
use ethers::types::{Address, H256};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// HTTP client for the backend ledger service
pub struct HttpLedgerClient {
    client: Client,
    base_url: String,
}

impl HttpLedgerClient {
    pub fn new(config: &BackendConfig) -> WalletResult<Self> {
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| WalletError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    /// Turn a non-success response into `WalletError::Backend`
    async fn check(response: Response) -> WalletResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|body| body.error)
            .unwrap_or_else(|| status.canonical_reason().unwrap_or("request failed").to_string());

        Err(WalletError::Backend {
            status: status.as_u16(),
            message,
        })
    }

    async fn read_json<T: DeserializeOwned>(response: Response) -> WalletResult<T> {
        Ok(Self::check(response).await?.json::<T>().await?)
    }
}

#[async_trait]
impl LedgerClient for HttpLedgerClient {
    async fn fetch_history(&self, address: Address) -> WalletResult<Vec<ConfirmedTransferRecord>> {
        let response = self
            .client
            .get(self.url(&format!("history/{:?}", address)))
            .send()
            .await?;
        let records: Vec<ConfirmedTransferRecord> = Self::read_json(response).await?;

        debug!("Fetched {} history records for {:?}", records.len(), address);
        Ok(records)
    }

    async fn log_transaction(&self, hash: H256) -> WalletResult<()> {
        let response = self
            .client
            .post(self.url(&format!("tx/{:?}", hash)))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn unlock(&self, name: &str, password: &str) -> WalletResult<UnlockedWallet> {
        let name = name.trim().to_lowercase();
        if name.is_empty() || password.trim().is_empty() {
            return Err(WalletError::InvalidInput(
                "Name and password are required".to_string(),
            ));
        }

        let response = self
            .client
            .post(self.url(&format!("wallet/{}", name)))
            .json(&json!({ "password": password }))
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn fetch_contacts(&self, owner: Address) -> WalletResult<Vec<Contact>> {
        let response = self
            .client
            .get(self.url(&format!("contacts/{:?}", owner)))
            .send()
            .await?;
        Self::read_json(response).await
    }

    async fn add_contact(
        &self,
        owner: Address,
        name: &str,
        address: Address,
    ) -> WalletResult<()> {
        let response = self
            .client
            .post(self.url("contacts"))
            .json(&json!({
                "walletAddress": owner,
                "contactName": name,
                "contactAddress": address,
            }))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }

    async fn delete_contact(&self, id: &str) -> WalletResult<()> {
        let response = self
            .client
            .delete(self.url(&format!("contacts/{}", id)))
            .send()
            .await?;
        Self::check(response).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joining() {
        let client = HttpLedgerClient::new(&BackendConfig {
            api_url: "http://localhost:5001/api/".to_string(),
            request_timeout_secs: 5,
        })
        .unwrap();
        assert_eq!(client.url("tx/0x01"), "http://localhost:5001/api/tx/0x01");
    }

    #[tokio::test]
    async fn test_unlock_requires_credentials() {
        let client = HttpLedgerClient::new(&BackendConfig {
            api_url: "http://localhost:5001/api".to_string(),
            request_timeout_secs: 5,
        })
        .unwrap();
        let result = client.unlock("  ", "secret").await;
        assert!(matches!(result, Err(WalletError::InvalidInput(_))));
    }
}

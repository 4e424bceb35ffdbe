//! HTTP ingestion endpoint for delivery batches

use std::sync::Arc;

use async_trait::async_trait;
use diagsync_core::DeliverySink;
use diagsync_domain::constants::DELIVERY_API_KEY_HEADER;
use diagsync_domain::{DeliveryConfig, Result};
use reqwest::Method;
use serde_json::Value;

use crate::http::{ApiRequest, SignedClient};

const ACCEPTED: &[u16] = &[200, 202];

/// Posts each batch as a JSON array to the configured endpoint. Requests are
/// unsigned but still tracked by the client's in-flight registry.
pub struct HttpDeliverySink {
    client: Arc<SignedClient>,
    endpoint: String,
    api_key: String,
}

impl std::fmt::Debug for HttpDeliverySink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpDeliverySink").field("endpoint", &self.endpoint).finish_non_exhaustive()
    }
}

impl HttpDeliverySink {
    pub fn new(client: Arc<SignedClient>, endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self { client, endpoint: endpoint.into(), api_key: api_key.into() }
    }

    pub fn from_config(client: Arc<SignedClient>, config: &DeliveryConfig) -> Self {
        Self::new(client, config.endpoint.clone(), config.api_key.clone())
    }
}

#[async_trait]
impl DeliverySink for HttpDeliverySink {
    async fn deliver(&self, records: Vec<Value>) -> Result<()> {
        let request = ApiRequest::external(Method::POST, self.endpoint.clone())
            .json(&records)?
            .header(DELIVERY_API_KEY_HEADER, self.api_key.clone())
            .accept(ACCEPTED);
        self.client.non_blocking_request(request).await?;
        Ok(())
    }
}

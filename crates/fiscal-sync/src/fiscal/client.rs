//! Timeout-enforcing wrapper around a [`FiscalBackend`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use fiscal_core::{BackendConfig, BackendStatus, ConfirmationId, Invoice, SignedInvoice};

use super::{FiscalBackend, FiscalResult};
use crate::error::FiscalError;

/// The only way the agent talks to the fiscal backend.
///
/// Every call is bounded by `timeout`; an expired call is reported as
/// `FiscalError::Unreachable`.
#[derive(Clone)]
pub struct FiscalClient {
    backend: Arc<dyn FiscalBackend>,
    timeout: Duration,
}

impl std::fmt::Debug for FiscalClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiscalClient")
            .field("backend", &self.backend.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl FiscalClient {
    pub fn new(backend: Arc<dyn FiscalBackend>, timeout: Duration) -> Self {
        FiscalClient { backend, timeout }
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn call<T, F>(&self, op: &'static str, fut: F) -> FiscalResult<T>
    where
        F: Future<Output = FiscalResult<T>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => {
                debug!(op, backend = self.backend.name(), "Fiscal call succeeded");
                Ok(value)
            }
            Ok(Err(e)) => {
                debug!(op, backend = self.backend.name(), error = %e, "Fiscal call failed");
                Err(e)
            }
            Err(_) => {
                warn!(op, timeout = ?self.timeout, "Fiscal call timed out");
                Err(FiscalError::Unreachable(format!(
                    "{} timed out after {:?}",
                    op, self.timeout
                )))
            }
        }
    }

    pub async fn open_day(&self, day_no: i64) -> FiscalResult<()> {
        self.call("open_day", self.backend.open_day(day_no)).await
    }

    pub async fn close_day(&self, day_no: i64) -> FiscalResult<()> {
        self.call("close_day", self.backend.close_day(day_no)).await
    }

    pub async fn sign(&self, invoice: &Invoice) -> FiscalResult<SignedInvoice> {
        self.call("sign", self.backend.sign(invoice)).await
    }

    pub async fn send(&self, signed: &SignedInvoice) -> FiscalResult<ConfirmationId> {
        self.call("send", self.backend.send(signed)).await
    }

    pub async fn get_status(&self) -> FiscalResult<BackendStatus> {
        self.call("get_status", self.backend.get_status()).await
    }

    pub async fn get_config(&self) -> FiscalResult<BackendConfig> {
        self.call("get_config", self.backend.get_config()).await
    }

    pub async fn find_confirmation(&self, invoice: &Invoice) -> FiscalResult<Option<ConfirmationId>> {
        self.call("find_confirmation", self.backend.find_confirmation(invoice))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fiscal::SimulatedBackend;

    #[tokio::test]
    async fn test_timeout_becomes_unreachable() {
        let backend = Arc::new(SimulatedBackend::new().with_latency(Duration::from_millis(200)));
        let client = FiscalClient::new(backend, Duration::from_millis(20));

        let err = client.get_status().await.unwrap_err();
        assert!(err.is_unreachable());
        assert!(err.reason().contains("get_status"));
    }

    #[tokio::test]
    async fn test_passes_through_results() {
        let backend = Arc::new(SimulatedBackend::new());
        let client = FiscalClient::new(backend, Duration::from_secs(1));

        client.open_day(1).await.unwrap();
        assert!(client.get_status().await.unwrap().day_open);
        assert_eq!(client.backend_name(), "simulated");
    }
}

//! # HTTP Fiscal Backend
//!
//! JSON-over-HTTP implementation of [`FiscalBackend`].
//!
//! ## Endpoints
//! ```text
//! ┌──────────────────────────────────────────┬──────────────────────────────┐
//! │ Request                                  │ Response                     │
//! ├──────────────────────────────────────────┼──────────────────────────────┤
//! │ POST /day/open          {day_no}         │ 2xx                          │
//! │ POST /day/close         {day_no}         │ 2xx                          │
//! │ POST /invoices/sign     {invoice_id,..}  │ {signature}                  │
//! │ POST /invoices/send     SignedInvoice    │ {confirmation_id}            │
//! │ GET  /status                             │ BackendStatus                │
//! │ GET  /config                             │ BackendConfig                │
//! │ GET  /invoices/{number}/confirmation     │ {confirmation_id} or 404     │
//! └──────────────────────────────────────────┴──────────────────────────────┘
//! ```
//!
//! ## Classification
//! | outcome                                  | FiscalError  |
//! |------------------------------------------|--------------|
//! | connect failure, timeout                 | Unreachable  |
//! | 400, 401, 403, 404, 409, 422             | Rejected     |
//! | 408, 429, 5xx, undecodable body          | Transient    |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use url::Url;

use fiscal_core::{BackendConfig, BackendStatus, ConfirmationId, Invoice, SignedInvoice};

use super::{FiscalBackend, FiscalResult};
use crate::error::{FiscalError, SyncError, SyncResult};

/// Longest slice of an error body kept in a failure reason.
const MAX_REASON_LEN: usize = 200;

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Serialize)]
struct DayRequest {
    day_no: i64,
}

#[derive(Debug, Serialize)]
struct SignRequest<'a> {
    invoice_id: &'a str,
    number: &'a str,
    amount: i64,
}

#[derive(Debug, Deserialize)]
struct SignResponse {
    signature: String,
}

#[derive(Debug, Deserialize)]
struct ConfirmationResponse {
    confirmation_id: String,
}

// =============================================================================
// Backend
// =============================================================================

/// Fiscal backend reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: Url,
}

impl HttpBackend {
    /// Creates a backend for `base_url`.
    ///
    /// `timeout` bounds each request at the transport level; the
    /// `FiscalClient` wrapper applies its own bound on top.
    pub fn new(base_url: &str, timeout: Duration) -> SyncResult<Self> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(SyncError::InvalidUrl(format!(
                "{} cannot be used as a base URL",
                base_url
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| SyncError::InvalidConfig(format!("HTTP client: {}", e)))?;

        Ok(HttpBackend { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Appends path segments to the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> FiscalResult<T> {
        let response = self
            .client
            .get(self.endpoint(segments))
            .send()
            .await
            .map_err(classify_transport)?;
        Self::handle_response(response).await
    }

    async fn post<B: Serialize, T: DeserializeOwned>(
        &self,
        segments: &[&str],
        body: &B,
    ) -> FiscalResult<T> {
        let response = self
            .client
            .post(self.endpoint(segments))
            .json(body)
            .send()
            .await
            .map_err(classify_transport)?;
        Self::handle_response(response).await
    }

    async fn post_ack<B: Serialize>(&self, segments: &[&str], body: &B) -> FiscalResult<()> {
        let response = self
            .client
            .post(self.endpoint(segments))
            .json(body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(classify_status(status, response).await)
    }

    async fn handle_response<T: DeserializeOwned>(response: Response) -> FiscalResult<T> {
        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, response).await);
        }

        response
            .json()
            .await
            .map_err(|e| FiscalError::Transient(format!("invalid response body: {}", e)))
    }
}

#[async_trait]
impl FiscalBackend for HttpBackend {
    fn name(&self) -> &str {
        "http"
    }

    async fn open_day(&self, day_no: i64) -> FiscalResult<()> {
        self.post_ack(&["day", "open"], &DayRequest { day_no }).await
    }

    async fn close_day(&self, day_no: i64) -> FiscalResult<()> {
        self.post_ack(&["day", "close"], &DayRequest { day_no }).await
    }

    async fn sign(&self, invoice: &Invoice) -> FiscalResult<SignedInvoice> {
        let request = SignRequest {
            invoice_id: &invoice.id,
            number: &invoice.number,
            amount: invoice.amount_minor,
        };
        let response: SignResponse = self.post(&["invoices", "sign"], &request).await?;

        Ok(SignedInvoice {
            invoice_id: invoice.id.clone(),
            number: invoice.number.clone(),
            amount: invoice.amount(),
            signature: response.signature,
        })
    }

    async fn send(&self, signed: &SignedInvoice) -> FiscalResult<ConfirmationId> {
        let response: ConfirmationResponse = self.post(&["invoices", "send"], signed).await?;
        Ok(ConfirmationId(response.confirmation_id))
    }

    async fn get_status(&self) -> FiscalResult<BackendStatus> {
        self.get(&["status"]).await
    }

    async fn get_config(&self) -> FiscalResult<BackendConfig> {
        self.get(&["config"]).await
    }

    async fn find_confirmation(&self, invoice: &Invoice) -> FiscalResult<Option<ConfirmationId>> {
        let response = self
            .client
            .get(self.endpoint(&["invoices", &invoice.number, "confirmation"]))
            .send()
            .await
            .map_err(classify_transport)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body: ConfirmationResponse = Self::handle_response(response).await?;
        Ok(Some(ConfirmationId(body.confirmation_id)))
    }
}

// =============================================================================
// Classification
// =============================================================================

fn classify_transport(err: reqwest::Error) -> FiscalError {
    if err.is_connect() || err.is_timeout() {
        FiscalError::Unreachable(err.to_string())
    } else if err.is_builder() {
        FiscalError::Rejected(err.to_string())
    } else {
        FiscalError::Transient(err.to_string())
    }
}

async fn classify_status(status: StatusCode, response: Response) -> FiscalError {
    let mut reason = response.text().await.unwrap_or_default();
    if reason.len() > MAX_REASON_LEN {
        let mut cut = MAX_REASON_LEN;
        while !reason.is_char_boundary(cut) {
            cut -= 1;
        }
        reason.truncate(cut);
    }
    let reason = if reason.trim().is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status.as_u16(), reason.trim())
    };

    match status {
        StatusCode::BAD_REQUEST
        | StatusCode::UNAUTHORIZED
        | StatusCode::FORBIDDEN
        | StatusCode::NOT_FOUND
        | StatusCode::CONFLICT
        | StatusCode::UNPROCESSABLE_ENTITY => FiscalError::Rejected(reason),
        _ => FiscalError::Transient(reason),
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

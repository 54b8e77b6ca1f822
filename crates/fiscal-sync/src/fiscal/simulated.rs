//! # Simulated Fiscal Backend
//!
//! In-process backend used in demo mode and throughout the test suite.
//!
//! Behaves like a well-formed fiscal backend: signatures and confirmation
//! ids are deterministic, and `send` is idempotent per invoice number.
//! Failures are scripted per operation:
//!
//! ```text
//! backend.fail_next(FiscalOp::Send, FiscalError::Transient("503".into()), 2);
//! backend.set_reachable(false);   // every call -> Unreachable
//! ```
//!
//! It also records what it saw so tests can assert ordering and the
//! one-call-per-invoice guarantee.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use fiscal_core::{BackendConfig, BackendStatus, ConfirmationId, Invoice, SignedInvoice};

use super::{FiscalBackend, FiscalResult};
use crate::error::FiscalError;

/// Backend operations, for scripting failures and counting calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FiscalOp {
    OpenDay,
    CloseDay,
    Sign,
    Send,
    Status,
    Config,
    FindConfirmation,
}

#[derive(Debug)]
struct Script {
    error: FiscalError,
    /// `None` fails forever.
    remaining: Option<u32>,
}

#[derive(Debug)]
struct State {
    reachable: bool,
    day_open: bool,
    day_no: i64,
    scripts: HashMap<FiscalOp, Script>,
    calls: HashMap<FiscalOp, u32>,
    signatures_issued: u64,
    /// invoice number -> confirmation
    registered: HashMap<String, ConfirmationId>,
    /// Numbers in the order they were first registered.
    sent_numbers: Vec<String>,
    in_flight: HashMap<String, u32>,
    max_concurrent_per_invoice: u32,
}

/// Scriptable in-memory fiscal backend.
#[derive(Debug, Clone)]
pub struct SimulatedBackend {
    state: Arc<Mutex<State>>,
    latency: Duration,
    config: BackendConfig,
}

impl Default for SimulatedBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracks one in-flight sign/send per invoice. Released on drop, so a call
/// cancelled by a timeout still counts as finished.
struct InFlight {
    state: Arc<Mutex<State>>,
    invoice_id: String,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        if let Some(n) = state.in_flight.get_mut(&self.invoice_id) {
            *n = n.saturating_sub(1);
        }
    }
}

fn lock(state: &Mutex<State>) -> MutexGuard<'_, State> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SimulatedBackend {
    pub fn new() -> Self {
        SimulatedBackend {
            state: Arc::new(Mutex::new(State {
                reachable: true,
                day_open: false,
                day_no: 0,
                scripts: HashMap::new(),
                calls: HashMap::new(),
                signatures_issued: 0,
                registered: HashMap::new(),
                sent_numbers: Vec::new(),
                in_flight: HashMap::new(),
                max_concurrent_per_invoice: 0,
            })),
            latency: Duration::ZERO,
            config: BackendConfig {
                taxpayer_id: "000000000".to_string(),
                device_id: "SIM-0001".to_string(),
                business_name: "Simulated Business".to_string(),
            },
        }
    }

    /// Delays every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_config(mut self, config: BackendConfig) -> Self {
        self.config = config;
        self
    }

    // =========================================================================
    // Scripting
    // =========================================================================

    /// While unreachable every call fails with `Unreachable`.
    pub fn set_reachable(&self, reachable: bool) {
        lock(&self.state).reachable = reachable;
    }

    /// The next `times` calls of `op` fail with `error`.
    pub fn fail_next(&self, op: FiscalOp, error: FiscalError, times: u32) {
        lock(&self.state).scripts.insert(
            op,
            Script {
                error,
                remaining: Some(times),
            },
        );
    }

    /// Every call of `op` fails with `error` until cleared.
    pub fn fail_always(&self, op: FiscalOp, error: FiscalError) {
        lock(&self.state).scripts.insert(op, Script { error, remaining: None });
    }

    pub fn clear_failures(&self) {
        lock(&self.state).scripts.clear();
    }

    /// Registers `number` as if a send had succeeded earlier.
    pub fn preregister(&self, number: &str) -> ConfirmationId {
        let mut state = lock(&self.state);
        Self::register(&mut state, number)
    }

    // =========================================================================
    // Observations
    // =========================================================================

    /// Invoice numbers in the order the backend first registered them.
    pub fn sent_numbers(&self) -> Vec<String> {
        lock(&self.state).sent_numbers.clone()
    }

    pub fn calls(&self, op: FiscalOp) -> u32 {
        lock(&self.state).calls.get(&op).copied().unwrap_or(0)
    }

    /// Highest number of simultaneous sign/send calls seen for one invoice.
    pub fn max_concurrent_per_invoice(&self) -> u32 {
        lock(&self.state).max_concurrent_per_invoice
    }

    pub fn is_day_open(&self) -> bool {
        lock(&self.state).day_open
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn register(state: &mut State, number: &str) -> ConfirmationId {
        if let Some(existing) = state.registered.get(number) {
            return existing.clone();
        }
        let confirmation = ConfirmationId(format!(
            "CONF-{}-{:06}",
            state.day_no,
            state.sent_numbers.len() + 1
        ));
        state.registered.insert(number.to_string(), confirmation.clone());
        state.sent_numbers.push(number.to_string());
        confirmation
    }

    /// Counts the call, then applies reachability and scripted failures.
    fn check(&self, op: FiscalOp) -> FiscalResult<()> {
        let mut state = lock(&self.state);
        *state.calls.entry(op).or_insert(0) += 1;

        if !state.reachable {
            return Err(FiscalError::Unreachable("connection refused".to_string()));
        }

        let (error, exhausted) = match state.scripts.get_mut(&op) {
            None => return Ok(()),
            Some(script) => match script.remaining.as_mut() {
                None => (Some(script.error.clone()), false),
                Some(0) => (None, true),
                Some(n) => {
                    *n -= 1;
                    (Some(script.error.clone()), *n == 0)
                }
            },
        };

        if exhausted {
            state.scripts.remove(&op);
        }
        match error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn enter(&self, invoice_id: &str) -> InFlight {
        let mut state = lock(&self.state);
        let n = state.in_flight.entry(invoice_id.to_string()).or_insert(0);
        *n += 1;
        let current = *n;
        if current > state.max_concurrent_per_invoice {
            state.max_concurrent_per_invoice = current;
        }
        InFlight {
            state: Arc::clone(&self.state),
            invoice_id: invoice_id.to_string(),
        }
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

#[async_trait]
impl FiscalBackend for SimulatedBackend {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn open_day(&self, day_no: i64) -> FiscalResult<()> {
        self.delay().await;
        self.check(FiscalOp::OpenDay)?;
        let mut state = lock(&self.state);
        state.day_open = true;
        state.day_no = day_no;
        Ok(())
    }

    async fn close_day(&self, _day_no: i64) -> FiscalResult<()> {
        self.delay().await;
        self.check(FiscalOp::CloseDay)?;
        lock(&self.state).day_open = false;
        Ok(())
    }

    async fn sign(&self, invoice: &Invoice) -> FiscalResult<SignedInvoice> {
        let _guard = self.enter(&invoice.id);
        self.delay().await;
        self.check(FiscalOp::Sign)?;

        let mut state = lock(&self.state);
        state.signatures_issued += 1;
        let signature = format!(
            "SIG:{}:{}:{}",
            invoice.number, invoice.amount_minor, state.signatures_issued
        );

        Ok(SignedInvoice {
            invoice_id: invoice.id.clone(),
            number: invoice.number.clone(),
            amount: invoice.amount(),
            signature,
        })
    }

    async fn send(&self, signed: &SignedInvoice) -> FiscalResult<ConfirmationId> {
        let _guard = self.enter(&signed.invoice_id);
        self.delay().await;
        self.check(FiscalOp::Send)?;

        let mut state = lock(&self.state);
        Ok(Self::register(&mut state, &signed.number))
    }

    async fn get_status(&self) -> FiscalResult<BackendStatus> {
        self.delay().await;
        self.check(FiscalOp::Status)?;
        Ok(BackendStatus {
            day_open: lock(&self.state).day_open,
            description: "simulated fiscal backend".to_string(),
        })
    }

    async fn get_config(&self) -> FiscalResult<BackendConfig> {
        self.delay().await;
        self.check(FiscalOp::Config)?;
        Ok(self.config.clone())
    }

    async fn find_confirmation(&self, invoice: &Invoice) -> FiscalResult<Option<ConfirmationId>> {
        self.delay().await;
        self.check(FiscalOp::FindConfirmation)?;
        Ok(lock(&self.state).registered.get(&invoice.number).cloned())
    }
}

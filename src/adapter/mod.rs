//! Supplier adapters
//!
//! Polymorphism over the fulfillment capability set. Each concrete adapter
//! encapsulates its own upstream protocol; the dispatcher only sees this
//! trait. Transport problems (connection, deadline) are errors so the
//! orchestrator can tell a known failure from an unknown outcome; business
//! refusals come back as `Ok` responses with `success = false`.

pub mod sim;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::domain::{Product, SupplierRequest, SupplierResponse};

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("no adapter registered for supplier code {0}")]
    NotFound(String),
    #[error("supplier transport error: {0}")]
    Transport(String),
    #[error("supplier call timed out, outcome unknown")]
    Timeout,
    #[error("unparseable supplier response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait SupplierAdapter: Send + Sync {
    /// Execute a top-up. Callers bound the call with their own deadline; the
    /// implementation must not block past it.
    async fn top_up(&self, request: &SupplierRequest) -> Result<SupplierResponse, AdapterError>;
    /// Current deposit balance at the supplier.
    async fn check_balance(&self) -> Result<Decimal, AdapterError>;
    /// Look up the outcome of a previously submitted request by our ref id.
    async fn check_status(&self, ref_id: &str) -> Result<SupplierResponse, AdapterError>;
    /// Supplier-side product catalog.
    async fn catalog(&self) -> Result<Vec<Product>, AdapterError>;
    /// Translate a raw upstream payload into the common response shape.
    fn parse_response(&self, raw: &[u8]) -> Result<SupplierResponse, AdapterError>;
}

impl std::fmt::Debug for dyn SupplierAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("<dyn SupplierAdapter>")
    }
}

/// Thread-safe adapter registry keyed by normalized (trimmed, uppercased)
/// supplier code. Read-mostly: registration happens at startup.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<String, Arc<dyn SupplierAdapter>>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, code: &str, adapter: Arc<dyn SupplierAdapter>) {
        let normalized = normalize_code(code);
        if normalized.is_empty() {
            return;
        }
        self.adapters
            .write()
            .expect("adapter registry poisoned")
            .insert(normalized, adapter);
    }

    pub fn get(&self, code: &str) -> Result<Arc<dyn SupplierAdapter>, AdapterError> {
        let normalized = normalize_code(code);
        self.adapters
            .read()
            .expect("adapter registry poisoned")
            .get(&normalized)
            .cloned()
            .ok_or(AdapterError::NotFound(normalized))
    }

    pub fn len(&self) -> usize {
        self.adapters
            .read()
            .expect("adapter registry poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

/// Scripted adapter for tests: plays back a queue of canned outcomes and
/// counts calls.
pub struct StaticAdapter {
    outcomes: std::sync::Mutex<std::collections::VecDeque<Result<SupplierResponse, AdapterError>>>,
    status_outcome: std::sync::Mutex<Option<Result<SupplierResponse, AdapterError>>>,
    pub calls: std::sync::atomic::AtomicUsize,
}

impl StaticAdapter {
    pub fn new() -> Self {
        Self {
            outcomes: std::sync::Mutex::new(std::collections::VecDeque::new()),
            status_outcome: std::sync::Mutex::new(None),
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn succeeding(serial: &str) -> Self {
        let adapter = Self::new();
        adapter.push_success(serial);
        adapter
    }

    pub fn push_success(&self, serial: &str) {
        self.push(Ok(SupplierResponse {
            success: true,
            message: "OK".into(),
            trx_id: format!("UP-{serial}"),
            serial_number: serial.to_string(),
            status_code: 0,
            response_time_ms: 120,
            data: HashMap::new(),
        }));
    }

    pub fn push_refusal(&self, message: &str) {
        self.push(Ok(SupplierResponse {
            success: false,
            message: message.to_string(),
            status_code: 40,
            response_time_ms: 90,
            ..SupplierResponse::default()
        }));
    }

    pub fn push_transport_error(&self, message: &str) {
        self.push(Err(AdapterError::Transport(message.to_string())));
    }

    pub fn push(&self, outcome: Result<SupplierResponse, AdapterError>) {
        self.outcomes
            .lock()
            .expect("outcome queue poisoned")
            .push_back(outcome);
    }

    pub fn set_status_outcome(&self, outcome: Result<SupplierResponse, AdapterError>) {
        *self.status_outcome.lock().expect("status slot poisoned") = Some(outcome);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn clone_outcome(
        outcome: &Result<SupplierResponse, AdapterError>,
    ) -> Result<SupplierResponse, AdapterError> {
        match outcome {
            Ok(resp) => Ok(resp.clone()),
            Err(AdapterError::NotFound(s)) => Err(AdapterError::NotFound(s.clone())),
            Err(AdapterError::Transport(s)) => Err(AdapterError::Transport(s.clone())),
            Err(AdapterError::Timeout) => Err(AdapterError::Timeout),
            Err(AdapterError::InvalidResponse(s)) => Err(AdapterError::InvalidResponse(s.clone())),
        }
    }
}

impl Default for StaticAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SupplierAdapter for StaticAdapter {
    async fn top_up(&self, _request: &SupplierRequest) -> Result<SupplierResponse, AdapterError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut queue = self.outcomes.lock().expect("outcome queue poisoned");
        match queue.pop_front() {
            Some(outcome) => outcome,
            None => Err(AdapterError::Transport("no scripted outcome left".into())),
        }
    }

    async fn check_balance(&self) -> Result<Decimal, AdapterError> {
        Ok(Decimal::ZERO)
    }

    async fn check_status(&self, _ref_id: &str) -> Result<SupplierResponse, AdapterError> {
        let slot = self.status_outcome.lock().expect("status slot poisoned");
        match slot.as_ref() {
            Some(outcome) => Self::clone_outcome(outcome),
            None => Err(AdapterError::Transport("status unavailable".into())),
        }
    }

    async fn catalog(&self) -> Result<Vec<Product>, AdapterError> {
        Ok(Vec::new())
    }

    fn parse_response(&self, raw: &[u8]) -> Result<SupplierResponse, AdapterError> {
        serde_json::from_slice(raw).map_err(|e| AdapterError::InvalidResponse(e.to_string()))
    }
}

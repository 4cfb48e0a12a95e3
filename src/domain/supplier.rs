//! Upstream fulfillment suppliers
//!
//! Carries the per-supplier health rule and the rolling performance metrics
//! (success rate, EWMA response time) that feed the routing scorer.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Minimum success rate (percent) for a supplier to count as healthy.
pub const MIN_HEALTHY_SUCCESS_RATE: f64 = 50.0;

/// EWMA weight kept for the previous average response time.
const EWMA_OLD_WEIGHT: f64 = 0.7;
/// EWMA weight given to the newest observation.
const EWMA_NEW_WEIGHT: f64 = 0.3;

/// An upstream provider able to fulfill product mappings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Supplier {
    pub id: Uuid,
    pub name: String,
    /// Unique, uppercase. Also the adapter registry key.
    pub code: String,

    pub is_active: bool,
    /// Lower is preferred.
    pub priority: i32,
    pub timeout_seconds: u32,
    pub retry_attempts: u32,

    pub balance: Decimal,
    pub min_balance_threshold: Decimal,

    /// Percent in `[0, 100]`.
    pub success_rate: f64,
    pub avg_response_time_ms: i64,
    pub total_transactions: i64,
    pub failed_transactions: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
}

impl Supplier {
    /// Healthy ⇔ active, success rate at or above threshold, balance at or
    /// above the configured minimum.
    pub fn is_healthy(&self) -> bool {
        self.is_active
            && self.success_rate >= MIN_HEALTHY_SUCCESS_RATE
            && self.balance >= self.min_balance_threshold
    }

    /// Fold one observed attempt into the rolling metrics.
    ///
    /// The first response-time observation seeds the average; afterwards the
    /// EWMA keeps 70% of the old value and takes 30% of the new one.
    pub fn apply_observation(&mut self, success: bool, response_time_ms: i64, now: DateTime<Utc>) {
        self.total_transactions += 1;
        if !success {
            self.failed_transactions += 1;
        }
        self.success_rate = (self.total_transactions - self.failed_transactions) as f64
            / self.total_transactions as f64
            * 100.0;

        if self.avg_response_time_ms == 0 {
            self.avg_response_time_ms = response_time_ms;
        } else {
            self.avg_response_time_ms = (self.avg_response_time_ms as f64 * EWMA_OLD_WEIGHT
                + response_time_ms as f64 * EWMA_NEW_WEIGHT)
                .round() as i64;
        }

        if success {
            self.last_success_at = Some(now);
        }
        self.last_checked_at = Some(now);
    }
}

/// Request handed to a supplier adapter for fulfillment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierRequest {
    pub product_code: String,
    pub destination_number: String,
    /// Our external reference (the trx code); suppliers echo it back.
    pub ref_id: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub additional_data: HashMap<String, String>,
}

/// Response from a supplier adapter.
///
/// `success = false` is a business-level refusal (wrong destination, product
/// disabled upstream); transport problems are adapter errors instead.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SupplierResponse {
    pub success: bool,
    pub message: String,
    pub trx_id: String,
    pub serial_number: String,
    pub status_code: i32,
    pub response_time_ms: i64,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, serde_json::Value>,
}

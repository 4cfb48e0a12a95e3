//! Simulator adapter
//!
//! Stands in for an upstream supplier when a config block is marked
//! `testing: true`. Latency and outcome are drawn from the configured
//! profile so routing and retry behavior can be exercised end to end without
//! upstream credentials.

use async_trait::async_trait;
use rand::Rng;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;

use super::{AdapterError, SupplierAdapter};
use crate::domain::{Product, SupplierRequest, SupplierResponse};

pub struct SimAdapter {
    /// Probability of a successful top-up in `[0, 1]`.
    success_ratio: f64,
    /// Mean simulated latency.
    latency_ms: u64,
}

impl SimAdapter {
    pub fn new(success_ratio: f64, latency_ms: u64) -> Self {
        Self {
            success_ratio: success_ratio.clamp(0.0, 1.0),
            latency_ms,
        }
    }
}

impl Default for SimAdapter {
    fn default() -> Self {
        Self::new(0.9, 150)
    }
}

#[async_trait]
impl SupplierAdapter for SimAdapter {
    async fn top_up(&self, request: &SupplierRequest) -> Result<SupplierResponse, AdapterError> {
        let (latency, roll): (u64, f64) = {
            let mut rng = rand::thread_rng();
            (
                rng.gen_range(self.latency_ms / 2..=self.latency_ms * 3 / 2 + 1),
                rng.gen_range(0.0..1.0),
            )
        };
        tokio::time::sleep(Duration::from_millis(latency)).await;

        if roll < self.success_ratio {
            let serial: String = {
                let mut rng = rand::thread_rng();
                (0..12)
                    .map(|_| {
                        const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
                        CHARSET[rng.gen_range(0..CHARSET.len())] as char
                    })
                    .collect()
            };
            Ok(SupplierResponse {
                success: true,
                message: "Transaksi berhasil".into(),
                trx_id: format!("SIM-{}", request.ref_id),
                serial_number: serial,
                status_code: 0,
                response_time_ms: latency as i64,
                data: HashMap::new(),
            })
        } else {
            Ok(SupplierResponse {
                success: false,
                message: "Transaksi gagal di supplier".into(),
                status_code: 50,
                response_time_ms: latency as i64,
                ..SupplierResponse::default()
            })
        }
    }

    async fn check_balance(&self) -> Result<Decimal, AdapterError> {
        Ok(Decimal::new(100_000_000, 0))
    }

    async fn check_status(&self, ref_id: &str) -> Result<SupplierResponse, AdapterError> {
        Ok(SupplierResponse {
            success: false,
            message: format!("no record for {ref_id}"),
            status_code: 44,
            ..SupplierResponse::default()
        })
    }

    async fn catalog(&self) -> Result<Vec<Product>, AdapterError> {
        Ok(Vec::new())
    }

    fn parse_response(&self, raw: &[u8]) -> Result<SupplierResponse, AdapterError> {
        serde_json::from_slice(raw).map_err(|e| AdapterError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_always_succeeding_profile() {
        let adapter = SimAdapter::new(1.0, 2);
        let req = SupplierRequest {
            product_code: "T10".into(),
            destination_number: "628123456789".into(),
            ref_id: "TRX-20260314-0042".into(),
            additional_data: HashMap::new(),
        };
        let resp = adapter.top_up(&req).await.unwrap();
        assert!(resp.success);
        assert_eq!(resp.trx_id, "SIM-TRX-20260314-0042");
        assert_eq!(resp.serial_number.len(), 12);
    }

    #[tokio::test]
    async fn test_always_failing_profile() {
        let adapter = SimAdapter::new(0.0, 2);
        let req = SupplierRequest {
            product_code: "T10".into(),
            destination_number: "628123456789".into(),
            ref_id: "TRX-20260314-0043".into(),
            additional_data: HashMap::new(),
        };
        let resp = adapter.top_up(&req).await.unwrap();
        assert!(!resp.success);
    }
}

//! Smart routing
//!
//! Scores the healthy suppliers mapped to a product and yields an ordered
//! failover list. The ranking core is a pure function of the gathered
//! candidate data and the criteria: identical inputs produce the identical
//! order, confidence, and reason.

use rustc_hash::FxHashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{ProductMapping, StockStatus, Supplier};
use crate::store::{MappingStore, StoreError, SupplierStore};

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("no active mappings for product")]
    NoMappings,
    #[error("no healthy supplier available")]
    NoHealthySupplier,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Knobs for a routing decision.
#[derive(Debug, Clone)]
pub struct RoutingCriteria {
    /// Degenerate mode: rank by priority alone.
    pub priority_only: bool,
    pub prefer_cheapest: bool,
    pub prefer_fastest: bool,
    pub prefer_reliable: bool,
    /// Upper bound on selected + alternatives.
    pub max_suppliers: usize,
    /// Candidates below this success rate (percent) are dropped.
    pub min_success_rate: f64,
}

impl Default for RoutingCriteria {
    fn default() -> Self {
        Self {
            priority_only: false,
            prefer_cheapest: false,
            prefer_fastest: false,
            prefer_reliable: false,
            max_suppliers: 5,
            min_success_rate: 50.0,
        }
    }
}

impl RoutingCriteria {
    pub fn reliable_failover(max_suppliers: usize) -> Self {
        Self {
            prefer_reliable: true,
            max_suppliers,
            ..Self::default()
        }
    }
}

/// A supplier/mapping pair eligible for a product.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub supplier: Supplier,
    pub mapping: ProductMapping,
}

/// One ranked candidate with its factor breakdown.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub supplier: Supplier,
    pub mapping: ProductMapping,
    pub total_score: f64,
    pub confidence: f64,
    pub reason: String,
    pub breakdown: FxHashMap<&'static str, f64>,
}

/// Routing decision: the winner plus the ordered failover tail.
#[derive(Debug, Clone)]
pub struct RoutingResult {
    pub selected: Supplier,
    pub selected_mapping: ProductMapping,
    pub confidence: f64,
    pub reason: String,
    pub alternatives: Vec<ScoredCandidate>,
}

/// Fleet-level view used by operators.
#[derive(Debug, Clone, Default)]
pub struct RoutingStats {
    pub total_suppliers: usize,
    pub healthy_suppliers: usize,
    pub avg_success_rate: f64,
    pub avg_response_time_ms: f64,
    pub suppliers: Vec<SupplierHealth>,
}

#[derive(Debug, Clone)]
pub struct SupplierHealth {
    pub code: String,
    pub success_rate: f64,
    pub avg_response_time_ms: i64,
    pub total_transactions: i64,
    pub is_healthy: bool,
}

pub struct RoutingScorer {
    suppliers: Arc<dyn SupplierStore>,
    mappings: Arc<dyn MappingStore>,
}

impl RoutingScorer {
    pub fn new(suppliers: Arc<dyn SupplierStore>, mappings: Arc<dyn MappingStore>) -> Self {
        Self {
            suppliers,
            mappings,
        }
    }

    /// Gather candidates for the product and rank them.
    pub async fn score(
        &self,
        product_id: Uuid,
        criteria: &RoutingCriteria,
    ) -> Result<RoutingResult, RoutingError> {
        let mappings = self.mappings.active_mappings(product_id).await?;
        if mappings.is_empty() {
            return Err(RoutingError::NoMappings);
        }

        let mut candidates = Vec::with_capacity(mappings.len());
        for mapping in mappings {
            let supplier = match self.suppliers.get(mapping.supplier_id).await {
                Ok(s) => s,
                Err(StoreError::SupplierNotFound) => {
                    tracing::warn!(
                        supplier_id = %mapping.supplier_id,
                        mapping_id = %mapping.id,
                        "mapping points at missing supplier, skipping"
                    );
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if !supplier.is_healthy() || supplier.success_rate < criteria.min_success_rate {
                tracing::debug!(
                    supplier_code = %supplier.code,
                    success_rate = supplier.success_rate,
                    "skipping unhealthy supplier"
                );
                continue;
            }
            candidates.push(Candidate { supplier, mapping });
        }

        if candidates.is_empty() {
            return Err(RoutingError::NoHealthySupplier);
        }

        let mut ranked = rank(candidates, criteria);
        let best = ranked.remove(0);
        ranked.truncate(criteria.max_suppliers.saturating_sub(1));

        tracing::info!(
            product_id = %product_id,
            selected = %best.supplier.code,
            confidence = best.confidence,
            reason = %best.reason,
            alternatives = ranked.len(),
            "routing decision"
        );

        Ok(RoutingResult {
            selected: best.supplier,
            selected_mapping: best.mapping,
            confidence: best.confidence,
            reason: best.reason,
            alternatives: ranked,
        })
    }

    pub async fn stats(&self) -> Result<RoutingStats, RoutingError> {
        let suppliers = self.suppliers.list_active().await?;
        let mut stats = RoutingStats {
            total_suppliers: suppliers.len(),
            ..RoutingStats::default()
        };

        let mut sum_rate = 0.0;
        let mut sum_rtt = 0.0;
        for supplier in &suppliers {
            if supplier.is_healthy() {
                stats.healthy_suppliers += 1;
            }
            sum_rate += supplier.success_rate;
            sum_rtt += supplier.avg_response_time_ms as f64;
            stats.suppliers.push(SupplierHealth {
                code: supplier.code.clone(),
                success_rate: supplier.success_rate,
                avg_response_time_ms: supplier.avg_response_time_ms,
                total_transactions: supplier.total_transactions,
                is_healthy: supplier.is_healthy(),
            });
        }
        if !suppliers.is_empty() {
            stats.avg_success_rate = sum_rate / suppliers.len() as f64;
            stats.avg_response_time_ms = sum_rtt / suppliers.len() as f64;
        }

        Ok(stats)
    }
}

/// Pure ranking core. Sorted best-first with the deterministic tie-break
/// `(total_score desc, priority asc, supplier id asc)`.
pub fn rank(candidates: Vec<Candidate>, criteria: &RoutingCriteria) -> Vec<ScoredCandidate> {
    // Cross-candidate context for the normalized factors.
    let min_price = candidates
        .iter()
        .filter(|c| c.mapping.supplier_price > rust_decimal::Decimal::ZERO)
        .map(|c| c.mapping.supplier_price)
        .min();
    let max_rtt_raw = candidates
        .iter()
        .map(|c| response_time_raw(&c.supplier))
        .fold(f64::MIN, f64::max);

    let weights = build_weights(criteria);

    let mut scored: Vec<ScoredCandidate> = candidates
        .into_iter()
        .map(|c| score_candidate(c, criteria, &weights, min_price, max_rtt_raw))
        .collect();

    scored.sort_by(|a, b| {
        b.total_score
            .partial_cmp(&a.total_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.supplier.priority.cmp(&b.supplier.priority))
            .then(a.supplier.id.cmp(&b.supplier.id))
    });

    scored
}

fn response_time_raw(supplier: &Supplier) -> f64 {
    10_000.0 / (supplier.avg_response_time_ms.max(1) as f64)
}

fn build_weights(criteria: &RoutingCriteria) -> FxHashMap<&'static str, f64> {
    let mut weights = FxHashMap::default();
    if criteria.priority_only {
        weights.insert("priority", 1.0);
        return weights;
    }

    weights.insert("priority", 0.30);
    weights.insert("success_rate", 0.30);
    weights.insert("response_time", 0.20);
    weights.insert("price", 0.10);
    weights.insert("stock", 0.05);
    weights.insert("recent_performance", 0.05);

    if criteria.prefer_cheapest {
        weights.insert("price", 0.40);
        weights.insert("priority", 0.20);
    }
    if criteria.prefer_fastest {
        weights.insert("response_time", 0.40);
        weights.insert("priority", 0.20);
    }
    if criteria.prefer_reliable {
        weights.insert("success_rate", 0.50);
        weights.insert("priority", 0.20);
    }

    weights
}

fn score_candidate(
    candidate: Candidate,
    criteria: &RoutingCriteria,
    weights: &FxHashMap<&'static str, f64>,
    min_price: Option<rust_decimal::Decimal>,
    max_rtt_raw: f64,
) -> ScoredCandidate {
    use rust_decimal::prelude::ToPrimitive;

    let Candidate { supplier, mapping } = candidate;
    let mut breakdown = FxHashMap::default();

    breakdown.insert("priority", 1.0 / supplier.priority.max(1) as f64);
    breakdown.insert("success_rate", supplier.success_rate / 100.0);

    // Inverse response time, normalized against the best candidate so the
    // factor lands in (0, 1].
    let rtt_score = if max_rtt_raw > 0.0 {
        (response_time_raw(&supplier) / max_rtt_raw).clamp(0.0, 1.0)
    } else {
        1.0
    };
    breakdown.insert("response_time", rtt_score);

    let price_score = match (min_price, mapping.supplier_price) {
        (Some(min), price) if price > rust_decimal::Decimal::ZERO => {
            (min / price).to_f64().unwrap_or(1.0)
        }
        _ => 1.0,
    };
    breakdown.insert("price", price_score);

    let stock_score = match mapping.stock_status {
        StockStatus::Available => 1.0,
        StockStatus::Unknown => 0.5,
        StockStatus::OutOfStock => 0.0,
    };
    breakdown.insert("stock", stock_score);

    breakdown.insert("recent_performance", recent_performance(&mapping));

    let total_score: f64 = breakdown
        .iter()
        .filter_map(|(factor, score)| weights.get(factor).map(|w| score * w))
        .sum();

    let confidence = confidence(&supplier, &mapping, &breakdown);
    let reason = reason(&breakdown, criteria);

    ScoredCandidate {
        supplier,
        mapping,
        total_score,
        confidence,
        reason,
        breakdown,
    }
}

/// Success ratio of recent attempts through the mapping; neutral 0.5 without
/// data, full score for a sustained (>= 10 attempts) ratio of 95%+.
fn recent_performance(mapping: &ProductMapping) -> f64 {
    let total = mapping.success_count + mapping.failure_count;
    match mapping.success_ratio() {
        None => 0.5,
        Some(ratio) if total >= 10 && ratio >= 0.95 => 1.0,
        Some(ratio) => ratio,
    }
}

fn confidence(
    supplier: &Supplier,
    mapping: &ProductMapping,
    breakdown: &FxHashMap<&'static str, f64>,
) -> f64 {
    let mut confidence: f64 = 0.5;

    if supplier.success_rate >= 95.0 {
        confidence += 0.2;
    } else if supplier.success_rate >= 90.0 {
        confidence += 0.1;
    }

    if supplier.total_transactions >= 1000 {
        confidence += 0.2;
    } else if supplier.total_transactions >= 100 {
        confidence += 0.1;
    }

    if breakdown.get("recent_performance").copied().unwrap_or(0.0) >= 0.9 {
        confidence += 0.1;
    }

    if mapping.stock_status == StockStatus::Unknown {
        confidence -= 0.1;
    }

    confidence.clamp(0.0, 1.0)
}

fn reason(breakdown: &FxHashMap<&'static str, f64>, criteria: &RoutingCriteria) -> String {
    let factor = |name| breakdown.get(name).copied().unwrap_or(0.0);
    let mut reasons: Vec<&str> = Vec::new();

    if factor("priority") >= 0.8 {
        reasons.push("highest priority");
    }
    if factor("success_rate") >= 0.9 {
        reasons.push("excellent success rate");
    } else if factor("success_rate") >= 0.8 {
        reasons.push("good success rate");
    }
    if factor("response_time") >= 0.8 {
        reasons.push("fast response");
    }
    if criteria.prefer_cheapest && factor("price") >= 0.9 {
        reasons.push("best price");
    }
    if factor("stock") >= 0.8 {
        reasons.push("stock available");
    }

    if reasons.is_empty() {
        return "selected by scoring".to_string();
    }
    reasons.truncate(3);

    match reasons.len() {
        1 => reasons[0].to_string(),
        2 => format!("{} and {}", reasons[0], reasons[1]),
        _ => format!("{}, {} and {}", reasons[0], reasons[1], reasons[2]),
    }
}

//! Transaction endpoints
//!
//! Thin translation layer: DTOs in, orchestrator calls, DTOs out.
//! Identity arrives via request extensions (bearer claims or the verified
//! H2H client).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::error::ApiError;
use super::state::AppState;
use crate::auth::AuthClaims;
use crate::domain::{ApiClient, Transaction, TransactionStats};
use crate::dispatch::CreateTransaction;

fn fmt_ts(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTransactionRequest {
    #[schema(example = "TSEL10")]
    pub product_code: String,
    #[schema(example = "081234567890")]
    pub destination_number: String,
    pub customer_notes: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TransactionResponse {
    pub id: Uuid,
    #[schema(example = "TRX-20260314-0042")]
    pub trx_code: String,
    pub user_id: Uuid,
    pub product_id: Uuid,
    pub supplier_id: Option<Uuid>,
    pub final_supplier_id: Option<Uuid>,
    pub destination_number: String,
    pub product_code: String,
    pub hpp: Decimal,
    pub selling_price: Decimal,
    pub admin_fee: Decimal,
    pub profit: Decimal,
    #[schema(example = "pending")]
    pub status: String,
    pub serial_number: Option<String>,
    pub supplier_message: Option<String>,
    pub supplier_trx_id: Option<String>,
    pub routing_attempts: i32,
    #[schema(example = "2026-03-14 09:26:53")]
    pub created_at: String,
    pub updated_at: String,
    pub processed_at: Option<String>,
    pub completed_at: Option<String>,
}

impl From<Transaction> for TransactionResponse {
    fn from(trx: Transaction) -> Self {
        Self {
            id: trx.id,
            profit: trx.profit(),
            trx_code: trx.trx_code,
            user_id: trx.user_id,
            product_id: trx.product_id,
            supplier_id: trx.supplier_id,
            final_supplier_id: trx.final_supplier_id,
            destination_number: trx.destination_number,
            product_code: trx.product_code,
            hpp: trx.hpp,
            selling_price: trx.selling_price,
            admin_fee: trx.admin_fee,
            status: trx.status.as_str().to_string(),
            serial_number: trx.serial_number,
            supplier_message: trx.supplier_message,
            supplier_trx_id: trx.supplier_trx_id,
            routing_attempts: trx.routing_attempts,
            created_at: fmt_ts(trx.created_at),
            updated_at: fmt_ts(trx.updated_at),
            processed_at: trx.processed_at.map(fmt_ts),
            completed_at: trx.completed_at.map(fmt_ts),
        }
    }
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListParams {
    /// 1-based page number.
    pub page: Option<i64>,
    /// Page size, 1..=100.
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct StatsParams {
    /// Inclusive start date, `YYYY-MM-DD`.
    pub start_date: String,
    /// Inclusive end date, `YYYY-MM-DD`.
    pub end_date: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatsResponse {
    pub total_transactions: i64,
    pub success_count: i64,
    pub failed_count: i64,
    pub refund_count: i64,
    pub timeout_count: i64,
    pub pending_count: i64,
    pub total_revenue: Decimal,
    pub total_profit: Decimal,
    pub average_amount: Decimal,
}

impl From<TransactionStats> for StatsResponse {
    fn from(stats: TransactionStats) -> Self {
        Self {
            total_transactions: stats.total_transactions,
            success_count: stats.success_count,
            failed_count: stats.failed_count,
            refund_count: stats.refund_count,
            timeout_count: stats.timeout_count,
            pending_count: stats.pending_count,
            total_revenue: stats.total_revenue,
            total_profit: stats.total_profit,
            average_amount: stats.average_amount,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: &'static str,
    pub queue_depth: u64,
}

/// Guard: a user may only see their own records, admins see everything.
fn authorize_record(claims: &AuthClaims, trx: &Transaction) -> Result<(), ApiError> {
    if claims.role == "ADMIN" || claims.user_id == trx.user_id {
        Ok(())
    } else {
        Err(ApiError::forbidden("not your transaction"))
    }
}

#[utoipa::path(
    post, path = "/api/v1/transactions",
    request_body = CreateTransactionRequest,
    responses(
        (status = 201, body = TransactionResponse),
        (status = 400, body = super::error::ErrorBody),
    ),
    security(("bearer" = []))
)]
pub async fn create_transaction(
    State(state): State<AppState>,
    Extension(claims): Extension<AuthClaims>,
    Json(req): Json<CreateTransactionRequest>,
) -> Result<(StatusCode, Json<TransactionResponse>), ApiError> {
    let trx = state
        .orchestrator
        .create(CreateTransaction {
            user_id: claims.user_id,
            product_code: req.product_code,
            destination_number: req.destination_number,
            notes: req.customer_notes,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(trx.into())))
}

#[utoipa::path(
    get, path = "/api/v1/transactions/{id}",
    params(("id" = Uuid, Path, description = "Transaction id")),
    responses((status = 200, body = TransactionResponse), (status = 404, body = super::error::ErrorBody)),
    security(("bearer" = []))
)]
pub async fn get_transaction(
    State(state): State<AppState>,
    Extension(claims): Extension<AuthClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let trx = state.orchestrator.get(id).await?;
    authorize_record(&claims, &trx)?;
    Ok(Json(trx.into()))
}

#[utoipa::path(
    get, path = "/api/v1/transactions/code/{trx_code}",
    params(("trx_code" = String, Path, description = "External transaction code")),
    responses((status = 200, body = TransactionResponse), (status = 404, body = super::error::ErrorBody)),
    security(("bearer" = []))
)]
pub async fn get_transaction_by_code(
    State(state): State<AppState>,
    Extension(claims): Extension<AuthClaims>,
    Path(trx_code): Path<String>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let trx = state.orchestrator.get_by_code(&trx_code).await?;
    authorize_record(&claims, &trx)?;
    Ok(Json(trx.into()))
}

#[utoipa::path(
    get, path = "/api/v1/transactions",
    params(ListParams),
    responses((status = 200, body = [TransactionResponse])),
    security(("bearer" = []))
)]
pub async fn list_transactions(
    State(state): State<AppState>,
    Extension(claims): Extension<AuthClaims>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<TransactionResponse>>, ApiError> {
    let transactions = state
        .orchestrator
        .list_user(
            claims.user_id,
            params.page.unwrap_or(1),
            params.limit.unwrap_or(20),
        )
        .await?;
    Ok(Json(transactions.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    post, path = "/api/v1/transactions/{id}/cancel",
    params(("id" = Uuid, Path, description = "Transaction id")),
    responses((status = 200, body = TransactionResponse), (status = 409, body = super::error::ErrorBody)),
    security(("bearer" = []))
)]
pub async fn cancel_transaction(
    State(state): State<AppState>,
    Extension(claims): Extension<AuthClaims>,
    Path(id): Path<Uuid>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let trx = state.orchestrator.get(id).await?;
    authorize_record(&claims, &trx)?;
    let cancelled = state.orchestrator.cancel(id).await?;
    Ok(Json(cancelled.into()))
}

#[utoipa::path(
    get, path = "/api/v1/transactions/stats",
    params(StatsParams),
    responses((status = 200, body = StatsResponse)),
    security(("bearer" = []))
)]
pub async fn transaction_stats(
    State(state): State<AppState>,
    Extension(claims): Extension<AuthClaims>,
    Query(params): Query<StatsParams>,
) -> Result<Json<StatsResponse>, ApiError> {
    let start = parse_date(&params.start_date)?
        .and_hms_opt(0, 0, 0)
        .unwrap_or_default()
        .and_utc();
    let end = parse_date(&params.end_date)?
        .and_hms_opt(23, 59, 59)
        .unwrap_or_default()
        .and_utc();
    if end < start {
        return Err(ApiError::bad_request("end_date is before start_date"));
    }

    let stats = state.orchestrator.stats(claims.user_id, start, end).await?;
    Ok(Json(stats.into()))
}

fn parse_date(raw: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| ApiError::bad_request(format!("invalid date: {raw}")))
}

/// H2H purchase submission. The peer transacts as its linked platform user.
#[utoipa::path(
    post, path = "/api/v1/h2h/transactions",
    request_body = CreateTransactionRequest,
    responses((status = 201, body = TransactionResponse), (status = 403, body = super::error::ErrorBody))
)]
pub async fn h2h_create_transaction(
    State(state): State<AppState>,
    Extension(client): Extension<ApiClient>,
    Json(req): Json<CreateTransactionRequest>,
) -> Result<(StatusCode, Json<TransactionResponse>), ApiError> {
    let user_id = client
        .user_id
        .ok_or_else(|| ApiError::forbidden("client is not linked to a user account"))?;
    let trx = state
        .orchestrator
        .create(CreateTransaction {
            user_id,
            product_code: req.product_code,
            destination_number: req.destination_number,
            notes: req.customer_notes,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(trx.into())))
}

/// H2H status lookup by external code.
#[utoipa::path(
    get, path = "/api/v1/h2h/transactions/code/{trx_code}",
    params(("trx_code" = String, Path, description = "External transaction code")),
    responses((status = 200, body = TransactionResponse), (status = 404, body = super::error::ErrorBody))
)]
pub async fn h2h_get_transaction(
    State(state): State<AppState>,
    Extension(client): Extension<ApiClient>,
    Path(trx_code): Path<String>,
) -> Result<Json<TransactionResponse>, ApiError> {
    let user_id = client
        .user_id
        .ok_or_else(|| ApiError::forbidden("client is not linked to a user account"))?;
    let trx = state.orchestrator.get_by_code(&trx_code).await?;
    if trx.user_id != user_id {
        return Err(ApiError::forbidden("not your transaction"));
    }
    Ok(Json(trx.into()))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MutationResponse {
    pub id: Uuid,
    #[schema(example = "credit")]
    pub kind: String,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub description: String,
    pub reference_type: Option<String>,
    pub reference_id: Option<Uuid>,
    #[schema(example = "2026-03-14 09:26:53")]
    pub created_at: String,
}

impl From<crate::domain::Mutation> for MutationResponse {
    fn from(m: crate::domain::Mutation) -> Self {
        Self {
            id: m.id,
            kind: m.kind.as_str().to_string(),
            amount: m.amount,
            balance_before: m.balance_before,
            balance_after: m.balance_after,
            description: m.description,
            reference_type: m.reference.map(|r| r.kind.as_str().to_string()),
            reference_id: m.reference.map(|r| r.id),
            created_at: fmt_ts(m.created_at),
        }
    }
}

/// Balance history for the authenticated user.
#[utoipa::path(
    get, path = "/api/v1/mutations",
    params(ListParams),
    responses((status = 200, body = [MutationResponse])),
    security(("bearer" = []))
)]
pub async fn list_mutations(
    State(state): State<AppState>,
    Extension(claims): Extension<AuthClaims>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<MutationResponse>>, ApiError> {
    let mutations = state
        .orchestrator
        .list_user_mutations(
            claims.user_id,
            params.page.unwrap_or(1),
            params.limit.unwrap_or(20),
        )
        .await?;
    Ok(Json(mutations.into_iter().map(Into::into).collect()))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RoutingStatsResponse {
    pub total_suppliers: usize,
    pub healthy_suppliers: usize,
    pub avg_success_rate: f64,
    pub avg_response_time_ms: f64,
    pub suppliers: Vec<RoutingSupplierEntry>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RoutingSupplierEntry {
    pub code: String,
    pub success_rate: f64,
    pub avg_response_time_ms: i64,
    pub total_transactions: i64,
    pub is_healthy: bool,
}

#[utoipa::path(
    get, path = "/api/v1/routing/stats",
    responses((status = 200, body = RoutingStatsResponse), (status = 403, body = super::error::ErrorBody)),
    security(("bearer" = []))
)]
pub async fn routing_stats(
    State(state): State<AppState>,
    Extension(claims): Extension<AuthClaims>,
) -> Result<Json<RoutingStatsResponse>, ApiError> {
    if claims.role != "ADMIN" {
        return Err(ApiError::forbidden("admin role required"));
    }
    let stats = state
        .routing
        .stats()
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(RoutingStatsResponse {
        total_suppliers: stats.total_suppliers,
        healthy_suppliers: stats.healthy_suppliers,
        avg_success_rate: stats.avg_success_rate,
        avg_response_time_ms: stats.avg_response_time_ms,
        suppliers: stats
            .suppliers
            .into_iter()
            .map(|s| RoutingSupplierEntry {
                code: s.code,
                success_rate: s.success_rate,
                avg_response_time_ms: s.avg_response_time_ms,
                total_transactions: s.total_transactions,
                is_healthy: s.is_healthy,
            })
            .collect(),
    }))
}

#[utoipa::path(
    get, path = "/api/v1/health",
    responses((status = 200, body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let queue_depth = state
        .orchestrator
        .queue_depth()
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(HealthResponse {
        status: "ok",
        queue_depth,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TransactionStatus;
    use rust_decimal_macros::dec;

    #[test]
    fn test_transaction_response_formatting() {
        let now = DateTime::parse_from_rfc3339("2026-03-14T09:26:53Z")
            .unwrap()
            .with_timezone(&Utc);
        let trx = Transaction {
            id: Uuid::new_v4(),
            trx_code: "TRX-20260314-0042".into(),
            user_id: Uuid::new_v4(),
            product_id: Uuid::new_v4(),
            supplier_id: None,
            final_supplier_id: None,
            destination_number: "628123456789".into(),
            product_code: "TSEL10".into(),
            hpp: dec!(9800),
            selling_price: dec!(10000),
            admin_fee: dec!(50),
            status: TransactionStatus::Success,
            serial_number: Some("SN1".into()),
            supplier_message: None,
            supplier_trx_id: None,
            routing_attempts: 1,
            created_at: now,
            updated_at: now,
            processed_at: Some(now),
            completed_at: None,
            notes: None,
        };

        let resp = TransactionResponse::from(trx);
        assert_eq!(resp.created_at, "2026-03-14 09:26:53");
        assert_eq!(resp.processed_at.as_deref(), Some("2026-03-14 09:26:53"));
        assert_eq!(resp.completed_at, None);
        assert_eq!(resp.profit, dec!(150));
        assert_eq!(resp.status, "success");
    }

    #[test]
    fn test_parse_date() {
        assert!(parse_date("2026-03-14").is_ok());
        assert!(parse_date("14-03-2026").is_err());
        assert!(parse_date("notadate").is_err());
    }
}

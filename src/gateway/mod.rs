//! HTTP gateway
//!
//! Axum ingress for the dispatch core: bearer-authenticated user routes,
//! signed H2H routes for integrators, and an unauthenticated health probe.

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod state;

pub use error::ApiError;
pub use state::AppState;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "pulsagate",
        description = "Prepaid top-up and bill-payment dispatcher",
    ),
    paths(
        handlers::create_transaction,
        handlers::get_transaction,
        handlers::get_transaction_by_code,
        handlers::list_transactions,
        handlers::cancel_transaction,
        handlers::transaction_stats,
        handlers::list_mutations,
        handlers::h2h_create_transaction,
        handlers::h2h_get_transaction,
        handlers::routing_stats,
        handlers::health,
    ),
    components(schemas(
        handlers::CreateTransactionRequest,
        handlers::TransactionResponse,
        handlers::StatsResponse,
        handlers::MutationResponse,
        handlers::HealthResponse,
        handlers::RoutingStatsResponse,
        handlers::RoutingSupplierEntry,
        error::ErrorBody,
    ))
)]
pub struct ApiDoc;

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Assemble the full router. Caller serves it with
/// `into_make_service_with_connect_info::<SocketAddr>()` so the H2H
/// middleware can see source addresses.
pub fn router(state: AppState) -> Router {
    let user_routes = Router::new()
        .route("/transactions", post(handlers::create_transaction))
        .route("/transactions", get(handlers::list_transactions))
        .route("/transactions/stats", get(handlers::transaction_stats))
        .route("/transactions/{id}", get(handlers::get_transaction))
        .route(
            "/transactions/{id}/cancel",
            post(handlers::cancel_transaction),
        )
        .route(
            "/transactions/code/{trx_code}",
            get(handlers::get_transaction_by_code),
        )
        .route("/mutations", get(handlers::list_mutations))
        .route("/routing/stats", get(handlers::routing_stats))
        .layer(from_fn_with_state(state.clone(), middleware::jwt_auth));

    let h2h_routes = Router::new()
        .route("/h2h/transactions", post(handlers::h2h_create_transaction))
        .route(
            "/h2h/transactions/code/{trx_code}",
            get(handlers::h2h_get_transaction),
        )
        .layer(from_fn_with_state(state.clone(), middleware::h2h_auth));

    let public_routes = Router::new()
        .route("/health", get(handlers::health))
        .route("/openapi.json", get(openapi_json));

    Router::new()
        .nest(
            "/api/v1",
            user_routes.merge(h2h_routes).merge(public_routes),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

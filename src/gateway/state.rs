//! Shared gateway state

use std::sync::Arc;

use crate::auth::{H2hVerifier, JwtService};
use crate::dispatch::Orchestrator;
use crate::routing::RoutingScorer;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub routing: Arc<RoutingScorer>,
    pub jwt: Arc<JwtService>,
    pub h2h: Arc<H2hVerifier>,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<Orchestrator>,
        routing: Arc<RoutingScorer>,
        jwt: Arc<JwtService>,
        h2h: Arc<H2hVerifier>,
    ) -> Self {
        Self {
            orchestrator,
            routing,
            jwt,
            h2h,
        }
    }
}

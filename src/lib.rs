pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod orders;
pub mod provider;
pub mod services;
pub mod store;

use std::sync::Arc;

use axum::{Router, middleware as axum_middleware, routing::get, routing::post};

use crate::services::reconciliation::Reconciler;
use crate::store::RunStatsStore;

#[derive(Clone)]
pub struct AppState {
    pub db: sqlx::PgPool,
    pub reconciler: Arc<Reconciler>,
    pub stats: Arc<dyn RunStatsStore>,
}

pub fn create_app(state: AppState) -> Router {
    let admin = Router::new()
        .route("/admin/reconcile", post(handlers::reconcile::trigger))
        .route("/admin/reconcile/last", get(handlers::reconcile::last_run))
        .route_layer(axum_middleware::from_fn(middleware::auth::admin_auth));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(admin)
        .with_state(state)
}

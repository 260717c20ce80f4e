use axum::Router;

pub mod bundles;
pub mod system;

/// Router for everything under `/api`.
pub fn router() -> Router {
    Router::new().nest("/bundles", bundles::router())
}

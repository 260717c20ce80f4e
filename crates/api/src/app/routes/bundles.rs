use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;

use bundlestock_bundles::BundleId;
use bundlestock_infra::CommandError;

use crate::app::dto::{self, ApiResponse};
use crate::app::errors;
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_bundles).post(create_bundle))
        .route("/decrement-stock", post(decrement_stock))
        .route("/:id", get(get_bundle))
}

/// Reduce a bundle's stock for a purchase.
pub async fn decrement_stock(
    Extension(services): Extension<Arc<AppServices>>,
    headers: HeaderMap,
    body: Result<Json<dto::DecrementStockRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };

    let cmd = match body.into_command(&headers, Utc::now()) {
        Ok(c) => c,
        Err(e) => return errors::command_error_to_response(e.into()),
    };

    match services.bundles.decrement_stock(cmd).await {
        Ok(out) => (
            StatusCode::OK,
            Json(ApiResponse::ok(
                "bundle stock updated successfully",
                dto::StockDecrementResponse::from(out),
            )),
        )
            .into_response(),
        Err(e) => errors::command_error_to_response(e),
    }
}

pub async fn create_bundle(
    Extension(services): Extension<Arc<AppServices>>,
    body: Result<Json<dto::CreateBundleRequest>, JsonRejection>,
) -> axum::response::Response {
    let Json(body) = match body {
        Ok(b) => b,
        Err(rejection) => return errors::json_rejection_to_response(rejection),
    };

    let cmd = match body.into_command(Utc::now()) {
        Ok(c) => c,
        Err(e) => return errors::command_error_to_response(e.into()),
    };

    match services.bundles.create_bundle(cmd).await {
        Ok(bundle) => (
            StatusCode::CREATED,
            Json(ApiResponse::ok(
                "bundle created successfully",
                dto::BundleResponse::from(&bundle),
            )),
        )
            .into_response(),
        Err(e) => errors::command_error_to_response(e),
    }
}

pub async fn get_bundle(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let bundle_id: BundleId = match id.parse() {
        Ok(v) => v,
        Err(e) => return errors::command_error_to_response(CommandError::from(e)),
    };

    match services.bundles.get_bundle(bundle_id).await {
        Ok(bundle) => (
            StatusCode::OK,
            Json(ApiResponse::ok("bundle found", dto::BundleResponse::from(&bundle))),
        )
            .into_response(),
        Err(e) => errors::command_error_to_response(e),
    }
}

pub async fn list_bundles(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.bundles.list_bundles().await {
        Ok(bundles) => {
            let data: Vec<dto::BundleResponse> =
                bundles.iter().map(dto::BundleResponse::from).collect();
            (StatusCode::OK, Json(ApiResponse::ok("bundles fetched", data))).into_response()
        }
        Err(e) => errors::command_error_to_response(e),
    }
}

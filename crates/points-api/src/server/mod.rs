use std::net::SocketAddr;

use axum::extract::{Path, Query, Request, State};
use axum::http::header::{HeaderName, HeaderValue};
use axum::http::Method;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use contracts::{
    AccountRecord, AccountRef, AccountType, ApiError, CatalogItem, DepartmentBudget,
    DistributionReceipt, ErrorCode, FulfillmentType, LedgerEntry, MasterPool, OrderStatus,
    RedemptionOrder, TenantConfig, TransactionType, TransferReceipt, Wallet, SCHEMA_VERSION_V1,
};
use points_core::catalog::CatalogError;
use points_core::economy::{DistributionError, OrderError, PointsEconomy, RedeemError};
use points_core::ledger::LedgerError;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    LocalVoucherProvider, PersistedTenantSummary, PersistenceError, PointsService, ServiceError,
    VoucherProvider,
};

const DEFAULT_PAGE_SIZE: usize = 500;
const MAX_PAGE_SIZE: usize = 5000;
const DEFAULT_SQLITE_PATH: &str = "points_ledger.sqlite";

include!("error.rs");
include!("state.rs");
include!("routes/tenants.rs");
include!("routes/ledger.rs");
include!("routes/orders.rs");
include!("util.rs");

pub async fn serve(addr: SocketAddr, sqlite_path: Option<String>) -> Result<(), ServerError> {
    let path = sqlite_path.unwrap_or_else(default_sqlite_path);
    let mut service = PointsService::new();
    service.attach_sqlite_store(&path)?;
    let loaded = service.load_persisted_tenants()?;
    info!(path = %path, loaded, "sqlite store attached");

    let state = AppState::new(service, std::sync::Arc::new(LocalVoucherProvider));
    let app = router(state);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "points service listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/tenants", post(create_tenant).get(list_tenants))
        .route("/api/v1/tenants/{tenant_id}", get(get_tenant))
        .route(
            "/api/v1/tenants/{tenant_id}/config",
            post(update_tenant_config),
        )
        .route(
            "/api/v1/tenants/{tenant_id}/departments",
            post(create_department),
        )
        .route("/api/v1/tenants/{tenant_id}/users", post(create_user))
        .route(
            "/api/v1/tenants/{tenant_id}/users/{user_id}/status",
            post(set_user_status),
        )
        .route(
            "/api/v1/tenants/{tenant_id}/catalog",
            post(upsert_catalog_item).get(get_catalog),
        )
        .route(
            "/api/v1/tenants/{tenant_id}/catalog/{item_id}/override",
            post(set_catalog_override),
        )
        .route("/api/v1/tenants/{tenant_id}/transfer", post(transfer))
        .route("/api/v1/tenants/{tenant_id}/redeem", post(redeem))
        .route("/api/v1/tenants/{tenant_id}/orders", get(list_orders))
        .route(
            "/api/v1/tenants/{tenant_id}/orders/{order_id}",
            get(get_order),
        )
        .route(
            "/api/v1/tenants/{tenant_id}/orders/{order_id}/verify-otp",
            post(verify_order_otp),
        )
        .route(
            "/api/v1/tenants/{tenant_id}/orders/{order_id}/dispatch",
            post(dispatch_order),
        )
        .route(
            "/api/v1/tenants/{tenant_id}/orders/{order_id}/cancel",
            post(cancel_order),
        )
        .route(
            "/api/v1/tenants/{tenant_id}/orders/{order_id}/ship",
            post(ship_order),
        )
        .route(
            "/api/v1/tenants/{tenant_id}/orders/{order_id}/complete",
            post(complete_order),
        )
        .route(
            "/api/v1/tenants/{tenant_id}/orders/{order_id}/fail",
            post(fail_order),
        )
        .route(
            "/api/v1/tenants/{tenant_id}/distribute/per-employee",
            post(distribute_per_employee),
        )
        .route(
            "/api/v1/tenants/{tenant_id}/distribute/all-users",
            post(distribute_all_users),
        )
        .route(
            "/api/v1/tenants/{tenant_id}/accounts/{account_type}/{account_id}",
            get(get_account),
        )
        .route("/api/v1/tenants/{tenant_id}/ledger", get(get_ledger))
        .layer(middleware::from_fn(cors_middleware))
        .with_state(state)
}

async fn cors_middleware(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = Response::new(axum::body::Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(response.headers_mut());
    response
}

#[cfg(test)]
mod tests;

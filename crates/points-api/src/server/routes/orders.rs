#[derive(Debug, Deserialize)]
struct RedeemRequest {
    user_id: String,
    catalog_item_id: String,
    points: i64,
}

#[derive(Debug, Serialize)]
struct OrderResponse {
    schema_version: String,
    tenant_id: String,
    order: RedemptionOrder,
}

/// The stored OTP code leaves the service exactly once, on the redeem
/// response, for the platform to deliver. Reads and transitions never
/// echo it back.
fn without_otp_code(mut order: RedemptionOrder) -> RedemptionOrder {
    order.otp_code = None;
    order
}

async fn redeem(
    Path(tenant_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<RedeemRequest>,
) -> Result<Json<OrderResponse>, HttpApiError> {
    let (order, fulfillment_type) = {
        let mut service = state.inner.lock().await;
        let order = service
            .redeem(
                &tenant_id,
                &request.user_id,
                &request.catalog_item_id,
                request.points,
            )
            .map_err(HttpApiError::from_service)?;

        let fulfillment_type = require_tenant(&service, &tenant_id)?
            .catalog()
            .get(&order.catalog_item_id)
            .map_err(HttpApiError::from_catalog)?
            .fulfillment_type;

        (order, fulfillment_type)
    };

    // Low value gift card orders go straight to the provider; everything
    // else waits for OTP verification or manual handling.
    if !order.otp_required && fulfillment_type == FulfillmentType::GiftCardApi {
        let state = state.clone();
        let spawn_tenant_id = tenant_id.clone();
        let order_id = order.order_id.clone();
        tokio::spawn(async move {
            if let Err(err) = crate::dispatch_order(
                &state.inner,
                state.provider.as_ref(),
                &spawn_tenant_id,
                &order_id,
            )
            .await
            {
                warn!(
                    tenant_id = %spawn_tenant_id,
                    order_id = %order_id,
                    error = %err,
                    "background dispatch failed"
                );
            }
        });
    }

    Ok(Json(OrderResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        tenant_id,
        order,
    }))
}

#[derive(Debug, Deserialize, Default)]
struct OrdersQuery {
    user_id: Option<String>,
    status: Option<String>,
    cursor: Option<usize>,
    page_size: Option<usize>,
}

#[derive(Debug, Serialize)]
struct OrdersPage {
    schema_version: String,
    tenant_id: String,
    cursor: usize,
    next_cursor: Option<usize>,
    total: usize,
    orders: Vec<RedemptionOrder>,
}

async fn list_orders(
    Path(tenant_id): Path<String>,
    State(state): State<AppState>,
    Query(query): Query<OrdersQuery>,
) -> Result<Json<OrdersPage>, HttpApiError> {
    let status_filter = query.status.as_deref().map(parse_order_status).transpose()?;

    let response = {
        let service = state.inner.lock().await;
        let economy = require_tenant(&service, &tenant_id)?;

        let mut filtered = Vec::new();
        for order in economy.orders().values() {
            if let Some(user_id) = &query.user_id {
                if order.user_id != *user_id {
                    continue;
                }
            }

            if let Some(status) = status_filter {
                if order.status != status {
                    continue;
                }
            }

            filtered.push(without_otp_code(order.clone()));
        }
        filtered.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.order_id.cmp(&b.order_id))
        });

        let (start, end, next_cursor) = paginate(filtered.len(), query.cursor, query.page_size)?;

        OrdersPage {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tenant_id: tenant_id.clone(),
            cursor: start,
            next_cursor,
            total: filtered.len(),
            orders: filtered[start..end].to_vec(),
        }
    };

    Ok(Json(response))
}

async fn get_order(
    Path((tenant_id, order_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<OrderResponse>, HttpApiError> {
    let response = {
        let service = state.inner.lock().await;
        let economy = require_tenant(&service, &tenant_id)?;
        let order = economy
            .order(&order_id)
            .map_err(HttpApiError::from_order)?
            .clone();

        OrderResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tenant_id: tenant_id.clone(),
            order: without_otp_code(order),
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct VerifyOtpRequest {
    code: String,
}

async fn verify_order_otp(
    Path((tenant_id, order_id)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(request): Json<VerifyOtpRequest>,
) -> Result<Json<OrderResponse>, HttpApiError> {
    let response = {
        let mut service = state.inner.lock().await;
        let order = service
            .verify_otp(&tenant_id, &order_id, &request.code)
            .map_err(HttpApiError::from_service)?;

        OrderResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tenant_id: tenant_id.clone(),
            order: without_otp_code(order),
        }
    };

    Ok(Json(response))
}

async fn dispatch_order(
    Path((tenant_id, order_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<OrderResponse>, HttpApiError> {
    let order = crate::dispatch_order(&state.inner, state.provider.as_ref(), &tenant_id, &order_id)
        .await
        .map_err(HttpApiError::from_service)?;

    Ok(Json(OrderResponse {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        tenant_id,
        order: without_otp_code(order),
    }))
}

async fn cancel_order(
    Path((tenant_id, order_id)): Path<(String, String)>,
    State(state): State<AppState>,
) -> Result<Json<OrderResponse>, HttpApiError> {
    let response = {
        let mut service = state.inner.lock().await;
        let order = service
            .cancel_order(&tenant_id, &order_id)
            .map_err(HttpApiError::from_service)?;

        OrderResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tenant_id: tenant_id.clone(),
            order: without_otp_code(order),
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct ShipOrderRequest {
    tracking_number: String,
}

async fn ship_order(
    Path((tenant_id, order_id)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(request): Json<ShipOrderRequest>,
) -> Result<Json<OrderResponse>, HttpApiError> {
    let response = {
        let mut service = state.inner.lock().await;
        let order = service
            .mark_shipped(&tenant_id, &order_id, &request.tracking_number)
            .map_err(HttpApiError::from_service)?;

        OrderResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tenant_id: tenant_id.clone(),
            order: without_otp_code(order),
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize, Default)]
struct CompleteOrderRequest {
    voucher_code: Option<String>,
    voucher_pin: Option<String>,
}

async fn complete_order(
    Path((tenant_id, order_id)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(request): Json<CompleteOrderRequest>,
) -> Result<Json<OrderResponse>, HttpApiError> {
    let response = {
        let mut service = state.inner.lock().await;
        let order = service
            .complete_order(
                &tenant_id,
                &order_id,
                request.voucher_code,
                request.voucher_pin,
            )
            .map_err(HttpApiError::from_service)?;

        OrderResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tenant_id: tenant_id.clone(),
            order: without_otp_code(order),
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct FailOrderRequest {
    reason: String,
}

async fn fail_order(
    Path((tenant_id, order_id)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(request): Json<FailOrderRequest>,
) -> Result<Json<OrderResponse>, HttpApiError> {
    let response = {
        let mut service = state.inner.lock().await;
        let order = service
            .fail_order(&tenant_id, &order_id, &request.reason)
            .map_err(HttpApiError::from_service)?;

        OrderResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tenant_id: tenant_id.clone(),
            order: without_otp_code(order),
        }
    };

    Ok(Json(response))
}

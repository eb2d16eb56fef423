#[derive(Debug, Deserialize)]
struct CreateTenantRequest {
    tenant_id: String,
    name: String,
    schema_version: Option<String>,
    otp_threshold: Option<i64>,
    monthly_recognition_cap: Option<i64>,
    replace_existing: Option<bool>,
}

#[derive(Debug, Serialize)]
struct CreateTenantResponse {
    schema_version: String,
    config: TenantConfig,
    replaced_existing_tenant: bool,
}

async fn create_tenant(
    State(state): State<AppState>,
    Json(request): Json<CreateTenantRequest>,
) -> Result<Json<CreateTenantResponse>, HttpApiError> {
    if let Some(version) = request.schema_version.as_deref() {
        if version != SCHEMA_VERSION_V1 {
            return Err(HttpApiError::invalid_request(
                ErrorCode::ContractVersionUnsupported,
                format!("unsupported contract version: {version}"),
            ));
        }
    }

    let config = TenantConfig {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        tenant_id: request.tenant_id,
        name: request.name,
        otp_threshold: request.otp_threshold,
        monthly_recognition_cap: request.monthly_recognition_cap,
    };
    let replace_existing = request.replace_existing.unwrap_or(false);

    let response = {
        let mut service = state.inner.lock().await;
        let replaced_existing_tenant =
            replace_existing && service.tenant(&config.tenant_id).is_some();
        let config = service
            .create_tenant(config, replace_existing)
            .map_err(HttpApiError::from_service)?;

        CreateTenantResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            config,
            replaced_existing_tenant,
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize, Default)]
struct ListTenantsQuery {
    page_size: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ListTenantsResponse {
    schema_version: String,
    loaded_tenant_ids: Vec<String>,
    tenants: Vec<PersistedTenantSummary>,
}

async fn list_tenants(
    State(state): State<AppState>,
    Query(query): Query<ListTenantsQuery>,
) -> Result<Json<ListTenantsResponse>, HttpApiError> {
    let page_size = query.page_size.unwrap_or(200).max(1).min(MAX_PAGE_SIZE);

    let response = {
        let service = state.inner.lock().await;
        let tenants = match service.list_persisted_tenants(page_size) {
            Ok(tenants) => tenants,
            Err(PersistenceError::NotAttached) => Vec::new(),
            Err(other) => return Err(HttpApiError::from_persistence(other)),
        };

        ListTenantsResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            loaded_tenant_ids: service.tenant_ids(),
            tenants,
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct TenantSummaryResponse {
    schema_version: String,
    config: TenantConfig,
    master: MasterPool,
    departments: Vec<DepartmentBudget>,
    user_count: usize,
    active_user_count: usize,
    order_count: usize,
    entry_count: usize,
    conservation_ok: bool,
    last_persistence_error: Option<String>,
}

async fn get_tenant(
    Path(tenant_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<TenantSummaryResponse>, HttpApiError> {
    let response = {
        let service = state.inner.lock().await;
        let economy = require_tenant(&service, &tenant_id)?;

        TenantSummaryResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            config: economy.config().clone(),
            master: economy.master().clone(),
            departments: economy.departments().values().cloned().collect(),
            user_count: economy.wallets().len(),
            active_user_count: economy.active_user_count(),
            order_count: economy.orders().len(),
            entry_count: economy.entries().len(),
            conservation_ok: economy.verify_conservation(),
            last_persistence_error: service
                .last_persistence_error()
                .map(|err| err.to_string()),
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct UpdateTenantConfigRequest {
    otp_threshold: Option<i64>,
    monthly_recognition_cap: Option<i64>,
}

#[derive(Debug, Serialize)]
struct TenantConfigResponse {
    schema_version: String,
    config: TenantConfig,
}

async fn update_tenant_config(
    Path(tenant_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<UpdateTenantConfigRequest>,
) -> Result<Json<TenantConfigResponse>, HttpApiError> {
    let response = {
        let mut service = state.inner.lock().await;
        let config = service
            .update_tenant_config(
                &tenant_id,
                request.otp_threshold,
                request.monthly_recognition_cap,
            )
            .map_err(HttpApiError::from_service)?;

        TenantConfigResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            config,
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct CreateDepartmentRequest {
    department_id: String,
    name: String,
}

#[derive(Debug, Serialize)]
struct DepartmentResponse {
    schema_version: String,
    tenant_id: String,
    department: DepartmentBudget,
}

async fn create_department(
    Path(tenant_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<CreateDepartmentRequest>,
) -> Result<Json<DepartmentResponse>, HttpApiError> {
    let response = {
        let mut service = state.inner.lock().await;
        let department = service
            .create_department(&tenant_id, &request.department_id, &request.name)
            .map_err(HttpApiError::from_service)?;

        DepartmentResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tenant_id: tenant_id.clone(),
            department,
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct CreateUserRequest {
    user_id: String,
    department_id: Option<String>,
    display_name: String,
}

#[derive(Debug, Serialize)]
struct WalletResponse {
    schema_version: String,
    tenant_id: String,
    wallet: Wallet,
}

async fn create_user(
    Path(tenant_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<CreateUserRequest>,
) -> Result<Json<WalletResponse>, HttpApiError> {
    let response = {
        let mut service = state.inner.lock().await;
        let wallet = service
            .create_user(
                &tenant_id,
                &request.user_id,
                request.department_id,
                &request.display_name,
            )
            .map_err(HttpApiError::from_service)?;

        WalletResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tenant_id: tenant_id.clone(),
            wallet,
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct SetUserStatusRequest {
    active: bool,
}

async fn set_user_status(
    Path((tenant_id, user_id)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(request): Json<SetUserStatusRequest>,
) -> Result<Json<WalletResponse>, HttpApiError> {
    let response = {
        let mut service = state.inner.lock().await;
        let wallet = service
            .set_user_active(&tenant_id, &user_id, request.active)
            .map_err(HttpApiError::from_service)?;

        WalletResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tenant_id: tenant_id.clone(),
            wallet,
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct CatalogItemResponse {
    schema_version: String,
    tenant_id: String,
    item: CatalogItem,
}

async fn upsert_catalog_item(
    Path(tenant_id): Path<String>,
    State(state): State<AppState>,
    Json(item): Json<CatalogItem>,
) -> Result<Json<CatalogItemResponse>, HttpApiError> {
    let response = {
        let mut service = state.inner.lock().await;
        let item = service
            .upsert_catalog_item(&tenant_id, item)
            .map_err(HttpApiError::from_service)?;

        CatalogItemResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tenant_id: tenant_id.clone(),
            item,
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct CatalogResponse {
    schema_version: String,
    tenant_id: String,
    items: Vec<CatalogItem>,
}

async fn get_catalog(
    Path(tenant_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<CatalogResponse>, HttpApiError> {
    let response = {
        let service = state.inner.lock().await;
        let economy = require_tenant(&service, &tenant_id)?;

        CatalogResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tenant_id: tenant_id.clone(),
            items: economy.catalog().items().values().cloned().collect(),
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct CatalogOverrideRequest {
    min_points: Option<i64>,
    max_points: Option<i64>,
}

async fn set_catalog_override(
    Path((tenant_id, item_id)): Path<(String, String)>,
    State(state): State<AppState>,
    Json(request): Json<CatalogOverrideRequest>,
) -> Result<Json<CatalogItemResponse>, HttpApiError> {
    let response = {
        let mut service = state.inner.lock().await;
        let item = service
            .set_catalog_override(&tenant_id, &item_id, request.min_points, request.max_points)
            .map_err(HttpApiError::from_service)?;

        CatalogItemResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tenant_id: tenant_id.clone(),
            item,
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct TransferRequest {
    from: Option<AccountRef>,
    to: AccountRef,
    amount: i64,
    transaction_type: TransactionType,
    description: Option<String>,
    policy_limit: Option<i64>,
}

#[derive(Debug, Serialize)]
struct TransferResponse {
    schema_version: String,
    tenant_id: String,
    receipt: TransferReceipt,
}

async fn transfer(
    Path(tenant_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<TransferRequest>,
) -> Result<Json<TransferResponse>, HttpApiError> {
    let response = {
        let mut service = state.inner.lock().await;
        let receipt = service
            .transfer(
                &tenant_id,
                request.from,
                request.to,
                request.amount,
                request.transaction_type,
                request.description.as_deref().unwrap_or_default(),
                request.policy_limit,
            )
            .map_err(HttpApiError::from_service)?;

        TransferResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tenant_id: tenant_id.clone(),
            receipt,
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
struct PerEmployeeDistributionRequest {
    points_per_user: i64,
    department_ids: Option<Vec<String>>,
    idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AllUsersDistributionRequest {
    points_per_user: i64,
    idempotency_key: Option<String>,
}

#[derive(Debug, Serialize)]
struct DistributionResponse {
    schema_version: String,
    tenant_id: String,
    receipt: DistributionReceipt,
}

async fn distribute_per_employee(
    Path(tenant_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<PerEmployeeDistributionRequest>,
) -> Result<Json<DistributionResponse>, HttpApiError> {
    let response = {
        let mut service = state.inner.lock().await;
        let receipt = service
            .distribute_per_employee(
                &tenant_id,
                request.points_per_user,
                request.department_ids,
                request.idempotency_key,
            )
            .map_err(HttpApiError::from_service)?;

        DistributionResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tenant_id: tenant_id.clone(),
            receipt,
        }
    };

    Ok(Json(response))
}

async fn distribute_all_users(
    Path(tenant_id): Path<String>,
    State(state): State<AppState>,
    Json(request): Json<AllUsersDistributionRequest>,
) -> Result<Json<DistributionResponse>, HttpApiError> {
    let response = {
        let mut service = state.inner.lock().await;
        let receipt = service
            .distribute_all_users(
                &tenant_id,
                request.points_per_user,
                request.idempotency_key,
            )
            .map_err(HttpApiError::from_service)?;

        DistributionResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tenant_id: tenant_id.clone(),
            receipt,
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Serialize)]
struct AccountResponse {
    schema_version: String,
    tenant_id: String,
    account: AccountRecord,
}

async fn get_account(
    Path((tenant_id, account_type, account_id)): Path<(String, String, String)>,
    State(state): State<AppState>,
) -> Result<Json<AccountResponse>, HttpApiError> {
    let account_type = parse_account_type(&account_type)?;

    let response = {
        let service = state.inner.lock().await;
        let economy = require_tenant(&service, &tenant_id)?;
        let account = economy
            .account_record(&AccountRef {
                account_type,
                account_id,
            })
            .map_err(HttpApiError::from_ledger)?;

        AccountResponse {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tenant_id: tenant_id.clone(),
            account,
        }
    };

    Ok(Json(response))
}

#[derive(Debug, Deserialize, Default)]
struct LedgerQuery {
    account_type: Option<String>,
    account_id: Option<String>,
    transaction_type: Option<String>,
    reference_id: Option<String>,
    cursor: Option<usize>,
    page_size: Option<usize>,
}

#[derive(Debug, Serialize)]
struct LedgerPage {
    schema_version: String,
    tenant_id: String,
    cursor: usize,
    next_cursor: Option<usize>,
    total: usize,
    entries: Vec<LedgerEntry>,
}

async fn get_ledger(
    Path(tenant_id): Path<String>,
    State(state): State<AppState>,
    Query(query): Query<LedgerQuery>,
) -> Result<Json<LedgerPage>, HttpApiError> {
    let account_type_filter = query
        .account_type
        .as_deref()
        .map(parse_account_type)
        .transpose()?;
    let transaction_type_filter = query
        .transaction_type
        .as_deref()
        .map(parse_transaction_type)
        .transpose()?;

    let response = {
        let service = state.inner.lock().await;
        let economy = require_tenant(&service, &tenant_id)?;

        let mut filtered = Vec::new();
        for entry in economy.entries() {
            if let Some(account_type) = account_type_filter {
                if entry.account_type != account_type {
                    continue;
                }
            }

            if let Some(account_id) = &query.account_id {
                if entry.account_id != *account_id {
                    continue;
                }
            }

            if let Some(transaction_type) = transaction_type_filter {
                if entry.transaction_type != transaction_type {
                    continue;
                }
            }

            if let Some(reference_id) = &query.reference_id {
                if entry.reference_id != *reference_id {
                    continue;
                }
            }

            filtered.push(entry.clone());
        }

        let (start, end, next_cursor) = paginate(filtered.len(), query.cursor, query.page_size)?;

        LedgerPage {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tenant_id: tenant_id.clone(),
            cursor: start,
            next_cursor,
            total: filtered.len(),
            entries: filtered[start..end].to_vec(),
        }
    };

    Ok(Json(response))
}

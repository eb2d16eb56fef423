#[derive(Clone)]
struct AppState {
    inner: std::sync::Arc<Mutex<PointsService>>,
    provider: std::sync::Arc<dyn VoucherProvider>,
}

impl AppState {
    fn new(service: PointsService, provider: std::sync::Arc<dyn VoucherProvider>) -> Self {
        Self {
            inner: std::sync::Arc::new(Mutex::new(service)),
            provider,
        }
    }
}

fn require_tenant<'a>(
    service: &'a PointsService,
    tenant_id: &str,
) -> Result<&'a PointsEconomy, HttpApiError> {
    service.tenant(tenant_id).ok_or_else(|| {
        HttpApiError::not_found(
            ErrorCode::UnknownTenant,
            format!("unknown tenant: {tenant_id}"),
        )
    })
}

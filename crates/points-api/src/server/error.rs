#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

#[derive(Debug)]
struct HttpApiError {
    status: StatusCode,
    error: ApiError,
}

impl HttpApiError {
    fn not_found(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            error: ApiError::new(error_code, message, None),
        }
    }

    fn invalid_request(error_code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: ApiError::new(error_code, message, None),
        }
    }

    fn conflict(
        error_code: ErrorCode,
        message: impl Into<String>,
        details: Option<String>,
    ) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            error: ApiError::new(error_code, message, details),
        }
    }

    fn invalid_query(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: ApiError::new(ErrorCode::InvalidQuery, message, details),
        }
    }

    fn bad_gateway(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_GATEWAY,
            error: ApiError::new(ErrorCode::ProviderFailure, message, None),
        }
    }

    fn internal(message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            error: ApiError::new(ErrorCode::InternalError, message, details),
        }
    }

    fn from_service(err: ServiceError) -> Self {
        match err {
            ServiceError::UnknownTenant(tenant_id) => Self::not_found(
                ErrorCode::UnknownTenant,
                format!("unknown tenant: {tenant_id}"),
            ),
            ServiceError::TenantExists(tenant_id) => Self::conflict(
                ErrorCode::TenantStateConflict,
                format!("tenant {tenant_id} already exists"),
                Some("pass replace_existing=true to overwrite it".to_string()),
            ),
            ServiceError::Ledger(err) => Self::from_ledger(err),
            ServiceError::Catalog(err) => Self::from_catalog(err),
            ServiceError::Order(err) => Self::from_order(err),
            ServiceError::Redeem(err) => match err {
                RedeemError::Catalog(err) => Self::from_catalog(err),
                RedeemError::Ledger(err) => Self::from_ledger(err),
            },
            ServiceError::Distribution(err) => match err {
                DistributionError::IdempotencyKeyReused(_) => Self::conflict(
                    ErrorCode::TenantStateConflict,
                    err.to_string(),
                    None,
                ),
                DistributionError::Ledger(err) => Self::from_ledger(err),
            },
            ServiceError::Provider(err) => Self::bad_gateway(err.to_string()),
            ServiceError::Persistence(err) => Self::from_persistence(err),
        }
    }

    fn from_ledger(err: LedgerError) -> Self {
        let message = err.to_string();
        match err {
            LedgerError::InvalidAmount(_) => {
                Self::invalid_request(ErrorCode::InvalidAmount, message)
            }
            LedgerError::InsufficientBalance { .. } => {
                Self::conflict(ErrorCode::InsufficientBalance, message, None)
            }
            LedgerError::BalanceOverflow { .. } => {
                Self::conflict(ErrorCode::BalanceOverflow, message, None)
            }
            LedgerError::UnknownAccount(_) => Self::not_found(ErrorCode::UnknownAccount, message),
            LedgerError::AccountExists(_) => {
                Self::conflict(ErrorCode::TenantStateConflict, message, None)
            }
            LedgerError::PolicyLimitExceeded { .. } => {
                Self::conflict(ErrorCode::PolicyLimitExceeded, message, None)
            }
            LedgerError::UnsupportedTransfer { .. } => {
                Self::invalid_request(ErrorCode::UnsupportedTransfer, message)
            }
            LedgerError::ReplayedNegativeBalance { .. } => Self::internal(message, None),
            LedgerError::ConservationViolation(_) => Self::internal(message, None),
        }
    }

    fn from_catalog(err: CatalogError) -> Self {
        let message = err.to_string();
        match err {
            CatalogError::UnknownItem(_) => Self::not_found(ErrorCode::UnknownItem, message),
            CatalogError::Unpriced(_) => {
                Self::conflict(ErrorCode::InvalidRedemptionAmount, message, None)
            }
            CatalogError::InvalidRedemptionAmount { .. } => {
                Self::invalid_request(ErrorCode::InvalidRedemptionAmount, message)
            }
        }
    }

    fn from_order(err: OrderError) -> Self {
        let message = err.to_string();
        match err {
            OrderError::UnknownOrder(_) => Self::not_found(ErrorCode::UnknownOrder, message),
            OrderError::InvalidStateTransition { .. } => {
                Self::conflict(ErrorCode::InvalidStateTransition, message, None)
            }
            OrderError::OtpRequired(_) => Self::conflict(
                ErrorCode::InvalidStateTransition,
                message,
                Some("verify the order before dispatching it".to_string()),
            ),
            OrderError::OtpMismatch(_) => {
                Self::invalid_request(ErrorCode::OtpVerificationFailed, message)
            }
            OrderError::Catalog(err) => Self::from_catalog(err),
            OrderError::Ledger(err) => Self::from_ledger(err),
        }
    }

    fn from_persistence(err: PersistenceError) -> Self {
        match err {
            PersistenceError::NotAttached => {
                Self::invalid_query("no sqlite store is attached", None)
            }
            other => Self::internal("persistence operation failed", Some(other.to_string())),
        }
    }
}

impl IntoResponse for HttpApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.error)).into_response()
    }
}

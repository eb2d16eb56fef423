use super::*;

#[test]
fn pagination_enforces_max_bounds() {
    let (start, end, next_cursor) = paginate(100, Some(10), Some(20)).expect("page should work");
    assert_eq!(start, 10);
    assert_eq!(end, 30);
    assert_eq!(next_cursor, Some(30));

    let (start, end, next_cursor) = paginate(3, None, Some(50)).expect("short page should work");
    assert_eq!(start, 0);
    assert_eq!(end, 3);
    assert_eq!(next_cursor, None);

    let out_of_range = paginate(5, Some(10), Some(1));
    assert!(out_of_range.is_err());
}

#[test]
fn filter_values_parse_case_insensitively() {
    assert_eq!(
        parse_account_type(" Wallet ").expect("account type"),
        AccountType::Wallet
    );
    assert_eq!(
        parse_transaction_type("RECOGNIZE").expect("transaction type"),
        TransactionType::Recognize
    );
    assert_eq!(
        parse_order_status("otp_verified").expect("order status"),
        OrderStatus::OtpVerified
    );
    assert_eq!(
        parse_order_status("otpverified").expect("order status"),
        OrderStatus::OtpVerified
    );

    assert!(parse_account_type("ledger").is_err());
    assert!(parse_transaction_type("steal").is_err());
    assert!(parse_order_status("delivered").is_err());
}

#[test]
fn order_reads_never_echo_the_otp_code() {
    let order = RedemptionOrder {
        order_id: "ord_1".to_string(),
        user_id: "user_a".to_string(),
        catalog_item_id: "item_gift".to_string(),
        points_spent: 2_000,
        status: OrderStatus::Pending,
        reference_id: "ref_1".to_string(),
        voucher_code: None,
        voucher_pin: None,
        tracking_number: None,
        failed_reason: None,
        otp_required: true,
        otp_code: Some("123456".to_string()),
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    };

    let redacted = without_otp_code(order);
    assert_eq!(redacted.otp_code, None);
    assert!(redacted.otp_required, "the gate itself stays visible");
}

#[test]
fn service_errors_map_to_expected_statuses() {
    let err = HttpApiError::from_service(ServiceError::UnknownTenant("tenant_x".to_string()));
    assert_eq!(err.status, StatusCode::NOT_FOUND);
    assert_eq!(err.error.error_code, ErrorCode::UnknownTenant);

    let err = HttpApiError::from_service(ServiceError::TenantExists("tenant_x".to_string()));
    assert_eq!(err.status, StatusCode::CONFLICT);

    let err = HttpApiError::from_service(ServiceError::Ledger(LedgerError::InsufficientBalance {
        account: "wallet:user_1".to_string(),
        shortfall: 40,
    }));
    assert_eq!(err.status, StatusCode::CONFLICT);
    assert_eq!(err.error.error_code, ErrorCode::InsufficientBalance);

    let err = HttpApiError::from_service(ServiceError::Ledger(LedgerError::InvalidAmount(-5)));
    assert_eq!(err.status, StatusCode::BAD_REQUEST);
    assert_eq!(err.error.error_code, ErrorCode::InvalidAmount);

    let err = HttpApiError::from_service(ServiceError::Order(OrderError::OtpRequired(
        "ord_1".to_string(),
    )));
    assert_eq!(err.status, StatusCode::CONFLICT);
    assert_eq!(err.error.error_code, ErrorCode::InvalidStateTransition);

    let err = HttpApiError::from_service(ServiceError::Order(OrderError::OtpMismatch(
        "ord_1".to_string(),
    )));
    assert_eq!(err.status, StatusCode::BAD_REQUEST);
    assert_eq!(err.error.error_code, ErrorCode::OtpVerificationFailed);

    let err = HttpApiError::from_service(ServiceError::Provider(
        crate::ProviderError::Unavailable("upstream timeout".to_string()),
    ));
    assert_eq!(err.status, StatusCode::BAD_GATEWAY);
    assert_eq!(err.error.error_code, ErrorCode::ProviderFailure);

    let err = HttpApiError::from_service(ServiceError::Redeem(RedeemError::Catalog(
        CatalogError::UnknownItem("item_x".to_string()),
    )));
    assert_eq!(err.status, StatusCode::NOT_FOUND);
    assert_eq!(err.error.error_code, ErrorCode::UnknownItem);
}

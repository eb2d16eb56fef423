fn apply_cors_headers(headers: &mut axum::http::HeaderMap) {
    headers.insert(
        HeaderName::from_static("access-control-allow-origin"),
        HeaderValue::from_static("*"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-methods"),
        HeaderValue::from_static("GET,POST,OPTIONS,PUT,PATCH,DELETE"),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-headers"),
        HeaderValue::from_static("*"),
    );
    headers.insert(
        HeaderName::from_static("access-control-max-age"),
        HeaderValue::from_static("3600"),
    );
}

fn default_sqlite_path() -> String {
    std::env::var("POINTS_SQLITE_PATH")
        .ok()
        .filter(|path| !path.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_SQLITE_PATH.to_string())
}

fn paginate(
    total: usize,
    cursor: Option<usize>,
    page_size: Option<usize>,
) -> Result<(usize, usize, Option<usize>), HttpApiError> {
    let start = cursor.unwrap_or(0);
    if start > total {
        return Err(HttpApiError::invalid_query(
            "cursor is out of bounds",
            Some(format!("cursor={start} total={total}")),
        ));
    }

    let size = page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .max(1)
        .min(MAX_PAGE_SIZE);
    let end = start.saturating_add(size).min(total);
    let next_cursor = if end < total { Some(end) } else { None };

    Ok((start, end, next_cursor))
}

fn parse_account_type(value: &str) -> Result<AccountType, HttpApiError> {
    match value.trim().to_lowercase().as_str() {
        "master" => Ok(AccountType::Master),
        "department" => Ok(AccountType::Department),
        "wallet" => Ok(AccountType::Wallet),
        "order" => Ok(AccountType::Order),
        _ => Err(HttpApiError::invalid_query(
            "invalid account type",
            Some(format!("account_type={value}")),
        )),
    }
}

fn parse_transaction_type(value: &str) -> Result<TransactionType, HttpApiError> {
    match value.trim().to_lowercase().as_str() {
        "inject" => Ok(TransactionType::Inject),
        "allocate" => Ok(TransactionType::Allocate),
        "recognize" => Ok(TransactionType::Recognize),
        "redeem" => Ok(TransactionType::Redeem),
        "refund" => Ok(TransactionType::Refund),
        "adjust" => Ok(TransactionType::Adjust),
        _ => Err(HttpApiError::invalid_query(
            "invalid transaction type filter",
            Some(format!("transaction_type={value}")),
        )),
    }
}

fn parse_order_status(value: &str) -> Result<OrderStatus, HttpApiError> {
    match value.trim().to_lowercase().as_str() {
        "pending" => Ok(OrderStatus::Pending),
        "otp_verified" | "otpverified" => Ok(OrderStatus::OtpVerified),
        "processing" => Ok(OrderStatus::Processing),
        "completed" => Ok(OrderStatus::Completed),
        "failed" => Ok(OrderStatus::Failed),
        "cancelled" => Ok(OrderStatus::Cancelled),
        "shipped" => Ok(OrderStatus::Shipped),
        _ => Err(HttpApiError::invalid_query(
            "invalid order status filter",
            Some(format!("status={value}")),
        )),
    }
}

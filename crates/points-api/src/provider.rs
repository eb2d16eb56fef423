//! Voucher provisioning boundary.
//!
//! Gift card orders settle through this trait so the demo binary and the
//! tests can run against local implementations; a real deployment puts
//! the upstream gift card vendor behind it.

use std::time::Duration;

use async_trait::async_trait;
use backon::ExponentialBuilder;
use rand::Rng;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Transient fault (timeout, upstream 5xx). Retried with backoff.
    #[error("voucher provider unavailable: {0}")]
    Unavailable(String),
    /// Permanent rejection. Never retried.
    #[error("voucher provider rejected the order: {0}")]
    Rejected(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoucherRequest {
    pub tenant_id: String,
    pub order_id: String,
    pub catalog_item_id: String,
    pub points: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoucherGrant {
    pub voucher_code: String,
    pub voucher_pin: Option<String>,
}

#[async_trait]
pub trait VoucherProvider: Send + Sync {
    async fn provision(&self, request: &VoucherRequest) -> Result<VoucherGrant, ProviderError>;
}

/// Issues codes locally without calling an upstream vendor. Default
/// provider for the served API and the seed command.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalVoucherProvider;

#[async_trait]
impl VoucherProvider for LocalVoucherProvider {
    async fn provision(&self, _request: &VoucherRequest) -> Result<VoucherGrant, ProviderError> {
        Ok(VoucherGrant {
            voucher_code: format!("VC-{}", Uuid::new_v4().simple()),
            voucher_pin: Some(generate_voucher_pin()),
        })
    }
}

fn generate_voucher_pin() -> String {
    format!("{:04}", rand::rng().random_range(0..10_000))
}

/// Backoff for voucher provisioning calls.
///
/// - Three attempts total: the initial call plus two retries
/// - Min delay: 100ms
/// - Max delay: 2s
/// - Jitter enabled
pub fn provider_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(2))
        .with_max_times(2)
        .with_jitter()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unavailable_errors_are_transient() {
        assert!(ProviderError::Unavailable("timeout".to_string()).is_transient());
        assert!(!ProviderError::Rejected("card denied".to_string()).is_transient());
    }

    #[test]
    fn voucher_pins_are_four_digits() {
        for _ in 0..32 {
            let pin = generate_voucher_pin();
            assert_eq!(pin.len(), 4);
            assert!(pin.chars().all(|c| c.is_ascii_digit()));
        }
    }
}

//! v1 cross-boundary contracts for the points economy core, API, and persistence.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const SCHEMA_VERSION_V1: &str = "1.0";

/// Account id of the per-tenant master pool.
pub const MASTER_ACCOUNT_ID: &str = "master";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Master,
    Department,
    Wallet,
    Order,
}

impl fmt::Display for AccountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Master => "master",
            Self::Department => "department",
            Self::Wallet => "wallet",
            Self::Order => "order",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Inject,
    Allocate,
    Recognize,
    Redeem,
    Refund,
    Adjust,
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Inject => "inject",
            Self::Allocate => "allocate",
            Self::Recognize => "recognize",
            Self::Redeem => "redeem",
            Self::Refund => "refund",
            Self::Adjust => "adjust",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct AccountRef {
    pub account_type: AccountType,
    pub account_id: String,
}

impl AccountRef {
    pub fn master() -> Self {
        Self {
            account_type: AccountType::Master,
            account_id: MASTER_ACCOUNT_ID.to_string(),
        }
    }

    pub fn department(department_id: impl Into<String>) -> Self {
        Self {
            account_type: AccountType::Department,
            account_id: department_id.into(),
        }
    }

    pub fn wallet(user_id: impl Into<String>) -> Self {
        Self {
            account_type: AccountType::Wallet,
            account_id: user_id.into(),
        }
    }

    pub fn order(order_id: impl Into<String>) -> Self {
        Self {
            account_type: AccountType::Order,
            account_id: order_id.into(),
        }
    }
}

impl fmt::Display for AccountRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.account_type, self.account_id)
    }
}

/// Immutable record of one signed balance movement on one account.
/// `balance_after` is the authoritative value projections are rebuilt from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerEntry {
    pub entry_id: String,
    pub account_type: AccountType,
    pub account_id: String,
    pub amount: i64,
    pub balance_after: i64,
    pub transaction_type: TransactionType,
    pub reference_id: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MasterPool {
    pub balance: i64,
    pub lifetime_injected: i64,
    pub lifetime_allocated: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DepartmentBudget {
    pub department_id: String,
    pub name: String,
    pub balance: i64,
    pub lifetime_allocated: i64,
    pub lifetime_spent: i64,
}

impl DepartmentBudget {
    pub fn new(department_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            department_id: department_id.into(),
            name: name.into(),
            balance: 0,
            lifetime_allocated: 0,
            lifetime_spent: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Wallet {
    pub user_id: String,
    pub department_id: Option<String>,
    pub display_name: String,
    pub active: bool,
    pub balance: i64,
    pub lifetime_earned: i64,
    pub lifetime_spent: i64,
}

impl Wallet {
    pub fn new(
        user_id: impl Into<String>,
        department_id: Option<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            department_id,
            display_name: display_name.into(),
            active: true,
            balance: 0,
            lifetime_earned: 0,
            lifetime_spent: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    OtpVerified,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Shipped,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Shipped
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::OtpVerified => "otp_verified",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Shipped => "shipped",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Master,
    Custom,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FulfillmentType {
    GiftCardApi,
    Manual,
    InventoryItem,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogItem {
    pub item_id: String,
    pub name: String,
    pub source_type: SourceType,
    pub fulfillment_type: FulfillmentType,
    pub points_cost: Option<i64>,
    pub min_points: Option<i64>,
    pub max_points: Option<i64>,
    pub step_points: Option<i64>,
    #[serde(default)]
    pub denominations: Vec<i64>,
    /// None means unlimited stock.
    pub inventory_count: Option<i64>,
    pub override_min_points: Option<i64>,
    pub override_max_points: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RedemptionOrder {
    pub order_id: String,
    pub user_id: String,
    pub catalog_item_id: String,
    pub points_spent: i64,
    pub status: OrderStatus,
    /// Links the order to its debit/refund ledger entries.
    pub reference_id: String,
    pub voucher_code: Option<String>,
    pub voucher_pin: Option<String>,
    pub tracking_number: Option<String>,
    pub failed_reason: Option<String>,
    pub otp_required: bool,
    pub otp_code: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TenantConfig {
    pub schema_version: String,
    pub tenant_id: String,
    pub name: String,
    /// Orders at or above this many points require OTP verification
    /// before dispatch. None disables the gate.
    pub otp_threshold: Option<i64>,
    /// Default monthly cap on a department's recognition spend.
    pub monthly_recognition_cap: Option<i64>,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            tenant_id: "tenant_local_001".to_string(),
            name: "Local Tenant".to_string(),
            otp_threshold: None,
            monthly_recognition_cap: None,
        }
    }
}

/// Outcome of one transfer: the new balances and the reference id
/// shared by the paired ledger entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferReceipt {
    pub reference_id: String,
    pub transaction_type: TransactionType,
    pub amount: i64,
    pub from_balance: Option<i64>,
    pub to_balance: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PerEmployeeSummary {
    pub total_points_allocated: i64,
    pub departments_updated: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AllUsersSummary {
    pub total_points_distributed: i64,
    pub total_users_credited: usize,
}

/// Stored under the request's idempotency key so a replayed
/// distribution returns the original summary without re-applying.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DistributionReceipt {
    PerEmployee(PerEmployeeSummary),
    AllUsers(AllUsersSummary),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "account_type", rename_all = "snake_case")]
pub enum AccountRecord {
    Master(MasterPool),
    Department(DepartmentBudget),
    Wallet(Wallet),
    Order { order_id: String, balance: i64 },
}

impl AccountRecord {
    pub fn balance(&self) -> i64 {
        match self {
            Self::Master(pool) => pool.balance,
            Self::Department(budget) => budget.balance,
            Self::Wallet(wallet) => wallet.balance,
            Self::Order { balance, .. } => *balance,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InsufficientBalance,
    BalanceOverflow,
    InvalidAmount,
    PolicyLimitExceeded,
    InvalidRedemptionAmount,
    InvalidStateTransition,
    ProviderFailure,
    OtpVerificationFailed,
    UnknownAccount,
    UnknownOrder,
    UnknownTenant,
    UnknownItem,
    UnsupportedTransfer,
    TenantStateConflict,
    InvalidQuery,
    ContractVersionUnsupported,
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiError {
    pub schema_version: String,
    pub error_code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
}

impl ApiError {
    pub fn new(error_code: ErrorCode, message: impl Into<String>, details: Option<String>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            error_code,
            message: message.into(),
            details,
        }
    }
}

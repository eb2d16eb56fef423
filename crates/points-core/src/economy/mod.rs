use std::collections::{BTreeMap, BTreeSet};

mod distribution;
mod redemption;

use chrono::{DateTime, Utc};
use contracts::{
    AccountRecord, AccountRef, AccountType, AllUsersSummary, CatalogItem, DepartmentBudget,
    DistributionReceipt, FulfillmentType, LedgerEntry, MasterPool, OrderStatus, PerEmployeeSummary,
    RedemptionOrder, TenantConfig, TransactionType, TransferReceipt, Wallet,
};
use thiserror::Error;
use uuid::Uuid;

use crate::catalog::{Catalog, CatalogError};
use crate::ledger::{LedgerError, TenantLedger};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RedeemError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrderError {
    #[error("unknown order {0}")]
    UnknownOrder(String),
    #[error("order {order_id} cannot move from {from} to {to}")]
    InvalidStateTransition {
        order_id: String,
        from: OrderStatus,
        to: OrderStatus,
    },
    #[error("order {0} requires OTP verification before dispatch")]
    OtpRequired(String),
    #[error("submitted code does not match for order {0}")]
    OtpMismatch(String),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DistributionError {
    #[error("idempotency key {0} was already used for a different distribution mode")]
    IdempotencyKeyReused(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Result of a dispatch attempt. `AlreadyDispatched` and `StockOut`
/// tell the caller not to contact the voucher provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    Started(RedemptionOrder),
    AlreadyDispatched(RedemptionOrder),
    StockOut(RedemptionOrder),
}

/// One tenant's complete points economy: the ledger, the directory of
/// departments and wallets, its catalog, and every redemption order.
/// Pure in-memory state machine; the service layer owns persistence
/// and locking.
#[derive(Debug, Clone)]
pub struct PointsEconomy {
    config: TenantConfig,
    ledger: TenantLedger,
    catalog: Catalog,
    orders: BTreeMap<String, RedemptionOrder>,
    distribution_receipts: BTreeMap<String, DistributionReceipt>,
}

impl PointsEconomy {
    pub fn new(config: TenantConfig) -> Self {
        Self {
            config,
            ledger: TenantLedger::default(),
            catalog: Catalog::default(),
            orders: BTreeMap::new(),
            distribution_receipts: BTreeMap::new(),
        }
    }

    /// Rehydrate a tenant from storage. The directory and catalog come
    /// from the stored snapshot; balances and lifetime counters are
    /// replayed from the entry log, which is authoritative.
    pub fn restore(
        config: TenantConfig,
        departments: Vec<DepartmentBudget>,
        wallets: Vec<Wallet>,
        catalog_items: Vec<CatalogItem>,
        entries: Vec<LedgerEntry>,
        orders: Vec<RedemptionOrder>,
        distribution_receipts: Vec<(String, DistributionReceipt)>,
    ) -> Result<Self, LedgerError> {
        let mut economy = Self::new(config);
        for department in departments {
            economy.ledger.insert_department(department);
        }
        for wallet in wallets {
            economy.ledger.insert_wallet(wallet);
        }
        for item in catalog_items {
            economy.catalog.upsert_item(item);
        }
        economy.ledger.rebuild_from_entries(entries)?;
        for order in orders {
            economy.orders.insert(order.order_id.clone(), order);
        }
        economy.distribution_receipts.extend(distribution_receipts);
        Ok(economy)
    }

    pub fn config(&self) -> &TenantConfig {
        &self.config
    }

    pub fn update_policy(
        &mut self,
        otp_threshold: Option<i64>,
        monthly_recognition_cap: Option<i64>,
    ) -> TenantConfig {
        self.config.otp_threshold = otp_threshold;
        self.config.monthly_recognition_cap = monthly_recognition_cap;
        self.config.clone()
    }

    pub fn master(&self) -> &MasterPool {
        self.ledger.master()
    }

    pub fn departments(&self) -> &BTreeMap<String, DepartmentBudget> {
        self.ledger.departments()
    }

    pub fn wallets(&self) -> &BTreeMap<String, Wallet> {
        self.ledger.wallets()
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        self.ledger.entries()
    }

    pub fn orders(&self) -> &BTreeMap<String, RedemptionOrder> {
        &self.orders
    }

    pub fn order(&self, order_id: &str) -> Result<&RedemptionOrder, OrderError> {
        self.orders
            .get(order_id)
            .ok_or_else(|| OrderError::UnknownOrder(order_id.to_string()))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn distribution_receipts(&self) -> &BTreeMap<String, DistributionReceipt> {
        &self.distribution_receipts
    }

    pub fn active_user_count(&self) -> usize {
        self.ledger.active_user_count()
    }

    pub fn active_employee_count(&self, department_id: &str) -> usize {
        self.ledger.active_employee_count(department_id)
    }

    pub fn account_record(&self, account: &AccountRef) -> Result<AccountRecord, LedgerError> {
        self.ledger.account_record(account)
    }

    pub fn balance_of(&self, account: &AccountRef) -> Result<i64, LedgerError> {
        self.ledger.balance_of(account)
    }

    pub fn verify_conservation(&self) -> bool {
        self.ledger.verify_conservation()
    }

    pub fn create_department(
        &mut self,
        department_id: &str,
        name: &str,
    ) -> Result<DepartmentBudget, LedgerError> {
        self.ledger.create_department(department_id, name)
    }

    pub fn create_wallet(
        &mut self,
        user_id: &str,
        department_id: Option<String>,
        display_name: &str,
    ) -> Result<Wallet, LedgerError> {
        self.ledger.create_wallet(user_id, department_id, display_name)
    }

    pub fn set_wallet_active(
        &mut self,
        user_id: &str,
        active: bool,
    ) -> Result<Wallet, LedgerError> {
        self.ledger.set_wallet_active(user_id, active)
    }

    pub fn upsert_catalog_item(&mut self, item: CatalogItem) {
        self.catalog.upsert_item(item);
    }

    pub fn set_catalog_override(
        &mut self,
        item_id: &str,
        min_points: Option<i64>,
        max_points: Option<i64>,
    ) -> Result<CatalogItem, CatalogError> {
        self.catalog.set_override(item_id, min_points, max_points)
    }

    /// The shared transfer contract. Recognition debits from a
    /// department are checked against the policy limit (the request's
    /// own limit, falling back to the tenant's monthly cap) before any
    /// balance check runs.
    ///
    /// REDEEM and REFUND are not accepted here: those legs are written
    /// exclusively by the order state machine.
    pub fn transfer(
        &mut self,
        from: Option<&AccountRef>,
        to: &AccountRef,
        amount: i64,
        transaction_type: TransactionType,
        description: &str,
        policy_limit: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<TransferReceipt, LedgerError> {
        if matches!(
            transaction_type,
            TransactionType::Redeem | TransactionType::Refund
        ) {
            return Err(LedgerError::UnsupportedTransfer {
                transaction_type,
                from: from
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "platform".to_string()),
                to: to.to_string(),
            });
        }

        if transaction_type == TransactionType::Recognize && amount > 0 {
            if let Some(source) = from {
                if source.account_type == AccountType::Department {
                    let limit = policy_limit.or(self.config.monthly_recognition_cap);
                    if let Some(limit) = limit {
                        let month_to_date = self
                            .ledger
                            .monthly_recognition_spend(&source.account_id, now);
                        let exceeds = month_to_date
                            .checked_add(amount)
                            .map_or(true, |projected| projected > limit);
                        if exceeds {
                            return Err(LedgerError::PolicyLimitExceeded {
                                limit,
                                month_to_date,
                                attempted: amount,
                            });
                        }
                    }
                }
            }
        }

        self.ledger
            .transfer(from, to, amount, transaction_type, description, now)
    }
}

#[cfg(test)]
mod tests;

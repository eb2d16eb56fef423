use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Utc};
use contracts::{
    AccountRecord, AccountRef, AccountType, DepartmentBudget, LedgerEntry, MasterPool,
    TransactionType, TransferReceipt, Wallet,
};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("amount must be a positive number of points, got {0}")]
    InvalidAmount(i64),
    #[error("account {account} is short {shortfall} points")]
    InsufficientBalance { account: String, shortfall: i64 },
    #[error("crediting {account} with {amount} points overflows its balance")]
    BalanceOverflow { account: String, amount: i64 },
    #[error("unknown account {0}")]
    UnknownAccount(String),
    #[error("account {0} already exists")]
    AccountExists(String),
    #[error("recognition cap {limit} exceeded: {month_to_date} spent this month, {attempted} attempted")]
    PolicyLimitExceeded {
        limit: i64,
        month_to_date: i64,
        attempted: i64,
    },
    #[error("{transaction_type} transfers from {from} to {to} are not supported")]
    UnsupportedTransfer {
        transaction_type: TransactionType,
        from: String,
        to: String,
    },
    #[error("stored entries replay {account} to a negative balance of {balance}")]
    ReplayedNegativeBalance { account: String, balance: i64 },
    #[error("ledger entries no longer sum to zero after {0}")]
    ConservationViolation(String),
}

/// Balance snapshot taken before a multi-transfer batch so the whole
/// batch can be rolled back if any leg fails.
#[derive(Debug, Clone)]
pub(crate) struct LedgerCheckpoint {
    entry_count: usize,
    master: MasterPool,
    departments: BTreeMap<String, DepartmentBudget>,
    wallets: BTreeMap<String, Wallet>,
    order_escrow: BTreeMap<String, i64>,
}

/// Append-only ledger plus current-balance projections for one tenant.
///
/// Every mutation writes exactly one `LedgerEntry` per touched account;
/// `balance_after` on those entries is what `rebuild_from_entries`
/// trusts when a tenant is loaded from storage.
#[derive(Debug, Clone, Default)]
pub struct TenantLedger {
    master: MasterPool,
    departments: BTreeMap<String, DepartmentBudget>,
    wallets: BTreeMap<String, Wallet>,
    order_escrow: BTreeMap<String, i64>,
    entries: Vec<LedgerEntry>,
}

impl TenantLedger {
    pub fn master(&self) -> &MasterPool {
        &self.master
    }

    pub fn departments(&self) -> &BTreeMap<String, DepartmentBudget> {
        &self.departments
    }

    pub fn wallets(&self) -> &BTreeMap<String, Wallet> {
        &self.wallets
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn create_department(
        &mut self,
        department_id: &str,
        name: &str,
    ) -> Result<DepartmentBudget, LedgerError> {
        if self.departments.contains_key(department_id) {
            return Err(LedgerError::AccountExists(department_id.to_string()));
        }
        let budget = DepartmentBudget::new(department_id, name);
        self.departments
            .insert(department_id.to_string(), budget.clone());
        Ok(budget)
    }

    pub fn create_wallet(
        &mut self,
        user_id: &str,
        department_id: Option<String>,
        display_name: &str,
    ) -> Result<Wallet, LedgerError> {
        if self.wallets.contains_key(user_id) {
            return Err(LedgerError::AccountExists(user_id.to_string()));
        }
        if let Some(department_id) = department_id.as_deref() {
            if !self.departments.contains_key(department_id) {
                return Err(LedgerError::UnknownAccount(department_id.to_string()));
            }
        }
        let wallet = Wallet::new(user_id, department_id, display_name);
        self.wallets.insert(user_id.to_string(), wallet.clone());
        Ok(wallet)
    }

    /// Restore-path insert: trusts the stored row as-is.
    pub(crate) fn insert_department(&mut self, budget: DepartmentBudget) {
        self.departments
            .insert(budget.department_id.clone(), budget);
    }

    /// Restore-path insert: trusts the stored row as-is.
    pub(crate) fn insert_wallet(&mut self, wallet: Wallet) {
        self.wallets.insert(wallet.user_id.clone(), wallet);
    }

    pub fn set_wallet_active(&mut self, user_id: &str, active: bool) -> Result<Wallet, LedgerError> {
        let wallet = self
            .wallets
            .get_mut(user_id)
            .ok_or_else(|| LedgerError::UnknownAccount(user_id.to_string()))?;
        wallet.active = active;
        Ok(wallet.clone())
    }

    pub fn active_user_count(&self) -> usize {
        self.wallets.values().filter(|wallet| wallet.active).count()
    }

    pub fn active_employee_count(&self, department_id: &str) -> usize {
        self.wallets
            .values()
            .filter(|wallet| {
                wallet.active && wallet.department_id.as_deref() == Some(department_id)
            })
            .count()
    }

    pub(crate) fn open_order_account(&mut self, order_id: &str) {
        self.order_escrow.entry(order_id.to_string()).or_insert(0);
    }

    pub(crate) fn close_order_account(&mut self, order_id: &str) {
        self.order_escrow.remove(order_id);
    }

    pub fn balance_of(&self, account: &AccountRef) -> Result<i64, LedgerError> {
        match account.account_type {
            AccountType::Master => Ok(self.master.balance),
            AccountType::Department => self
                .departments
                .get(&account.account_id)
                .map(|budget| budget.balance)
                .ok_or_else(|| LedgerError::UnknownAccount(account.to_string())),
            AccountType::Wallet => self
                .wallets
                .get(&account.account_id)
                .map(|wallet| wallet.balance)
                .ok_or_else(|| LedgerError::UnknownAccount(account.to_string())),
            AccountType::Order => self
                .order_escrow
                .get(&account.account_id)
                .copied()
                .ok_or_else(|| LedgerError::UnknownAccount(account.to_string())),
        }
    }

    pub fn account_record(&self, account: &AccountRef) -> Result<AccountRecord, LedgerError> {
        match account.account_type {
            AccountType::Master => Ok(AccountRecord::Master(self.master.clone())),
            AccountType::Department => self
                .departments
                .get(&account.account_id)
                .map(|budget| AccountRecord::Department(budget.clone()))
                .ok_or_else(|| LedgerError::UnknownAccount(account.to_string())),
            AccountType::Wallet => self
                .wallets
                .get(&account.account_id)
                .map(|wallet| AccountRecord::Wallet(wallet.clone()))
                .ok_or_else(|| LedgerError::UnknownAccount(account.to_string())),
            AccountType::Order => self
                .order_escrow
                .get(&account.account_id)
                .map(|balance| AccountRecord::Order {
                    order_id: account.account_id.clone(),
                    balance: *balance,
                })
                .ok_or_else(|| LedgerError::UnknownAccount(account.to_string())),
        }
    }

    /// Month-to-date recognition spend of one department, in the UTC
    /// calendar month containing `now`.
    pub fn monthly_recognition_spend(&self, department_id: &str, now: DateTime<Utc>) -> i64 {
        self.entries
            .iter()
            .filter(|entry| {
                entry.account_type == AccountType::Department
                    && entry.account_id == department_id
                    && entry.transaction_type == TransactionType::Recognize
                    && entry.amount < 0
                    && entry.created_at.year() == now.year()
                    && entry.created_at.month() == now.month()
            })
            .fold(0_i64, |total, entry| total.saturating_sub(entry.amount))
    }

    pub fn transfer(
        &mut self,
        from: Option<&AccountRef>,
        to: &AccountRef,
        amount: i64,
        transaction_type: TransactionType,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<TransferReceipt, LedgerError> {
        let reference_id = Uuid::new_v4().to_string();
        self.transfer_with_reference(
            from,
            to,
            amount,
            transaction_type,
            description,
            now,
            &reference_id,
        )
    }

    /// Transfer under a caller-chosen reference id. Refunds use this to
    /// join the reference family of the debit they compensate.
    pub fn transfer_with_reference(
        &mut self,
        from: Option<&AccountRef>,
        to: &AccountRef,
        amount: i64,
        transaction_type: TransactionType,
        description: &str,
        now: DateTime<Utc>,
        reference_id: &str,
    ) -> Result<TransferReceipt, LedgerError> {
        if amount <= 0 {
            return Err(LedgerError::InvalidAmount(amount));
        }

        if !route_allowed(transaction_type, from.map(|a| a.account_type), to.account_type)
            || from == Some(to)
        {
            return Err(LedgerError::UnsupportedTransfer {
                transaction_type,
                from: from
                    .map(ToString::to_string)
                    .unwrap_or_else(|| "platform".to_string()),
                to: to.to_string(),
            });
        }

        let from_balance_before = from.map(|account| self.balance_of(account)).transpose()?;
        let credited_balance = self.balance_of(to)?.checked_add(amount).ok_or_else(|| {
            LedgerError::BalanceOverflow {
                account: to.to_string(),
                amount,
            }
        })?;

        if let Some(balance) = from_balance_before {
            if balance < amount {
                return Err(LedgerError::InsufficientBalance {
                    account: from.map(ToString::to_string).unwrap_or_default(),
                    shortfall: amount - balance,
                });
            }
        }

        let mut from_balance_after = None;
        if let Some(from_account) = from {
            let entry = self.build_entry(
                from_account,
                -amount,
                from_balance_before.unwrap_or(0) - amount,
                transaction_type,
                reference_id,
                description,
                now,
            );
            self.apply_projection(&entry)?;
            from_balance_after = Some(entry.balance_after);
            self.entries.push(entry);
        }

        let credit = self.build_entry(
            to,
            amount,
            credited_balance,
            transaction_type,
            reference_id,
            description,
            now,
        );
        self.apply_projection(&credit)?;
        let to_balance_after = credit.balance_after;
        self.entries.push(credit);

        Ok(TransferReceipt {
            reference_id: reference_id.to_string(),
            transaction_type,
            amount,
            from_balance: from_balance_after,
            to_balance: to_balance_after,
        })
    }

    /// True when the signed amounts of all non-INJECT entries sum to
    /// zero, i.e. every point in circulation traces back to a top-up.
    pub fn verify_conservation(&self) -> bool {
        let drift = self
            .entries
            .iter()
            .filter(|entry| entry.transaction_type != TransactionType::Inject)
            .fold(0_i64, |total, entry| total.saturating_add(entry.amount));
        drift == 0
    }

    /// Rebuild projections from a persisted entry log. `balance_after`
    /// is authoritative; lifetime counters are re-derived from scratch.
    /// A log that replays any account negative, or whose entries no
    /// longer sum to zero, is rejected instead of loaded.
    pub fn rebuild_from_entries(&mut self, entries: Vec<LedgerEntry>) -> Result<(), LedgerError> {
        self.master.balance = 0;
        self.master.lifetime_injected = 0;
        self.master.lifetime_allocated = 0;
        for budget in self.departments.values_mut() {
            budget.balance = 0;
            budget.lifetime_allocated = 0;
            budget.lifetime_spent = 0;
        }
        for wallet in self.wallets.values_mut() {
            wallet.balance = 0;
            wallet.lifetime_earned = 0;
            wallet.lifetime_spent = 0;
        }
        self.order_escrow.clear();

        for entry in &entries {
            self.apply_projection(entry)?;
        }
        self.entries = entries;

        if let Some((account, balance)) = self.first_negative_balance() {
            return Err(LedgerError::ReplayedNegativeBalance { account, balance });
        }
        if !self.verify_conservation() {
            return Err(LedgerError::ConservationViolation("replay".to_string()));
        }
        Ok(())
    }

    fn first_negative_balance(&self) -> Option<(String, i64)> {
        if self.master.balance < 0 {
            return Some((AccountRef::master().to_string(), self.master.balance));
        }
        for budget in self.departments.values() {
            if budget.balance < 0 {
                return Some((
                    format!("department:{}", budget.department_id),
                    budget.balance,
                ));
            }
        }
        for wallet in self.wallets.values() {
            if wallet.balance < 0 {
                return Some((format!("wallet:{}", wallet.user_id), wallet.balance));
            }
        }
        for (order_id, balance) in &self.order_escrow {
            if *balance < 0 {
                return Some((format!("order:{order_id}"), *balance));
            }
        }
        None
    }

    pub(crate) fn checkpoint(&self) -> LedgerCheckpoint {
        LedgerCheckpoint {
            entry_count: self.entries.len(),
            master: self.master.clone(),
            departments: self.departments.clone(),
            wallets: self.wallets.clone(),
            order_escrow: self.order_escrow.clone(),
        }
    }

    pub(crate) fn rollback_to(&mut self, checkpoint: LedgerCheckpoint) {
        self.entries.truncate(checkpoint.entry_count);
        self.master = checkpoint.master;
        self.departments = checkpoint.departments;
        self.wallets = checkpoint.wallets;
        self.order_escrow = checkpoint.order_escrow;
    }

    fn build_entry(
        &self,
        account: &AccountRef,
        amount: i64,
        balance_after: i64,
        transaction_type: TransactionType,
        reference_id: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> LedgerEntry {
        LedgerEntry {
            entry_id: format!("led_{:08}", self.entries.len() + 1),
            account_type: account.account_type,
            account_id: account.account_id.clone(),
            amount,
            balance_after,
            transaction_type,
            reference_id: reference_id.to_string(),
            description: description.to_string(),
            created_at: now,
        }
    }

    /// Apply one entry to the balance projections and lifetime counters.
    /// Shared by live transfers and rebuild so the two can never drift.
    /// Counter updates saturate instead of overflowing.
    fn apply_projection(&mut self, entry: &LedgerEntry) -> Result<(), LedgerError> {
        match entry.account_type {
            AccountType::Master => {
                self.master.balance = entry.balance_after;
                if entry.transaction_type == TransactionType::Inject && entry.amount > 0 {
                    self.master.lifetime_injected =
                        self.master.lifetime_injected.saturating_add(entry.amount);
                }
                if entry.transaction_type == TransactionType::Allocate && entry.amount < 0 {
                    self.master.lifetime_allocated =
                        self.master.lifetime_allocated.saturating_sub(entry.amount);
                }
            }
            AccountType::Department => {
                let budget = self.departments.get_mut(&entry.account_id).ok_or_else(|| {
                    LedgerError::UnknownAccount(format!("department:{}", entry.account_id))
                })?;
                budget.balance = entry.balance_after;
                if entry.transaction_type == TransactionType::Allocate && entry.amount > 0 {
                    budget.lifetime_allocated =
                        budget.lifetime_allocated.saturating_add(entry.amount);
                }
                if entry.transaction_type == TransactionType::Recognize && entry.amount < 0 {
                    budget.lifetime_spent = budget.lifetime_spent.saturating_sub(entry.amount);
                }
            }
            AccountType::Wallet => {
                let wallet = self.wallets.get_mut(&entry.account_id).ok_or_else(|| {
                    LedgerError::UnknownAccount(format!("wallet:{}", entry.account_id))
                })?;
                wallet.balance = entry.balance_after;
                let earned = matches!(
                    entry.transaction_type,
                    TransactionType::Recognize | TransactionType::Allocate
                );
                if earned && entry.amount > 0 {
                    wallet.lifetime_earned = wallet.lifetime_earned.saturating_add(entry.amount);
                }
                if entry.transaction_type == TransactionType::Redeem && entry.amount < 0 {
                    wallet.lifetime_spent = wallet.lifetime_spent.saturating_sub(entry.amount);
                }
            }
            AccountType::Order => {
                self.order_escrow
                    .insert(entry.account_id.clone(), entry.balance_after);
            }
        }
        Ok(())
    }
}

fn route_allowed(
    transaction_type: TransactionType,
    from: Option<AccountType>,
    to: AccountType,
) -> bool {
    matches!(
        (transaction_type, from, to),
        (TransactionType::Inject, None, AccountType::Master)
            | (
                TransactionType::Allocate,
                Some(AccountType::Master),
                AccountType::Department | AccountType::Wallet,
            )
            | (
                TransactionType::Recognize,
                Some(AccountType::Department | AccountType::Wallet),
                AccountType::Wallet,
            )
            | (
                TransactionType::Redeem,
                Some(AccountType::Wallet),
                AccountType::Order,
            )
            | (
                TransactionType::Refund,
                Some(AccountType::Order),
                AccountType::Wallet,
            )
            | (
                TransactionType::Adjust,
                Some(AccountType::Master | AccountType::Department | AccountType::Wallet),
                AccountType::Master | AccountType::Department | AccountType::Wallet,
            )
    )
}

//! Multi-tenant service facade over the points economy core, with SQLite
//! persistence, voucher dispatch, and the HTTP surface.

mod persistence;
mod provider;
mod server;

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

use backon::Retryable;
use chrono::Utc;
use contracts::{
    AccountRef, CatalogItem, DepartmentBudget, DistributionReceipt, FulfillmentType,
    RedemptionOrder, TenantConfig, TransactionType, TransferReceipt, Wallet,
};
use points_core::catalog::CatalogError;
use points_core::economy::{
    DistributionError, OrderError, PointsEconomy, ProcessingOutcome, RedeemError,
};
use points_core::ledger::LedgerError;
use rand::Rng;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, warn};

use persistence::SqliteLedgerStore;
pub use persistence::{LoadedTenant, PersistedTenantSummary, PersistenceError};
pub use provider::{
    provider_backoff, LocalVoucherProvider, ProviderError, VoucherGrant, VoucherProvider,
    VoucherRequest,
};
pub use server::{serve, ServerError};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unknown tenant: {0}")]
    UnknownTenant(String),
    #[error("tenant {0} already exists")]
    TenantExists(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Order(#[from] OrderError),
    #[error(transparent)]
    Redeem(#[from] RedeemError),
    #[error(transparent)]
    Distribution(#[from] DistributionError),
    #[error("voucher provider failed: {0}")]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// One tenant economy plus the bookkeeping that limits each flush to
/// new entries, touched orders, and new receipts.
#[derive(Debug)]
struct TenantEntry {
    economy: PointsEconomy,
    persisted_entry_count: usize,
    dirty_orders: BTreeSet<String>,
    persisted_receipt_keys: BTreeSet<String>,
}

impl TenantEntry {
    fn new(economy: PointsEconomy) -> Self {
        Self {
            economy,
            persisted_entry_count: 0,
            dirty_orders: BTreeSet::new(),
            persisted_receipt_keys: BTreeSet::new(),
        }
    }
}

/// In-process facade over every tenant economy. Each mutating call
/// delegates to the tenant's [`PointsEconomy`] and flushes the delta to
/// the attached SQLite store in one transaction.
#[derive(Debug, Default)]
pub struct PointsService {
    store: Option<SqliteLedgerStore>,
    tenants: BTreeMap<String, TenantEntry>,
    last_persistence_error: Option<String>,
}

impl PointsService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attach_sqlite_store(&mut self, path: impl AsRef<Path>) -> Result<(), PersistenceError> {
        self.store = Some(SqliteLedgerStore::open(path)?);
        Ok(())
    }

    /// Rehydrates every persisted tenant that is not already loaded.
    /// Balances come from replaying the entry log; the stored directory
    /// snapshot is only checked for drift.
    pub fn load_persisted_tenants(&mut self) -> Result<usize, PersistenceError> {
        let Some(store) = self.store.as_ref() else {
            return Err(PersistenceError::NotAttached);
        };

        let mut loaded = 0;
        for tenant_id in store.list_tenant_ids()? {
            if self.tenants.contains_key(&tenant_id) {
                continue;
            }
            let Some(tenant) = store.load_tenant(&tenant_id)? else {
                continue;
            };

            let LoadedTenant {
                config,
                departments,
                wallets,
                catalog_items,
                entries,
                orders,
                receipts,
            } = tenant;

            let persisted_entry_count = entries.len();
            let persisted_receipt_keys: BTreeSet<String> =
                receipts.iter().map(|(key, _)| key.clone()).collect();
            let snapshot_departments = departments.clone();
            let snapshot_wallets = wallets.clone();

            let economy = PointsEconomy::restore(
                config,
                departments,
                wallets,
                catalog_items,
                entries,
                orders,
                receipts,
            )
            .map_err(|source| PersistenceError::Replay {
                tenant_id: tenant_id.clone(),
                source,
            })?;

            warn_on_directory_drift(&tenant_id, &economy, &snapshot_departments, &snapshot_wallets);

            self.tenants.insert(
                tenant_id,
                TenantEntry {
                    economy,
                    persisted_entry_count,
                    dirty_orders: BTreeSet::new(),
                    persisted_receipt_keys,
                },
            );
            loaded += 1;
        }

        Ok(loaded)
    }

    pub fn list_persisted_tenants(
        &self,
        limit: usize,
    ) -> Result<Vec<PersistedTenantSummary>, PersistenceError> {
        let Some(store) = self.store.as_ref() else {
            return Err(PersistenceError::NotAttached);
        };

        store.list_tenants(limit)
    }

    pub fn tenant(&self, tenant_id: &str) -> Option<&PointsEconomy> {
        self.tenants.get(tenant_id).map(|entry| &entry.economy)
    }

    pub fn tenant_ids(&self) -> Vec<String> {
        self.tenants.keys().cloned().collect()
    }

    pub fn last_persistence_error(&self) -> Option<&str> {
        self.last_persistence_error.as_deref()
    }

    pub fn create_tenant(
        &mut self,
        config: TenantConfig,
        replace_existing: bool,
    ) -> Result<TenantConfig, ServiceError> {
        let tenant_id = config.tenant_id.clone();

        if self.tenants.contains_key(&tenant_id) && !replace_existing {
            return Err(ServiceError::TenantExists(tenant_id));
        }

        if let Some(store) = self.store.as_mut() {
            if store.tenant_exists(&tenant_id)? {
                if replace_existing {
                    store.delete_tenant(&tenant_id)?;
                } else {
                    return Err(ServiceError::TenantExists(tenant_id));
                }
            }
        }

        self.tenants.insert(
            tenant_id.clone(),
            TenantEntry::new(PointsEconomy::new(config.clone())),
        );
        if self.store.is_some() {
            self.flush_tenant_checked(&tenant_id)?;
        }
        Ok(config)
    }

    pub fn update_tenant_config(
        &mut self,
        tenant_id: &str,
        otp_threshold: Option<i64>,
        monthly_recognition_cap: Option<i64>,
    ) -> Result<TenantConfig, ServiceError> {
        let entry = self.tenant_entry_mut(tenant_id)?;
        let config = entry
            .economy
            .update_policy(otp_threshold, monthly_recognition_cap);
        self.flush_tenant_if_attached(tenant_id);
        Ok(config)
    }

    pub fn create_department(
        &mut self,
        tenant_id: &str,
        department_id: &str,
        name: &str,
    ) -> Result<DepartmentBudget, ServiceError> {
        let entry = self.tenant_entry_mut(tenant_id)?;
        let department = entry.economy.create_department(department_id, name)?;
        self.flush_tenant_if_attached(tenant_id);
        Ok(department)
    }

    pub fn create_user(
        &mut self,
        tenant_id: &str,
        user_id: &str,
        department_id: Option<String>,
        display_name: &str,
    ) -> Result<Wallet, ServiceError> {
        let entry = self.tenant_entry_mut(tenant_id)?;
        let wallet = entry
            .economy
            .create_wallet(user_id, department_id, display_name)?;
        self.flush_tenant_if_attached(tenant_id);
        Ok(wallet)
    }

    pub fn set_user_active(
        &mut self,
        tenant_id: &str,
        user_id: &str,
        active: bool,
    ) -> Result<Wallet, ServiceError> {
        let entry = self.tenant_entry_mut(tenant_id)?;
        let wallet = entry.economy.set_wallet_active(user_id, active)?;
        self.flush_tenant_if_attached(tenant_id);
        Ok(wallet)
    }

    pub fn upsert_catalog_item(
        &mut self,
        tenant_id: &str,
        item: CatalogItem,
    ) -> Result<CatalogItem, ServiceError> {
        let entry = self.tenant_entry_mut(tenant_id)?;
        let stored = item.clone();
        entry.economy.upsert_catalog_item(item);
        self.flush_tenant_if_attached(tenant_id);
        Ok(stored)
    }

    pub fn set_catalog_override(
        &mut self,
        tenant_id: &str,
        item_id: &str,
        min_points: Option<i64>,
        max_points: Option<i64>,
    ) -> Result<CatalogItem, ServiceError> {
        let entry = self.tenant_entry_mut(tenant_id)?;
        let item = entry
            .economy
            .set_catalog_override(item_id, min_points, max_points)?;
        self.flush_tenant_if_attached(tenant_id);
        Ok(item)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn transfer(
        &mut self,
        tenant_id: &str,
        from: Option<AccountRef>,
        to: AccountRef,
        amount: i64,
        transaction_type: TransactionType,
        description: &str,
        policy_limit: Option<i64>,
    ) -> Result<TransferReceipt, ServiceError> {
        let entry = self.tenant_entry_mut(tenant_id)?;
        let receipt = entry.economy.transfer(
            from.as_ref(),
            &to,
            amount,
            transaction_type,
            description,
            policy_limit,
            Utc::now(),
        )?;
        self.flush_tenant_if_attached(tenant_id);
        Ok(receipt)
    }

    /// Creates a PENDING order. A six digit OTP candidate is generated
    /// here; the economy keeps it only when the order crosses the
    /// tenant's OTP threshold.
    pub fn redeem(
        &mut self,
        tenant_id: &str,
        user_id: &str,
        catalog_item_id: &str,
        points: i64,
    ) -> Result<RedemptionOrder, ServiceError> {
        let entry = self.tenant_entry_mut(tenant_id)?;
        let order = entry.economy.redeem(
            user_id,
            catalog_item_id,
            points,
            Some(generate_otp_code()),
            Utc::now(),
        )?;
        entry.dirty_orders.insert(order.order_id.clone());
        self.flush_tenant_if_attached(tenant_id);
        Ok(order)
    }

    pub fn verify_otp(
        &mut self,
        tenant_id: &str,
        order_id: &str,
        code: &str,
    ) -> Result<RedemptionOrder, ServiceError> {
        let entry = self.tenant_entry_mut(tenant_id)?;
        let order = entry.economy.verify_otp(order_id, code, Utc::now())?;
        entry.dirty_orders.insert(order_id.to_string());
        self.flush_tenant_if_attached(tenant_id);
        Ok(order)
    }

    pub fn begin_processing(
        &mut self,
        tenant_id: &str,
        order_id: &str,
    ) -> Result<ProcessingOutcome, ServiceError> {
        let entry = self.tenant_entry_mut(tenant_id)?;
        let outcome = entry.economy.begin_processing(order_id, Utc::now())?;
        entry.dirty_orders.insert(order_id.to_string());
        self.flush_tenant_if_attached(tenant_id);
        Ok(outcome)
    }

    pub fn complete_order(
        &mut self,
        tenant_id: &str,
        order_id: &str,
        voucher_code: Option<String>,
        voucher_pin: Option<String>,
    ) -> Result<RedemptionOrder, ServiceError> {
        let entry = self.tenant_entry_mut(tenant_id)?;
        let order = entry
            .economy
            .complete_order(order_id, voucher_code, voucher_pin, Utc::now())?;
        entry.dirty_orders.insert(order_id.to_string());
        self.flush_tenant_if_attached(tenant_id);
        Ok(order)
    }

    pub fn fail_order(
        &mut self,
        tenant_id: &str,
        order_id: &str,
        reason: &str,
    ) -> Result<RedemptionOrder, ServiceError> {
        let entry = self.tenant_entry_mut(tenant_id)?;
        let order = entry.economy.fail_order(order_id, reason, Utc::now())?;
        entry.dirty_orders.insert(order_id.to_string());
        self.flush_tenant_if_attached(tenant_id);
        Ok(order)
    }

    pub fn cancel_order(
        &mut self,
        tenant_id: &str,
        order_id: &str,
    ) -> Result<RedemptionOrder, ServiceError> {
        let entry = self.tenant_entry_mut(tenant_id)?;
        let order = entry.economy.cancel_order(order_id, Utc::now())?;
        entry.dirty_orders.insert(order_id.to_string());
        self.flush_tenant_if_attached(tenant_id);
        Ok(order)
    }

    pub fn mark_shipped(
        &mut self,
        tenant_id: &str,
        order_id: &str,
        tracking_number: &str,
    ) -> Result<RedemptionOrder, ServiceError> {
        let entry = self.tenant_entry_mut(tenant_id)?;
        let order = entry
            .economy
            .mark_shipped(order_id, tracking_number, Utc::now())?;
        entry.dirty_orders.insert(order_id.to_string());
        self.flush_tenant_if_attached(tenant_id);
        Ok(order)
    }

    pub fn distribute_per_employee(
        &mut self,
        tenant_id: &str,
        points_per_user: i64,
        department_ids: Option<Vec<String>>,
        idempotency_key: Option<String>,
    ) -> Result<DistributionReceipt, ServiceError> {
        let entry = self.tenant_entry_mut(tenant_id)?;
        let receipt = entry.economy.distribute_per_employee(
            points_per_user,
            department_ids.as_deref(),
            idempotency_key.as_deref(),
            Utc::now(),
        )?;
        self.flush_tenant_if_attached(tenant_id);
        Ok(receipt)
    }

    pub fn distribute_all_users(
        &mut self,
        tenant_id: &str,
        points_per_user: i64,
        idempotency_key: Option<String>,
    ) -> Result<DistributionReceipt, ServiceError> {
        let entry = self.tenant_entry_mut(tenant_id)?;
        let receipt = entry.economy.distribute_all_users(
            points_per_user,
            idempotency_key.as_deref(),
            Utc::now(),
        )?;
        self.flush_tenant_if_attached(tenant_id);
        Ok(receipt)
    }

    /// Persists this tenant's unwritten delta. Errors surface to the
    /// caller; [`Self::flush_tenant_if_attached`] is the recording
    /// variant used on the mutation paths.
    pub fn flush_tenant_checked(&mut self, tenant_id: &str) -> Result<(), PersistenceError> {
        let Some(store) = self.store.as_mut() else {
            return Err(PersistenceError::NotAttached);
        };
        let Some(entry) = self.tenants.get_mut(tenant_id) else {
            return Ok(());
        };

        let economy = &entry.economy;
        let entries = economy.entries();
        let total_entries = entries.len();
        let entry_base = entry.persisted_entry_count.min(total_entries);
        let new_entries = &entries[entry_base..];

        let touched_orders: Vec<RedemptionOrder> = entry
            .dirty_orders
            .iter()
            .filter_map(|order_id| economy.orders().get(order_id).cloned())
            .collect();

        let new_receipts: Vec<(String, DistributionReceipt)> = economy
            .distribution_receipts()
            .iter()
            .filter(|(key, _)| !entry.persisted_receipt_keys.contains(key.as_str()))
            .map(|(key, receipt)| (key.clone(), receipt.clone()))
            .collect();

        let departments: Vec<DepartmentBudget> = economy.departments().values().cloned().collect();
        let wallets: Vec<Wallet> = economy.wallets().values().cloned().collect();
        let catalog_items: Vec<CatalogItem> =
            economy.catalog().items().values().cloned().collect();

        store.persist_delta(
            economy.config(),
            &departments,
            &wallets,
            &catalog_items,
            entry_base,
            new_entries,
            &touched_orders,
            &new_receipts,
        )?;

        entry.persisted_entry_count = total_entries;
        entry.dirty_orders.clear();
        entry
            .persisted_receipt_keys
            .extend(new_receipts.into_iter().map(|(key, _)| key));

        self.last_persistence_error = None;
        Ok(())
    }

    fn flush_tenant_if_attached(&mut self, tenant_id: &str) {
        if self.store.is_none() {
            return;
        }

        if let Err(err) = self.flush_tenant_checked(tenant_id) {
            error!(tenant_id, error = %err, "failed to flush tenant delta");
            self.last_persistence_error = Some(err.to_string());
        }
    }

    fn tenant_entry_mut(&mut self, tenant_id: &str) -> Result<&mut TenantEntry, ServiceError> {
        self.tenants
            .get_mut(tenant_id)
            .ok_or_else(|| ServiceError::UnknownTenant(tenant_id.to_string()))
    }
}

/// Drives one order through PROCESSING against the voucher provider.
///
/// The service lock is held only to move order state, never across the
/// provider call. Transient provider faults are retried on
/// [`provider_backoff`]; exhausted or rejected provisioning fails the
/// order with an automatic refund before the provider error is
/// returned.
pub async fn dispatch_order(
    service: &Mutex<PointsService>,
    provider: &dyn VoucherProvider,
    tenant_id: &str,
    order_id: &str,
) -> Result<RedemptionOrder, ServiceError> {
    let (order, fulfillment_type) = {
        let mut service = service.lock().await;
        let order = match service.begin_processing(tenant_id, order_id)? {
            ProcessingOutcome::Started(order) => order,
            ProcessingOutcome::AlreadyDispatched(order) | ProcessingOutcome::StockOut(order) => {
                return Ok(order);
            }
        };

        let fulfillment_type = service
            .tenant(tenant_id)
            .ok_or_else(|| ServiceError::UnknownTenant(tenant_id.to_string()))?
            .catalog()
            .get(&order.catalog_item_id)?
            .fulfillment_type;

        (order, fulfillment_type)
    };

    if fulfillment_type != FulfillmentType::GiftCardApi {
        // Manual and inventory orders sit in PROCESSING until the
        // complete/ship endpoints settle them.
        return Ok(order);
    }

    let request = VoucherRequest {
        tenant_id: tenant_id.to_string(),
        order_id: order_id.to_string(),
        catalog_item_id: order.catalog_item_id.clone(),
        points: order.points_spent,
    };

    let provisioned = (|| async { provider.provision(&request).await })
        .retry(provider_backoff())
        .when(ProviderError::is_transient)
        .notify(|err: &ProviderError, delay: Duration| {
            warn!(
                tenant_id,
                order_id,
                error = %err,
                ?delay,
                "voucher provisioning failed, retrying"
            );
        })
        .await;

    let mut service = service.lock().await;
    match provisioned {
        Ok(grant) => {
            let order = service.complete_order(
                tenant_id,
                order_id,
                Some(grant.voucher_code),
                grant.voucher_pin,
            )?;
            Ok(order)
        }
        Err(err) => {
            error!(
                tenant_id,
                order_id,
                error = %err,
                "voucher provisioning exhausted, failing order"
            );
            service.fail_order(tenant_id, order_id, &err.to_string())?;
            Err(ServiceError::Provider(err))
        }
    }
}

/// The entry log is authoritative. A stored snapshot whose balances
/// disagree with the replayed ledger is reported and overridden.
fn warn_on_directory_drift(
    tenant_id: &str,
    economy: &PointsEconomy,
    snapshot_departments: &[DepartmentBudget],
    snapshot_wallets: &[Wallet],
) {
    for stored in snapshot_departments {
        if let Some(replayed) = economy.departments().get(&stored.department_id) {
            if replayed.balance != stored.balance {
                warn!(
                    tenant_id,
                    department_id = %stored.department_id,
                    snapshot_balance = stored.balance,
                    replayed_balance = replayed.balance,
                    "directory snapshot disagrees with replayed ledger, ledger wins"
                );
            }
        }
    }

    for stored in snapshot_wallets {
        if let Some(replayed) = economy.wallets().get(&stored.user_id) {
            if replayed.balance != stored.balance {
                warn!(
                    tenant_id,
                    user_id = %stored.user_id,
                    snapshot_balance = stored.balance,
                    replayed_balance = replayed.balance,
                    "directory snapshot disagrees with replayed ledger, ledger wins"
                );
            }
        }
    }
}

fn generate_otp_code() -> String {
    format!("{:06}", rand::rng().random_range(0..1_000_000))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use contracts::{AccountType, LedgerEntry, OrderStatus, PerEmployeeSummary, SourceType};

    fn temp_db_path(name: &str) -> std::path::PathBuf {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();

        std::env::temp_dir().join(format!("points_api_{name}_{nanos}.sqlite"))
    }

    fn demo_config(tenant_id: &str) -> TenantConfig {
        TenantConfig {
            tenant_id: tenant_id.to_string(),
            name: "Demo Tenant".to_string(),
            otp_threshold: Some(1_000),
            ..TenantConfig::default()
        }
    }

    fn gift_card(item_id: &str) -> CatalogItem {
        CatalogItem {
            item_id: item_id.to_string(),
            name: "Gift Card".to_string(),
            source_type: SourceType::Master,
            fulfillment_type: FulfillmentType::GiftCardApi,
            points_cost: None,
            min_points: None,
            max_points: None,
            step_points: None,
            denominations: vec![500, 800, 2_000],
            inventory_count: None,
            override_min_points: None,
            override_max_points: None,
        }
    }

    fn seeded_service(tenant_id: &str) -> PointsService {
        let mut service = PointsService::new();
        service
            .create_tenant(demo_config(tenant_id), false)
            .expect("tenant should be created");
        service
            .create_department(tenant_id, "dept_eng", "Engineering")
            .expect("department should be created");
        service
            .create_user(tenant_id, "user_ana", Some("dept_eng".to_string()), "Ana")
            .expect("user should be created");
        service
            .upsert_catalog_item(tenant_id, gift_card("item_gift"))
            .expect("item should be stored");
        service
            .transfer(
                tenant_id,
                None,
                AccountRef::master(),
                50_000,
                TransactionType::Inject,
                "initial funding",
                None,
            )
            .expect("inject should succeed");
        service
            .transfer(
                tenant_id,
                Some(AccountRef::master()),
                AccountRef::department("dept_eng"),
                10_000,
                TransactionType::Allocate,
                "quarterly budget",
                None,
            )
            .expect("allocation should succeed");
        service
            .transfer(
                tenant_id,
                Some(AccountRef::department("dept_eng")),
                AccountRef::wallet("user_ana"),
                2_500,
                TransactionType::Recognize,
                "great quarter",
                None,
            )
            .expect("recognition should succeed");
        service
    }

    struct ScriptedProvider {
        calls: AtomicUsize,
        failures_before_success: usize,
        rejected: bool,
    }

    impl ScriptedProvider {
        fn succeeding() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures_before_success: 0,
                rejected: false,
            }
        }

        fn flaky(failures_before_success: usize) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures_before_success,
                rejected: false,
            }
        }

        fn rejecting() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                failures_before_success: 0,
                rejected: true,
            }
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl VoucherProvider for ScriptedProvider {
        async fn provision(
            &self,
            _request: &VoucherRequest,
        ) -> Result<VoucherGrant, ProviderError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.rejected {
                return Err(ProviderError::Rejected("card program closed".to_string()));
            }
            if call < self.failures_before_success {
                return Err(ProviderError::Unavailable("upstream timeout".to_string()));
            }
            Ok(VoucherGrant {
                voucher_code: format!("VC-TEST-{call}"),
                voucher_pin: None,
            })
        }
    }

    #[test]
    fn otp_candidates_are_six_digits() {
        for _ in 0..32 {
            let code = generate_otp_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn duplicate_tenants_conflict_unless_replaced() {
        let mut service = PointsService::new();
        service
            .create_tenant(demo_config("tenant_a"), false)
            .expect("first create should succeed");
        service
            .transfer(
                "tenant_a",
                None,
                AccountRef::master(),
                100,
                TransactionType::Inject,
                "funding",
                None,
            )
            .expect("inject should succeed");

        let err = service
            .create_tenant(demo_config("tenant_a"), false)
            .expect_err("duplicate should conflict");
        assert!(matches!(err, ServiceError::TenantExists(_)));

        service
            .create_tenant(demo_config("tenant_a"), true)
            .expect("replace should succeed");
        let economy = service.tenant("tenant_a").expect("tenant should exist");
        assert!(economy.entries().is_empty());
    }

    #[test]
    fn unknown_tenants_are_rejected() {
        let mut service = PointsService::new();
        let err = service
            .redeem("tenant_missing", "user_ana", "item_gift", 500)
            .expect_err("unknown tenant should be rejected");
        assert!(matches!(err, ServiceError::UnknownTenant(_)));
    }

    #[test]
    fn sqlite_round_trip_restores_balances_orders_and_receipts() {
        let db_path = temp_db_path("round_trip");

        let (order_id, reference_id) = {
            let mut service = seeded_service("tenant_rt");
            service
                .attach_sqlite_store(&db_path)
                .expect("store should attach");

            let order = service
                .redeem("tenant_rt", "user_ana", "item_gift", 800)
                .expect("redeem should succeed");
            service
                .distribute_per_employee("tenant_rt", 300, None, Some("key_q3".to_string()))
                .expect("distribution should succeed");
            service
                .flush_tenant_checked("tenant_rt")
                .expect("flush should succeed");

            (order.order_id, order.reference_id)
        };

        let mut restored = PointsService::new();
        restored
            .attach_sqlite_store(&db_path)
            .expect("store should reopen");
        let loaded = restored
            .load_persisted_tenants()
            .expect("load should succeed");
        assert_eq!(loaded, 1);

        let economy = restored.tenant("tenant_rt").expect("tenant should be restored");
        assert!(economy.verify_conservation());
        assert_eq!(
            economy
                .balance_of(&AccountRef::wallet("user_ana"))
                .expect("wallet balance"),
            1_700
        );
        assert_eq!(
            economy
                .balance_of(&AccountRef::department("dept_eng"))
                .expect("department balance"),
            7_800
        );
        assert_eq!(
            economy.balance_of(&AccountRef::master()).expect("master balance"),
            39_700
        );

        let order = economy.order(&order_id).expect("order should be restored");
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.reference_id, reference_id);

        assert_eq!(
            economy.distribution_receipts().get("key_q3"),
            Some(&DistributionReceipt::PerEmployee(PerEmployeeSummary {
                total_points_allocated: 300,
                departments_updated: 1,
            }))
        );

        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("sqlite-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("sqlite-shm"));
    }

    #[test]
    fn repeated_flushes_do_not_duplicate_rows() {
        let db_path = temp_db_path("reflush");

        let mut service = seeded_service("tenant_rf");
        service
            .attach_sqlite_store(&db_path)
            .expect("store should attach");
        service
            .flush_tenant_checked("tenant_rf")
            .expect("first flush should succeed");
        service
            .flush_tenant_checked("tenant_rf")
            .expect("second flush should succeed");

        let entry_count = service.tenant("tenant_rf").expect("tenant").entries().len();

        let store = SqliteLedgerStore::open(&db_path).expect("second connection should open");
        let persisted = store
            .load_tenant("tenant_rf")
            .expect("load should succeed")
            .expect("tenant row should exist");
        assert_eq!(persisted.entries.len(), entry_count);

        service
            .transfer(
                "tenant_rf",
                Some(AccountRef::department("dept_eng")),
                AccountRef::wallet("user_ana"),
                100,
                TransactionType::Recognize,
                "spot award",
                None,
            )
            .expect("transfer should succeed");

        let persisted = store
            .load_tenant("tenant_rf")
            .expect("load should succeed")
            .expect("tenant row should exist");
        assert_eq!(persisted.entries.len(), entry_count + 2);

        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("sqlite-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("sqlite-shm"));
    }

    #[test]
    fn corrupted_persisted_logs_fail_to_load_as_replay_errors() {
        let db_path = temp_db_path("corrupt");

        {
            let mut service = seeded_service("tenant_cx");
            service
                .attach_sqlite_store(&db_path)
                .expect("store should attach");
            service
                .flush_tenant_checked("tenant_cx")
                .expect("flush should succeed");
        }

        let orphan = LedgerEntry {
            entry_id: "led_99999999".to_string(),
            account_type: AccountType::Wallet,
            account_id: "user_ana".to_string(),
            amount: -9_000,
            balance_after: -6_500,
            transaction_type: TransactionType::Redeem,
            reference_id: "ref_orphan".to_string(),
            description: "orphan debit".to_string(),
            created_at: Utc::now(),
        };
        let conn = rusqlite::Connection::open(&db_path).expect("raw connection should open");
        conn.execute(
            "INSERT INTO ledger_entries (
                tenant_id, seq, entry_id, account_type, account_id,
                transaction_type, reference_id, amount, entry_json, created_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                "tenant_cx",
                999,
                orphan.entry_id,
                orphan.account_type.to_string(),
                orphan.account_id,
                orphan.transaction_type.to_string(),
                orphan.reference_id,
                orphan.amount,
                serde_json::to_string(&orphan).expect("entry should serialize"),
                orphan.created_at.to_rfc3339(),
            ],
        )
        .expect("orphan row should insert");
        drop(conn);

        let mut restored = PointsService::new();
        restored
            .attach_sqlite_store(&db_path)
            .expect("store should reopen");
        let err = restored
            .load_persisted_tenants()
            .expect_err("corrupted log should fail to load");
        match err {
            PersistenceError::Replay { tenant_id, source } => {
                assert_eq!(tenant_id, "tenant_cx");
                assert!(matches!(
                    source,
                    LedgerError::ReplayedNegativeBalance { .. }
                ));
            }
            other => panic!("expected a replay error, got {other}"),
        }

        let _ = std::fs::remove_file(&db_path);
        let _ = std::fs::remove_file(db_path.with_extension("sqlite-wal"));
        let _ = std::fs::remove_file(db_path.with_extension("sqlite-shm"));
    }

    #[tokio::test]
    async fn dispatching_twice_provisions_exactly_once() {
        let mut service = seeded_service("tenant_d1");
        let order = service
            .redeem("tenant_d1", "user_ana", "item_gift", 800)
            .expect("redeem should succeed");

        let service = Mutex::new(service);
        let provider = ScriptedProvider::succeeding();

        let first = dispatch_order(&service, &provider, "tenant_d1", &order.order_id)
            .await
            .expect("dispatch should complete");
        assert_eq!(first.status, OrderStatus::Completed);
        assert!(first.voucher_code.is_some());

        let second = dispatch_order(&service, &provider, "tenant_d1", &order.order_id)
            .await
            .expect("second dispatch should be a no-op");
        assert_eq!(second.status, OrderStatus::Completed);
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn transient_provider_faults_are_retried_to_success() {
        let mut service = seeded_service("tenant_d2");
        let order = service
            .redeem("tenant_d2", "user_ana", "item_gift", 800)
            .expect("redeem should succeed");

        let service = Mutex::new(service);
        let provider = ScriptedProvider::flaky(2);

        let settled = dispatch_order(&service, &provider, "tenant_d2", &order.order_id)
            .await
            .expect("dispatch should recover");
        assert_eq!(settled.status, OrderStatus::Completed);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_order_and_refund() {
        let mut service = seeded_service("tenant_d3");
        let order = service
            .redeem("tenant_d3", "user_ana", "item_gift", 800)
            .expect("redeem should succeed");

        let service = Mutex::new(service);
        let provider = ScriptedProvider::flaky(10);

        let err = dispatch_order(&service, &provider, "tenant_d3", &order.order_id)
            .await
            .expect_err("dispatch should report the provider failure");
        assert!(matches!(
            err,
            ServiceError::Provider(ProviderError::Unavailable(_))
        ));
        assert_eq!(provider.call_count(), 3);

        let service = service.into_inner();
        let economy = service.tenant("tenant_d3").expect("tenant");
        let settled = economy.order(&order.order_id).expect("order");
        assert_eq!(settled.status, OrderStatus::Failed);
        assert!(settled
            .failed_reason
            .as_deref()
            .unwrap_or_default()
            .contains("unavailable"));
        assert_eq!(
            economy
                .balance_of(&AccountRef::wallet("user_ana"))
                .expect("wallet balance"),
            2_500
        );
        assert!(economy.verify_conservation());
    }

    #[tokio::test]
    async fn rejected_provisioning_is_not_retried() {
        let mut service = seeded_service("tenant_d4");
        let order = service
            .redeem("tenant_d4", "user_ana", "item_gift", 800)
            .expect("redeem should succeed");

        let service = Mutex::new(service);
        let provider = ScriptedProvider::rejecting();

        let err = dispatch_order(&service, &provider, "tenant_d4", &order.order_id)
            .await
            .expect_err("dispatch should report the rejection");
        assert!(matches!(
            err,
            ServiceError::Provider(ProviderError::Rejected(_))
        ));
        assert_eq!(provider.call_count(), 1);

        let service = service.into_inner();
        let economy = service.tenant("tenant_d4").expect("tenant");
        assert_eq!(
            economy.order(&order.order_id).expect("order").status,
            OrderStatus::Failed
        );
        assert_eq!(
            economy
                .balance_of(&AccountRef::wallet("user_ana"))
                .expect("wallet balance"),
            2_500
        );
    }

    #[tokio::test]
    async fn otp_gated_orders_refuse_dispatch_until_verified() {
        let mut service = seeded_service("tenant_d5");
        let order = service
            .redeem("tenant_d5", "user_ana", "item_gift", 2_000)
            .expect("redeem should succeed");
        assert!(order.otp_required);
        let code = order.otp_code.clone().expect("gated order should carry a code");

        let service = Mutex::new(service);
        let provider = ScriptedProvider::succeeding();

        let err = dispatch_order(&service, &provider, "tenant_d5", &order.order_id)
            .await
            .expect_err("unverified order should refuse dispatch");
        assert!(matches!(
            err,
            ServiceError::Order(OrderError::OtpRequired(_))
        ));
        assert_eq!(provider.call_count(), 0);

        service
            .lock()
            .await
            .verify_otp("tenant_d5", &order.order_id, &code)
            .expect("verification should pass");

        let settled = dispatch_order(&service, &provider, "tenant_d5", &order.order_id)
            .await
            .expect("verified order should dispatch");
        assert_eq!(settled.status, OrderStatus::Completed);
        assert_eq!(provider.call_count(), 1);
    }
}

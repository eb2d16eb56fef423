use std::path::Path;

use chrono::Utc;
use contracts::{
    CatalogItem, DepartmentBudget, DistributionReceipt, LedgerEntry, RedemptionOrder, TenantConfig,
    Wallet,
};
use points_core::ledger::LedgerError;
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One row of `GET /tenants`: identity plus persisted row counts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersistedTenantSummary {
    pub tenant_id: String,
    pub name: String,
    pub entry_count: usize,
    pub order_count: usize,
    pub updated_at: String,
}

/// Everything needed to rehydrate one tenant economy.
#[derive(Debug, Clone)]
pub struct LoadedTenant {
    pub config: TenantConfig,
    pub departments: Vec<DepartmentBudget>,
    pub wallets: Vec<Wallet>,
    pub catalog_items: Vec<CatalogItem>,
    pub entries: Vec<LedgerEntry>,
    pub orders: Vec<RedemptionOrder>,
    pub receipts: Vec<(String, DistributionReceipt)>,
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("sqlite store is not attached")]
    NotAttached,
    #[error("stored ledger for tenant {tenant_id} failed to replay: {source}")]
    Replay {
        tenant_id: String,
        #[source]
        source: LedgerError,
    },
}

/// The directory snapshot stored on the tenant row. Balances inside it
/// are advisory; the entry log is what balances are rebuilt from.
#[derive(Debug, Serialize, Deserialize)]
struct DirectorySnapshot {
    departments: Vec<DepartmentBudget>,
    wallets: Vec<Wallet>,
}

#[derive(Debug)]
pub struct SqliteLedgerStore {
    conn: Connection,
}

impl SqliteLedgerStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let conn = Connection::open(path)?;
        let mut store = Self { conn };
        store.configure()?;
        store.migrate()?;
        Ok(store)
    }

    /// Writes one tenant's delta in a single transaction: the tenant row
    /// is upserted, new ledger entries are appended at their sequence
    /// positions, touched orders are upserted, and new idempotency
    /// receipts are inserted. Entry and receipt inserts are
    /// insert-or-ignore so a replayed flush is harmless.
    #[allow(clippy::too_many_arguments)]
    pub fn persist_delta(
        &mut self,
        config: &TenantConfig,
        departments: &[DepartmentBudget],
        wallets: &[Wallet],
        catalog_items: &[CatalogItem],
        entry_base: usize,
        new_entries: &[LedgerEntry],
        touched_orders: &[RedemptionOrder],
        new_receipts: &[(String, DistributionReceipt)],
    ) -> Result<(), PersistenceError> {
        let tx = self.conn.transaction()?;

        upsert_tenant(&tx, config, departments, wallets, catalog_items)?;

        for (offset, entry) in new_entries.iter().enumerate() {
            let entry_json = serde_json::to_string(entry)?;
            tx.execute(
                "INSERT OR IGNORE INTO ledger_entries (
                    tenant_id,
                    seq,
                    entry_id,
                    account_type,
                    account_id,
                    transaction_type,
                    reference_id,
                    amount,
                    entry_json,
                    created_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    config.tenant_id.as_str(),
                    i64::try_from(entry_base + offset).unwrap_or(i64::MAX),
                    entry.entry_id.as_str(),
                    entry.account_type.to_string(),
                    entry.account_id.as_str(),
                    entry.transaction_type.to_string(),
                    entry.reference_id.as_str(),
                    entry.amount,
                    entry_json,
                    entry.created_at.to_rfc3339(),
                ],
            )?;
        }

        for order in touched_orders {
            let order_json = serde_json::to_string(order)?;
            tx.execute(
                "INSERT INTO orders (
                    tenant_id,
                    order_id,
                    user_id,
                    status,
                    order_json,
                    created_at,
                    updated_at
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(tenant_id, order_id) DO UPDATE SET
                    status = excluded.status,
                    order_json = excluded.order_json,
                    updated_at = excluded.updated_at",
                params![
                    config.tenant_id.as_str(),
                    order.order_id.as_str(),
                    order.user_id.as_str(),
                    order.status.to_string(),
                    order_json,
                    order.created_at.to_rfc3339(),
                    order.updated_at.to_rfc3339(),
                ],
            )?;
        }

        for (idempotency_key, receipt) in new_receipts {
            let receipt_json = serde_json::to_string(receipt)?;
            tx.execute(
                "INSERT OR IGNORE INTO distributions (
                    tenant_id,
                    idempotency_key,
                    receipt_json,
                    created_at
                 ) VALUES (?1, ?2, ?3, ?4)",
                params![
                    config.tenant_id.as_str(),
                    idempotency_key.as_str(),
                    receipt_json,
                    Utc::now().to_rfc3339(),
                ],
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    pub fn tenant_exists(&self, tenant_id: &str) -> Result<bool, PersistenceError> {
        let row: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM tenants WHERE tenant_id = ?1",
                params![tenant_id],
                |row| row.get(0),
            )
            .optional()?;

        Ok(row.is_some())
    }

    pub fn delete_tenant(&mut self, tenant_id: &str) -> Result<(), PersistenceError> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "DELETE FROM distributions WHERE tenant_id = ?1",
            params![tenant_id],
        )?;
        tx.execute(
            "DELETE FROM orders WHERE tenant_id = ?1",
            params![tenant_id],
        )?;
        tx.execute(
            "DELETE FROM ledger_entries WHERE tenant_id = ?1",
            params![tenant_id],
        )?;
        tx.execute(
            "DELETE FROM tenants WHERE tenant_id = ?1",
            params![tenant_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn list_tenant_ids(&self) -> Result<Vec<String>, PersistenceError> {
        let mut stmt = self
            .conn
            .prepare("SELECT tenant_id FROM tenants ORDER BY tenant_id ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut tenant_ids = Vec::new();
        for row in rows {
            tenant_ids.push(row?);
        }

        Ok(tenant_ids)
    }

    pub fn list_tenants(
        &self,
        limit: usize,
    ) -> Result<Vec<PersistedTenantSummary>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT t.tenant_id,
                    t.name,
                    t.updated_at,
                    (SELECT COUNT(*) FROM ledger_entries e WHERE e.tenant_id = t.tenant_id),
                    (SELECT COUNT(*) FROM orders o WHERE o.tenant_id = t.tenant_id)
             FROM tenants t
             ORDER BY t.tenant_id ASC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(
            params![i64::try_from(limit).unwrap_or(i64::MAX)],
            |row| {
                Ok(PersistedTenantSummary {
                    tenant_id: row.get(0)?,
                    name: row.get(1)?,
                    updated_at: row.get(2)?,
                    entry_count: usize::try_from(row.get::<_, i64>(3)?).unwrap_or(0),
                    order_count: usize::try_from(row.get::<_, i64>(4)?).unwrap_or(0),
                })
            },
        )?;

        let mut tenants = Vec::new();
        for row in rows {
            tenants.push(row?);
        }

        Ok(tenants)
    }

    pub fn load_tenant(&self, tenant_id: &str) -> Result<Option<LoadedTenant>, PersistenceError> {
        let row: Option<(String, String, String)> = self
            .conn
            .query_row(
                "SELECT config_json, directory_json, catalog_json
                 FROM tenants
                 WHERE tenant_id = ?1",
                params![tenant_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let Some((config_json, directory_json, catalog_json)) = row else {
            return Ok(None);
        };

        let config: TenantConfig = serde_json::from_str(&config_json)?;
        let directory: DirectorySnapshot = serde_json::from_str(&directory_json)?;
        let catalog_items: Vec<CatalogItem> = serde_json::from_str(&catalog_json)?;

        let mut stmt = self.conn.prepare(
            "SELECT entry_json
             FROM ledger_entries
             WHERE tenant_id = ?1
             ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(params![tenant_id], |row| row.get::<_, String>(0))?;
        let mut entries = Vec::new();
        for row in rows {
            let payload = row?;
            entries.push(serde_json::from_str::<LedgerEntry>(&payload)?);
        }

        let mut stmt = self.conn.prepare(
            "SELECT order_json
             FROM orders
             WHERE tenant_id = ?1
             ORDER BY created_at ASC, order_id ASC",
        )?;
        let rows = stmt.query_map(params![tenant_id], |row| row.get::<_, String>(0))?;
        let mut orders = Vec::new();
        for row in rows {
            let payload = row?;
            orders.push(serde_json::from_str::<RedemptionOrder>(&payload)?);
        }

        let mut stmt = self.conn.prepare(
            "SELECT idempotency_key, receipt_json
             FROM distributions
             WHERE tenant_id = ?1
             ORDER BY idempotency_key ASC",
        )?;
        let rows = stmt.query_map(params![tenant_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut receipts = Vec::new();
        for row in rows {
            let (key, payload) = row?;
            receipts.push((key, serde_json::from_str::<DistributionReceipt>(&payload)?));
        }

        Ok(Some(LoadedTenant {
            config,
            departments: directory.departments,
            wallets: directory.wallets,
            catalog_items,
            entries,
            orders,
            receipts,
        }))
    }

    fn configure(&mut self) -> Result<(), PersistenceError> {
        self.conn.pragma_update(None, "journal_mode", "WAL")?;
        self.conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    fn migrate(&mut self) -> Result<(), PersistenceError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tenants (
                tenant_id TEXT PRIMARY KEY,
                schema_version TEXT NOT NULL,
                name TEXT NOT NULL,
                config_json TEXT NOT NULL,
                directory_json TEXT NOT NULL,
                catalog_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS ledger_entries (
                tenant_id TEXT NOT NULL,
                seq INTEGER NOT NULL,
                entry_id TEXT NOT NULL,
                account_type TEXT NOT NULL,
                account_id TEXT NOT NULL,
                transaction_type TEXT NOT NULL,
                reference_id TEXT NOT NULL,
                amount INTEGER NOT NULL,
                entry_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (tenant_id, seq),
                UNIQUE (tenant_id, entry_id)
            );

            CREATE TABLE IF NOT EXISTS orders (
                tenant_id TEXT NOT NULL,
                order_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL,
                order_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (tenant_id, order_id)
            );

            CREATE TABLE IF NOT EXISTS distributions (
                tenant_id TEXT NOT NULL,
                idempotency_key TEXT NOT NULL,
                receipt_json TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (tenant_id, idempotency_key)
            );

            CREATE INDEX IF NOT EXISTS idx_ledger_entries_tenant_account ON ledger_entries(tenant_id, account_type, account_id);
            CREATE INDEX IF NOT EXISTS idx_ledger_entries_tenant_reference ON ledger_entries(tenant_id, reference_id);
            CREATE INDEX IF NOT EXISTS idx_orders_tenant_user ON orders(tenant_id, user_id);
            CREATE INDEX IF NOT EXISTS idx_orders_tenant_status ON orders(tenant_id, status);
            ",
        )?;

        self.conn.execute(
            "INSERT OR IGNORE INTO schema_migrations(version, name, applied_at)
             VALUES(1, 'initial_v1', ?1)",
            params![Utc::now().to_rfc3339()],
        )?;

        Ok(())
    }
}

fn upsert_tenant(
    tx: &rusqlite::Transaction<'_>,
    config: &TenantConfig,
    departments: &[DepartmentBudget],
    wallets: &[Wallet],
    catalog_items: &[CatalogItem],
) -> Result<(), PersistenceError> {
    let config_json = serde_json::to_string(config)?;
    let directory_json = serde_json::to_string(&DirectorySnapshot {
        departments: departments.to_vec(),
        wallets: wallets.to_vec(),
    })?;
    let catalog_json = serde_json::to_string(catalog_items)?;
    let now = Utc::now().to_rfc3339();

    tx.execute(
        "INSERT INTO tenants (
            tenant_id,
            schema_version,
            name,
            config_json,
            directory_json,
            catalog_json,
            created_at,
            updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(tenant_id) DO UPDATE SET
            schema_version = excluded.schema_version,
            name = excluded.name,
            config_json = excluded.config_json,
            directory_json = excluded.directory_json,
            catalog_json = excluded.catalog_json,
            updated_at = excluded.updated_at",
        params![
            config.tenant_id.as_str(),
            config.schema_version.as_str(),
            config.name.as_str(),
            config_json,
            directory_json,
            catalog_json,
            now,
            now,
        ],
    )?;

    Ok(())
}

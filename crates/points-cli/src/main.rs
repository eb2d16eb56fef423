use std::net::SocketAddr;

use clap::{Parser, Subcommand};
use contracts::{
    AccountRef, CatalogItem, FulfillmentType, SourceType, TenantConfig, TransactionType,
    SCHEMA_VERSION_V1,
};
use points_api::{dispatch_order, serve, LocalVoucherProvider, PointsService};
use tokio::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "points-cli", version, about = "Points economy service utilities")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP service.
    Serve {
        /// Listen address.
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: SocketAddr,
        /// SQLite ledger path. Falls back to POINTS_SQLITE_PATH, then
        /// points_ledger.sqlite.
        #[arg(long)]
        db: Option<String>,
    },
    /// Create a demo tenant with funded budgets and a small catalog.
    Seed {
        /// SQLite ledger path. Falls back to POINTS_SQLITE_PATH, then
        /// points_ledger.sqlite.
        #[arg(long)]
        db: Option<String>,
        /// Tenant id to create. An existing tenant with this id is
        /// replaced.
        #[arg(long, default_value = "tenant_demo")]
        tenant: String,
    },
}

/// Initialize tracing with the POINTS_LOG environment variable.
///
/// Defaults to "info" level if POINTS_LOG is not set.
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_env("POINTS_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn resolve_sqlite_path(db: Option<String>) -> String {
    db.filter(|path| !path.trim().is_empty())
        .or_else(|| {
            std::env::var("POINTS_SQLITE_PATH")
                .ok()
                .filter(|path| !path.trim().is_empty())
        })
        .unwrap_or_else(|| "points_ledger.sqlite".to_string())
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve { addr, db } => {
            let sqlite_path = resolve_sqlite_path(db);
            println!("serving api on http://{addr} (sqlite: {sqlite_path})");
            if let Err(err) = serve(addr, Some(sqlite_path)).await {
                eprintln!("server error: {err}");
                std::process::exit(1);
            }
        }
        Commands::Seed { db, tenant } => {
            let sqlite_path = resolve_sqlite_path(db);
            if let Err(err) = run_seed(&sqlite_path, &tenant).await {
                eprintln!("error: {err}");
                std::process::exit(2);
            }
        }
    }
}

async fn run_seed(sqlite_path: &str, tenant_id: &str) -> Result<(), String> {
    let mut service = PointsService::new();
    service
        .attach_sqlite_store(sqlite_path)
        .map_err(|err| format!("failed to attach sqlite store: {err}"))?;
    service
        .load_persisted_tenants()
        .map_err(|err| format!("failed to load persisted tenants: {err}"))?;

    let config = TenantConfig {
        schema_version: SCHEMA_VERSION_V1.to_string(),
        tenant_id: tenant_id.to_string(),
        name: "Demo Rewards Program".to_string(),
        otp_threshold: Some(2_000),
        monthly_recognition_cap: Some(5_000),
    };
    service
        .create_tenant(config, true)
        .map_err(|err| format!("failed to create tenant: {err}"))?;

    service
        .create_department(tenant_id, "dept_engineering", "Engineering")
        .map_err(|err| format!("failed to create department: {err}"))?;
    service
        .create_department(tenant_id, "dept_sales", "Sales")
        .map_err(|err| format!("failed to create department: {err}"))?;

    for (user_id, department_id, display_name) in [
        ("user_ana", "dept_engineering", "Ana Flores"),
        ("user_bo", "dept_engineering", "Bo Lindqvist"),
        ("user_chen", "dept_sales", "Chen Wu"),
    ] {
        service
            .create_user(
                tenant_id,
                user_id,
                Some(department_id.to_string()),
                display_name,
            )
            .map_err(|err| format!("failed to create user {user_id}: {err}"))?;
    }

    service
        .upsert_catalog_item(
            tenant_id,
            CatalogItem {
                item_id: "item_gift_card".to_string(),
                name: "Prepaid Gift Card".to_string(),
                source_type: SourceType::Master,
                fulfillment_type: FulfillmentType::GiftCardApi,
                points_cost: None,
                min_points: None,
                max_points: None,
                step_points: None,
                denominations: vec![500, 1_000, 2_000, 5_000],
                inventory_count: None,
                override_min_points: None,
                override_max_points: None,
            },
        )
        .map_err(|err| format!("failed to store catalog item: {err}"))?;
    service
        .upsert_catalog_item(
            tenant_id,
            CatalogItem {
                item_id: "item_hoodie".to_string(),
                name: "Company Hoodie".to_string(),
                source_type: SourceType::Custom,
                fulfillment_type: FulfillmentType::InventoryItem,
                points_cost: Some(1_200),
                min_points: None,
                max_points: None,
                step_points: None,
                denominations: Vec::new(),
                inventory_count: Some(25),
                override_min_points: None,
                override_max_points: None,
            },
        )
        .map_err(|err| format!("failed to store catalog item: {err}"))?;

    service
        .transfer(
            tenant_id,
            None,
            AccountRef::master(),
            100_000,
            TransactionType::Inject,
            "initial master pool funding",
            None,
        )
        .map_err(|err| format!("failed to fund master pool: {err}"))?;

    service
        .distribute_per_employee(tenant_id, 500, None, Some("seed_budgets".to_string()))
        .map_err(|err| format!("failed to distribute budgets: {err}"))?;

    service
        .transfer(
            tenant_id,
            Some(AccountRef::department("dept_engineering")),
            AccountRef::wallet("user_ana"),
            750,
            TransactionType::Recognize,
            "launch week award",
            None,
        )
        .map_err(|err| format!("failed to recognize user: {err}"))?;

    let order = service
        .redeem(tenant_id, "user_ana", "item_gift_card", 500)
        .map_err(|err| format!("failed to redeem: {err}"))?;

    let service = Mutex::new(service);
    let provider = LocalVoucherProvider;
    let order = dispatch_order(&service, &provider, tenant_id, &order.order_id)
        .await
        .map_err(|err| format!("failed to dispatch order: {err}"))?;
    let service = service.into_inner();

    let economy = service
        .tenant(tenant_id)
        .ok_or_else(|| "seeded tenant vanished".to_string())?;

    println!(
        "seeded tenant_id={} master_balance={} sqlite={}",
        tenant_id,
        economy.master().balance,
        sqlite_path
    );
    for department in economy.departments().values() {
        println!(
            "  department {} balance={}",
            department.department_id, department.balance
        );
    }
    for wallet in economy.wallets().values() {
        println!("  wallet {} balance={}", wallet.user_id, wallet.balance);
    }
    println!(
        "  order {} status={} voucher={}",
        order.order_id,
        order.status,
        order.voucher_code.as_deref().unwrap_or("-")
    );

    Ok(())
}

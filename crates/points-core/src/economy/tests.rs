use super::*;

use chrono::TimeZone;
use contracts::SourceType;

fn day(month: u32, day: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, month, day, 12, 0, 0).unwrap()
}

fn gift_card(item_id: &str) -> CatalogItem {
    CatalogItem {
        item_id: item_id.to_string(),
        name: "Gift card".to_string(),
        source_type: SourceType::Master,
        fulfillment_type: FulfillmentType::GiftCardApi,
        points_cost: None,
        min_points: None,
        max_points: None,
        step_points: None,
        denominations: vec![500, 800, 1_000],
        inventory_count: None,
        override_min_points: None,
        override_max_points: None,
    }
}

fn inventory_item(item_id: &str, cost: i64, stock: i64) -> CatalogItem {
    CatalogItem {
        item_id: item_id.to_string(),
        name: "Physical reward".to_string(),
        source_type: SourceType::Master,
        fulfillment_type: FulfillmentType::InventoryItem,
        points_cost: Some(cost),
        min_points: None,
        max_points: None,
        step_points: None,
        denominations: Vec::new(),
        inventory_count: Some(stock),
        override_min_points: None,
        override_max_points: None,
    }
}

fn seeded_economy() -> PointsEconomy {
    let mut economy = PointsEconomy::new(TenantConfig::default());
    economy.create_department("eng", "Engineering").unwrap();
    economy.create_department("sales", "Sales").unwrap();
    economy
        .create_wallet("user_a", Some("eng".to_string()), "Asha")
        .unwrap();
    economy
        .create_wallet("user_b", Some("eng".to_string()), "Bilal")
        .unwrap();
    economy
        .create_wallet("user_c", Some("sales".to_string()), "Chen")
        .unwrap();
    economy.upsert_catalog_item(gift_card("gift_card"));
    economy
        .transfer(
            None,
            &AccountRef::master(),
            50_000,
            TransactionType::Inject,
            "platform top-up",
            None,
            day(3, 1),
        )
        .unwrap();
    economy
}

fn fund_wallet(economy: &mut PointsEconomy, user_id: &str, amount: i64) {
    economy
        .transfer(
            Some(&AccountRef::master()),
            &AccountRef::wallet(user_id),
            amount,
            TransactionType::Allocate,
            "seed",
            None,
            day(3, 1),
        )
        .unwrap();
}

#[test]
fn failed_fulfillment_refunds_the_wallet_in_full() {
    let mut economy = seeded_economy();
    fund_wallet(&mut economy, "user_a", 1_000);

    let order = economy
        .redeem("user_a", "gift_card", 800, None, day(3, 2))
        .unwrap();
    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(economy.wallets()["user_a"].balance, 200);

    match economy.begin_processing(&order.order_id, day(3, 2)).unwrap() {
        ProcessingOutcome::Started(processing) => {
            assert_eq!(processing.status, OrderStatus::Processing)
        }
        other => panic!("expected dispatch to start, got {other:?}"),
    }

    let failed = economy
        .fail_order(&order.order_id, "provider exhausted retries", day(3, 2))
        .unwrap();
    assert_eq!(failed.status, OrderStatus::Failed);
    assert_eq!(
        failed.failed_reason.as_deref(),
        Some("provider exhausted retries")
    );
    assert_eq!(economy.wallets()["user_a"].balance, 1_000);

    let refunds: Vec<_> = economy
        .entries()
        .iter()
        .filter(|entry| {
            entry.transaction_type == TransactionType::Refund && entry.account_id == "user_a"
        })
        .collect();
    assert_eq!(refunds.len(), 1);
    assert_eq!(refunds[0].amount, 800);
    assert_eq!(refunds[0].reference_id, order.reference_id);
    assert!(economy.verify_conservation());
}

#[test]
fn per_employee_distribution_funds_each_department_by_headcount() {
    let mut economy = PointsEconomy::new(TenantConfig::default());
    economy.create_department("support", "Support").unwrap();
    economy.create_department("field", "Field").unwrap();
    for i in 0..10 {
        economy
            .create_wallet(&format!("support_{i}"), Some("support".to_string()), "Member")
            .unwrap();
    }
    for i in 0..15 {
        economy
            .create_wallet(&format!("field_{i}"), Some("field".to_string()), "Member")
            .unwrap();
    }
    economy
        .transfer(
            None,
            &AccountRef::master(),
            50_000,
            TransactionType::Inject,
            "platform top-up",
            None,
            day(3, 1),
        )
        .unwrap();

    let receipt = economy
        .distribute_per_employee(500, None, None, day(3, 2))
        .unwrap();
    assert_eq!(
        receipt,
        DistributionReceipt::PerEmployee(PerEmployeeSummary {
            total_points_allocated: 12_500,
            departments_updated: 2,
        })
    );
    assert_eq!(economy.master().balance, 37_500);
    assert_eq!(economy.departments()["support"].balance, 5_000);
    assert_eq!(economy.departments()["field"].balance, 7_500);
    assert!(economy.verify_conservation());
}

#[test]
fn a_failed_leg_rolls_back_the_whole_batch() {
    let mut economy = seeded_economy();
    let entries_before = economy.entries().len();
    let plan = vec![
        (AccountRef::department("eng"), 1_000),
        (AccountRef::department("missing"), 1_000),
        (AccountRef::department("sales"), 1_000),
    ];

    let err = economy
        .execute_allocation_batch(&plan, "bulk grant", day(3, 2))
        .expect_err("unknown department fails the batch");
    assert!(matches!(err, LedgerError::UnknownAccount(_)));

    assert_eq!(economy.master().balance, 50_000);
    assert_eq!(economy.departments()["eng"].balance, 0);
    assert_eq!(economy.departments()["sales"].balance, 0);
    assert_eq!(economy.entries().len(), entries_before);
}

#[test]
fn distribution_exceeding_the_pool_is_rejected_up_front() {
    let mut economy = seeded_economy();
    let entries_before = economy.entries().len();

    let err = economy
        .distribute_all_users(20_000, None, day(3, 2))
        .expect_err("three active users need 60,000");
    assert_eq!(
        err,
        DistributionError::Ledger(LedgerError::InsufficientBalance {
            account: AccountRef::master().to_string(),
            shortfall: 10_000,
        })
    );
    assert_eq!(economy.master().balance, 50_000);
    assert_eq!(economy.entries().len(), entries_before);
}

#[test]
fn departments_with_no_active_employees_are_skipped() {
    let mut economy = seeded_economy();
    economy.create_department("empty", "Empty").unwrap();

    let selected = vec!["eng".to_string(), "empty".to_string()];
    let receipt = economy
        .distribute_per_employee(500, Some(&selected), None, day(3, 2))
        .unwrap();
    assert_eq!(
        receipt,
        DistributionReceipt::PerEmployee(PerEmployeeSummary {
            total_points_allocated: 1_000,
            departments_updated: 1,
        })
    );
    assert_eq!(economy.departments()["eng"].balance, 1_000);
    assert_eq!(economy.departments()["empty"].balance, 0);
}

#[test]
fn deactivated_wallets_are_not_credited() {
    let mut economy = seeded_economy();
    economy.set_wallet_active("user_b", false).unwrap();

    let receipt = economy.distribute_all_users(100, None, day(3, 2)).unwrap();
    assert_eq!(
        receipt,
        DistributionReceipt::AllUsers(AllUsersSummary {
            total_points_distributed: 200,
            total_users_credited: 2,
        })
    );
    assert_eq!(economy.wallets()["user_a"].balance, 100);
    assert_eq!(economy.wallets()["user_b"].balance, 0);
    assert_eq!(economy.wallets()["user_c"].balance, 100);
}

#[test]
fn distribution_idempotency_key_replays_the_stored_receipt() {
    let mut economy = seeded_economy();
    let first = economy
        .distribute_all_users(100, Some("batch-7"), day(3, 2))
        .unwrap();
    let master_after = economy.master().balance;
    let entries_after = economy.entries().len();

    let replay = economy
        .distribute_all_users(100, Some("batch-7"), day(3, 3))
        .unwrap();
    assert_eq!(replay, first);
    assert_eq!(economy.master().balance, master_after);
    assert_eq!(economy.entries().len(), entries_after);

    let err = economy
        .distribute_per_employee(100, None, Some("batch-7"), day(3, 3))
        .expect_err("key is bound to the all-users mode");
    assert_eq!(
        err,
        DistributionError::IdempotencyKeyReused("batch-7".to_string())
    );
}

#[test]
fn invalid_spend_amounts_are_rejected_before_any_debit() {
    let mut economy = seeded_economy();
    fund_wallet(&mut economy, "user_a", 1_000);
    let entries_before = economy.entries().len();

    let err = economy
        .redeem("user_a", "gift_card", 700, None, day(3, 2))
        .expect_err("700 is not a listed denomination");
    assert!(matches!(
        err,
        RedeemError::Catalog(CatalogError::InvalidRedemptionAmount { points: 700, .. })
    ));
    assert_eq!(economy.wallets()["user_a"].balance, 1_000);
    assert_eq!(economy.entries().len(), entries_before);
    assert!(economy.orders().is_empty());
}

#[test]
fn redeem_without_funds_leaves_no_order_behind() {
    let mut economy = seeded_economy();
    fund_wallet(&mut economy, "user_a", 300);

    let err = economy
        .redeem("user_a", "gift_card", 500, None, day(3, 2))
        .expect_err("wallet holds 300");
    assert_eq!(
        err,
        RedeemError::Ledger(LedgerError::InsufficientBalance {
            account: AccountRef::wallet("user_a").to_string(),
            shortfall: 200,
        })
    );
    assert!(economy.orders().is_empty());
    assert_eq!(economy.wallets()["user_a"].balance, 300);
}

#[test]
fn high_value_orders_require_otp_before_dispatch() {
    let mut economy = seeded_economy();
    economy.update_policy(Some(800), None);
    fund_wallet(&mut economy, "user_a", 1_000);

    let order = economy
        .redeem("user_a", "gift_card", 800, Some("424242".to_string()), day(3, 2))
        .unwrap();
    assert!(order.otp_required);

    let err = economy
        .begin_processing(&order.order_id, day(3, 2))
        .expect_err("dispatch is gated on verification");
    assert_eq!(err, OrderError::OtpRequired(order.order_id.clone()));

    let err = economy
        .verify_otp(&order.order_id, "000000", day(3, 2))
        .expect_err("wrong code");
    assert_eq!(err, OrderError::OtpMismatch(order.order_id.clone()));

    let verified = economy
        .verify_otp(&order.order_id, "424242", day(3, 2))
        .unwrap();
    assert_eq!(verified.status, OrderStatus::OtpVerified);
    assert!(matches!(
        economy.begin_processing(&order.order_id, day(3, 2)).unwrap(),
        ProcessingOutcome::Started(_)
    ));
}

#[test]
fn low_value_orders_skip_the_otp_gate() {
    let mut economy = seeded_economy();
    economy.update_policy(Some(800), None);
    fund_wallet(&mut economy, "user_a", 1_000);

    let order = economy
        .redeem("user_a", "gift_card", 500, Some("424242".to_string()), day(3, 2))
        .unwrap();
    assert!(!order.otp_required);
    assert_eq!(order.otp_code, None);
    assert!(matches!(
        economy.begin_processing(&order.order_id, day(3, 2)).unwrap(),
        ProcessingOutcome::Started(_)
    ));
}

#[test]
fn dispatching_twice_produces_one_side_effect() {
    let mut economy = seeded_economy();
    fund_wallet(&mut economy, "user_a", 1_000);
    let order = economy
        .redeem("user_a", "gift_card", 500, None, day(3, 2))
        .unwrap();

    assert!(matches!(
        economy.begin_processing(&order.order_id, day(3, 2)).unwrap(),
        ProcessingOutcome::Started(_)
    ));
    let entries_after_dispatch = economy.entries().len();

    match economy.begin_processing(&order.order_id, day(3, 3)).unwrap() {
        ProcessingOutcome::AlreadyDispatched(order) => {
            assert_eq!(order.status, OrderStatus::Processing)
        }
        other => panic!("expected a no-op, got {other:?}"),
    }
    assert_eq!(economy.entries().len(), entries_after_dispatch);

    let completed = economy
        .complete_order(
            &order.order_id,
            Some("GC-1234".to_string()),
            Some("9876".to_string()),
            day(3, 3),
        )
        .unwrap();
    assert_eq!(completed.status, OrderStatus::Completed);
    assert_eq!(completed.voucher_code.as_deref(), Some("GC-1234"));

    assert!(matches!(
        economy.begin_processing(&order.order_id, day(3, 4)).unwrap(),
        ProcessingOutcome::AlreadyDispatched(_)
    ));
}

#[test]
fn cancelling_a_pending_order_refunds_immediately() {
    let mut economy = seeded_economy();
    fund_wallet(&mut economy, "user_a", 1_000);
    let order = economy
        .redeem("user_a", "gift_card", 500, None, day(3, 2))
        .unwrap();
    assert_eq!(economy.wallets()["user_a"].balance, 500);

    let cancelled = economy.cancel_order(&order.order_id, day(3, 2)).unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);
    assert_eq!(economy.wallets()["user_a"].balance, 1_000);

    let refund = economy
        .entries()
        .iter()
        .find(|entry| {
            entry.transaction_type == TransactionType::Refund && entry.account_id == "user_a"
        })
        .expect("refund entry present");
    assert_eq!(refund.amount, 500);
    assert_eq!(refund.reference_id, order.reference_id);
}

#[test]
fn illegal_transitions_change_nothing() {
    let mut economy = seeded_economy();
    fund_wallet(&mut economy, "user_a", 1_000);
    let order = economy
        .redeem("user_a", "gift_card", 500, None, day(3, 2))
        .unwrap();
    economy.begin_processing(&order.order_id, day(3, 2)).unwrap();

    // Cancellation is only meaningful before dispatch.
    let err = economy
        .cancel_order(&order.order_id, day(3, 3))
        .expect_err("processing orders cannot be cancelled");
    assert_eq!(
        err,
        OrderError::InvalidStateTransition {
            order_id: order.order_id.clone(),
            from: OrderStatus::Processing,
            to: OrderStatus::Cancelled,
        }
    );

    economy
        .complete_order(&order.order_id, Some("GC-1".to_string()), None, day(3, 3))
        .unwrap();
    let snapshot = economy.order(&order.order_id).unwrap().clone();
    let balance = economy.wallets()["user_a"].balance;
    let entries_before = economy.entries().len();

    assert!(economy.cancel_order(&order.order_id, day(3, 4)).is_err());
    assert!(economy
        .fail_order(&order.order_id, "too late", day(3, 4))
        .is_err());
    assert!(economy.verify_otp(&order.order_id, "1", day(3, 4)).is_err());

    assert_eq!(economy.order(&order.order_id).unwrap(), &snapshot);
    assert_eq!(economy.wallets()["user_a"].balance, balance);
    assert_eq!(economy.entries().len(), entries_before);
}

#[test]
fn physical_orders_ship_with_a_tracking_number() {
    let mut economy = seeded_economy();
    economy.upsert_catalog_item(inventory_item("headphones", 2_000, 3));
    fund_wallet(&mut economy, "user_a", 2_000);

    let order = economy
        .redeem("user_a", "headphones", 2_000, None, day(3, 2))
        .unwrap();
    economy.begin_processing(&order.order_id, day(3, 2)).unwrap();
    assert_eq!(
        economy.catalog().get("headphones").unwrap().inventory_count,
        Some(2)
    );

    let shipped = economy
        .mark_shipped(&order.order_id, "TRK-001122", day(3, 5))
        .unwrap();
    assert_eq!(shipped.status, OrderStatus::Shipped);
    assert_eq!(shipped.tracking_number.as_deref(), Some("TRK-001122"));
}

#[test]
fn gift_cards_cannot_be_marked_shipped() {
    let mut economy = seeded_economy();
    fund_wallet(&mut economy, "user_a", 1_000);
    let order = economy
        .redeem("user_a", "gift_card", 500, None, day(3, 2))
        .unwrap();
    economy.begin_processing(&order.order_id, day(3, 2)).unwrap();

    let err = economy
        .mark_shipped(&order.order_id, "TRK-1", day(3, 3))
        .expect_err("only physical inventory ships");
    assert!(matches!(err, OrderError::InvalidStateTransition { .. }));
}

#[test]
fn stock_out_fails_the_order_with_refund() {
    let mut economy = seeded_economy();
    economy.upsert_catalog_item(inventory_item("poster", 100, 0));
    fund_wallet(&mut economy, "user_a", 1_000);

    let order = economy
        .redeem("user_a", "poster", 100, None, day(3, 2))
        .unwrap();
    assert_eq!(economy.wallets()["user_a"].balance, 900);

    match economy.begin_processing(&order.order_id, day(3, 2)).unwrap() {
        ProcessingOutcome::StockOut(failed) => {
            assert_eq!(failed.status, OrderStatus::Failed);
            assert_eq!(failed.failed_reason.as_deref(), Some("item out of stock"));
        }
        other => panic!("expected a stock-out, got {other:?}"),
    }
    assert_eq!(economy.wallets()["user_a"].balance, 1_000);
    assert_eq!(
        economy.catalog().get("poster").unwrap().inventory_count,
        Some(0)
    );
}

#[test]
fn provider_failure_returns_the_reserved_unit_to_stock() {
    let mut economy = seeded_economy();
    economy.upsert_catalog_item(inventory_item("headphones", 2_000, 1));
    fund_wallet(&mut economy, "user_a", 2_000);

    let order = economy
        .redeem("user_a", "headphones", 2_000, None, day(3, 2))
        .unwrap();
    economy.begin_processing(&order.order_id, day(3, 2)).unwrap();
    assert_eq!(
        economy.catalog().get("headphones").unwrap().inventory_count,
        Some(0)
    );

    economy
        .fail_order(&order.order_id, "carrier lost the parcel", day(3, 4))
        .unwrap();
    assert_eq!(
        economy.catalog().get("headphones").unwrap().inventory_count,
        Some(1)
    );
    assert_eq!(economy.wallets()["user_a"].balance, 2_000);
}

#[test]
fn monthly_recognition_cap_limits_department_spend() {
    let mut economy = seeded_economy();
    economy.update_policy(None, Some(1_000));
    economy
        .transfer(
            Some(&AccountRef::master()),
            &AccountRef::department("eng"),
            5_000,
            TransactionType::Allocate,
            "budget",
            None,
            day(3, 1),
        )
        .unwrap();

    economy
        .transfer(
            Some(&AccountRef::department("eng")),
            &AccountRef::wallet("user_a"),
            700,
            TransactionType::Recognize,
            "incident response",
            None,
            day(3, 5),
        )
        .unwrap();

    let err = economy
        .transfer(
            Some(&AccountRef::department("eng")),
            &AccountRef::wallet("user_b"),
            400,
            TransactionType::Recognize,
            "would cross the cap",
            None,
            day(3, 20),
        )
        .expect_err("700 + 400 exceeds 1,000");
    assert_eq!(
        err,
        LedgerError::PolicyLimitExceeded {
            limit: 1_000,
            month_to_date: 700,
            attempted: 400,
        }
    );

    // The window resets with the calendar month.
    economy
        .transfer(
            Some(&AccountRef::department("eng")),
            &AccountRef::wallet("user_b"),
            400,
            TransactionType::Recognize,
            "new month",
            None,
            day(4, 2),
        )
        .unwrap();

    // Peer awards are not charged against the department cap.
    economy
        .transfer(
            Some(&AccountRef::wallet("user_a")),
            &AccountRef::wallet("user_b"),
            600,
            TransactionType::Recognize,
            "peer award",
            None,
            day(3, 21),
        )
        .unwrap();
}

#[test]
fn request_policy_limit_overrides_the_tenant_cap() {
    let mut economy = seeded_economy();
    economy.update_policy(None, Some(500));
    economy
        .transfer(
            Some(&AccountRef::master()),
            &AccountRef::department("eng"),
            5_000,
            TransactionType::Allocate,
            "budget",
            None,
            day(3, 1),
        )
        .unwrap();

    economy
        .transfer(
            Some(&AccountRef::department("eng")),
            &AccountRef::wallet("user_a"),
            800,
            TransactionType::Recognize,
            "quarterly award",
            Some(2_000),
            day(3, 5),
        )
        .unwrap();

    let err = economy
        .transfer(
            Some(&AccountRef::department("eng")),
            &AccountRef::wallet("user_a"),
            100,
            TransactionType::Recognize,
            "back under the tenant cap",
            None,
            day(3, 6),
        )
        .expect_err("month-to-date already exceeds the tenant cap");
    assert!(matches!(err, LedgerError::PolicyLimitExceeded { .. }));
}

#[test]
fn redeem_and_refund_legs_are_reserved_for_the_state_machine() {
    let mut economy = seeded_economy();
    fund_wallet(&mut economy, "user_a", 1_000);

    let err = economy
        .transfer(
            Some(&AccountRef::wallet("user_a")),
            &AccountRef::order("ord-1"),
            100,
            TransactionType::Redeem,
            "forged debit",
            None,
            day(3, 2),
        )
        .expect_err("redeem is written by the state machine only");
    assert!(matches!(err, LedgerError::UnsupportedTransfer { .. }));

    let err = economy
        .transfer(
            Some(&AccountRef::order("ord-1")),
            &AccountRef::wallet("user_a"),
            100,
            TransactionType::Refund,
            "forged refund",
            None,
            day(3, 2),
        )
        .expect_err("refund is written by the state machine only");
    assert!(matches!(err, LedgerError::UnsupportedTransfer { .. }));
}

#[test]
fn restore_replays_the_entry_log_into_matching_balances() {
    let mut economy = seeded_economy();
    fund_wallet(&mut economy, "user_a", 1_000);
    economy
        .distribute_per_employee(200, None, Some("q1-grant"), day(3, 3))
        .unwrap();
    let order = economy
        .redeem("user_a", "gift_card", 500, None, day(3, 4))
        .unwrap();
    economy.begin_processing(&order.order_id, day(3, 4)).unwrap();
    economy
        .fail_order(&order.order_id, "provider unavailable", day(3, 4))
        .unwrap();

    let restored = PointsEconomy::restore(
        economy.config().clone(),
        economy.departments().values().cloned().collect(),
        economy.wallets().values().cloned().collect(),
        economy.catalog().items().values().cloned().collect(),
        economy.entries().to_vec(),
        economy.orders().values().cloned().collect(),
        economy
            .distribution_receipts()
            .iter()
            .map(|(key, receipt)| (key.clone(), receipt.clone()))
            .collect(),
    )
    .unwrap();

    assert_eq!(restored.master(), economy.master());
    assert_eq!(restored.departments(), economy.departments());
    assert_eq!(restored.wallets(), economy.wallets());
    assert_eq!(restored.orders(), economy.orders());
    assert_eq!(
        restored.distribution_receipts(),
        economy.distribution_receipts()
    );
    assert!(restored.verify_conservation());
}

#[test]
fn restore_rejects_entry_logs_that_replay_negative() {
    let economy = seeded_economy();
    let mut entries = economy.entries().to_vec();
    entries.push(LedgerEntry {
        entry_id: format!("led_{:08}", entries.len() + 1),
        account_type: AccountType::Wallet,
        account_id: "user_a".to_string(),
        amount: -500,
        balance_after: -500,
        transaction_type: TransactionType::Redeem,
        reference_id: "ref_orphan".to_string(),
        description: "orphan debit".to_string(),
        created_at: day(3, 2),
    });

    let err = PointsEconomy::restore(
        economy.config().clone(),
        economy.departments().values().cloned().collect(),
        economy.wallets().values().cloned().collect(),
        economy.catalog().items().values().cloned().collect(),
        entries,
        Vec::new(),
        Vec::new(),
    )
    .expect_err("should fail");

    assert_eq!(
        err,
        LedgerError::ReplayedNegativeBalance {
            account: "wallet:user_a".to_string(),
            balance: -500,
        }
    );
}

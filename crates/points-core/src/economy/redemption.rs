use super::*;

impl PointsEconomy {
    /// Create an order: validate the chosen spend against the catalog,
    /// debit the wallet into the order's escrow account, and record the
    /// order as PENDING. A failed debit leaves no order behind.
    pub fn redeem(
        &mut self,
        user_id: &str,
        catalog_item_id: &str,
        points: i64,
        otp_code: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<RedemptionOrder, RedeemError> {
        self.catalog.validate_spend(catalog_item_id, points)?;

        let order_id = Uuid::new_v4().to_string();
        self.ledger.open_order_account(&order_id);
        let receipt = match self.ledger.transfer(
            Some(&AccountRef::wallet(user_id)),
            &AccountRef::order(order_id.clone()),
            points,
            TransactionType::Redeem,
            &format!("redeem {catalog_item_id}"),
            now,
        ) {
            Ok(receipt) => receipt,
            Err(err) => {
                self.ledger.close_order_account(&order_id);
                return Err(err.into());
            }
        };

        let otp_required = self
            .config
            .otp_threshold
            .is_some_and(|threshold| points >= threshold);
        let order = RedemptionOrder {
            order_id: order_id.clone(),
            user_id: user_id.to_string(),
            catalog_item_id: catalog_item_id.to_string(),
            points_spent: points,
            status: OrderStatus::Pending,
            reference_id: receipt.reference_id,
            voucher_code: None,
            voucher_pin: None,
            tracking_number: None,
            failed_reason: None,
            otp_required,
            otp_code: if otp_required { otp_code } else { None },
            created_at: now,
            updated_at: now,
        };
        self.orders.insert(order_id, order.clone());
        Ok(order)
    }

    pub fn verify_otp(
        &mut self,
        order_id: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<RedemptionOrder, OrderError> {
        let order = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| OrderError::UnknownOrder(order_id.to_string()))?;
        if order.status != OrderStatus::Pending || !order.otp_required {
            return Err(OrderError::InvalidStateTransition {
                order_id: order_id.to_string(),
                from: order.status,
                to: OrderStatus::OtpVerified,
            });
        }
        if order.otp_code.as_deref() != Some(code) {
            return Err(OrderError::OtpMismatch(order_id.to_string()));
        }
        order.status = OrderStatus::OtpVerified;
        order.updated_at = now;
        Ok(order.clone())
    }

    /// Move an order into PROCESSING. Idempotent: an order already
    /// dispatched (or finished) reports `AlreadyDispatched` instead of
    /// producing a second voucher side effect. Inventory is taken here,
    /// not at creation; a stock-out fails the order with a refund.
    pub fn begin_processing(
        &mut self,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<ProcessingOutcome, OrderError> {
        let (status, otp_required, catalog_item_id) = {
            let order = self.order(order_id)?;
            (
                order.status,
                order.otp_required,
                order.catalog_item_id.clone(),
            )
        };

        match status {
            OrderStatus::Pending if otp_required => {
                return Err(OrderError::OtpRequired(order_id.to_string()));
            }
            OrderStatus::Pending | OrderStatus::OtpVerified => {}
            OrderStatus::Processing | OrderStatus::Completed | OrderStatus::Shipped => {
                let order = self.order(order_id)?.clone();
                return Ok(ProcessingOutcome::AlreadyDispatched(order));
            }
            OrderStatus::Failed | OrderStatus::Cancelled => {
                return Err(OrderError::InvalidStateTransition {
                    order_id: order_id.to_string(),
                    from: status,
                    to: OrderStatus::Processing,
                });
            }
        }

        let fulfillment_type = self.catalog.get(&catalog_item_id)?.fulfillment_type;
        let in_stock = if fulfillment_type == FulfillmentType::InventoryItem {
            self.catalog.decrement_inventory(&catalog_item_id)?
        } else {
            true
        };

        {
            let order = self
                .orders
                .get_mut(order_id)
                .ok_or_else(|| OrderError::UnknownOrder(order_id.to_string()))?;
            order.status = OrderStatus::Processing;
            order.updated_at = now;
        }

        if !in_stock {
            let order = self.settle_failure(order_id, "item out of stock", false, now)?;
            return Ok(ProcessingOutcome::StockOut(order));
        }

        Ok(ProcessingOutcome::Started(self.order(order_id)?.clone()))
    }

    pub fn complete_order(
        &mut self,
        order_id: &str,
        voucher_code: Option<String>,
        voucher_pin: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<RedemptionOrder, OrderError> {
        let order = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| OrderError::UnknownOrder(order_id.to_string()))?;
        if order.status != OrderStatus::Processing {
            return Err(OrderError::InvalidStateTransition {
                order_id: order_id.to_string(),
                from: order.status,
                to: OrderStatus::Completed,
            });
        }
        order.voucher_code = voucher_code;
        order.voucher_pin = voucher_pin;
        order.status = OrderStatus::Completed;
        order.updated_at = now;
        Ok(order.clone())
    }

    /// Report a failed fulfillment. The escrow is refunded in full
    /// under the debit's reference id and reserved inventory returns to
    /// stock.
    pub fn fail_order(
        &mut self,
        order_id: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<RedemptionOrder, OrderError> {
        let (status, catalog_item_id) = {
            let order = self.order(order_id)?;
            (order.status, order.catalog_item_id.clone())
        };
        if status != OrderStatus::Processing {
            return Err(OrderError::InvalidStateTransition {
                order_id: order_id.to_string(),
                from: status,
                to: OrderStatus::Failed,
            });
        }
        let restock = self.catalog.get(&catalog_item_id)?.fulfillment_type
            == FulfillmentType::InventoryItem;
        self.settle_failure(order_id, reason, restock, now)
    }

    /// User abort before dispatch. Refund semantics match FAILED.
    pub fn cancel_order(
        &mut self,
        order_id: &str,
        now: DateTime<Utc>,
    ) -> Result<RedemptionOrder, OrderError> {
        let status = self.order(order_id)?.status;
        if !matches!(status, OrderStatus::Pending | OrderStatus::OtpVerified) {
            return Err(OrderError::InvalidStateTransition {
                order_id: order_id.to_string(),
                from: status,
                to: OrderStatus::Cancelled,
            });
        }
        self.refund_escrow(order_id, "refund: order cancelled", now)?;
        let order = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| OrderError::UnknownOrder(order_id.to_string()))?;
        order.status = OrderStatus::Cancelled;
        order.updated_at = now;
        Ok(order.clone())
    }

    pub fn mark_shipped(
        &mut self,
        order_id: &str,
        tracking_number: &str,
        now: DateTime<Utc>,
    ) -> Result<RedemptionOrder, OrderError> {
        let (status, catalog_item_id) = {
            let order = self.order(order_id)?;
            (order.status, order.catalog_item_id.clone())
        };
        let fulfillment_type = self.catalog.get(&catalog_item_id)?.fulfillment_type;
        if status != OrderStatus::Processing
            || fulfillment_type != FulfillmentType::InventoryItem
        {
            return Err(OrderError::InvalidStateTransition {
                order_id: order_id.to_string(),
                from: status,
                to: OrderStatus::Shipped,
            });
        }
        let order = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| OrderError::UnknownOrder(order_id.to_string()))?;
        order.tracking_number = Some(tracking_number.to_string());
        order.status = OrderStatus::Shipped;
        order.updated_at = now;
        Ok(order.clone())
    }

    /// Refund the escrow, mark the order FAILED, and optionally return
    /// an inventory unit. Orders only reach PROCESSING after a
    /// successful stock decrement, so provider failures restock while
    /// the stock-out path must not.
    fn settle_failure(
        &mut self,
        order_id: &str,
        reason: &str,
        restock: bool,
        now: DateTime<Utc>,
    ) -> Result<RedemptionOrder, OrderError> {
        self.refund_escrow(order_id, &format!("refund: {reason}"), now)?;
        if restock {
            let catalog_item_id = self.order(order_id)?.catalog_item_id.clone();
            self.catalog.restore_inventory(&catalog_item_id)?;
        }
        let order = self
            .orders
            .get_mut(order_id)
            .ok_or_else(|| OrderError::UnknownOrder(order_id.to_string()))?;
        order.status = OrderStatus::Failed;
        order.failed_reason = Some(reason.to_string());
        order.updated_at = now;
        Ok(order.clone())
    }

    fn refund_escrow(
        &mut self,
        order_id: &str,
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<(), OrderError> {
        let (user_id, points_spent, reference_id) = {
            let order = self.order(order_id)?;
            (
                order.user_id.clone(),
                order.points_spent,
                order.reference_id.clone(),
            )
        };
        self.ledger.transfer_with_reference(
            Some(&AccountRef::order(order_id)),
            &AccountRef::wallet(user_id),
            points_spent,
            TransactionType::Refund,
            description,
            now,
            &reference_id,
        )?;
        Ok(())
    }
}

use super::*;

impl PointsEconomy {
    /// Per-employee fan-out: every selected department receives
    /// `active employees x points_per_user` from the master pool, all
    /// or nothing. Departments with no active employees are skipped.
    pub fn distribute_per_employee(
        &mut self,
        points_per_user: i64,
        department_ids: Option<&[String]>,
        idempotency_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<DistributionReceipt, DistributionError> {
        if let Some(receipt) = self.replayed_receipt(idempotency_key, true)? {
            return Ok(receipt);
        }
        if points_per_user <= 0 {
            return Err(LedgerError::InvalidAmount(points_per_user).into());
        }

        let selected: Vec<String> = match department_ids {
            Some(ids) => {
                let mut seen = BTreeSet::new();
                let mut selected = Vec::new();
                for id in ids {
                    if !self.ledger.departments().contains_key(id) {
                        return Err(
                            LedgerError::UnknownAccount(format!("department:{id}")).into()
                        );
                    }
                    if seen.insert(id.clone()) {
                        selected.push(id.clone());
                    }
                }
                selected
            }
            None => self.ledger.departments().keys().cloned().collect(),
        };

        let mut plan = Vec::new();
        let mut total: i64 = 0;
        for department_id in &selected {
            let count = self.ledger.active_employee_count(department_id) as i64;
            if count == 0 {
                continue;
            }
            let department_total = count
                .checked_mul(points_per_user)
                .ok_or(LedgerError::InvalidAmount(points_per_user))?;
            total = total
                .checked_add(department_total)
                .ok_or(LedgerError::InvalidAmount(points_per_user))?;
            plan.push((
                AccountRef::department(department_id.clone()),
                department_total,
            ));
        }

        self.check_pool_covers(total)?;
        self.execute_allocation_batch(
            &plan,
            &format!("per-employee distribution of {points_per_user} points"),
            now,
        )?;

        let receipt = DistributionReceipt::PerEmployee(PerEmployeeSummary {
            total_points_allocated: total,
            departments_updated: plan.len(),
        });
        self.store_receipt(idempotency_key, &receipt);
        Ok(receipt)
    }

    /// Credit every active wallet `points_per_user` from the master
    /// pool, atomically across the whole set.
    pub fn distribute_all_users(
        &mut self,
        points_per_user: i64,
        idempotency_key: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<DistributionReceipt, DistributionError> {
        if let Some(receipt) = self.replayed_receipt(idempotency_key, false)? {
            return Ok(receipt);
        }
        if points_per_user <= 0 {
            return Err(LedgerError::InvalidAmount(points_per_user).into());
        }

        let recipients: Vec<String> = self
            .ledger
            .wallets()
            .values()
            .filter(|wallet| wallet.active)
            .map(|wallet| wallet.user_id.clone())
            .collect();
        let total = (recipients.len() as i64)
            .checked_mul(points_per_user)
            .ok_or(LedgerError::InvalidAmount(points_per_user))?;

        self.check_pool_covers(total)?;
        let plan: Vec<(AccountRef, i64)> = recipients
            .into_iter()
            .map(|user_id| (AccountRef::wallet(user_id), points_per_user))
            .collect();
        self.execute_allocation_batch(
            &plan,
            &format!("all-users distribution of {points_per_user} points"),
            now,
        )?;

        let receipt = DistributionReceipt::AllUsers(AllUsersSummary {
            total_points_distributed: total,
            total_users_credited: plan.len(),
        });
        self.store_receipt(idempotency_key, &receipt);
        Ok(receipt)
    }

    /// Run a series of master-pool allocations as one unit. A failed
    /// leg rolls the ledger back to the checkpoint taken before the
    /// first leg, leaving every balance and the entry log untouched.
    pub(super) fn execute_allocation_batch(
        &mut self,
        plan: &[(AccountRef, i64)],
        description: &str,
        now: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let checkpoint = self.ledger.checkpoint();
        for (account, amount) in plan {
            if let Err(err) = self.ledger.transfer(
                Some(&AccountRef::master()),
                account,
                *amount,
                TransactionType::Allocate,
                description,
                now,
            ) {
                self.ledger.rollback_to(checkpoint);
                return Err(err);
            }
        }
        Ok(())
    }

    fn check_pool_covers(&self, total: i64) -> Result<(), LedgerError> {
        let pool = self.ledger.master().balance;
        if total > pool {
            return Err(LedgerError::InsufficientBalance {
                account: AccountRef::master().to_string(),
                shortfall: total - pool,
            });
        }
        Ok(())
    }

    fn replayed_receipt(
        &self,
        idempotency_key: Option<&str>,
        per_employee: bool,
    ) -> Result<Option<DistributionReceipt>, DistributionError> {
        let Some(key) = idempotency_key else {
            return Ok(None);
        };
        match self.distribution_receipts.get(key) {
            None => Ok(None),
            Some(receipt) => {
                let matches_mode = match receipt {
                    DistributionReceipt::PerEmployee(_) => per_employee,
                    DistributionReceipt::AllUsers(_) => !per_employee,
                };
                if matches_mode {
                    Ok(Some(receipt.clone()))
                } else {
                    Err(DistributionError::IdempotencyKeyReused(key.to_string()))
                }
            }
        }
    }

    fn store_receipt(&mut self, idempotency_key: Option<&str>, receipt: &DistributionReceipt) {
        if let Some(key) = idempotency_key {
            self.distribution_receipts
                .insert(key.to_string(), receipt.clone());
        }
    }
}

use std::collections::BTreeMap;

use contracts::{CatalogItem, SourceType};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CatalogError {
    #[error("unknown catalog item {0}")]
    UnknownItem(String),
    #[error("catalog item {0} has no usable pricing")]
    Unpriced(String),
    #[error("{points} points is not a valid spend for {item_id}: {constraint}")]
    InvalidRedemptionAmount {
        item_id: String,
        points: i64,
        constraint: String,
    },
}

/// How many points a catalog entry may be redeemed for, after tenant
/// overrides are applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpendRule {
    Fixed(i64),
    Denominations(Vec<i64>),
    Range {
        min: i64,
        max: i64,
        step: Option<i64>,
    },
}

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    items: BTreeMap<String, CatalogItem>,
}

impl Catalog {
    pub fn items(&self) -> &BTreeMap<String, CatalogItem> {
        &self.items
    }

    pub fn get(&self, item_id: &str) -> Result<&CatalogItem, CatalogError> {
        self.items
            .get(item_id)
            .ok_or_else(|| CatalogError::UnknownItem(item_id.to_string()))
    }

    pub fn upsert_item(&mut self, item: CatalogItem) {
        self.items.insert(item.item_id.clone(), item);
    }

    pub fn set_override(
        &mut self,
        item_id: &str,
        min_points: Option<i64>,
        max_points: Option<i64>,
    ) -> Result<CatalogItem, CatalogError> {
        let item = self
            .items
            .get_mut(item_id)
            .ok_or_else(|| CatalogError::UnknownItem(item_id.to_string()))?;
        item.override_min_points = min_points;
        item.override_max_points = max_points;
        Ok(item.clone())
    }

    /// Resolve the spend rule for one item. Tenant overrides beat the
    /// item's own denominations and range; CUSTOM items are always
    /// their fixed cost.
    pub fn resolve_spend_rule(&self, item_id: &str) -> Result<SpendRule, CatalogError> {
        let item = self.get(item_id)?;
        match item.source_type {
            SourceType::Custom => item
                .points_cost
                .map(SpendRule::Fixed)
                .ok_or_else(|| CatalogError::Unpriced(item_id.to_string())),
            SourceType::Master => {
                if let (Some(min), Some(max)) =
                    (item.override_min_points, item.override_max_points)
                {
                    return Ok(SpendRule::Range {
                        min,
                        max,
                        step: item.step_points,
                    });
                }
                if !item.denominations.is_empty() {
                    return Ok(SpendRule::Denominations(item.denominations.clone()));
                }
                if let (Some(min), Some(max)) = (item.min_points, item.max_points) {
                    return Ok(SpendRule::Range {
                        min,
                        max,
                        step: item.step_points,
                    });
                }
                item.points_cost
                    .map(SpendRule::Fixed)
                    .ok_or_else(|| CatalogError::Unpriced(item_id.to_string()))
            }
        }
    }

    /// Check a chosen spend against the resolved rule. Runs before any
    /// wallet debit.
    pub fn validate_spend(&self, item_id: &str, points: i64) -> Result<(), CatalogError> {
        let reject = |constraint: String| CatalogError::InvalidRedemptionAmount {
            item_id: item_id.to_string(),
            points,
            constraint,
        };
        match self.resolve_spend_rule(item_id)? {
            SpendRule::Fixed(cost) => {
                if points != cost {
                    return Err(reject(format!("cost is fixed at {cost}")));
                }
            }
            SpendRule::Denominations(denominations) => {
                if !denominations.contains(&points) {
                    return Err(reject(format!(
                        "allowed denominations are {denominations:?}"
                    )));
                }
            }
            SpendRule::Range { min, max, step } => {
                if points < min || points > max {
                    return Err(reject(format!("allowed range is {min}..={max}")));
                }
                if let Some(step) = step {
                    if step > 0 && points % step != 0 {
                        return Err(reject(format!("amount must be a multiple of {step}")));
                    }
                }
            }
        }
        Ok(())
    }

    /// Take one unit of stock. Returns false when the item is sold out;
    /// unlimited items always succeed.
    pub fn decrement_inventory(&mut self, item_id: &str) -> Result<bool, CatalogError> {
        let item = self
            .items
            .get_mut(item_id)
            .ok_or_else(|| CatalogError::UnknownItem(item_id.to_string()))?;
        match item.inventory_count {
            None => Ok(true),
            Some(count) if count > 0 => {
                item.inventory_count = Some(count - 1);
                Ok(true)
            }
            Some(_) => Ok(false),
        }
    }

    /// Put a unit back after a failed or cancelled fulfillment.
    pub fn restore_inventory(&mut self, item_id: &str) -> Result<(), CatalogError> {
        let item = self
            .items
            .get_mut(item_id)
            .ok_or_else(|| CatalogError::UnknownItem(item_id.to_string()))?;
        if let Some(count) = item.inventory_count {
            item.inventory_count = Some(count + 1);
        }
        Ok(())
    }
}

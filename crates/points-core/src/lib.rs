//! Tenant points economy: append-only budget ledger, catalog pricing,
//! redemption order state machine, and bulk distribution.

pub mod catalog;
pub mod economy;
pub mod ledger;

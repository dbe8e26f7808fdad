//! Per-(location, item) stock balance and the rules that mutate it.
//!
//! Every mutation is expressed as a pure function returning the next balance
//! (or an error) so adapters can run it under their own atomicity guarantees:
//! the in-memory ledger applies it under a write lock, the Postgres ledger
//! mirrors the same guard in a conditional `UPDATE ... WHERE`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use gasflow_core::{DomainError, DomainResult, ItemId, LocationId};

/// Largest quantity accepted for a single line or receipt.
pub const MAX_QUANTITY: i64 = i32::MAX as i64;

/// Balance of one item at one location.
///
/// Invariants: all quantities are `>= 0` and `quantity_reserved <= quantity_full`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBalance {
    pub location_id: LocationId,
    pub item_id: ItemId,
    pub quantity_full: i64,
    pub quantity_empty: i64,
    pub quantity_reserved: i64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl StockBalance {
    /// Zero balance; used as the starting point when a destination has never
    /// held the item.
    pub fn empty(location_id: LocationId, item_id: ItemId) -> Self {
        Self {
            location_id,
            item_id,
            quantity_full: 0,
            quantity_empty: 0,
            quantity_reserved: 0,
            updated_at: None,
        }
    }

    /// Full units that are not held by a reservation.
    pub fn available_for_transfer(&self) -> i64 {
        self.quantity_full - self.quantity_reserved
    }

    /// Total physical units (full + empty) occupying the location.
    pub fn units_on_hand(&self) -> i64 {
        self.quantity_full.saturating_add(self.quantity_empty)
    }

    pub fn check_invariants(&self) -> DomainResult<()> {
        if self.quantity_full < 0 || self.quantity_empty < 0 || self.quantity_reserved < 0 {
            return Err(DomainError::invariant("stock quantities cannot go negative"));
        }
        if self.quantity_reserved > self.quantity_full {
            return Err(DomainError::invariant(
                "reserved quantity cannot exceed full quantity",
            ));
        }
        Ok(())
    }

    /// Add units (goods receipt or the destination side of a move).
    pub fn credit(&self, full: i64, empty: i64) -> DomainResult<Self> {
        ensure_non_negative(full, empty)?;
        let overflow = || DomainError::invariant("stock quantity would overflow");
        let mut next = self.clone();
        next.quantity_full = next.quantity_full.checked_add(full).ok_or_else(overflow)?;
        next.quantity_empty = next.quantity_empty.checked_add(empty).ok_or_else(overflow)?;
        Ok(next)
    }

    /// Remove units (source side of a move).
    ///
    /// With `consume_reservation`, the full units come out of an existing
    /// reservation held for this move; otherwise they must be unreserved.
    pub fn debit(&self, full: i64, empty: i64, consume_reservation: bool) -> DomainResult<Self> {
        ensure_non_negative(full, empty)?;

        if consume_reservation {
            if self.quantity_reserved < full {
                return Err(DomainError::invariant(format!(
                    "reservation too small: reserved {}, requested {}",
                    self.quantity_reserved, full
                )));
            }
        } else if self.available_for_transfer() < full {
            return Err(DomainError::invariant(format!(
                "insufficient full stock: available {}, requested {}",
                self.available_for_transfer(),
                full
            )));
        }
        if self.quantity_empty < empty {
            return Err(DomainError::invariant(format!(
                "insufficient empty stock: available {}, requested {}",
                self.quantity_empty, empty
            )));
        }

        let mut next = self.clone();
        next.quantity_full -= full;
        next.quantity_empty -= empty;
        if consume_reservation {
            next.quantity_reserved -= full;
        }
        next.check_invariants()?;
        Ok(next)
    }

    /// Hold `quantity` full units against future debits.
    pub fn reserve(&self, quantity: i64) -> DomainResult<Self> {
        ensure_non_negative(quantity, 0)?;
        if self.available_for_transfer() < quantity {
            return Err(DomainError::invariant(format!(
                "cannot reserve {}: only {} available",
                quantity,
                self.available_for_transfer()
            )));
        }
        let mut next = self.clone();
        next.quantity_reserved += quantity;
        Ok(next)
    }

    /// Give back a hold taken by `reserve`.
    pub fn release(&self, quantity: i64) -> DomainResult<Self> {
        ensure_non_negative(quantity, 0)?;
        if self.quantity_reserved < quantity {
            return Err(DomainError::invariant(format!(
                "cannot release {}: only {} reserved",
                quantity, self.quantity_reserved
            )));
        }
        let mut next = self.clone();
        next.quantity_reserved -= quantity;
        Ok(next)
    }
}

fn ensure_non_negative(full: i64, empty: i64) -> DomainResult<()> {
    if full < 0 || empty < 0 {
        return Err(DomainError::validation("quantities must be non-negative"));
    }
    Ok(())
}

/// Filters for location stock listings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockFilter {
    pub item_id: Option<ItemId>,
    /// Only rows with something available for transfer or empties on hand.
    #[serde(default)]
    pub in_stock_only: bool,
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: usize,
}

impl StockFilter {
    pub fn matches(&self, balance: &StockBalance) -> bool {
        if let Some(item_id) = self.item_id {
            if balance.item_id != item_id {
                return false;
            }
        }
        if self.in_stock_only && balance.available_for_transfer() <= 0 && balance.quantity_empty <= 0 {
            return false;
        }
        true
    }

    /// Filter, order by item id and paginate.
    pub fn apply(&self, balances: impl IntoIterator<Item = StockBalance>) -> Vec<StockBalance> {
        let mut rows: Vec<StockBalance> = balances.into_iter().filter(|b| self.matches(b)).collect();
        rows.sort_by_key(|b| b.item_id);
        let rows = rows.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => rows.take(limit).collect(),
            None => rows.collect(),
        }
    }
}

//! Stake sides of a lending market and per-side records.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Which kind of stake a share count, rate or index belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Supply,
    Borrow,
    Collateral,
}

impl Side {
    pub const ALL: [Side; 3] = [Side::Supply, Side::Borrow, Side::Collateral];
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Side::Supply => "supply",
            Side::Borrow => "borrow",
            Side::Collateral => "collateral",
        };
        f.write_str(name)
    }
}

/// One value per [`Side`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BySide<T> {
    pub supply: T,
    pub borrow: T,
    pub collateral: T,
}

impl<T> BySide<T> {
    pub fn splat(value: T) -> Self
    where
        T: Clone,
    {
        Self {
            supply: value.clone(),
            borrow: value.clone(),
            collateral: value,
        }
    }

    pub fn get(&self, side: Side) -> &T {
        match side {
            Side::Supply => &self.supply,
            Side::Borrow => &self.borrow,
            Side::Collateral => &self.collateral,
        }
    }

    pub fn get_mut(&mut self, side: Side) -> &mut T {
        match side {
            Side::Supply => &mut self.supply,
            Side::Borrow => &mut self.borrow,
            Side::Collateral => &mut self.collateral,
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> BySide<U> {
        BySide {
            supply: f(self.supply),
            borrow: f(self.borrow),
            collateral: f(self.collateral),
        }
    }
}

impl BySide<u128> {
    /// Sum across sides, saturating.
    pub fn total(&self) -> u128 {
        self.supply
            .saturating_add(self.borrow)
            .saturating_add(self.collateral)
    }
}

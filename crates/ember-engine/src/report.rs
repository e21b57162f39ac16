//! Accrued-rewards report.
//!
//! A read-only snapshot of every participant's program totals, market
//! emissions and vault donations. Nothing is settled while building it, so
//! totals reflect each record's last settlement.

use ember_types::entities::{
    Clock, Market, MarketEpoch, ProgramAccrual, RewardStream, Vault, VaultRewardCheckpoint,
    SINGLETON_KEY,
};
use ember_types::{Address, Amount, BySide, Id, Timestamp};
use serde::Serialize;

use crate::store::{Ledger, Store};
use crate::Result;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccrualEntry {
    pub participant: Address,
    pub program: Id,
    pub direct: BySide<Amount>,
    pub from_vaults: Amount,
    pub total: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketEntry {
    pub market: Id,
    pub total_shares: BySide<Amount>,
    pub epoch_rewards_accrued: Amount,
    pub epoch_rewards_undistributed: Amount,
    pub stream_rewards_distributed: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VaultEntry {
    pub vault: Address,
    pub total_shares: Amount,
    pub stranded: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RewardsReport {
    pub as_of: Timestamp,
    pub accruals: Vec<AccrualEntry>,
    pub markets: Vec<MarketEntry>,
    pub vaults: Vec<VaultEntry>,
}

impl RewardsReport {
    /// Sum of every participant's direct and vault-derived totals.
    pub fn grand_total(&self) -> Amount {
        self.accruals
            .iter()
            .fold(0u128, |acc, e| acc.saturating_add(e.total))
    }
}

pub fn build<S: Store + ?Sized>(ledger: &Ledger<'_, S>) -> Result<RewardsReport> {
    let clock: Clock = ledger.get_or(SINGLETON_KEY, Clock::default)?;

    let mut accruals: Vec<AccrualEntry> = ledger
        .scan::<ProgramAccrual>()?
        .into_iter()
        .map(|a| AccrualEntry {
            participant: a.participant,
            program: a.program,
            direct: a.accrued,
            from_vaults: a.from_vaults,
            total: a.total(),
        })
        .collect();
    accruals.sort_by(|a, b| (a.participant, a.program).cmp(&(b.participant, b.program)));

    let market_epochs = ledger.scan::<MarketEpoch>()?;
    let streams = ledger.scan::<RewardStream>()?;
    let markets = ledger
        .scan::<Market>()?
        .into_iter()
        .map(|m| MarketEntry {
            market: m.id,
            total_shares: m.total_shares,
            epoch_rewards_accrued: m.epoch_rewards_accrued,
            epoch_rewards_undistributed: market_epochs
                .iter()
                .filter(|me| me.market == m.id)
                .fold(0u128, |acc, me| acc.saturating_add(me.undistributed)),
            stream_rewards_distributed: streams
                .iter()
                .filter(|s| s.market == m.id)
                .fold(0u128, |acc, s| acc.saturating_add(s.distributed.total())),
        })
        .collect();

    let checkpoints = ledger.scan::<VaultRewardCheckpoint>()?;
    let vaults = ledger
        .scan::<Vault>()?
        .into_iter()
        .map(|v| VaultEntry {
            vault: v.address,
            total_shares: v.total_shares,
            stranded: checkpoints
                .iter()
                .filter(|c| c.vault == v.address)
                .fold(0u128, |acc, c| acc.saturating_add(c.stranded)),
        })
        .collect();

    Ok(RewardsReport {
        as_of: clock.last_timestamp,
        accruals,
        markets,
        vaults,
    })
}

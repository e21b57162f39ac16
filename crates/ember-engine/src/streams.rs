//! Continuous annualized reward streams.
//!
//! A stream pays one program's rewards on one market with an independent
//! yearly rate per side. Its indices advance with wall-clock time, no epoch
//! boundaries involved. Sides without stake do not accrue: emissions during
//! those periods are not redistributed later.

use ember_types::entities::{program_id, stream_id, Market, RewardProgram, RewardStream};
use ember_types::{Address, Amount, BySide, Id, Side, Timestamp};
use serde::{Deserialize, Serialize};

use crate::accrual::{self, PerYear};
use crate::market;
use crate::store::{Ledger, Store};
use crate::{AccrualError, Result};

/// When the collateral side of a stream is allowed to accrue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollateralGate {
    /// Accrue when there is collateral and a non-zero rate, like the other sides.
    #[default]
    RequireStake,
    /// Accrue only when collateral or the rate is zero. Reproduces a known
    /// defect of earlier deployments; with the zero-stake division guarded,
    /// the collateral index never moves.
    Inverted,
}

impl CollateralGate {
    fn admits(self, side: Side, total: Amount, rate: Amount) -> bool {
        match (side, self) {
            (Side::Collateral, CollateralGate::Inverted) => total == 0 || rate == 0,
            _ => total != 0 && rate != 0,
        }
    }
}

/// Identity of a reward program: who funds it, what it pays, who distributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgramKey {
    pub sender: Address,
    pub reward_token: Address,
    pub distributor: Address,
}

impl ProgramKey {
    pub fn id(&self) -> Id {
        program_id(&self.sender, &self.reward_token, &self.distributor)
    }
}

/// Advance a stream to `now` against the market's current stake.
///
/// # Errors
///
/// [`AccrualError::NegativeDuration`] if the stream was updated after `now`.
pub fn accrue<S: Store + ?Sized>(
    ledger: &mut Ledger<'_, S>,
    id: &Id,
    market: &Market,
    now: Timestamp,
    gate: CollateralGate,
) -> Result<RewardStream> {
    let mut stream: RewardStream = ledger.load(&id.to_string())?;
    if now < stream.last_update {
        return Err(AccrualError::NegativeDuration {
            context: "reward stream",
            from: stream.last_update,
            to: now,
        });
    }
    let elapsed = now - stream.last_update;
    if elapsed == 0 {
        return Ok(stream);
    }

    for side in Side::ALL {
        let rate = *stream.rate_per_year.get(side);
        let total = *market.total_shares.get(side);
        if !gate.admits(side, total, rate) {
            if rate != 0 && total == 0 {
                tracing::debug!(stream = %stream.id, %side, elapsed, "stream side paused without stake");
            }
            continue;
        }
        let step = accrual::advance(*stream.index.get(side), &PerYear(rate), elapsed, total)?;
        *stream.index.get_mut(side) = step.index;
        let distributed = stream.distributed.get_mut(side);
        *distributed = distributed
            .checked_add(step.distributed)
            .ok_or(AccrualError::Overflow("stream distributed"))?;
    }

    stream.last_update = now;
    ledger.put(&stream)?;
    Ok(stream)
}

/// Set a program's rates on a market, accruing the old rates up to `now` first.
///
/// The program and the market are created on first reference.
pub fn configure_rates<S: Store + ?Sized>(
    ledger: &mut Ledger<'_, S>,
    program: &ProgramKey,
    market_id: &Id,
    rates: BySide<Amount>,
    now: Timestamp,
    gate: CollateralGate,
) -> Result<RewardStream> {
    let pid = program.id();
    let mut record = ledger.get_or(&pid.to_string(), || RewardProgram {
        id: pid,
        sender: program.sender,
        reward_token: program.reward_token,
        distributor: program.distributor,
        markets: Vec::new(),
    })?;
    if !record.markets.contains(market_id) {
        record.markets.push(*market_id);
    }
    ledger.put(&record)?;

    let mut market = market::open(ledger, market_id, Address::ZERO, Address::ZERO, now)?;
    let sid = stream_id(&pid, market_id);
    let mut stream = match ledger.get::<RewardStream>(&sid.to_string())? {
        Some(_) => accrue(ledger, &sid, &market, now, gate)?,
        None => {
            market.streams.push(sid);
            ledger.put(&market)?;
            RewardStream::new(pid, *market_id, now)
        }
    };

    stream.rate_per_year = rates;
    stream.available_at = now;
    ledger.put(&stream)?;

    tracing::info!(
        program = %pid,
        market = %market_id,
        supply_per_year = rates.supply,
        borrow_per_year = rates.borrow,
        collateral_per_year = rates.collateral,
        "stream rates configured"
    );
    Ok(stream)
}

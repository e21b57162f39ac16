//! Index arithmetic shared by every accrual level.
//!
//! A rate source emits `numerator / denominator` reward units over an
//! elapsed window. The emission is spread over the stake present at
//! settlement time by advancing a per-share index:
//!
//! ```text
//! index += numerator * SCALE / (denominator * total_shares)
//! owed   = (index - last_seen) * shares / SCALE
//! ```
//!
//! Epoch rates are per second (denominator 1), stream rates per year
//! (denominator [`SECONDS_PER_YEAR`]); vault-level deltas are already amounts.
//! With no stake the index is left unchanged and the emission is reported as
//! undistributed.

use ember_types::index::{mul_div, to_amount};
use ember_types::{Amount, Index, SCALE, SECONDS_PER_YEAR};
use ethnum::U256;

use crate::{AccrualError, Result};

/// Something that emits rewards over time.
pub trait RateSource {
    /// Emission over `elapsed` seconds as `(numerator, denominator)`.
    fn emission(&self, elapsed: u64) -> Option<(U256, U256)>;
}

/// Epoch-bounded flat rate.
#[derive(Debug, Clone, Copy)]
pub struct PerSecond(pub Amount);

/// Unbounded annualized rate.
#[derive(Debug, Clone, Copy)]
pub struct PerYear(pub Amount);

/// A lump sum, independent of elapsed time.
#[derive(Debug, Clone, Copy)]
pub struct Lump(pub Amount);

impl RateSource for PerSecond {
    fn emission(&self, elapsed: u64) -> Option<(U256, U256)> {
        let n = U256::new(self.0).checked_mul(U256::new(u128::from(elapsed)))?;
        Some((n, U256::ONE))
    }
}

impl RateSource for PerYear {
    fn emission(&self, elapsed: u64) -> Option<(U256, U256)> {
        let n = U256::new(self.0).checked_mul(U256::new(u128::from(elapsed)))?;
        Some((n, U256::new(u128::from(SECONDS_PER_YEAR))))
    }
}

impl RateSource for Lump {
    fn emission(&self, _elapsed: u64) -> Option<(U256, U256)> {
        Some((U256::new(self.0), U256::ONE))
    }
}

/// Result of advancing an index over one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub index: Index,
    /// Reward units credited to the index.
    pub distributed: Amount,
    /// Reward units emitted while no stake was present.
    pub undistributed: Amount,
}

/// Advance `index` by what `source` emitted over `elapsed` seconds.
///
/// # Errors
///
/// [`AccrualError::Overflow`] if any intermediate exceeds 256 bits or the
/// emitted amount exceeds 128 bits.
pub fn advance(
    index: Index,
    source: &impl RateSource,
    elapsed: u64,
    total_shares: Amount,
) -> Result<Step> {
    let (num, den) = source
        .emission(elapsed)
        .ok_or(AccrualError::Overflow("emission"))?;
    let emitted = num
        .checked_div(den)
        .and_then(to_amount)
        .ok_or(AccrualError::Overflow("emission amount"))?;

    if total_shares == 0 {
        return Ok(Step {
            index,
            distributed: 0,
            undistributed: emitted,
        });
    }

    let per_share_den = den
        .checked_mul(U256::new(total_shares))
        .ok_or(AccrualError::Overflow("index denominator"))?;
    let delta = mul_div(num, U256::new(SCALE), per_share_den)
        .ok_or(AccrualError::Overflow("index delta"))?;
    let next = index
        .checked_add(delta)
        .ok_or(AccrualError::Overflow("index"))?;

    tracing::trace!(
        elapsed,
        total_shares,
        emitted,
        delta = %delta,
        "index advanced"
    );

    Ok(Step {
        index: next,
        distributed: emitted,
        undistributed: 0,
    })
}

/// Rewards owed to `shares` for the index growth since `last_seen`.
///
/// # Errors
///
/// [`AccrualError::Inconsistent`] if `last_seen` is ahead of `current`;
/// indices never decrease.
pub fn owed(current: Index, last_seen: Index, shares: Amount) -> Result<Amount> {
    let growth = current.growth_since(last_seen).ok_or_else(|| {
        AccrualError::Inconsistent(format!(
            "checkpoint index {last_seen} ahead of global index {current}"
        ))
    })?;
    if growth == U256::ZERO || shares == 0 {
        return Ok(0);
    }
    mul_div(growth, U256::new(shares), U256::new(SCALE))
        .and_then(to_amount)
        .ok_or(AccrualError::Overflow("owed"))
}

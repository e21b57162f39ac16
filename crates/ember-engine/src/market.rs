//! Market catch-up through the epoch directory.
//!
//! A market remembers the last timestamp it was observed at, the epoch whose
//! accrual is in progress and the last epoch it fully settled. Catching up to
//! `now` finishes the in-progress epoch, settles every epoch that elapsed
//! entirely in between and starts the epoch containing `now`. Between two
//! observations the market's supply is constant, since every supply change
//! goes through a catch-up first.

use ember_types::entities::{Epoch, Market, MarketEpoch};
use ember_types::{Address, Id, Timestamp};

use crate::accrual::{self, PerSecond};
use crate::epochs;
use crate::store::{Ledger, Store};
use crate::{AccrualError, Result};

/// Load a market or create it, joining the epoch in progress at `now`.
///
/// An existing market only has its token metadata refreshed when the given
/// tokens are non-zero.
pub fn open<S: Store + ?Sized>(
    ledger: &mut Ledger<'_, S>,
    id: &Id,
    loan_token: Address,
    collateral_token: Address,
    now: Timestamp,
) -> Result<Market> {
    if let Some(mut market) = ledger.get::<Market>(&id.to_string())? {
        if !loan_token.is_zero() || !collateral_token.is_zero() {
            market.loan_token = loan_token;
            market.collateral_token = collateral_token;
            ledger.put(&market)?;
        }
        return Ok(market);
    }

    let mut market = Market::new(*id, loan_token, collateral_token, now);
    let dir = epochs::directory(ledger)?;
    match epochs::epoch_containing(ledger, now, None)? {
        Some(epoch) => {
            if epoch.markets.contains(id) {
                market.current_epoch = Some(epoch.id);
            }
            market.last_epoch = epoch.previous;
        }
        None => {
            market.last_epoch = match epochs::next_epoch_at_or_after(ledger, now, None)? {
                Some(upcoming) => upcoming.previous,
                None => dir.tail,
            };
        }
    }
    ledger.put(&market)?;
    tracing::info!(
        market = %id,
        loan_token = %loan_token,
        collateral_token = %collateral_token,
        joined_epoch = ?market.current_epoch,
        "market created"
    );
    Ok(market)
}

/// Accrue one market epoch from its last settlement to `min(now, end)`.
fn accrue_window(
    market: &mut Market,
    me: &mut MarketEpoch,
    epoch: &Epoch,
    now: Timestamp,
) -> Result<()> {
    let to = now.min(epoch.end);
    let from = me.last_settled;
    if to < from || from < epoch.start {
        return Err(AccrualError::NegativeDuration {
            context: "market epoch",
            from,
            to,
        });
    }
    let supply = market.total_shares.supply;
    let step = accrual::advance(me.global_index, &PerSecond(me.rate_per_second), to - from, supply)?;

    me.global_index = step.index;
    me.total_accrued = me
        .total_accrued
        .checked_add(step.distributed)
        .ok_or(AccrualError::Overflow("market epoch total"))?;
    me.undistributed = me
        .undistributed
        .checked_add(step.undistributed)
        .ok_or(AccrualError::Overflow("market epoch undistributed"))?;
    me.last_settled = to;
    market.epoch_rewards_accrued = market
        .epoch_rewards_accrued
        .checked_add(step.distributed)
        .ok_or(AccrualError::Overflow("market epoch rewards"))?;

    if step.undistributed > 0 {
        tracing::warn!(
            market = %market.id,
            epoch = epoch.id,
            amount = step.undistributed,
            from,
            to,
            "epoch emission with no supply"
        );
    }
    tracing::trace!(
        market = %market.id,
        epoch = epoch.id,
        accrued = step.distributed,
        from,
        to,
        "market epoch accrued"
    );
    Ok(())
}

/// Bring a market's epoch accrual up to `now`.
///
/// # Errors
///
/// - [`AccrualError::MissingEntity`] if the market or a referenced epoch is missing
/// - [`AccrualError::TimeRegression`] if `now` precedes the market's last check
/// - [`AccrualError::Inconsistent`] if the in-progress pointer ends up outside `now`
pub fn catch_up<S: Store + ?Sized>(
    ledger: &mut Ledger<'_, S>,
    id: &Id,
    now: Timestamp,
) -> Result<Market> {
    let mut market: Market = ledger.load(&id.to_string())?;
    if now < market.last_check {
        return Err(AccrualError::TimeRegression {
            last: market.last_check,
            now,
        });
    }

    // Finish (or continue) the epoch in progress.
    if let Some(epoch_id) = market.current_epoch {
        let epoch = epochs::load_epoch(ledger, epoch_id)?;
        let mut me = epochs::market_epoch(ledger, id, &epoch)?;
        accrue_window(&mut market, &mut me, &epoch, now)?;
        ledger.put(&me)?;
        if now < epoch.end {
            market.last_check = now;
            ledger.put(&market)?;
            return Ok(market);
        }
        tracing::debug!(market = %id, epoch = epoch.id, "epoch finished");
        market.current_epoch = None;
        market.last_epoch = Some(epoch.id);
    }

    // Settle elapsed epochs and start the one containing `now`.
    let mut next = match market.last_epoch {
        Some(last) => {
            let last = epochs::load_epoch(ledger, last)?;
            last.next.map(|n| epochs::load_epoch(ledger, n)).transpose()?
        }
        None => {
            let head = epochs::directory(ledger)?.head;
            head.map(|h| epochs::load_epoch(ledger, h)).transpose()?
        }
    };
    while let Some(epoch) = next {
        if epoch.start > now {
            break;
        }
        let in_progress = now < epoch.end;
        if epoch.markets.contains(id) {
            let mut me = epochs::market_epoch(ledger, id, &epoch)?;
            accrue_window(&mut market, &mut me, &epoch, now)?;
            ledger.put(&me)?;
            if in_progress {
                tracing::debug!(market = %id, epoch = epoch.id, "epoch started");
                market.current_epoch = Some(epoch.id);
                break;
            }
            tracing::debug!(market = %id, epoch = epoch.id, "elapsed epoch settled");
        } else if in_progress {
            break;
        }
        market.last_epoch = Some(epoch.id);
        next = epoch
            .next
            .map(|n| epochs::load_epoch(ledger, n))
            .transpose()?;
    }

    if let Some(epoch_id) = market.current_epoch {
        let epoch = epochs::load_epoch(ledger, epoch_id)?;
        if !epoch.contains(now) {
            return Err(AccrualError::Inconsistent(format!(
                "market {id} in epoch {epoch_id} [{}, {}) at {now}",
                epoch.start, epoch.end
            )));
        }
    }

    market.last_check = now;
    ledger.put(&market)?;
    Ok(market)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use ember_types::entities::market_epoch_id;
    use ember_types::INITIAL_INDEX;

    const MARKET: Id = Id([7; 32]);

    fn setup(epochs_def: &[(u64, u64, u128)]) -> MemoryStore {
        let mut store = MemoryStore::new();
        let mut ledger = Ledger::new(&mut store);
        for (start, end, rate) in epochs_def {
            epochs::configure_epoch(&mut ledger, *start, *end, &[(MARKET, *rate)]).expect("epoch");
        }
        open(&mut ledger, &MARKET, Address::ZERO, Address::ZERO, 0).expect("open");
        ledger.commit().expect("commit");
        store
    }

    fn set_supply(ledger: &mut Ledger<'_, MemoryStore>, supply: u128) {
        let mut market: Market = ledger.load(&MARKET.to_string()).expect("market");
        market.total_shares.supply = supply;
        ledger.put(&market).expect("put");
    }

    fn me(ledger: &Ledger<'_, MemoryStore>, epoch: u64) -> MarketEpoch {
        ledger
            .load(&market_epoch_id(&MARKET, epoch).to_string())
            .expect("market epoch")
    }

    #[test]
    fn test_no_epochs_only_advances_check() {
        let mut store = setup(&[]);
        let mut ledger = Ledger::new(&mut store);
        let market = catch_up(&mut ledger, &MARKET, 500).expect("catch up");
        assert_eq!(market.last_check, 500);
        assert_eq!(market.current_epoch, None);
    }

    #[test]
    fn test_within_one_epoch() {
        let mut store = setup(&[(0, 100, 10)]);
        let mut ledger = Ledger::new(&mut store);
        set_supply(&mut ledger, 100);
        catch_up(&mut ledger, &MARKET, 30).expect("30");
        let market = catch_up(&mut ledger, &MARKET, 60).expect("60");
        assert_eq!(market.current_epoch, Some(1));
        let e1 = me(&ledger, 1);
        assert_eq!(e1.total_accrued, 600);
        assert_eq!(e1.last_settled, 60);
    }

    #[test]
    fn test_crosses_gap_and_full_epochs() {
        let mut store = setup(&[(0, 100, 10), (100, 200, 5), (300, 400, 2), (500, 600, 1)]);
        let mut ledger = Ledger::new(&mut store);
        set_supply(&mut ledger, 100);
        catch_up(&mut ledger, &MARKET, 50).expect("50");
        let market = catch_up(&mut ledger, &MARKET, 450).expect("450");
        assert_eq!(market.current_epoch, None);
        assert_eq!(market.last_epoch, Some(3));
        assert_eq!(me(&ledger, 1).total_accrued, 1_000);
        assert_eq!(me(&ledger, 2).total_accrued, 500);
        assert_eq!(me(&ledger, 3).total_accrued, 200);
        assert_eq!(me(&ledger, 4).global_index, INITIAL_INDEX);
        assert_eq!(market.epoch_rewards_accrued, 1_700);

        let market = catch_up(&mut ledger, &MARKET, 550).expect("550");
        assert_eq!(market.current_epoch, Some(4));
        assert_eq!(me(&ledger, 4).total_accrued, 50);
    }

    #[test]
    fn test_zero_supply_records_undistributed() {
        let mut store = setup(&[(0, 100, 10)]);
        let mut ledger = Ledger::new(&mut store);
        catch_up(&mut ledger, &MARKET, 40).expect("40");
        set_supply(&mut ledger, 10);
        catch_up(&mut ledger, &MARKET, 100).expect("100");
        let e1 = me(&ledger, 1);
        assert_eq!(e1.undistributed, 400);
        assert_eq!(e1.total_accrued, 600);
        assert_eq!(e1.total_accrued + e1.undistributed, 10 * 100);
    }

    #[test]
    fn test_regression_rejected() {
        let mut store = setup(&[(0, 100, 10)]);
        let mut ledger = Ledger::new(&mut store);
        catch_up(&mut ledger, &MARKET, 40).expect("40");
        assert!(matches!(
            catch_up(&mut ledger, &MARKET, 39),
            Err(AccrualError::TimeRegression { last: 40, now: 39 })
        ));
    }

    #[test]
    fn test_market_joining_mid_epoch() {
        let mut store = MemoryStore::new();
        let mut ledger = Ledger::new(&mut store);
        epochs::configure_epoch(&mut ledger, 0, 100, &[(MARKET, 10)]).expect("e1");
        epochs::configure_epoch(&mut ledger, 100, 200, &[(MARKET, 10)]).expect("e2");
        let market = open(&mut ledger, &MARKET, Address::ZERO, Address::ZERO, 150).expect("open");
        assert_eq!(market.current_epoch, Some(2));
        assert_eq!(market.last_epoch, Some(1));
        let market = catch_up(&mut ledger, &MARKET, 250).expect("250");
        assert_eq!(market.last_epoch, Some(2));
        // epoch 1 was never part of this market's history
        assert_eq!(me(&ledger, 1).last_settled, 0);
    }

    #[test]
    fn test_missing_market() {
        let mut store = MemoryStore::new();
        let mut ledger = Ledger::new(&mut store);
        assert!(matches!(
            catch_up(&mut ledger, &MARKET, 1),
            Err(AccrualError::MissingEntity { kind: "market", .. })
        ));
    }
}

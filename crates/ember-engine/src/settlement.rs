//! Position settlement.
//!
//! Settling a position credits it with the index growth of every stream and
//! market epoch since its checkpoints were last updated, at the shares it
//! held over that interval. Settlement always precedes a share delta.

use ember_types::entities::{
    epoch_program_id, position_checkpoint_id, position_id, program_accrual_id, Epoch, Market,
    Participant, Position, PositionCheckpoint, ProgramAccrual,
};
use ember_types::{Address, Amount, Id, Index, Side, Timestamp};

use crate::accrual;
use crate::epochs;
use crate::market;
use crate::store::{Ledger, Store};
use crate::streams::{self, CollateralGate};
use crate::{AccrualError, Result};

pub(crate) fn load_participant<S: Store + ?Sized>(
    ledger: &Ledger<'_, S>,
    address: &Address,
) -> Result<Participant> {
    ledger.get_or(&address.to_string(), || Participant::new(*address))
}

/// Add `amount` to a participant's program total, registering the program on
/// the participant when first seen.
pub(crate) fn credit_program<S: Store + ?Sized>(
    ledger: &mut Ledger<'_, S>,
    participant: &Address,
    program: &Id,
    credit: impl FnOnce(&mut ProgramAccrual) -> Option<()>,
) -> Result<()> {
    let key = program_accrual_id(participant, program).to_string();
    let mut accrual = match ledger.get::<ProgramAccrual>(&key)? {
        Some(accrual) => accrual,
        None => {
            let mut record = load_participant(ledger, participant)?;
            if !record.programs.contains(program) {
                record.programs.push(*program);
                ledger.put(&record)?;
            }
            ProgramAccrual::new(*participant, *program)
        }
    };
    credit(&mut accrual).ok_or(AccrualError::Overflow("program accrual"))?;
    ledger.put(&accrual)
}

/// Settle one checkpoint of `position` against the given per-side indices.
fn settle_checkpoint<S: Store + ?Sized>(
    ledger: &mut Ledger<'_, S>,
    position: &Position,
    source: &Id,
    program: &Id,
    current: &[(Side, Index)],
) -> Result<Amount> {
    let key = position_checkpoint_id(&position.id, source).to_string();
    let mut checkpoint = ledger.get_or(&key, || PositionCheckpoint::new(position.id, *source))?;

    let mut owed_by_side = [(Side::Supply, 0u128); 3];
    let mut settled = 0u128;
    for (slot, (side, index)) in owed_by_side.iter_mut().zip(current) {
        let owed = accrual::owed(*index, *checkpoint.last_index.get(*side), *position.shares.get(*side))?;
        *checkpoint.last_index.get_mut(*side) = *index;
        let accrued = checkpoint.accrued.get_mut(*side);
        *accrued = accrued
            .checked_add(owed)
            .ok_or(AccrualError::Overflow("checkpoint accrued"))?;
        *slot = (*side, owed);
        settled = settled
            .checked_add(owed)
            .ok_or(AccrualError::Overflow("settled"))?;
    }
    ledger.put(&checkpoint)?;

    if settled > 0 {
        credit_program(ledger, &position.participant, program, |accrual| {
            for (side, owed) in owed_by_side {
                let slot = accrual.accrued.get_mut(side);
                *slot = slot.checked_add(owed)?;
            }
            Some(())
        })?;
        tracing::debug!(
            participant = %position.participant,
            market = %position.market,
            source = %source,
            amount = settled,
            "position settled"
        );
    }
    Ok(settled)
}

/// First epoch with `end > ts`, walking forward from `from`.
fn first_ending_after<S: Store + ?Sized>(
    ledger: &Ledger<'_, S>,
    ts: Timestamp,
    from: Option<u64>,
) -> Result<Option<Epoch>> {
    let start = match from {
        Some(id) => Some(id),
        None => epochs::directory(ledger)?.head,
    };
    let mut cursor = start.map(|id| epochs::load_epoch(ledger, id)).transpose()?;
    while let Some(epoch) = cursor {
        if epoch.end > ts {
            return Ok(Some(epoch));
        }
        cursor = epoch.next.map(|n| epochs::load_epoch(ledger, n)).transpose()?;
    }
    Ok(None)
}

/// Settle the position against every market epoch overlapping
/// `(last_settled, now]`. Epoch emissions reward the supply side only.
fn settle_epochs<S: Store + ?Sized>(
    ledger: &mut Ledger<'_, S>,
    position: &mut Position,
    now: Timestamp,
) -> Result<()> {
    let program = epoch_program_id();
    let mut cursor = first_ending_after(ledger, position.last_settled, position.epoch_hint)?;
    while let Some(epoch) = cursor {
        position.epoch_hint = Some(epoch.id);
        if epoch.start > now {
            break;
        }
        if epoch.markets.contains(&position.market) {
            let me = epochs::market_epoch(ledger, &position.market, &epoch)?;
            if me.last_settled < now.min(epoch.end) {
                return Err(AccrualError::Inconsistent(format!(
                    "market epoch {} settled to {} behind position settlement at {now}",
                    me.id, me.last_settled
                )));
            }
            settle_checkpoint(ledger, position, &me.id, &program, &[(Side::Supply, me.global_index)])?;
        }
        if now < epoch.end {
            break;
        }
        cursor = epoch.next.map(|n| epochs::load_epoch(ledger, n)).transpose()?;
    }
    Ok(())
}

/// Catch the market up and settle `participant`'s position in it at `now`.
///
/// The position is created if missing. Returns the settled position and the
/// market it was settled against.
pub fn settle<S: Store + ?Sized>(
    ledger: &mut Ledger<'_, S>,
    market_id: &Id,
    participant: &Address,
    now: Timestamp,
    gate: CollateralGate,
) -> Result<(Position, Market)> {
    let market = market::catch_up(ledger, market_id, now)?;

    let key = position_id(participant, market_id).to_string();
    let mut position = match ledger.get::<Position>(&key)? {
        Some(position) => position,
        None => {
            let mut record = load_participant(ledger, participant)?;
            record.markets.push(*market_id);
            ledger.put(&record)?;
            Position::new(*participant, *market_id, now)
        }
    };
    if now < position.last_settled {
        return Err(AccrualError::TimeRegression {
            last: position.last_settled,
            now,
        });
    }

    for stream_id in &market.streams {
        let stream = streams::accrue(ledger, stream_id, &market, now, gate)?;
        let current = [
            (Side::Supply, stream.index.supply),
            (Side::Borrow, stream.index.borrow),
            (Side::Collateral, stream.index.collateral),
        ];
        settle_checkpoint(ledger, &position, &stream.id, &stream.program, &current)?;
    }
    settle_epochs(ledger, &mut position, now)?;

    position.last_settled = now;
    ledger.put(&position)?;
    Ok((position, market))
}

/// Settle, then apply a signed share delta on one side.
///
/// # Errors
///
/// [`AccrualError::ShareUnderflow`] if a decrease exceeds the position.
pub fn apply_delta<S: Store + ?Sized>(
    ledger: &mut Ledger<'_, S>,
    market_id: &Id,
    participant: &Address,
    side: Side,
    delta: i128,
    now: Timestamp,
    gate: CollateralGate,
) -> Result<Position> {
    let (mut position, _) = settle(ledger, market_id, participant, now, gate)?;
    if delta == 0 {
        return Ok(position);
    }
    // Streams and checkpoints were written since; re-read the market.
    let mut market: Market = ledger.load(&market_id.to_string())?;

    let amount = delta.unsigned_abs();
    let held = position.shares.get_mut(side);
    let total = market.total_shares.get_mut(side);
    if delta > 0 {
        *held = held
            .checked_add(amount)
            .ok_or(AccrualError::Overflow("position shares"))?;
        *total = total
            .checked_add(amount)
            .ok_or(AccrualError::Overflow("market shares"))?;
    } else {
        *held = held.checked_sub(amount).ok_or(AccrualError::ShareUnderflow {
            holder: participant.to_string(),
            side,
            held: *held,
            removed: amount,
        })?;
        *total = total.checked_sub(amount).ok_or_else(|| {
            AccrualError::Inconsistent(format!(
                "market {market_id} {side} total below a position's shares"
            ))
        })?;
    }

    ledger.put(&position)?;
    ledger.put(&market)?;
    tracing::debug!(
        participant = %participant,
        market = %market_id,
        %side,
        delta,
        shares = *position.shares.get(side),
        "shares updated"
    );
    Ok(position)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::streams::ProgramKey;
    use ember_types::{BySide, SECONDS_PER_YEAR};

    const MARKET: Id = Id([5; 32]);
    const ALICE: Address = Address([0xa; 20]);
    const BOB: Address = Address([0xb; 20]);
    const GATE: CollateralGate = CollateralGate::RequireStake;

    fn epoch_accrued(ledger: &Ledger<'_, MemoryStore>, who: &Address) -> Amount {
        ledger
            .get::<ProgramAccrual>(&program_accrual_id(who, &epoch_program_id()).to_string())
            .expect("get")
            .map_or(0, |a| a.direct())
    }

    fn with_epochs(epochs_def: &[(u64, u64, u128)]) -> MemoryStore {
        let mut store = MemoryStore::new();
        let mut ledger = Ledger::new(&mut store);
        for (start, end, rate) in epochs_def {
            epochs::configure_epoch(&mut ledger, *start, *end, &[(MARKET, *rate)]).expect("epoch");
        }
        market::open(&mut ledger, &MARKET, Address::ZERO, Address::ZERO, 0).expect("market");
        ledger.commit().expect("commit");
        store
    }

    #[test]
    fn test_sole_supplier_gets_everything() {
        let mut store = with_epochs(&[(0, 100, 10), (100, 200, 5)]);
        let mut ledger = Ledger::new(&mut store);
        apply_delta(&mut ledger, &MARKET, &ALICE, Side::Supply, 100, 0, GATE).expect("supply");
        settle(&mut ledger, &MARKET, &ALICE, 250, GATE).expect("settle");
        assert_eq!(epoch_accrued(&ledger, &ALICE), 1_500);
    }

    #[test]
    fn test_late_joiner_only_earns_after_joining() {
        let mut store = with_epochs(&[(0, 100, 10), (100, 200, 5)]);
        let mut ledger = Ledger::new(&mut store);
        apply_delta(&mut ledger, &MARKET, &ALICE, Side::Supply, 100, 0, GATE).expect("alice");
        apply_delta(&mut ledger, &MARKET, &BOB, Side::Supply, 100, 150, GATE).expect("bob");
        settle(&mut ledger, &MARKET, &ALICE, 250, GATE).expect("alice settle");
        settle(&mut ledger, &MARKET, &BOB, 250, GATE).expect("bob settle");
        assert_eq!(epoch_accrued(&ledger, &ALICE), 1_375);
        assert_eq!(epoch_accrued(&ledger, &BOB), 125);
    }

    #[test]
    fn test_settle_twice_is_idempotent() {
        let mut store = with_epochs(&[(0, 100, 10)]);
        let mut ledger = Ledger::new(&mut store);
        apply_delta(&mut ledger, &MARKET, &ALICE, Side::Supply, 10, 0, GATE).expect("supply");
        settle(&mut ledger, &MARKET, &ALICE, 40, GATE).expect("first");
        let first = epoch_accrued(&ledger, &ALICE);
        settle(&mut ledger, &MARKET, &ALICE, 40, GATE).expect("second");
        assert_eq!(epoch_accrued(&ledger, &ALICE), first);
        assert_eq!(first, 400);
    }

    #[test]
    fn test_withdraw_beyond_position_rejected() {
        let mut store = with_epochs(&[]);
        let mut ledger = Ledger::new(&mut store);
        apply_delta(&mut ledger, &MARKET, &ALICE, Side::Borrow, 10, 0, GATE).expect("borrow");
        let err = apply_delta(&mut ledger, &MARKET, &ALICE, Side::Borrow, -11, 1, GATE)
            .expect_err("underflow");
        assert!(matches!(
            err,
            AccrualError::ShareUnderflow {
                held: 10,
                removed: 11,
                ..
            }
        ));
    }

    #[test]
    fn test_stream_settlement_by_side() {
        let mut store = with_epochs(&[]);
        let mut ledger = Ledger::new(&mut store);
        let program = ProgramKey {
            sender: Address([1; 20]),
            reward_token: Address([2; 20]),
            distributor: Address([3; 20]),
        };
        let year = SECONDS_PER_YEAR as u128;
        let rates = BySide {
            supply: year,
            borrow: 2 * year,
            collateral: 0,
        };
        streams::configure_rates(&mut ledger, &program, &MARKET, rates, 0, GATE).expect("rates");
        apply_delta(&mut ledger, &MARKET, &ALICE, Side::Supply, 30, 0, GATE).expect("supply");
        apply_delta(&mut ledger, &MARKET, &BOB, Side::Supply, 10, 0, GATE).expect("supply");
        apply_delta(&mut ledger, &MARKET, &BOB, Side::Borrow, 5, 0, GATE).expect("borrow");
        settle(&mut ledger, &MARKET, &ALICE, 100, GATE).expect("alice");
        settle(&mut ledger, &MARKET, &BOB, 100, GATE).expect("bob");

        let key = |who: &Address| program_accrual_id(who, &program.id()).to_string();
        let alice: ProgramAccrual = ledger.load(&key(&ALICE)).expect("alice accrual");
        let bob: ProgramAccrual = ledger.load(&key(&BOB)).expect("bob accrual");
        assert_eq!(alice.accrued.supply, 75);
        assert_eq!(bob.accrued.supply, 25);
        assert_eq!(bob.accrued.borrow, 200);
        assert_eq!(alice.accrued.borrow, 0);
    }

    #[test]
    fn test_participant_tracks_markets_and_programs() {
        let mut store = with_epochs(&[(0, 100, 1)]);
        let mut ledger = Ledger::new(&mut store);
        apply_delta(&mut ledger, &MARKET, &ALICE, Side::Supply, 1, 0, GATE).expect("supply");
        settle(&mut ledger, &MARKET, &ALICE, 10, GATE).expect("settle");
        let record: Participant = ledger.load(&ALICE.to_string()).expect("participant");
        assert_eq!(record.markets, vec![MARKET]);
        assert_eq!(record.programs, vec![epoch_program_id()]);
    }
}

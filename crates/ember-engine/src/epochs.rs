//! Epoch directory.
//!
//! Epochs form a singly appended, doubly linked list ordered by start. Gaps
//! between epochs are periods without epoch emissions. Lookups walk forward
//! from a caller-supplied epoch when one is known, so catch-up cost grows
//! with the number of elapsed epochs rather than the directory size.

use ember_types::entities::{Clock, Epoch, EpochDirectory, MarketEpoch, SINGLETON_KEY};
use ember_types::{Amount, Id, Timestamp};

use crate::store::{Ledger, Store};
use crate::{AccrualError, Result};

pub fn directory<S: Store + ?Sized>(ledger: &Ledger<'_, S>) -> Result<EpochDirectory> {
    ledger.get_or(SINGLETON_KEY, EpochDirectory::default)
}

pub fn load_epoch<S: Store + ?Sized>(ledger: &Ledger<'_, S>, id: u64) -> Result<Epoch> {
    ledger.load(&id.to_string())
}

/// First epoch of the walk: `from` if given, the directory head otherwise.
fn walk_start<S: Store + ?Sized>(
    ledger: &Ledger<'_, S>,
    from: Option<u64>,
) -> Result<Option<Epoch>> {
    let start = match from {
        Some(id) => Some(id),
        None => directory(ledger)?.head,
    };
    start.map(|id| load_epoch(ledger, id)).transpose()
}

fn successor<S: Store + ?Sized>(ledger: &Ledger<'_, S>, epoch: &Epoch) -> Result<Option<Epoch>> {
    epoch.next.map(|id| load_epoch(ledger, id)).transpose()
}

/// Epoch whose `[start, end)` contains `ts`, walking forward from `from`.
///
/// `None` when `ts` falls in a gap or after the last epoch. `from` must not
/// start after `ts`.
pub fn epoch_containing<S: Store + ?Sized>(
    ledger: &Ledger<'_, S>,
    ts: Timestamp,
    from: Option<u64>,
) -> Result<Option<Epoch>> {
    let mut cursor = walk_start(ledger, from)?;
    while let Some(epoch) = cursor {
        if epoch.start > ts {
            return Ok(None);
        }
        if epoch.contains(ts) {
            return Ok(Some(epoch));
        }
        cursor = successor(ledger, &epoch)?;
    }
    Ok(None)
}

/// First epoch with `start >= ts`, walking forward from `from`.
pub fn next_epoch_at_or_after<S: Store + ?Sized>(
    ledger: &Ledger<'_, S>,
    ts: Timestamp,
    from: Option<u64>,
) -> Result<Option<Epoch>> {
    let mut cursor = walk_start(ledger, from)?;
    while let Some(epoch) = cursor {
        if epoch.start >= ts {
            return Ok(Some(epoch));
        }
        cursor = successor(ledger, &epoch)?;
    }
    Ok(None)
}

/// The market epoch of `market` in `epoch`, which must be configured.
pub fn market_epoch<S: Store + ?Sized>(
    ledger: &Ledger<'_, S>,
    market: &Id,
    epoch: &Epoch,
) -> Result<MarketEpoch> {
    ledger.load(&ember_types::entities::market_epoch_id(market, epoch.id).to_string())
}

/// Move the directory pointers to `now`: `current` to the epoch containing
/// it, `passed` to the latest epoch started at or before it.
///
/// Both pointers only move forward, so the walk resumes from `passed` and
/// visits only the epochs started since the previous sync.
pub fn sync<S: Store + ?Sized>(ledger: &mut Ledger<'_, S>, now: Timestamp) -> Result<Option<Epoch>> {
    let mut dir = directory(ledger)?;
    let resume = match dir.passed {
        Some(id) => Some(load_epoch(ledger, id)?).filter(|e| e.start <= now),
        None => None,
    };
    let mut cursor = match resume {
        Some(epoch) => Some(epoch),
        None => walk_start(ledger, None)?,
    };

    let mut passed = None;
    let mut current = None;
    while let Some(epoch) = cursor {
        if epoch.start > now {
            break;
        }
        passed = Some(epoch.id);
        if epoch.contains(now) {
            current = Some(epoch);
            break;
        }
        cursor = successor(ledger, &epoch)?;
    }

    let current_id = current.as_ref().map(|e| e.id);
    if current_id != dir.current || passed != dir.passed {
        tracing::debug!(from = ?dir.current, to = ?current_id, ?passed, now, "epoch pointer moved");
        dir.current = current_id;
        dir.passed = passed;
        ledger.put(&dir)?;
    }
    Ok(current)
}

/// Append an epoch `[start, end)` with per-market rates to the directory.
///
/// # Errors
///
/// - [`AccrualError::InvalidEpochWindow`] if `start >= end`
/// - [`AccrualError::EpochOverlap`] if `start` precedes the end of the last epoch
/// - [`AccrualError::EpochAlreadyStarted`] if `start` precedes the engine clock
pub fn configure_epoch<S: Store + ?Sized>(
    ledger: &mut Ledger<'_, S>,
    start: Timestamp,
    end: Timestamp,
    rates: &[(Id, Amount)],
) -> Result<Epoch> {
    if start >= end {
        return Err(AccrualError::InvalidEpochWindow { start, end });
    }
    let clock: Clock = ledger.get_or(SINGLETON_KEY, Clock::default)?;
    if start < clock.last_timestamp {
        return Err(AccrualError::EpochAlreadyStarted {
            start,
            now: clock.last_timestamp,
        });
    }

    let mut dir = directory(ledger)?;
    let id = dir.count + 1;
    if let Some(tail_id) = dir.tail {
        let mut tail = load_epoch(ledger, tail_id)?;
        if start < tail.end {
            return Err(AccrualError::EpochOverlap {
                start,
                tail: tail.id,
                tail_end: tail.end,
            });
        }
        tail.next = Some(id);
        ledger.put(&tail)?;
    }

    let mut markets: Vec<Id> = Vec::with_capacity(rates.len());
    for (market, _) in rates {
        if markets.contains(market) {
            return Err(AccrualError::Inconsistent(format!(
                "market {market} configured twice for epoch {id}"
            )));
        }
        markets.push(*market);
    }

    let epoch = Epoch {
        id,
        start,
        end,
        previous: dir.tail,
        next: None,
        markets,
    };
    for (market, rate) in rates {
        ledger.put(&MarketEpoch::new(*market, &epoch, *rate))?;
    }
    ledger.put(&epoch)?;

    if dir.head.is_none() {
        dir.head = Some(id);
    }
    dir.tail = Some(id);
    dir.count = id;
    ledger.put(&dir)?;

    tracing::info!(epoch = id, start, end, markets = rates.len(), "epoch configured");
    Ok(epoch)
}

/// All configured epochs in directory order.
pub fn list<S: Store + ?Sized>(ledger: &Ledger<'_, S>) -> Result<Vec<Epoch>> {
    let mut out = Vec::new();
    let mut cursor = walk_start(ledger, None)?;
    while let Some(epoch) = cursor {
        cursor = successor(ledger, &epoch)?;
        out.push(epoch);
    }
    Ok(out)
}

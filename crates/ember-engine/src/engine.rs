//! The engine facade.
//!
//! Each public operation runs in its own [`Ledger`]: the clock is advanced,
//! the epoch directory synced, the operation performed and everything is
//! committed in one batch. On error nothing is written. [`Engine::batch`]
//! groups several calls of one log into a single unit of work.

use ember_types::entities::{
    program_accrual_id, Clock, Entity, Epoch, FeeRecipient, LogRecord, Market, ProgramAccrual,
    RewardStream, Vault, SINGLETON_KEY,
};
use ember_types::{Address, Amount, BySide, Id, Side, Timestamp};
use serde::{Deserialize, Serialize};

use crate::report::{self, RewardsReport};
use crate::settlement::{self, load_participant};
use crate::store::{Ledger, Store};
use crate::streams::{self, CollateralGate, ProgramKey};
use crate::{epochs, market, vault, AccrualError, Result};

/// Engine behavior switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub collateral_gate: CollateralGate,
}

/// Rate schedule of one market within one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateConfig {
    pub market: Id,
    pub rate_per_second: Amount,
}

fn advance_clock<S: Store + ?Sized>(ledger: &mut Ledger<'_, S>, now: Timestamp) -> Result<()> {
    let mut clock: Clock = ledger.get_or(SINGLETON_KEY, Clock::default)?;
    if now < clock.last_timestamp {
        return Err(AccrualError::TimeRegression {
            last: clock.last_timestamp,
            now,
        });
    }
    clock.last_timestamp = now;
    ledger.put(&clock)
}

pub struct Engine<S: Store> {
    store: S,
    config: EngineConfig,
}

impl<S: Store> Engine<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    /// Run `op` in a fresh ledger and commit it, or discard it on error.
    fn run<T>(
        &mut self,
        name: &'static str,
        now: Option<Timestamp>,
        op: impl FnOnce(&mut Ledger<'_, S>, &EngineConfig) -> Result<T>,
    ) -> Result<T> {
        let config = &self.config;
        let mut ledger = Ledger::new(&mut self.store);
        let outcome = (|| {
            if let Some(now) = now {
                advance_clock(&mut ledger, now)?;
                epochs::sync(&mut ledger, now)?;
            }
            op(&mut ledger, config)
        })();
        match outcome {
            Ok(value) => {
                let writes = ledger.commit()?;
                tracing::trace!(op = name, writes, "operation committed");
                Ok(value)
            }
            Err(e) => {
                tracing::error!(op = name, error = %e, "operation aborted");
                Err(e)
            }
        }
    }

    /// Read one record without opening a unit of work.
    pub fn get<E: Entity>(&self, key: &str) -> Result<Option<E>> {
        self.store
            .fetch(E::KIND, key)?
            .map(|body| serde_json::from_str(&body).map_err(AccrualError::from))
            .transpose()
    }

    /// Last processed timestamp.
    pub fn clock(&self) -> Result<Timestamp> {
        Ok(self
            .get::<Clock>(SINGLETON_KEY)?
            .map_or(0, |c| c.last_timestamp))
    }

    /// Append an epoch to the schedule.
    pub fn configure_epoch(
        &mut self,
        start: Timestamp,
        end: Timestamp,
        rates: &[RateConfig],
    ) -> Result<Epoch> {
        let rates: Vec<(Id, Amount)> = rates.iter().map(|r| (r.market, r.rate_per_second)).collect();
        self.run("configure_epoch", None, |ledger, _| {
            epochs::configure_epoch(ledger, start, end, &rates)
        })
    }

    /// Every configured epoch in order.
    pub fn epochs(&mut self) -> Result<Vec<Epoch>> {
        self.run("epochs", None, |ledger, _| epochs::list(ledger))
    }

    /// Run several calls at `now` as one unit of work.
    ///
    /// The clock advances once, every call sees the writes of the calls
    /// before it, and either all of them commit or none does.
    pub fn batch<T>(
        &mut self,
        now: Timestamp,
        op: impl FnOnce(&mut Batch<'_, '_, S>) -> Result<T>,
    ) -> Result<T> {
        self.run_batch("batch", now, op)
    }

    fn run_batch<T>(
        &mut self,
        name: &'static str,
        now: Timestamp,
        op: impl FnOnce(&mut Batch<'_, '_, S>) -> Result<T>,
    ) -> Result<T> {
        self.run(name, Some(now), |ledger, config| {
            op(&mut Batch {
                ledger,
                config,
                now,
            })
        })
    }

    pub fn create_market(
        &mut self,
        market: Id,
        loan_token: Address,
        collateral_token: Address,
        now: Timestamp,
    ) -> Result<Market> {
        self.run_batch("create_market", now, |b| {
            b.create_market(market, loan_token, collateral_token)
        })
    }

    pub fn set_fee_recipient(&mut self, recipient: Address, now: Timestamp) -> Result<()> {
        self.run_batch("set_fee_recipient", now, |b| b.set_fee_recipient(recipient))
    }

    /// Settle `participant` in `market`, then apply `delta` shares on `side`.
    pub fn on_balance_change(
        &mut self,
        market: Id,
        participant: Address,
        side: Side,
        delta: i128,
        now: Timestamp,
    ) -> Result<()> {
        self.run_batch("balance_change", now, |b| {
            b.on_balance_change(market, participant, side, delta)
        })
    }

    /// See [`Batch::accrue_protocol_fee`].
    pub fn accrue_protocol_fee(&mut self, market: Id, fee_shares: Amount, now: Timestamp) -> Result<()> {
        self.run_batch("accrue_protocol_fee", now, |b| {
            b.accrue_protocol_fee(market, fee_shares)
        })
    }

    /// Accrue a program's stream at its old rates, then set new ones.
    pub fn on_rate_configured(
        &mut self,
        program: ProgramKey,
        market: Id,
        rates: BySide<Amount>,
        now: Timestamp,
    ) -> Result<RewardStream> {
        self.run_batch("rate_configured", now, |b| {
            b.on_rate_configured(program, market, rates)
        })
    }

    pub fn create_vault(&mut self, address: Address, now: Timestamp) -> Result<Vault> {
        self.run_batch("create_vault", now, |b| b.create_vault(address))
    }

    pub fn set_vault_fee_recipient(
        &mut self,
        address: Address,
        recipient: Address,
        now: Timestamp,
    ) -> Result<()> {
        self.run_batch("set_vault_fee_recipient", now, |b| {
            b.set_vault_fee_recipient(address, recipient)
        })
    }

    /// Move vault shares. `from = None` mints, `to = None` burns.
    pub fn on_vault_share_change(
        &mut self,
        address: Address,
        from: Option<Address>,
        to: Option<Address>,
        amount: Amount,
        now: Timestamp,
    ) -> Result<()> {
        self.run_batch("vault_share_change", now, |b| {
            b.on_vault_share_change(address, from, to, amount)
        })
    }

    /// Mint vault fee shares to the vault's fee recipient.
    pub fn accrue_vault_fee(&mut self, address: Address, fee_shares: Amount, now: Timestamp) -> Result<()> {
        self.run_batch("accrue_vault_fee", now, |b| b.accrue_vault_fee(address, fee_shares))
    }

    /// Settle everything `participant` holds at `now` and return its accrued
    /// rewards, for one program or summed over all of them.
    pub fn accrued_rewards(
        &mut self,
        participant: Address,
        program: Option<Id>,
        now: Timestamp,
    ) -> Result<Amount> {
        self.run("accrued_rewards", Some(now), |ledger, config| {
            let gate = config.collateral_gate;
            let record = load_participant(ledger, &participant)?;
            for market in &record.markets {
                settlement::settle(ledger, market, &participant, now, gate)?;
            }
            for address in &record.vaults {
                vault::settle_vault(ledger, address, now, gate)?;
                vault::settle_depositor(ledger, address, &participant)?;
            }

            let programs = load_participant(ledger, &participant)?.programs;
            let mut total: Amount = 0;
            for id in programs.iter().filter(|p| program.map_or(true, |want| **p == want)) {
                let accrual: ProgramAccrual =
                    ledger.load(&program_accrual_id(&participant, id).to_string())?;
                total = total
                    .checked_add(accrual.total())
                    .ok_or(AccrualError::Overflow("accrued rewards"))?;
            }
            Ok(total)
        })
    }

    /// Snapshot of every accrual without settling anything.
    pub fn rewards_report(&mut self) -> Result<RewardsReport> {
        self.run("rewards_report", None, |ledger, _| report::build(ledger))
    }
}

/// Calls staged in one engine unit of work, all at the same timestamp.
pub struct Batch<'a, 's, S: Store> {
    ledger: &'a mut Ledger<'s, S>,
    config: &'a EngineConfig,
    now: Timestamp,
}

impl<S: Store> Batch<'_, '_, S> {
    pub fn create_market(
        &mut self,
        market: Id,
        loan_token: Address,
        collateral_token: Address,
    ) -> Result<Market> {
        market::open(self.ledger, &market, loan_token, collateral_token, self.now)
    }

    pub fn set_fee_recipient(&mut self, recipient: Address) -> Result<()> {
        self.ledger.put(&FeeRecipient { recipient })?;
        tracing::info!(%recipient, "protocol fee recipient set");
        Ok(())
    }

    pub fn on_balance_change(
        &mut self,
        market: Id,
        participant: Address,
        side: Side,
        delta: i128,
    ) -> Result<()> {
        let gate = self.config.collateral_gate;
        settlement::apply_delta(self.ledger, &market, &participant, side, delta, self.now, gate)
            .map(|_| ())
    }

    /// Mint interest fee shares to the protocol fee recipient.
    ///
    /// # Errors
    ///
    /// [`AccrualError::MissingFeeRecipient`] if shares are minted before any
    /// recipient was set.
    pub fn accrue_protocol_fee(&mut self, market: Id, fee_shares: Amount) -> Result<()> {
        if fee_shares == 0 {
            return Ok(());
        }
        let Some(FeeRecipient { recipient }) = self.ledger.get::<FeeRecipient>(SINGLETON_KEY)? else {
            return Err(AccrualError::MissingFeeRecipient {
                target: market.to_string(),
            });
        };
        let delta = i128::try_from(fee_shares).map_err(|_| AccrualError::Overflow("fee shares"))?;
        self.on_balance_change(market, recipient, Side::Supply, delta)
    }

    pub fn on_rate_configured(
        &mut self,
        program: ProgramKey,
        market: Id,
        rates: BySide<Amount>,
    ) -> Result<RewardStream> {
        let gate = self.config.collateral_gate;
        streams::configure_rates(self.ledger, &program, &market, rates, self.now, gate)
    }

    pub fn create_vault(&mut self, address: Address) -> Result<Vault> {
        vault::open(self.ledger, &address, self.now)
    }

    pub fn set_vault_fee_recipient(&mut self, address: Address, recipient: Address) -> Result<()> {
        let mut record: Vault = self.ledger.load(&address.to_string())?;
        record.fee_recipient = Some(recipient);
        self.ledger.put(&record)?;
        tracing::info!(vault = %address, %recipient, "vault fee recipient set");
        Ok(())
    }

    pub fn on_vault_share_change(
        &mut self,
        address: Address,
        from: Option<Address>,
        to: Option<Address>,
        amount: Amount,
    ) -> Result<()> {
        let gate = self.config.collateral_gate;
        vault::transfer(
            self.ledger,
            &address,
            from.as_ref(),
            to.as_ref(),
            amount,
            self.now,
            gate,
        )
    }

    pub fn accrue_vault_fee(&mut self, address: Address, fee_shares: Amount) -> Result<()> {
        if fee_shares == 0 {
            return Ok(());
        }
        let record: Vault = self.ledger.load(&address.to_string())?;
        let recipient = record
            .fee_recipient
            .ok_or_else(|| AccrualError::MissingFeeRecipient {
                target: address.to_string(),
            })?;
        self.on_vault_share_change(address, None, Some(recipient), fee_shares)
    }

    /// Store the history entry of the log that produced this batch.
    pub fn record_log(&mut self, record: &LogRecord) -> Result<()> {
        self.ledger.put(record)
    }
}

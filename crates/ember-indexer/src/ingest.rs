//! Replays decoded protocol logs through the engine.
//!
//! Every log is planned into engine calls first and then executed as one
//! engine batch, together with the log's history entry. The ingest cursor is
//! staged before the batch so that it lands in the same SQLite transaction
//! as the batch's records.

use std::collections::HashSet;
use std::io::BufRead;

use ember_db::{Cursor, DbError, SqliteStore};
use ember_engine::{AccrualError, Batch, Engine, ProgramKey};
use ember_types::entities::{log_record_id, Change, LogRecord, Market, Vault};
use ember_types::events::{Event, EventEnvelope};
use ember_types::{Address, Amount, BySide, Id, Side, Timestamp};
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// A line of the event log is not a valid envelope.
    #[error("line {line}: {source}")]
    Decode {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// Logs must arrive in strictly increasing chain order.
    #[error("log {block}:{log_index} does not follow {last_block}:{last_log_index}")]
    OutOfOrder {
        block: u64,
        log_index: u64,
        last_block: u64,
        last_log_index: u64,
    },

    /// A share amount does not fit a signed delta.
    #[error("amount {0} exceeds the signed share range")]
    AmountRange(Amount),

    #[error(transparent)]
    Accrual(#[from] AccrualError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IngestError>;

/// What happened to one log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// At or before the persisted cursor.
    AlreadyApplied,
    /// Market outside the eligibility whitelist.
    Ineligible,
}

/// Counters of one replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub applied: usize,
    pub already_applied: usize,
    pub ineligible: usize,
}

impl ReplaySummary {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Applied => self.applied += 1,
            Outcome::AlreadyApplied => self.already_applied += 1,
            Outcome::Ineligible => self.ineligible += 1,
        }
    }
}

/// One engine call.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Action {
    CreateMarket {
        market: Id,
        loan_token: Address,
        collateral_token: Address,
    },
    SetFeeRecipient(Address),
    Balance {
        market: Id,
        participant: Address,
        side: Side,
        delta: i128,
    },
    ProtocolFee {
        market: Id,
        fee_shares: Amount,
    },
    CreateVault(Address),
    VaultShares {
        vault: Address,
        from: Option<Address>,
        to: Option<Address>,
        amount: Amount,
    },
    VaultFee {
        vault: Address,
        fee_shares: Amount,
    },
    VaultFeeRecipient {
        vault: Address,
        recipient: Address,
    },
    Rates {
        program: ProgramKey,
        market: Id,
        rates: BySide<Amount>,
    },
}

impl Action {
    /// History entry for calls that move shares or rates.
    fn change(&self) -> Option<Change> {
        match self {
            Action::Balance {
                market,
                participant,
                side,
                delta,
            } => Some(Change::Position {
                market: *market,
                participant: *participant,
                side: *side,
                delta: *delta,
            }),
            Action::ProtocolFee { market, fee_shares } => Some(Change::ProtocolFee {
                market: *market,
                shares: *fee_shares,
            }),
            Action::VaultShares {
                vault,
                from,
                to,
                amount,
            } => Some(Change::VaultShares {
                vault: *vault,
                from: *from,
                to: *to,
                shares: *amount,
            }),
            Action::VaultFee { vault, fee_shares } => Some(Change::VaultFee {
                vault: *vault,
                shares: *fee_shares,
            }),
            Action::Rates {
                program,
                market,
                rates,
            } => Some(Change::Rates {
                program: program.id(),
                market: *market,
                rate_per_year: *rates,
            }),
            Action::CreateMarket { .. }
            | Action::SetFeeRecipient(_)
            | Action::CreateVault(_)
            | Action::VaultFeeRecipient { .. } => None,
        }
    }

    fn run(&self, batch: &mut Batch<'_, '_, SqliteStore>) -> ember_engine::Result<()> {
        match self {
            Action::CreateMarket {
                market,
                loan_token,
                collateral_token,
            } => {
                batch.create_market(*market, *loan_token, *collateral_token)?;
            }
            Action::SetFeeRecipient(recipient) => batch.set_fee_recipient(*recipient)?,
            Action::Balance {
                market,
                participant,
                side,
                delta,
            } => batch.on_balance_change(*market, *participant, *side, *delta)?,
            Action::ProtocolFee { market, fee_shares } => {
                batch.accrue_protocol_fee(*market, *fee_shares)?
            }
            Action::CreateVault(vault) => {
                batch.create_vault(*vault)?;
            }
            Action::VaultShares {
                vault,
                from,
                to,
                amount,
            } => batch.on_vault_share_change(*vault, *from, *to, *amount)?,
            Action::VaultFee { vault, fee_shares } => batch.accrue_vault_fee(*vault, *fee_shares)?,
            Action::VaultFeeRecipient { vault, recipient } => {
                batch.set_vault_fee_recipient(*vault, *recipient)?
            }
            Action::Rates {
                program,
                market,
                rates,
            } => {
                batch.on_rate_configured(*program, *market, *rates)?;
            }
        }
        Ok(())
    }
}

/// History entry of `envelope`, if any of its calls moved shares or rates.
fn history(envelope: &EventEnvelope, actions: &[Action]) -> Option<LogRecord> {
    let changes: Vec<Change> = actions.iter().filter_map(Action::change).collect();
    if changes.is_empty() {
        return None;
    }
    Some(LogRecord {
        id: log_record_id(envelope.block, envelope.log_index),
        block: envelope.block,
        log_index: envelope.log_index,
        timestamp: envelope.timestamp,
        source: envelope.source,
        event: envelope.event.name().to_string(),
        changes,
    })
}

fn signed(amount: Amount) -> Result<i128> {
    i128::try_from(amount).map_err(|_| IngestError::AmountRange(amount))
}

fn negated(amount: Amount) -> Result<i128> {
    Ok(-signed(amount)?)
}

pub struct Ingestor {
    engine: Engine<SqliteStore>,
    eligible: Option<HashSet<Id>>,
    lending_protocol: Option<Address>,
    last_seen: Option<Cursor>,
}

impl Ingestor {
    pub fn new(engine: Engine<SqliteStore>) -> Self {
        Self {
            engine,
            eligible: None,
            lending_protocol: None,
            last_seen: None,
        }
    }

    /// Restrict market events to `markets`.
    pub fn with_eligible_markets(mut self, markets: impl IntoIterator<Item = Id>) -> Self {
        self.eligible = Some(markets.into_iter().collect());
        self
    }

    /// Vault share transfers to or from `address` are collateral moves and
    /// are carried by the lending events instead.
    pub fn with_lending_protocol(mut self, address: Address) -> Self {
        self.lending_protocol = Some(address);
        self
    }

    pub fn engine(&self) -> &Engine<SqliteStore> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut Engine<SqliteStore> {
        &mut self.engine
    }

    pub fn into_engine(self) -> Engine<SqliteStore> {
        self.engine
    }

    /// Apply every line of an NDJSON log. Blank lines are ignored.
    pub fn replay(&mut self, reader: impl BufRead) -> Result<ReplaySummary> {
        let mut summary = ReplaySummary::default();
        for (number, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let envelope: EventEnvelope = serde_json::from_str(&line)
                .map_err(|source| IngestError::Decode {
                    line: number + 1,
                    source,
                })?;
            summary.record(self.apply(&envelope)?);
        }
        info!(
            applied = summary.applied,
            already_applied = summary.already_applied,
            ineligible = summary.ineligible,
            "replay finished"
        );
        Ok(summary)
    }

    /// Apply one log.
    pub fn apply(&mut self, envelope: &EventEnvelope) -> Result<Outcome> {
        let position = Cursor {
            block: envelope.block,
            log_index: envelope.log_index,
        };
        if let Some(last) = self.last_seen {
            if position <= last {
                return Err(IngestError::OutOfOrder {
                    block: position.block,
                    log_index: position.log_index,
                    last_block: last.block,
                    last_log_index: last.log_index,
                });
            }
        }
        self.last_seen = Some(position);

        if self
            .engine
            .store()
            .cursor()?
            .is_some_and(|applied| position <= applied)
        {
            debug!(block = position.block, log_index = position.log_index, "log already applied");
            return Ok(Outcome::AlreadyApplied);
        }

        if let (Some(eligible), Some(market)) = (&self.eligible, envelope.event.market()) {
            if !eligible.contains(market) {
                debug!(%market, event = envelope.event.name(), "market not eligible for rewards");
                self.engine.store_mut().stage_cursor(position);
                self.engine.store_mut().flush_cursor()?;
                return Ok(Outcome::Ineligible);
            }
        }

        let actions = self.plan(envelope)?;
        let record = history(envelope, &actions);
        self.execute(&actions, record.as_ref(), position, envelope.timestamp)?;
        debug!(
            block = position.block,
            log_index = position.log_index,
            event = envelope.event.name(),
            calls = actions.len(),
            "log applied"
        );
        Ok(Outcome::Applied)
    }

    /// Run every call of one log, its history entry and the cursor as a
    /// single unit of work.
    fn execute(
        &mut self,
        actions: &[Action],
        record: Option<&LogRecord>,
        position: Cursor,
        now: Timestamp,
    ) -> Result<()> {
        self.engine.store_mut().stage_cursor(position);
        let outcome = self.engine.batch(now, |batch| {
            for action in actions {
                action.run(batch)?;
            }
            if let Some(record) = record {
                batch.record_log(record)?;
            }
            Ok(())
        });
        if let Err(e) = outcome {
            self.engine.store_mut().discard_cursor();
            return Err(e.into());
        }
        // A batch with no writes leaves the cursor staged.
        self.engine.store_mut().flush_cursor()?;
        Ok(())
    }

    /// Vault whose shares are the collateral token of `market`, if any.
    fn collateral_vault(&self, market: &Id) -> Result<Option<Address>> {
        let Some(record) = self.engine.get::<Market>(&market.to_string())? else {
            return Ok(None);
        };
        let token = record.collateral_token;
        if token.is_zero() {
            return Ok(None);
        }
        Ok(self
            .engine
            .get::<Vault>(&token.to_string())?
            .map(|v| v.address))
    }

    fn plan(&self, envelope: &EventEnvelope) -> Result<Vec<Action>> {
        let vault = envelope.source;
        let balance = |market: &Id, participant: &Address, side: Side, delta: i128| Action::Balance {
            market: *market,
            participant: *participant,
            side,
            delta,
        };

        let actions = match &envelope.event {
            Event::CreateMarket {
                market,
                loan_token,
                collateral_token,
            } => vec![Action::CreateMarket {
                market: *market,
                loan_token: *loan_token,
                collateral_token: *collateral_token,
            }],
            Event::SetFeeRecipient { recipient } => vec![Action::SetFeeRecipient(*recipient)],
            Event::Supply {
                market,
                on_behalf,
                shares,
            } => vec![balance(market, on_behalf, Side::Supply, signed(*shares)?)],
            Event::Withdraw {
                market,
                on_behalf,
                shares,
            } => vec![balance(market, on_behalf, Side::Supply, negated(*shares)?)],
            Event::Borrow {
                market,
                on_behalf,
                shares,
            } => vec![balance(market, on_behalf, Side::Borrow, signed(*shares)?)],
            Event::Repay {
                market,
                on_behalf,
                shares,
            } => vec![balance(market, on_behalf, Side::Borrow, negated(*shares)?)],
            Event::SupplyCollateral {
                market,
                caller,
                on_behalf,
                assets,
            } => {
                let mut actions = vec![balance(market, on_behalf, Side::Collateral, signed(*assets)?)];
                if caller != on_behalf {
                    if let Some(vault) = self.collateral_vault(market)? {
                        actions.push(Action::VaultShares {
                            vault,
                            from: Some(*caller),
                            to: Some(*on_behalf),
                            amount: *assets,
                        });
                    }
                }
                actions
            }
            Event::WithdrawCollateral {
                market,
                on_behalf,
                receiver,
                assets,
            } => {
                let mut actions = vec![balance(market, on_behalf, Side::Collateral, negated(*assets)?)];
                if on_behalf != receiver {
                    if let Some(vault) = self.collateral_vault(market)? {
                        actions.push(Action::VaultShares {
                            vault,
                            from: Some(*on_behalf),
                            to: Some(*receiver),
                            amount: *assets,
                        });
                    }
                }
                actions
            }
            Event::Liquidate {
                market,
                caller,
                borrower,
                repaid_shares,
                bad_debt_shares,
                seized_assets,
            } => {
                let repaid = repaid_shares
                    .checked_add(*bad_debt_shares)
                    .ok_or(IngestError::AmountRange(*repaid_shares))?;
                let mut actions = vec![
                    balance(market, borrower, Side::Borrow, negated(repaid)?),
                    balance(market, borrower, Side::Collateral, negated(*seized_assets)?),
                ];
                if let Some(vault) = self.collateral_vault(market)? {
                    actions.push(Action::VaultShares {
                        vault,
                        from: Some(*borrower),
                        to: Some(*caller),
                        amount: *seized_assets,
                    });
                }
                actions
            }
            Event::AccrueInterest { market, fee_shares } => vec![Action::ProtocolFee {
                market: *market,
                fee_shares: *fee_shares,
            }],
            Event::CreateVault { vault } => vec![Action::CreateVault(*vault)],
            Event::VaultDeposit { owner, shares } => vec![Action::VaultShares {
                vault,
                from: None,
                to: Some(*owner),
                amount: *shares,
            }],
            Event::VaultWithdraw { owner, shares } => vec![Action::VaultShares {
                vault,
                from: Some(*owner),
                to: None,
                amount: *shares,
            }],
            Event::VaultTransfer { from, to, value } => {
                let collateral_move = self
                    .lending_protocol
                    .is_some_and(|protocol| *from == protocol || *to == protocol);
                if from.is_zero() || to.is_zero() || from == to || collateral_move {
                    Vec::new()
                } else {
                    vec![Action::VaultShares {
                        vault,
                        from: Some(*from),
                        to: Some(*to),
                        amount: *value,
                    }]
                }
            }
            Event::VaultAccrueFee { fee_shares } => vec![Action::VaultFee {
                vault,
                fee_shares: *fee_shares,
            }],
            Event::VaultSetFeeRecipient { recipient } => vec![Action::VaultFeeRecipient {
                vault,
                recipient: *recipient,
            }],
            Event::EmissionSet {
                sender,
                reward_token,
                distributor,
                market,
                supply_per_year,
                borrow_per_year,
                collateral_per_year,
            } => vec![Action::Rates {
                program: ProgramKey {
                    sender: *sender,
                    reward_token: *reward_token,
                    distributor: *distributor,
                },
                market: *market,
                rates: BySide {
                    supply: *supply_per_year,
                    borrow: *borrow_per_year,
                    collateral: *collateral_per_year,
                },
            }],
        };
        Ok(actions)
    }
}

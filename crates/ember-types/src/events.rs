//! Ingestion payloads: one decoded protocol log per line of the event file.
//!
//! Share and asset amounts travel as decimal strings.

use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::{Address, Amount, Id, Timestamp};

/// A decoded log with its chain position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub block: u64,
    pub log_index: u64,
    pub timestamp: Timestamp,
    /// Emitting contract: the lending protocol, a vault or the rate provider.
    pub source: Address,
    pub event: Event,
}

impl EventEnvelope {
    /// Position of the log in the chain, strictly increasing across a replay.
    pub fn cursor(&self) -> (u64, u64) {
        (self.block, self.log_index)
    }
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    // Lending protocol
    CreateMarket {
        market: Id,
        loan_token: Address,
        collateral_token: Address,
    },
    SetFeeRecipient {
        recipient: Address,
    },
    Supply {
        market: Id,
        on_behalf: Address,
        #[serde_as(as = "DisplayFromStr")]
        shares: Amount,
    },
    Withdraw {
        market: Id,
        on_behalf: Address,
        #[serde_as(as = "DisplayFromStr")]
        shares: Amount,
    },
    Borrow {
        market: Id,
        on_behalf: Address,
        #[serde_as(as = "DisplayFromStr")]
        shares: Amount,
    },
    Repay {
        market: Id,
        on_behalf: Address,
        #[serde_as(as = "DisplayFromStr")]
        shares: Amount,
    },
    SupplyCollateral {
        market: Id,
        caller: Address,
        on_behalf: Address,
        #[serde_as(as = "DisplayFromStr")]
        assets: Amount,
    },
    WithdrawCollateral {
        market: Id,
        on_behalf: Address,
        receiver: Address,
        #[serde_as(as = "DisplayFromStr")]
        assets: Amount,
    },
    Liquidate {
        market: Id,
        caller: Address,
        borrower: Address,
        #[serde_as(as = "DisplayFromStr")]
        repaid_shares: Amount,
        #[serde_as(as = "DisplayFromStr")]
        bad_debt_shares: Amount,
        #[serde_as(as = "DisplayFromStr")]
        seized_assets: Amount,
    },
    AccrueInterest {
        market: Id,
        #[serde_as(as = "DisplayFromStr")]
        fee_shares: Amount,
    },

    // Vaults (source is the vault)
    CreateVault {
        vault: Address,
    },
    VaultDeposit {
        owner: Address,
        #[serde_as(as = "DisplayFromStr")]
        shares: Amount,
    },
    VaultWithdraw {
        owner: Address,
        #[serde_as(as = "DisplayFromStr")]
        shares: Amount,
    },
    VaultTransfer {
        from: Address,
        to: Address,
        #[serde_as(as = "DisplayFromStr")]
        value: Amount,
    },
    VaultAccrueFee {
        #[serde_as(as = "DisplayFromStr")]
        fee_shares: Amount,
    },
    VaultSetFeeRecipient {
        recipient: Address,
    },

    // Rate provider
    EmissionSet {
        sender: Address,
        reward_token: Address,
        distributor: Address,
        market: Id,
        #[serde_as(as = "DisplayFromStr")]
        supply_per_year: Amount,
        #[serde_as(as = "DisplayFromStr")]
        borrow_per_year: Amount,
        #[serde_as(as = "DisplayFromStr")]
        collateral_per_year: Amount,
    },
}

impl Event {
    /// Market the event touches, if it is a lending-market event.
    pub fn market(&self) -> Option<&Id> {
        match self {
            Event::CreateMarket { market, .. }
            | Event::Supply { market, .. }
            | Event::Withdraw { market, .. }
            | Event::Borrow { market, .. }
            | Event::Repay { market, .. }
            | Event::SupplyCollateral { market, .. }
            | Event::WithdrawCollateral { market, .. }
            | Event::Liquidate { market, .. }
            | Event::AccrueInterest { market, .. }
            | Event::EmissionSet { market, .. } => Some(market),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Event::CreateMarket { .. } => "create_market",
            Event::SetFeeRecipient { .. } => "set_fee_recipient",
            Event::Supply { .. } => "supply",
            Event::Withdraw { .. } => "withdraw",
            Event::Borrow { .. } => "borrow",
            Event::Repay { .. } => "repay",
            Event::SupplyCollateral { .. } => "supply_collateral",
            Event::WithdrawCollateral { .. } => "withdraw_collateral",
            Event::Liquidate { .. } => "liquidate",
            Event::AccrueInterest { .. } => "accrue_interest",
            Event::CreateVault { .. } => "create_vault",
            Event::VaultDeposit { .. } => "vault_deposit",
            Event::VaultWithdraw { .. } => "vault_withdraw",
            Event::VaultTransfer { .. } => "vault_transfer",
            Event::VaultAccrueFee { .. } => "vault_accrue_fee",
            Event::VaultSetFeeRecipient { .. } => "vault_set_fee_recipient",
            Event::EmissionSet { .. } => "emission_set",
        }
    }
}

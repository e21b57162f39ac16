//! Cascading vault settlement.
//!
//! A vault is a participant in underlying markets. Whatever it accrues there
//! is folded into a vault-scoped index per program, which its depositors
//! settle against in proportion to their vault shares. Depositors are settled
//! lazily: only the ones whose shares change (or who query) are touched.

use ember_types::entities::{
    program_accrual_id, vault_position_checkpoint_id, vault_position_id,
    vault_reward_checkpoint_id, ProgramAccrual, Vault, VaultPosition, VaultPositionCheckpoint,
    VaultRewardCheckpoint,
};
use ember_types::{Address, Amount, Timestamp};

use crate::accrual::{self, Lump};
use crate::settlement::{self, credit_program, load_participant};
use crate::store::{Ledger, Store};
use crate::streams::CollateralGate;
use crate::{AccrualError, Result};

/// Load a vault or create it with no shares.
pub fn open<S: Store + ?Sized>(
    ledger: &mut Ledger<'_, S>,
    address: &Address,
    now: Timestamp,
) -> Result<Vault> {
    if let Some(vault) = ledger.get::<Vault>(&address.to_string())? {
        return Ok(vault);
    }
    let vault = Vault::new(*address, now);
    ledger.put(&vault)?;
    tracing::info!(vault = %address, "vault created");
    Ok(vault)
}

/// Pull the vault's fresh market rewards into its per-program indices.
///
/// Rewards that arrive while the vault has no shares cannot be attributed to
/// anyone; they are recorded as stranded and reported.
pub fn settle_vault<S: Store + ?Sized>(
    ledger: &mut Ledger<'_, S>,
    address: &Address,
    now: Timestamp,
    gate: CollateralGate,
) -> Result<Vault> {
    let vault: Vault = ledger.load(&address.to_string())?;

    let markets = load_participant(ledger, address)?.markets;
    for market in &markets {
        settlement::settle(ledger, market, address, now, gate)?;
    }

    let programs = load_participant(ledger, address)?.programs;
    for program in &programs {
        let accrual: ProgramAccrual =
            ledger.load(&program_accrual_id(address, program).to_string())?;
        let key = vault_reward_checkpoint_id(address, program).to_string();
        let mut checkpoint =
            ledger.get_or(&key, || VaultRewardCheckpoint::new(*address, *program))?;

        let total = accrual.direct();
        let delta = total.checked_sub(checkpoint.accrued).ok_or_else(|| {
            AccrualError::Inconsistent(format!(
                "vault {address} program {program} accrual {total} below checkpoint {}",
                checkpoint.accrued
            ))
        })?;
        if delta == 0 {
            continue;
        }

        if vault.total_shares == 0 {
            checkpoint.stranded = checkpoint
                .stranded
                .checked_add(delta)
                .ok_or(AccrualError::Overflow("vault stranded"))?;
            tracing::warn!(
                vault = %address,
                program = %program,
                amount = delta,
                "rewards donated to a vault without shares"
            );
        } else {
            let step = accrual::advance(checkpoint.last_index, &Lump(delta), 0, vault.total_shares)?;
            checkpoint.last_index = step.index;
            tracing::debug!(vault = %address, program = %program, amount = delta, "vault index advanced");
        }
        checkpoint.accrued = total;
        ledger.put(&checkpoint)?;
    }
    Ok(vault)
}

/// Settle a depositor against the vault's current indices.
///
/// Must run after [`settle_vault`] and before the depositor's shares change.
pub fn settle_depositor<S: Store + ?Sized>(
    ledger: &mut Ledger<'_, S>,
    vault: &Address,
    depositor: &Address,
) -> Result<VaultPosition> {
    let key = vault_position_id(depositor, vault).to_string();
    let position = match ledger.get::<VaultPosition>(&key)? {
        Some(position) => position,
        None => {
            let mut record = load_participant(ledger, depositor)?;
            record.vaults.push(*vault);
            ledger.put(&record)?;
            let position = VaultPosition::new(*depositor, *vault);
            ledger.put(&position)?;
            position
        }
    };

    let programs = load_participant(ledger, vault)?.programs;
    for program in &programs {
        let Some(vault_checkpoint) = ledger.get::<VaultRewardCheckpoint>(
            &vault_reward_checkpoint_id(vault, program).to_string(),
        )?
        else {
            continue;
        };
        let key = vault_position_checkpoint_id(&position.id, program).to_string();
        let mut checkpoint =
            ledger.get_or(&key, || VaultPositionCheckpoint::new(&position, *program))?;
        let owed = accrual::owed(vault_checkpoint.last_index, checkpoint.last_index, position.shares)?;
        checkpoint.last_index = vault_checkpoint.last_index;
        checkpoint.accrued = checkpoint
            .accrued
            .checked_add(owed)
            .ok_or(AccrualError::Overflow("vault position accrued"))?;
        ledger.put(&checkpoint)?;

        if owed > 0 {
            credit_program(ledger, depositor, program, |accrual| {
                accrual.from_vaults = accrual.from_vaults.checked_add(owed)?;
                Some(())
            })?;
            tracing::debug!(
                vault = %vault,
                depositor = %depositor,
                program = %program,
                amount = owed,
                "vault position settled"
            );
        }
    }
    Ok(position)
}

/// Move `amount` vault shares from `from` to `to`, settling both first.
///
/// `from = None` mints, `to = None` burns.
///
/// # Errors
///
/// - [`AccrualError::MissingEntity`] if the vault does not exist
/// - [`AccrualError::ShareUnderflow`] if `from` holds fewer than `amount` shares
pub fn transfer<S: Store + ?Sized>(
    ledger: &mut Ledger<'_, S>,
    vault: &Address,
    from: Option<&Address>,
    to: Option<&Address>,
    amount: Amount,
    now: Timestamp,
    gate: CollateralGate,
) -> Result<()> {
    settle_vault(ledger, vault, now, gate)?;
    for holder in [from, to].into_iter().flatten() {
        settle_depositor(ledger, vault, holder)?;
    }
    if amount == 0 {
        return Ok(());
    }

    if let Some(from) = from {
        let mut position: VaultPosition =
            ledger.load(&vault_position_id(from, vault).to_string())?;
        position.shares = position
            .shares
            .checked_sub(amount)
            .ok_or(AccrualError::ShareUnderflow {
                holder: from.to_string(),
                side: ember_types::Side::Supply,
                held: position.shares,
                removed: amount,
            })?;
        ledger.put(&position)?;
    }
    if let Some(to) = to {
        let mut position: VaultPosition = ledger.load(&vault_position_id(to, vault).to_string())?;
        position.shares = position
            .shares
            .checked_add(amount)
            .ok_or(AccrualError::Overflow("vault position shares"))?;
        ledger.put(&position)?;
    }

    let mut record: Vault = ledger.load(&vault.to_string())?;
    match (from, to) {
        (None, Some(_)) => {
            record.total_shares = record
                .total_shares
                .checked_add(amount)
                .ok_or(AccrualError::Overflow("vault shares"))?;
        }
        (Some(_), None) => {
            record.total_shares = record.total_shares.checked_sub(amount).ok_or_else(|| {
                AccrualError::Inconsistent(format!("vault {vault} total below a deposit"))
            })?;
        }
        _ => {}
    }
    ledger.put(&record)?;

    tracing::debug!(
        vault = %vault,
        from = ?from,
        to = ?to,
        amount,
        total_shares = record.total_shares,
        "vault shares moved"
    );
    Ok(())
}
